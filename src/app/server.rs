use crate::adapters::{CurlTransport, NativeTransport};
use crate::app::demo::{DemoService, GenerateRequest, VerifyRequest};
use crate::app::search::{SearchRequest, SearchResponse, SearchService};
use crate::config::{ProxyConfig, TransportKind};
use crate::core::forwarder::Forwarder;
use crate::domain::model::{forwarded_headers, ForwardRequest, Provider};
use crate::domain::ports::Transport;
use crate::utils::error::{ProxyError, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub type DynForwarder = Forwarder<Box<dyn Transport>>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub forwarder: Arc<DynForwarder>,
    pub search: Arc<SearchService>,
    pub demo: Arc<DemoService>,
}

impl AppState {
    pub fn from_config(config: ProxyConfig) -> Result<Self> {
        let transport = build_transport(&config)?;
        Self::with_transport(config, transport)
    }

    /// 指定傳輸層建立狀態（測試時替換成假的 transport）
    pub fn with_transport(config: ProxyConfig, transport: Box<dyn Transport>) -> Result<Self> {
        let forwarder = Forwarder::new(transport, config.retry_policy());
        Ok(Self {
            search: Arc::new(SearchService::from_config(&config)?),
            demo: Arc::new(DemoService::from_config(&config)),
            forwarder: Arc::new(forwarder),
            config: Arc::new(config),
        })
    }
}

pub fn build_transport(config: &ProxyConfig) -> Result<Box<dyn Transport>> {
    let proxy_url = config.network_proxy_url();
    match config.transport_kind() {
        TransportKind::Curl => Ok(Box::new(
            CurlTransport::new(config.curl_path())
                .with_network_proxy(proxy_url.map(str::to_string))
                .with_timeouts(config.max_time(), config.connect_timeout())
                .with_temp_dir(config.temp_dir()),
        )),
        TransportKind::Native => Ok(Box::new(NativeTransport::with_timeouts(
            proxy_url,
            config.max_time(),
            config.connect_timeout(),
        )?)),
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.body_limit_bytes();

    Router::new()
        .route("/health", get(health))
        .route("/api/search", post(search_handler))
        .route("/api/demo/verify", post(verify_handler))
        .route("/api/demo/generate", post(generate_handler))
        .route("/api/{provider}", any(proxy_handler))
        .route("/api/{provider}/", any(proxy_handler))
        .route("/api/{provider}/{*path}", any(proxy_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.bind_string();
    let listener = TcpListener::bind(&addr).await?;
    log_endpoints(&state, &addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn log_endpoints(state: &AppState, addr: &str) {
    tracing::info!("🚀 API Proxy Server running at http://{}", addr);
    match state.config.network_proxy_url() {
        Some(url) => tracing::info!("📡 Network proxy: {}", url),
        None => tracing::info!("📡 Network proxy: disabled"),
    }
    tracing::info!("Transport: {}", state.forwarder.transport().name());
    for provider in Provider::ALL {
        let target = state.config.provider_target(provider);
        tracing::info!(
            "  /api/{}/* -> {} ({})",
            provider,
            target.base_url,
            if target.use_network_proxy {
                "via proxy"
            } else {
                "direct"
            }
        );
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn proxy_handler(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let provider = params.get("provider").map(String::as_str).unwrap_or_default();
    match forward_inbound(&state, provider, method, &uri, &headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward_inbound(
    state: &AppState,
    provider: &str,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let provider: Provider = provider.parse()?;
    let target = state.config.provider_target(provider);
    let target_url = upstream_url(&target.base_url, provider, uri);

    let method = reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(|e| {
        ProxyError::BadRequest {
            message: format!("unsupported method: {}", e),
        }
    })?;
    let inbound_headers = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)));

    let request = ForwardRequest::new(method, target_url)
        .with_headers(forwarded_headers(inbound_headers))
        .with_body(Some(body.to_vec()))
        .with_network_proxy(target.use_network_proxy);

    let response = state.forwarder.forward(&request).await?;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = response
        .content_type
        .unwrap_or_else(|| "application/json".to_string());
    Ok((status, [(header::CONTENT_TYPE, content_type)], response.data).into_response())
}

/// 以原始（未解碼）路徑與 query string 組出上游 URL
pub fn upstream_url(base_url: &str, provider: Provider, uri: &Uri) -> String {
    let prefix = format!("/api/{}", provider.slug());
    let raw_path = uri.path();
    let rest = if raw_path.len() >= prefix.len()
        && raw_path[..prefix.len()].eq_ignore_ascii_case(&prefix)
    {
        &raw_path[prefix.len()..]
    } else {
        raw_path
    };

    let mut url = format!("{}{}", base_url.trim_end_matches('/'), rest);
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }
    url
}

async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    Ok(Json(state.search.handle(request).await?))
}

async fn verify_handler(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> (StatusCode, Json<Value>) {
    let (status, body) = state.demo.verify(request);
    (status, Json(body))
}

async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> (StatusCode, Json<Value>) {
    let (status, body) = state.demo.generate(state.forwarder.as_ref(), request).await;
    (status, Json(body))
}
