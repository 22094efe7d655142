use crate::adapters::curl::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_TIME};
use crate::domain::model::{ForwardRequest, UpstreamResponse};
use crate::domain::ports::Transport;
use crate::utils::error::{ProxyError, Result};
use async_trait::async_trait;
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use reqwest::{Client, Proxy};
use std::time::Duration;

/// reqwest 版本的傳輸層：同樣的逾時與代理規則，不需要子程序與暫存檔
#[derive(Debug, Clone)]
pub struct NativeTransport {
    direct: Client,
    proxied: Option<Client>,
}

impl NativeTransport {
    pub fn new(network_proxy: Option<&str>) -> Result<Self> {
        Self::with_timeouts(network_proxy, DEFAULT_MAX_TIME, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeouts(
        network_proxy: Option<&str>,
        max_time: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let direct = Self::client_builder(max_time, connect_timeout)
            .no_proxy()
            .build()?;
        let proxied = match network_proxy {
            Some(url) => Some(
                Self::client_builder(max_time, connect_timeout)
                    .proxy(Proxy::all(url)?)
                    .build()?,
            ),
            None => None,
        };

        Ok(Self { direct, proxied })
    }

    fn client_builder(max_time: Duration, connect_timeout: Duration) -> reqwest::ClientBuilder {
        Client::builder()
            .timeout(max_time)
            .connect_timeout(connect_timeout)
            .http1_only()
            .pool_max_idle_per_host(0)
    }

    fn client_for(&self, request: &ForwardRequest) -> Result<&Client> {
        if !request.use_network_proxy {
            return Ok(&self.direct);
        }
        self.proxied
            .as_ref()
            .ok_or_else(|| ProxyError::MissingConfigError {
                field: "network_proxy.url".to_string(),
            })
    }
}

#[async_trait]
impl Transport for NativeTransport {
    async fn send(&self, request: &ForwardRequest) -> Result<UpstreamResponse> {
        let client = self.client_for(request)?;

        let mut builder = client
            .request(request.method.clone(), &request.target_url)
            .header(CONNECTION, "close");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // 不依 charset 重新解碼，原樣轉交
        let body = response.bytes().await?.to_vec();

        Ok(UpstreamResponse {
            status,
            body,
            content_type,
        })
    }

    fn name(&self) -> &'static str {
        "native"
    }
}
