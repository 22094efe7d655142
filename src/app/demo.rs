use crate::config::ProxyConfig;
use crate::core::forwarder::Forwarder;
use crate::domain::model::{forwarded_headers, ForwardRequest, Provider};
use crate::domain::ports::{Sleeper, Transport};
use axum::http::StatusCode;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub invite_code: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub invite_code: Option<String>,
    #[serde(default)]
    pub contents: Value,
    pub system_instruction: Option<Value>,
    #[serde(default)]
    pub enable_search: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchSource {
    pub uri: String,
    pub title: String,
}

pub type DemoReply = (StatusCode, Value);

/// 搶先體驗：邀請碼驗證後使用伺服器端金鑰呼叫 Gemini
pub struct DemoService {
    invite_codes: Vec<String>,
    gemini_api_key: Option<String>,
    gemini_base_url: String,
    use_network_proxy: bool,
    model: String,
}

impl DemoService {
    pub fn from_config(config: &ProxyConfig) -> Self {
        let target = config.provider_target(Provider::Gemini);
        Self {
            invite_codes: config.invite_codes(),
            gemini_api_key: config.gemini_api_key(),
            gemini_base_url: target.base_url,
            use_network_proxy: target.use_network_proxy,
            model: config.demo_model().to_string(),
        }
    }

    fn is_valid_code(&self, code: &str) -> bool {
        let code = code.trim();
        self.invite_codes.iter().any(|valid| valid == code)
    }

    pub fn verify(&self, request: VerifyRequest) -> DemoReply {
        let code = match request.invite_code {
            Some(Value::String(code)) if !code.is_empty() => code,
            _ => {
                return (
                    StatusCode::BAD_REQUEST,
                    json!({ "valid": false, "error": "Invite code is required" }),
                )
            }
        };

        if self.invite_codes.is_empty() {
            tracing::error!("[Demo Verify] No invite codes configured (DEMO_INVITE_CODES)");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "valid": false, "error": "Early access is not available yet" }),
            );
        }

        let is_valid = self.is_valid_code(&code);
        let masked: String = code.chars().take(4).collect();
        tracing::info!(
            "[Demo Verify] Invite code {}*** -> {}",
            masked,
            if is_valid { "valid" } else { "invalid" }
        );

        if is_valid {
            (StatusCode::OK, json!({ "valid": true }))
        } else {
            (
                StatusCode::UNAUTHORIZED,
                json!({ "valid": false, "error": "Invalid invite code" }),
            )
        }
    }

    pub fn build_gemini_body(&self, request: &GenerateRequest) -> Value {
        let mime_type = if request.enable_search {
            "text/plain"
        } else {
            "application/json"
        };
        let mut body = json!({
            "contents": request.contents,
            "generationConfig": {
                "temperature": 0.7,
                "responseMimeType": mime_type
            }
        });

        if let Some(instruction) = &request.system_instruction {
            body["systemInstruction"] = instruction.clone();
        }
        if request.enable_search {
            body["tools"] = json!([{ "googleSearch": {} }]);
        }

        body
    }

    pub async fn generate<T: Transport, S: Sleeper>(
        &self,
        forwarder: &Forwarder<T, S>,
        request: GenerateRequest,
    ) -> DemoReply {
        let code_ok = request
            .invite_code
            .as_deref()
            .map(|code| self.is_valid_code(code))
            .unwrap_or(false);
        if !code_ok {
            return (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Invite code is invalid or expired" }),
            );
        }

        let Some(api_key) = &self.gemini_api_key else {
            tracing::error!("[Demo Generate] GEMINI_API_KEY is not configured");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Service temporarily unavailable" }),
            );
        };

        tracing::info!(
            "[Demo Generate] Starting generation, search: {}",
            if request.enable_search { "on" } else { "off" }
        );

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.gemini_base_url.trim_end_matches('/'),
            self.model,
            api_key
        );
        let body = self.build_gemini_body(&request);
        let forward_request = ForwardRequest::new(Method::POST, url)
            .with_headers(forwarded_headers(std::iter::empty()))
            .with_body(Some(body.to_string()))
            .with_network_proxy(self.use_network_proxy);

        let response = match forwarder.forward(&forward_request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("[Demo Generate] Request failed: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Request failed, please try again later" }),
                );
            }
        };

        if !response.ok {
            tracing::error!("[Demo Generate] Gemini API error: {}", response.text());
            let status =
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
            return (
                status,
                json!({ "error": format!("AI service call failed: {}", response.status) }),
            );
        }

        match serde_json::from_slice::<Value>(&response.data) {
            Ok(data) => self.interpret_candidates(&data),
            Err(e) => {
                tracing::error!("[Demo Generate] Unparseable Gemini response: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Request failed, please try again later" }),
                )
            }
        }
    }

    /// 檢查 candidates、安全過濾並擷取搜尋來源
    pub fn interpret_candidates(&self, data: &Value) -> DemoReply {
        let Some(candidate) = data["candidates"].as_array().and_then(|c| c.first()) else {
            if let Some(reason) = data["promptFeedback"]["blockReason"].as_str() {
                return (
                    StatusCode::BAD_REQUEST,
                    json!({ "error": format!("Content blocked by safety filter: {}", reason) }),
                );
            }
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "AI returned an empty response, please retry" }),
            );
        };

        if candidate["finishReason"].as_str() == Some("SAFETY") {
            return (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Content blocked by safety filter, please adjust the input" }),
            );
        }

        let search_sources: Option<Vec<SearchSource>> = candidate["groundingMetadata"]
            ["groundingChunks"]
            .as_array()
            .map(|chunks| {
                chunks
                    .iter()
                    .filter_map(|chunk| {
                        let web = chunk.get("web")?;
                        Some(SearchSource {
                            uri: web["uri"].as_str().unwrap_or_default().to_string(),
                            title: web["title"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            });
        if let Some(sources) = &search_sources {
            tracing::info!("[Demo Generate] Search sources: {}", sources.len());
        }

        let content = candidate["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        tracing::info!("[Demo Generate] Done, content length: {}", content.len());

        let mut reply = json!({ "content": content, "model": self.model });
        if let Some(sources) = search_sources {
            reply["searchSources"] = json!(sources);
        }
        (StatusCode::OK, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::toml_config::DemoConfig;

    fn service(codes: &str, key: Option<&str>) -> DemoService {
        let config = ProxyConfig {
            demo: Some(DemoConfig {
                invite_codes: Some(codes.to_string()),
                gemini_api_key: key.map(str::to_string),
                model: Some("gemini-test".to_string()),
            }),
            ..ProxyConfig::default()
        };
        DemoService::from_config(&config)
    }

    fn verify(service: &DemoService, code: Value) -> DemoReply {
        service.verify(VerifyRequest {
            invite_code: Some(code),
        })
    }

    #[test]
    fn test_verify_invite_codes() {
        let service = service("alpha,beta", None);

        assert_eq!(verify(&service, json!(" beta ")).0, StatusCode::OK);
        assert_eq!(verify(&service, json!("gamma")).0, StatusCode::UNAUTHORIZED);
        assert_eq!(verify(&service, json!(42)).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            service.verify(VerifyRequest { invite_code: None }).0,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_verify_without_configured_codes() {
        let service = service(" , ", None);
        let (status, body) = verify(&service, json!("alpha"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["valid"], json!(false));
    }

    #[test]
    fn test_build_gemini_body_with_search() {
        let service = service("alpha", Some("key"));
        let request = GenerateRequest {
            invite_code: Some("alpha".to_string()),
            contents: json!([{ "role": "user", "parts": [{ "text": "hi" }] }]),
            system_instruction: Some(json!({ "parts": [{ "text": "be brief" }] })),
            enable_search: true,
        };

        let body = service.build_gemini_body(&request);

        assert_eq!(body["generationConfig"]["responseMimeType"], "text/plain");
        assert_eq!(body["generationConfig"]["temperature"], 0.7);
        assert_eq!(body["tools"], json!([{ "googleSearch": {} }]));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
    }

    #[test]
    fn test_build_gemini_body_without_search() {
        let service = service("alpha", Some("key"));
        let request = GenerateRequest {
            invite_code: Some("alpha".to_string()),
            contents: json!([]),
            system_instruction: None,
            enable_search: false,
        };

        let body = service.build_gemini_body(&request);

        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert!(body.get("tools").is_none());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_interpret_candidates() {
        let service = service("alpha", Some("key"));

        let (status, body) = service.interpret_candidates(&json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"name\":\"Aria\"}" }] },
                "groundingMetadata": { "groundingChunks": [
                    { "web": { "uri": "https://a.example", "title": "A" } },
                    { "retrievedContext": {} }
                ]}
            }]
        }));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], "{\"name\":\"Aria\"}");
        assert_eq!(body["model"], "gemini-test");
        assert_eq!(
            body["searchSources"],
            json!([{ "uri": "https://a.example", "title": "A" }])
        );

        let (status, _) = service.interpret_candidates(&json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        }));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = service.interpret_candidates(&json!({
            "promptFeedback": { "blockReason": "OTHER" }
        }));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("OTHER"));

        let (status, _) = service.interpret_candidates(&json!({ "candidates": [] }));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
