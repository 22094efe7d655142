use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::error::ProxyError;

/// 一次轉發的請求描述，每個入站請求建立一次，回應後即丟棄
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub target_url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub use_network_proxy: bool,
}

impl ForwardRequest {
    pub fn new(method: Method, target_url: impl Into<String>) -> Self {
        Self {
            method,
            target_url: target_url.into(),
            headers: forwarded_headers(std::iter::empty()),
            body: None,
            use_network_proxy: false,
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// GET 請求一律不帶 body；內容原樣保留，不重新編碼
    pub fn with_body<B: Into<Vec<u8>>>(mut self, body: Option<B>) -> Self {
        self.body = if self.method == Method::GET {
            None
        } else {
            body.map(Into::into).filter(|b| !b.is_empty())
        };
        self
    }

    pub fn with_network_proxy(mut self, use_network_proxy: bool) -> Self {
        self.use_network_proxy = use_network_proxy;
        self
    }
}

/// 單次嘗試從上游取得的結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardResponse {
    pub ok: bool,
    pub status: u16,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

impl ForwardResponse {
    /// Lossy text view for logging and JSON parsing; `data` stays untouched.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

impl From<UpstreamResponse> for ForwardResponse {
    fn from(response: UpstreamResponse) -> Self {
        Self {
            ok: response.is_success(),
            status: response.status,
            data: response.body,
            content_type: response.content_type,
        }
    }
}

/// Inbound header name -> outbound header name.
pub const PASSTHROUGH_HEADERS: [(&str, &str); 3] = [
    ("authorization", "Authorization"),
    ("x-api-key", "x-api-key"),
    ("anthropic-version", "anthropic-version"),
];

/// 只保留白名單內的認證相關 header，Content-Type 固定為 JSON
pub fn forwarded_headers<'a, I>(inbound: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());

    for (name, value) in inbound {
        if let Some((_, outbound)) = PASSTHROUGH_HEADERS
            .iter()
            .find(|(inbound_name, _)| inbound_name.eq_ignore_ascii_case(name))
        {
            headers.insert(outbound.to_string(), value.to_string());
        }
    }

    headers
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Claude,
    Gemini,
    Deepseek,
    Qwen,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::OpenAi,
        Provider::Claude,
        Provider::Gemini,
        Provider::Deepseek,
        Provider::Qwen,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Claude => "claude",
            Provider::Gemini => "gemini",
            Provider::Deepseek => "deepseek",
            Provider::Qwen => "qwen",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com",
            Provider::Claude => "https://api.anthropic.com",
            Provider::Gemini => "https://generativelanguage.googleapis.com",
            Provider::Deepseek => "https://api.deepseek.com",
            Provider::Qwen => "https://dashscope.aliyuncs.com",
        }
    }

    /// 境外服務需要走本地代理，國內服務直連
    pub fn requires_network_proxy(&self) -> bool {
        matches!(self, Provider::OpenAi | Provider::Claude | Provider::Gemini)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Provider {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.slug().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProxyError::UnknownProvider {
                name: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    #[default]
    DuckDuckGo,
    Baidu,
}

impl SearchEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchEngine::DuckDuckGo => "duckduckgo",
            SearchEngine::Baidu => "baidu",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}
