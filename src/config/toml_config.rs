use crate::core::forwarder::RetryPolicy;
use crate::domain::model::{Provider, SearchEngine};
use crate::utils::error::{ProxyError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_NETWORK_PROXY: &str = "http://127.0.0.1:7890";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub server: Option<ServerConfig>,
    pub network_proxy: Option<NetworkProxyConfig>,
    pub forwarder: Option<ForwarderConfig>,
    pub providers: Option<HashMap<String, ProviderConfig>>,
    pub search: Option<SearchConfig>,
    pub demo: Option<DemoConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub body_limit_mb: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkProxyConfig {
    pub url: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Curl,
    Native,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwarderConfig {
    pub transport: Option<TransportKind>,
    pub curl_path: Option<String>,
    pub max_attempts: Option<u32>,
    pub backoff_step_ms: Option<u64>,
    pub max_time_seconds: Option<u64>,
    pub connect_timeout_seconds: Option<u64>,
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub use_network_proxy: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_engine: Option<SearchEngine>,
    pub max_results: Option<usize>,
    pub duckduckgo_url: Option<String>,
    pub baidu_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Comma separated; falls back to `DEMO_INVITE_CODES`.
    pub invite_codes: Option<String>,
    /// Falls back to `GEMINI_API_KEY`.
    pub gemini_api_key: Option<String>,
    pub model: Option<String>,
}

/// 解析後的上游設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTarget {
    pub base_url: String,
    pub use_network_proxy: bool,
}

impl ProxyConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ProxyError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ProxyError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${GEMINI_API_KEY})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ProxyError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn host(&self) -> &str {
        self.server
            .as_ref()
            .and_then(|s| s.host.as_deref())
            .unwrap_or("127.0.0.1")
    }

    pub fn port(&self) -> u16 {
        self.server.as_ref().and_then(|s| s.port).unwrap_or(3001)
    }

    pub fn bind_string(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    pub fn body_limit_mb(&self) -> usize {
        self.server
            .as_ref()
            .and_then(|s| s.body_limit_mb)
            .unwrap_or(10)
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb().saturating_mul(1024 * 1024)
    }

    /// 本地代理地址；enabled = false 時視為未設定
    pub fn network_proxy_url(&self) -> Option<&str> {
        match &self.network_proxy {
            Some(NetworkProxyConfig {
                enabled: Some(false),
                ..
            }) => None,
            Some(NetworkProxyConfig { url: Some(url), .. }) => Some(url.as_str()),
            _ => Some(DEFAULT_NETWORK_PROXY),
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.forwarder
            .as_ref()
            .and_then(|f| f.transport)
            .unwrap_or_default()
    }

    pub fn curl_path(&self) -> &str {
        self.forwarder
            .as_ref()
            .and_then(|f| f.curl_path.as_deref())
            .unwrap_or("curl")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        let forwarder = self.forwarder.as_ref();
        RetryPolicy {
            max_attempts: forwarder
                .and_then(|f| f.max_attempts)
                .unwrap_or(defaults.max_attempts),
            backoff_step: forwarder
                .and_then(|f| f.backoff_step_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_step),
        }
    }

    pub fn max_time(&self) -> Duration {
        Duration::from_secs(
            self.forwarder
                .as_ref()
                .and_then(|f| f.max_time_seconds)
                .unwrap_or(180),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.forwarder
                .as_ref()
                .and_then(|f| f.connect_timeout_seconds)
                .unwrap_or(30),
        )
    }

    pub fn temp_dir(&self) -> Option<PathBuf> {
        self.forwarder.as_ref().and_then(|f| f.temp_dir.clone())
    }

    pub fn provider_target(&self, provider: Provider) -> ProviderTarget {
        let overrides = self
            .providers
            .as_ref()
            .and_then(|p| p.get(provider.slug()));

        ProviderTarget {
            base_url: overrides
                .and_then(|o| o.base_url.clone())
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            use_network_proxy: overrides
                .and_then(|o| o.use_network_proxy)
                .unwrap_or_else(|| provider.requires_network_proxy()),
        }
    }

    pub fn default_search_engine(&self) -> SearchEngine {
        self.search
            .as_ref()
            .and_then(|s| s.default_engine)
            .unwrap_or_default()
    }

    pub fn search_max_results(&self) -> usize {
        self.search.as_ref().and_then(|s| s.max_results).unwrap_or(5)
    }

    pub fn duckduckgo_url(&self) -> &str {
        self.search
            .as_ref()
            .and_then(|s| s.duckduckgo_url.as_deref())
            .unwrap_or("https://html.duckduckgo.com/html/")
    }

    pub fn baidu_url(&self) -> &str {
        self.search
            .as_ref()
            .and_then(|s| s.baidu_url.as_deref())
            .unwrap_or("https://www.baidu.com/s")
    }

    pub fn user_agent(&self) -> &str {
        self.search
            .as_ref()
            .and_then(|s| s.user_agent.as_deref())
            .unwrap_or(DEFAULT_USER_AGENT)
    }

    /// 邀請碼清單：去除空白並忽略空項
    pub fn invite_codes(&self) -> Vec<String> {
        let raw = self
            .demo
            .as_ref()
            .and_then(|d| d.invite_codes.clone())
            .or_else(|| std::env::var("DEMO_INVITE_CODES").ok())
            .unwrap_or_default();

        raw.split(',')
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .collect()
    }

    pub fn gemini_api_key(&self) -> Option<String> {
        self.demo
            .as_ref()
            .and_then(|d| d.gemini_api_key.clone())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn demo_model(&self) -> &str {
        self.demo
            .as_ref()
            .and_then(|d| d.model.as_deref())
            .unwrap_or("gemini-2.5-pro-preview-05-06")
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_range("server.port", self.port(), 1, u16::MAX)?;
        validation::validate_range("server.body_limit_mb", self.body_limit_mb(), 1, 1024)?;

        if let Some(url) = self.network_proxy_url() {
            validation::validate_url("network_proxy.url", url)?;
        }

        let policy = self.retry_policy();
        validation::validate_positive_number(
            "forwarder.max_attempts",
            u64::from(policy.max_attempts),
            1,
        )?;
        validation::validate_positive_number(
            "forwarder.max_time_seconds",
            self.max_time().as_secs(),
            1,
        )?;
        validation::validate_positive_number(
            "forwarder.connect_timeout_seconds",
            self.connect_timeout().as_secs(),
            1,
        )?;
        validation::validate_non_empty_string("forwarder.curl_path", self.curl_path())?;

        if let Some(providers) = &self.providers {
            for name in providers.keys() {
                let provider = name.parse::<Provider>().map_err(|_| {
                    ProxyError::InvalidConfigValueError {
                        field: "providers".to_string(),
                        value: name.clone(),
                        reason: "Unknown provider. Valid providers: openai, claude, gemini, deepseek, qwen"
                            .to_string(),
                    }
                })?;
                let target = self.provider_target(provider);
                validation::validate_url(
                    &format!("providers.{}.base_url", name),
                    &target.base_url,
                )?;
            }
        }

        validation::validate_range("search.max_results", self.search_max_results(), 1, 50)?;
        validation::validate_url("search.duckduckgo_url", self.duckduckgo_url())?;
        validation::validate_url("search.baidu_url", self.baidu_url())?;

        Ok(())
    }
}

impl Validate for ProxyConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
