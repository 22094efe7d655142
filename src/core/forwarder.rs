use crate::domain::model::{ForwardRequest, ForwardResponse};
use crate::domain::ports::{Sleeper, TokioSleeper, Transport};
use crate::utils::error::{ProxyError, Result};
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(3000);

/// 線性退避：第 k 次失敗後等待 k * backoff_step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_step: Duration) -> Self {
        Self {
            max_attempts,
            backoff_step,
        }
    }

    /// Wait applied after `attempt` (1-based) has failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

pub struct Forwarder<T: Transport, S: Sleeper = TokioSleeper> {
    transport: T,
    sleeper: S,
    policy: RetryPolicy,
}

impl<T: Transport> Forwarder<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self::with_sleeper(transport, TokioSleeper, policy)
    }
}

impl<T: Transport, S: Sleeper> Forwarder<T, S> {
    pub fn with_sleeper(transport: T, sleeper: S, policy: RetryPolicy) -> Self {
        Self {
            transport,
            sleeper,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 使用預設的嘗試次數轉發
    pub async fn forward(&self, request: &ForwardRequest) -> Result<ForwardResponse> {
        self.forward_with_attempts(request, self.policy.max_attempts)
            .await
    }

    /// 依序嘗試直到成功取得上游回應或用盡次數；非 2xx 回應直接返回不重試
    pub async fn forward_with_attempts(
        &self,
        request: &ForwardRequest,
        max_attempts: u32,
    ) -> Result<ForwardResponse> {
        let max_attempts = max_attempts.max(1);
        tracing::info!(
            "📡 [Proxy] {} {} (via {})",
            request.method,
            truncate(&request.target_url, 100),
            self.transport.name()
        );

        let mut attempt = 1;
        loop {
            match self.transport.send(request).await {
                Ok(response) => {
                    tracing::info!(
                        "[Proxy] Response status: {} (attempt {}/{})",
                        response.status,
                        attempt,
                        max_attempts
                    );
                    if response.status >= 400 {
                        let text = String::from_utf8_lossy(&response.body);
                        tracing::error!("[Proxy] Error response body: {}", truncate(&text, 500));
                    }
                    return Ok(response.into());
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        "⚠️ [Proxy] Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "❌ [Proxy] Giving up after {} attempt(s): {}",
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}

impl<T: Transport, S: Sleeper> Forwarder<T, S> {
    /// Same as `forward` but never fails: transport errors become a 500 JSON payload.
    pub async fn forward_or_error(&self, request: &ForwardRequest) -> ForwardResponse {
        match self.forward(request).await {
            Ok(response) => response,
            Err(e) => error_response(&e),
        }
    }
}

pub fn error_response(error: &ProxyError) -> ForwardResponse {
    ForwardResponse {
        ok: false,
        status: error.status_code().as_u16(),
        data: serde_json::json!({ "error": error.to_string() })
            .to_string()
            .into_bytes(),
        content_type: Some("application/json".to_string()),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
