use crate::domain::model::{ForwardRequest, UpstreamResponse};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// 執行一次對上游的嘗試；傳輸層失敗回傳 Err，上游的非 2xx 仍是 Ok
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ForwardRequest) -> Result<UpstreamResponse>;

    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&self, request: &ForwardRequest) -> Result<UpstreamResponse> {
        (**self).send(request).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Backoff wait between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
