pub mod forwarder;

pub use crate::domain::model::{ForwardRequest, ForwardResponse, UpstreamResponse};
pub use crate::domain::ports::{Sleeper, TokioSleeper, Transport};
pub use crate::utils::error::Result;
pub use forwarder::{Forwarder, RetryPolicy};
