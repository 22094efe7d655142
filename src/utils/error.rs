use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Transport failed: {message}")]
    TransportError { message: String },

    #[error("Malformed upstream response: {message}")]
    MalformedResponse { message: String },

    #[error("Unknown provider: {name}")]
    UnknownProvider { name: String },

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// 傳輸層錯誤才重試；上游的非 2xx 回應不會走到這裡
    pub fn is_retryable(&self) -> bool {
        match self {
            // 請求建構失敗每次都會一樣
            ProxyError::HttpError(e) => !e.is_builder(),
            ProxyError::IoError(_)
            | ProxyError::TransportError { .. }
            | ProxyError::MalformedResponse { .. } => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UnknownProvider { .. } => StatusCode::NOT_FOUND,
            ProxyError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ProxyError::ConfigError { message } => format!("Configuration problem: {}", message),
            ProxyError::MissingConfigError { field } => {
                format!("Missing configuration value '{}'", field)
            }
            ProxyError::InvalidConfigValueError { field, reason, .. } => {
                format!("Configuration value '{}' is invalid: {}", field, reason)
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProxyError::TransportError {
            message: "exit code 7".to_string()
        }
        .is_retryable());
        assert!(ProxyError::MalformedResponse {
            message: "empty output".to_string()
        }
        .is_retryable());
        assert!(!ProxyError::UnknownProvider {
            name: "foo".to_string()
        }
        .is_retryable());
        assert!(!ProxyError::BadRequest {
            message: "bad".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_request_builder_errors_are_not_retried() {
        let err = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        assert!(err.is_builder());

        assert!(!ProxyError::HttpError(err).is_retryable());
    }

    #[test]
    fn test_status_code_mapping() {
        let err = ProxyError::UnknownProvider {
            name: "foo".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = ProxyError::TransportError {
            message: "boom".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
