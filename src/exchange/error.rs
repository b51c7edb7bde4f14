//! Exchange error types.

use thiserror::Error;

/// Errors returned by exchange clients.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network-level failure (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Binance API error body `{"code": ..., "msg": ...}`.
    #[error("Binance API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Listen key has expired or is invalid.
    #[error("listen key expired or invalid")]
    ListenKeyExpired,

    /// Non-success HTTP status without a parseable API error body.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response body could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("symbol not found: {0}")]
    UnknownSymbol(String),
}

impl ExchangeError {
    /// Classify an error response body.
    pub fn from_api_response(status: u16, body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct ApiError {
            code: i64,
            msg: String,
        }

        match serde_json::from_str::<ApiError>(body) {
            Ok(err) if err.code == -1125 => Self::ListenKeyExpired,
            Ok(err) => Self::Api {
                code: err.code,
                message: err.msg,
            },
            Err(_) => Self::Http {
                status,
                body: body.to_string(),
            },
        }
    }

    /// The exchange received the request and refused it.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api { .. } | Self::Http { status: 400..=499, .. })
    }

    /// Transient failure that a later retry may clear.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { code, .. } => matches!(code, -1000 | -1001 | -1003 | -1015 | -1016),
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
