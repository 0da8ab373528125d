//! Management-plane error types

use thiserror::Error;

/// Errors from discovery and health reads.
///
/// Distinct from an endpoint that answers but reports itself unhealthy,
/// which is a successful read with a non-healthy status.
#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("Invalid management URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Management API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid field in {context}: {message}")]
    InvalidField { context: String, message: String },
}

impl ManagementError {
    /// 404 from the management API.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

impl serde::Serialize for ManagementError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
