//! Error taxonomy for the capture pipeline.
//!
//! Library code returns `CaptureError`; binaries and configuration loading
//! wrap it in `anyhow` like the rest of the tooling.

use thiserror::Error;

use crate::session::PipelineState;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Bad size or type. Local; blocks the action without a state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transport failure. Retryable by re-triggering the action.
    #[error("network error: {0}")]
    Network(String),

    /// Remote 4xx/5xx. The response body is preserved for diagnostics.
    #[error("service responded with status {status}: {body}")]
    Service { status: u16, body: String },

    /// Camera access denied.
    #[error("camera permission denied: {0}")]
    Permission(String),

    /// Camera unavailable, busy or failing.
    #[error("camera device error: {0}")]
    Device(String),

    /// Action attempted in a pipeline state that does not allow it.
    #[error("cannot {action} while pipeline is {state:?}")]
    State {
        action: &'static str,
        state: PipelineState,
    },

    #[error("export failed: {0}")]
    Export(String),

    #[error("proof backend rejected witness: {0}")]
    Proof(String),
}

impl CaptureError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub(crate) fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Whether a user can reasonably retry by re-triggering the action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Service { .. })
    }
}

impl From<ureq::Error> for CaptureError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let body = response
                    .into_string()
                    .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
                CaptureError::Service { status, body }
            }
            ureq::Error::Transport(transport) => CaptureError::Network(transport.to_string()),
        }
    }
}
