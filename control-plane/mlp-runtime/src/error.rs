use std::error::Error as StdError;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Runtime resource not found: {0}")]
    NotFound(String),

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    /// The request never produced an HTTP response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The proxied service answered with an error.
    #[error("Service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The container runtime API answered with an error.
    #[error("Runtime API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unsupported by runtime: {0}")]
    Unsupported(String),

    #[error("Invalid runtime request: {0}")]
    Invalid(String),
}

impl RuntimeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }

    /// Stable machine-readable code, recorded with failed calls.
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::NotFound(_) => "not_found",
            RuntimeError::Build(_) => "build_failed",
            RuntimeError::Timeout(_) => "timeout",
            RuntimeError::Transport(_) => "transport",
            RuntimeError::Upstream { .. } => "upstream",
            RuntimeError::Api { .. } => "runtime_api",
            RuntimeError::Unsupported(_) => "unsupported",
            RuntimeError::Invalid(_) => "invalid",
        }
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return RuntimeError::Timeout(e.to_string());
        }
        let detail = match e.source() {
            Some(src) => format!("{e} ({src})"),
            None => e.to_string(),
        };
        RuntimeError::Transport(detail)
    }
}
