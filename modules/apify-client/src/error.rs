use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApifyError>;

#[derive(Debug, Error)]
pub enum ApifyError {
    #[error("Apify request failed: {0}")]
    Network(String),

    #[error("Apify returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected Apify payload: {0}")]
    Parse(String),

    #[error("Actor run ended as {0}")]
    RunFailed(String),

    #[error("Run {run_id} still {status} after {polls} polls")]
    PollLimit {
        run_id: String,
        status: String,
        polls: u32,
    },
}

impl ApifyError {
    /// Short machine-readable code, used when recording failures.
    pub fn code(&self) -> String {
        match self {
            ApifyError::Network(_) => "apify_network".to_string(),
            ApifyError::Api { status, .. } => format!("apify_api_{status}"),
            ApifyError::Parse(_) => "apify_parse".to_string(),
            ApifyError::RunFailed(status) => format!("apify_run_{}", status.to_lowercase()),
            ApifyError::PollLimit { .. } => "apify_poll_limit".to_string(),
        }
    }
}

impl From<reqwest::Error> for ApifyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ApifyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
