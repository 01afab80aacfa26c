use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No structured output in response (stop_reason: {0})")]
    NoOutput(String),
}

impl AiError {
    /// Short machine-readable code, used when recording failures.
    pub fn code(&self) -> String {
        match self {
            AiError::Config(_) => "ai_config".to_string(),
            AiError::Network(_) => "ai_network".to_string(),
            AiError::Api { status, .. } => format!("ai_api_{status}"),
            AiError::Parse(_) => "ai_parse".to_string(),
            AiError::NoOutput(_) => "ai_no_output".to_string(),
        }
    }

    /// Rate limits and server-side errors are worth retrying on a later run.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Network(_) => true,
            AiError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        AiError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_code_includes_status() {
        let err = AiError::Api {
            status: 529,
            message: "overloaded".into(),
        };
        assert_eq!(err.code(), "ai_api_529");
        assert!(err.is_transient());
    }

    #[test]
    fn parse_error_is_permanent() {
        assert!(!AiError::Parse("bad json".into()).is_transient());
    }
}
