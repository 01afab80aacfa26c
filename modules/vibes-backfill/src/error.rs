use thiserror::Error;

/// Errors raised by the backfill itself. Collaborator failures reach the
/// pipeline as `anyhow::Error` and are classified with [`error_code`].
#[derive(Error, Debug)]
pub enum BackfillError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid entity id {value:?}: {reason}")]
    InvalidId { value: String, reason: String },

    #[error("Invalid state code {0:?}: expected a two-letter US state or territory code")]
    InvalidStateCode(String),

    #[error("Missing credential: {0} environment variable is required")]
    MissingCredential(&'static str),

    #[error("Data source error during {operation}")]
    DataSource {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cursor persistence error")]
    CursorPersistence(#[source] anyhow::Error),
}

/// Best-effort machine-readable code for a failure record.
pub fn error_code(err: &anyhow::Error) -> Option<String> {
    for cause in err.chain() {
        if let Some(sqlx_err) = cause.downcast_ref::<sqlx::Error>() {
            return Some(match sqlx_err.as_database_error().and_then(|db| db.code()) {
                Some(code) => format!("sqlstate_{code}"),
                None => "database".to_string(),
            });
        }
        if let Some(ai_err) = cause.downcast_ref::<ai_client::AiError>() {
            return Some(ai_err.code());
        }
        if let Some(apify_err) = cause.downcast_ref::<apify_client::ApifyError>() {
            return Some(apify_err.code());
        }
        if let Some(backfill_err) = cause.downcast_ref::<BackfillError>() {
            return Some(
                match backfill_err {
                    BackfillError::Config(_) => "config",
                    BackfillError::InvalidId { .. } => "invalid_id",
                    BackfillError::InvalidStateCode(_) => "invalid_state_code",
                    BackfillError::MissingCredential(_) => "missing_credential",
                    BackfillError::DataSource { .. } => "data_source",
                    BackfillError::CursorPersistence(_) => "cursor_persistence",
                }
                .to_string(),
            );
        }
    }
    None
}
