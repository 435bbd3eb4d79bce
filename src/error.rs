use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Filesystem I/O error: {0}")]
    Io(String),
    #[error("JSON serialization error: {0}")]
    SerdeSerialize(String),
    #[error("JSON parsing error: {0}")]
    SerdeParse(String),
    #[error("Page source returned status {status} for '{path}' (Retailer: {retailer})")]
    PageStatus {
        status: u16,
        path: String,
        retailer: String,
    },
    #[error("Invalid listing: missing '{field}' ({context})")]
    InvalidListing { field: &'static str, context: String },
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
    #[error("Catalog store error: {0}")]
    Store(String),
    #[error("Catalog store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Crawl process error for retailer '{retailer}': {message}")]
    Process { retailer: String, message: String },
    #[error("Invalid argument provided: {0}")]
    Argument(String),
    #[error("Tokio task join error: {0}")]
    JoinError(String),
    #[error("Timeout during operation: {0}")]
    Timeout(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Unexpected internal error: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else {
            AppError::Http(e.to_string())
        }
    }
}
impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}
impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() || e.is_eof() || e.is_syntax() || e.is_data() {
            AppError::SerdeParse(e.to_string())
        } else {
            AppError::SerdeSerialize(e.to_string())
        }
    }
}
impl From<JoinError> for AppError {
    fn from(e: JoinError) -> Self {
        AppError::JoinError(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn invalid_listing<S: Into<String>>(field: &'static str, context: S) -> AppError {
        AppError::InvalidListing {
            field,
            context: context.into(),
        }
    }

    pub fn process<S: Into<String>>(retailer: &str, message: S) -> AppError {
        AppError::Process {
            retailer: retailer.to_string(),
            message: message.into(),
        }
    }

    /// Errors that must abort a consolidation run instead of being counted and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_loss_is_fatal() {
        assert!(AppError::StoreUnavailable("gone".into()).is_fatal());
        assert!(!AppError::Store("conflict".into()).is_fatal());
        assert!(!AppError::invalid_listing("product_code", "vexio").is_fatal());
        assert!(!AppError::Checkpoint("rename failed".into()).is_fatal());
    }

    #[test]
    fn serde_errors_map_to_parse() {
        let err = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        assert!(matches!(AppError::from(err), AppError::SerdeParse(_)));
    }
}
