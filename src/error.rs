use std::sync::Arc;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the targeting engine to its callers.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The initial data load failed. The service must not start serving without data.
    #[error("initial targeting data load failed")]
    Startup(#[source] LoaderError),

    /// No snapshot is available and a synchronous reload failed.
    #[error("no targeting snapshot available")]
    SnapshotUnavailable(#[source] LoaderError),

    /// Request failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Indicates that the refresh thread panicked. This should normally never happen.
    #[error("refresh thread panicked")]
    RefreshThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

/// Errors returned by a [`DataLoader`](crate::DataLoader).
///
/// Loader errors are operational: after startup they are logged and retried on the next refresh
/// cycle, and never reach request handling code.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum LoaderError {
    /// Reading the backing data failed.
    #[error("failed to read targeting data")]
    Io(#[source] Arc<std::io::Error>),

    /// Backing data could not be parsed.
    #[error("malformed targeting data")]
    Parse(#[source] Arc<serde_json::Error>),

    /// Invalid base URL configuration for the HTTP loader.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Network error while talking to the backing store.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// Backing data is structurally valid JSON but violates a data model invariant.
    #[error("inconsistent targeting data: {0}")]
    Inconsistent(String),

    /// The backing store is not reachable (used by in-memory loaders to simulate outages).
    #[error("backing store unavailable")]
    Unavailable,
}

impl From<std::io::Error> for LoaderError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(Arc::new(value))
    }
}

impl From<reqwest::Error> for LoaderError {
    fn from(value: reqwest::Error) -> Self {
        LoaderError::Network(Arc::new(value.without_url()))
    }
}

/// A delivery request failed validation. The message names the offending parameter.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required query parameter is missing or empty.
    #[error("missing {0} param")]
    MissingParam(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_the_param() {
        assert_eq!(
            ValidationError::MissingParam("app").to_string(),
            "missing app param"
        );
    }

    #[test]
    fn startup_error_keeps_loader_error_as_source() {
        let err = Error::Startup(LoaderError::Unavailable);
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("backing store unavailable"));
    }
}
