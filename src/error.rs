//! Error types for the document generator

use thiserror::Error;

/// Result type alias for generator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while generating a document
#[derive(Error, Debug)]
pub enum Error {
    /// The staging surface was missing or detached at capture time, or the
    /// capture primitive failed (e.g. a blocked cross-origin image)
    #[error("Render capture failed: {0}")]
    RenderCaptureError(String),

    /// The captured content has no height (or no width)
    #[error("Content is empty: nothing to paginate")]
    EmptyContentError,

    /// The download/save trigger failed
    #[error("Failed to save document: {0}")]
    SaveError(String),

    /// Umbrella error returned by the generator; always carries the cause
    #[error("Document generation failed: {source}")]
    DocumentGenerationError {
        #[source]
        source: Box<Error>,
    },

    /// A staging surface operation was invalid (e.g. detaching an unknown node)
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Generation was cancelled at a checkpoint
    #[error("Generation cancelled")]
    Cancelled,

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap this error as a `DocumentGenerationError`. Already wrapped errors
    /// are returned unchanged.
    pub fn into_generation_error(self) -> Error {
        match self {
            Error::DocumentGenerationError { .. } => self,
            other => Error::DocumentGenerationError {
                source: Box::new(other),
            },
        }
    }

    /// The wrapped cause of a `DocumentGenerationError`, or `self` otherwise.
    pub fn cause(&self) -> &Error {
        match self {
            Error::DocumentGenerationError { source } => source,
            other => other,
        }
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_does_not_nest() {
        let err = Error::EmptyContentError.into_generation_error();
        let again = err.into_generation_error();
        match &again {
            Error::DocumentGenerationError { source } => {
                assert!(matches!(**source, Error::EmptyContentError));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(again.cause(), Error::EmptyContentError));
    }

    #[test]
    fn display_includes_cause() {
        let err = Error::RenderCaptureError("tainted".into()).into_generation_error();
        let msg = err.to_string();
        assert!(msg.contains("Document generation failed"));
        assert!(msg.contains("tainted"));
    }
}
