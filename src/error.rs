use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("unknown taxon: {0}")]
    #[diagnostic(help("check the spelling against the NCBI Taxonomy browser"))]
    UnknownTaxon(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("{0} was not part of the discovery results")]
    #[diagnostic(help("select species from a previous discovery of the same taxon and gene"))]
    SelectionNotFound(String),

    #[error("gave up after {attempts} attempts: {message}")]
    TransientFetch { attempts: u32, message: String },

    #[error("{failed} of {requested} sequences could not be retrieved")]
    PartialRetrievalFailure { failed: usize, requested: usize },

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("unexpected NCBI response: {0}")]
    NcbiDecode(String),

    #[error("NCBI call timed out after {0} ms")]
    CallTimeout(u64),

    #[error("session cancelled")]
    Cancelled,

    #[error("session exceeded {0} s")]
    SessionTimeout(u64),

    #[error("failed to build archive: {0}")]
    Archive(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("server error: {0}")]
    Server(String),
}

impl KiraError {
    pub fn is_transient(&self) -> bool {
        match self {
            KiraError::NcbiHttp(_) | KiraError::CallTimeout(_) => true,
            KiraError::NcbiStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(KiraError::NcbiHttp("reset".to_string()).is_transient());
        assert!(KiraError::CallTimeout(100).is_transient());
        assert!(
            KiraError::NcbiStatus {
                status: 429,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !KiraError::NcbiStatus {
                status: 400,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!KiraError::InvalidIdentifier("x".to_string()).is_transient());
        assert!(!KiraError::UnknownTaxon("x".to_string()).is_transient());
    }
}
