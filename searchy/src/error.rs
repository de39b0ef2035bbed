use std::time::Duration;
use thiserror::Error;

use crate::{DocId, TermId};

#[derive(Error, Debug)]
pub enum SearchyError {
    /// Malformed document or request input. Index state is untouched.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown term: {0}")]
    UnknownTerm(String),

    #[error("out of order append for term {term}: doc {doc} after {last}")]
    OutOfOrderAppend { term: TermId, last: DocId, doc: DocId },

    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("query syntax error at {position}: {message}")]
    QuerySyntax { position: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("query exceeded its budget of {budget:?}")]
    Timeout { budget: Duration },
}

pub type Result<T> = std::result::Result<T, SearchyError>;

impl SearchyError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        SearchyError::QuerySyntax { position, message: message.into() }
    }

    /// Errors a caller may reasonably retry without changing its input.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SearchyError::Io(_) | SearchyError::Timeout { .. })
    }

    /// Errors that indicate a broken internal invariant or unreadable data.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            SearchyError::Consistency(_) | SearchyError::OutOfOrderAppend { .. } | SearchyError::Serialization(_)
        )
    }
}

impl From<bincode::Error> for SearchyError {
    fn from(e: bincode::Error) -> Self { SearchyError::Serialization(e.to_string()) }
}

impl From<serde_json::Error> for SearchyError {
    fn from(e: serde_json::Error) -> Self { SearchyError::Serialization(e.to_string()) }
}
