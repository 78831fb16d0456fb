/// Caller-visible classification of a [`QuoteError`].
///
/// Transports map these onto their own status codes; every variant of `QuoteError` folds into
/// exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    Validation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// Another acceptance on the same request committed first.
    #[error("already allocated")]
    AlreadyAllocated,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("stored record could not be decoded: {0}")]
    CorruptRecord(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl QuoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuoteError::NotFound(_) => ErrorKind::NotFound,
            QuoteError::Forbidden(_) => ErrorKind::Forbidden,
            QuoteError::Conflict(_) | QuoteError::AlreadyAllocated => ErrorKind::Conflict,
            QuoteError::Validation(_) | QuoteError::InvalidInput(_) => ErrorKind::Validation,
            QuoteError::Database(_)
            | QuoteError::Serialization(_)
            | QuoteError::CorruptRecord(_)
            | QuoteError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<quote_types::TypesError> for QuoteError {
    fn from(e: quote_types::TypesError) -> Self {
        QuoteError::Validation(e.to_string())
    }
}

pub type QuoteResult<T> = std::result::Result<T, QuoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_allocated_is_a_distinct_conflict() {
        let err = QuoteError::AlreadyAllocated;
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "already allocated");
        assert_ne!(err.kind(), QuoteError::NotFound("offer".into()).kind());
    }

    #[test]
    fn types_errors_surface_as_validation() {
        let err: QuoteError = quote_types::TypesError::EmptyText.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
