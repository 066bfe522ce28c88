//! Error types and result aliases shared across unimgr crates.

/// The result type used throughout unimgr-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_display() {
        let err = Error::InvalidId {
            message: "expected a UUID".into(),
        };
        assert_eq!(err.to_string(), "invalid identifier: expected a UUID");
    }
}
