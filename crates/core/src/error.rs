use thiserror::Error;

/// Shared error type used across all chainbook crates.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Subgraph error: {0}")]
    Subgraph(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A ledger invariant would be broken by applying the event.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// A record the event refers to (claim, token) does not exist yet.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Shutdown was requested while the operation was in flight.
    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] eyre::Error),
}

impl AppError {
    /// Errors caused by flaky upstreams. The same work is expected to succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Rpc(_) | AppError::Subgraph(_) | AppError::Database(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AppError::Rpc("429".into()).is_transient());
        assert!(AppError::Subgraph("timeout".into()).is_transient());
        assert!(!AppError::Decode("bad".into()).is_transient());
        assert!(!AppError::NotFound("claim 7".into()).is_transient());
    }
}
