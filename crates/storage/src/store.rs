use async_trait::async_trait;
use chainbook_core::{AppError, IntegrityPolicy, LedgerEvent, Stream};

use crate::models::Cursor;
use crate::mutation::{ApplyOutcome, Mutation};

/// Persistence of per-chain stream cursors.
///
/// A chain has a single writer; implementations only need to guarantee that a
/// cursor never moves backwards.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the cursor for `chain_id`, creating it just before `start_block` on first use.
    async fn load_cursor(&self, chain_id: u64, start_block: u64) -> Result<Cursor, AppError>;

    /// Move one stream forward. Lower values than the stored one are ignored.
    async fn advance_cursor(&self, chain_id: u64, stream: Stream, block: u64)
    -> Result<(), AppError>;

    /// Record the subgraph staleness in seconds.
    async fn record_graph_lag(&self, chain_id: u64, lag_secs: i64) -> Result<(), AppError>;
}

/// The off-chain ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert the event's transaction row if absent and, only on a fresh insert,
    /// apply `mutations`. Marker and effects commit together or not at all.
    async fn commit(
        &self,
        event: &LedgerEvent,
        mutations: &[Mutation],
        policy: IntegrityPolicy,
    ) -> Result<ApplyOutcome, AppError>;
}

/// Report a broken invariant according to `policy`.
pub(crate) fn integrity_violation(
    policy: IntegrityPolicy,
    event: &LedgerEvent,
    message: String,
) -> Result<(), AppError> {
    match policy {
        IntegrityPolicy::Warn => {
            tracing::error!(
                target: "integrity",
                chain_id = event.chain_id,
                tx_hash = %event.tx_hash,
                log_index = event.log_index,
                event_type = %event.event_type,
                "{message}"
            );
            Ok(())
        }
        IntegrityPolicy::Strict => Err(AppError::Integrity(message)),
    }
}
