use std::sync::Arc;
use std::time::Duration;

use chainbook_core::{IntegrityPolicy, Network, Settings, SourceMode, TokenRegistry};
use chainbook_storage::{CursorStore, LedgerStore};

use crate::updater::{BalanceUpdateStrategy, DeltaStrategy, SnapshotStrategy};

/// Everything the pipeline of one chain needs, built once at startup.
#[derive(Clone)]
pub struct ReconcilerContext {
    pub network: Network,
    pub tokens: TokenRegistry,
    pub cursors: Arc<dyn CursorStore>,
    pub ledger: Arc<dyn LedgerStore>,
    /// Wallet-balance strategy; follows the configured event source.
    pub strategy: Arc<dyn BalanceUpdateStrategy>,
    pub integrity: IntegrityPolicy,
    pub start_block: u64,
    pub lag_alert: Duration,
}

impl ReconcilerContext {
    pub fn new(
        settings: &Settings,
        cursors: Arc<dyn CursorStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        let strategy: Arc<dyn BalanceUpdateStrategy> = match settings.source {
            SourceMode::Subgraph => Arc::new(SnapshotStrategy),
            SourceMode::Rpc => Arc::new(DeltaStrategy),
        };
        Self {
            network: settings.network.clone(),
            tokens: settings.tokens.clone(),
            cursors,
            ledger,
            strategy,
            integrity: settings.integrity,
            start_block: settings.start_block,
            lag_alert: settings.lag_alert,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.network.chain_id
    }
}
