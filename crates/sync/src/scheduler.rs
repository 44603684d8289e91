//! Per-chain reconciliation loop.
//!
//! Each tick loads the chain's cursors, fetches the next window from the
//! configured source and hands it to the apply worker. The worker advances the
//! cursors; the loop only decides when to run again. When a window leaves the
//! chain still behind, the next cycle starts without waiting for the tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chainbook_core::{AppError, RawEvent, Stream};
use chainbook_storage::Cursor;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::context::ReconcilerContext;
use crate::worker::{BatchReport, SourceMessage};

/// The fetched events of one stream and how far they cover it.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamWindow {
    pub stream: Stream,
    /// Cursor position the window was planned from.
    pub cursor: u64,
    /// Events in block order.
    pub events: Vec<RawEvent>,
    /// Block the cursor may advance to once every event is applied.
    pub advance_to: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowBatch {
    pub streams: Vec<StreamWindow>,
    /// Subgraph staleness in seconds, when the source reports one.
    pub lag_secs: Option<i64>,
    /// The source has blocks beyond this window.
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Nothing to fetch yet: caught up, or the upstream is behind the cursors.
    Idle { lag_secs: Option<i64> },
    Window(WindowBatch),
}

/// A source of event windows, planned from the current cursors.
#[async_trait]
pub trait WindowSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, cursor: &Cursor, cancel: &CancellationToken) -> Result<FetchOutcome, AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Idle,
    Processed { report: BatchReport, has_more: bool },
}

pub struct Reconciler {
    ctx: Arc<ReconcilerContext>,
    source: Arc<dyn WindowSource>,
    worker: mpsc::Sender<SourceMessage>,
    poll_interval: Duration,
}

impl Reconciler {
    pub fn new(
        ctx: Arc<ReconcilerContext>,
        source: Arc<dyn WindowSource>,
        worker: mpsc::Sender<SourceMessage>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            ctx,
            source,
            worker,
            poll_interval,
        }
    }

    /// Run one fetch → apply cycle.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<CycleOutcome, AppError> {
        let chain_id = self.ctx.chain_id();
        let cursor = self
            .ctx
            .cursors
            .load_cursor(chain_id, self.ctx.start_block)
            .await?;

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            fetched = self.source.fetch(&cursor, cancel) => fetched?,
        };

        let lag_secs = match &fetched {
            FetchOutcome::Idle { lag_secs } => *lag_secs,
            FetchOutcome::Window(batch) => batch.lag_secs,
        };
        if let Some(lag) = lag_secs {
            self.record_lag(lag).await?;
        }

        let batch = match fetched {
            FetchOutcome::Idle { .. } => {
                tracing::debug!(chain_id, source = self.source.name(), "Nothing new to reconcile");
                return Ok(CycleOutcome::Idle);
            }
            FetchOutcome::Window(batch) => batch,
        };

        let has_more = batch.has_more;
        let (done, report) = oneshot::channel();
        self.worker
            .send(SourceMessage::Window { batch, done })
            .await
            .map_err(|_| AppError::Other(eyre::eyre!("apply worker stopped")))?;
        let report = report
            .await
            .map_err(|_| AppError::Other(eyre::eyre!("apply worker dropped the window")))?;

        tracing::info!(
            chain_id,
            applied = report.applied,
            duplicates = report.duplicates,
            skipped = report.skipped,
            failed = report.failed,
            advanced = ?report.advanced,
            "Window reconciled"
        );
        Ok(CycleOutcome::Processed { report, has_more })
    }

    /// Tick every `poll_interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let chain_id = self.ctx.chain_id();
        tracing::info!(
            chain_id,
            network = self.ctx.network.name,
            source = self.source.name(),
            strategy = self.ctx.strategy.name(),
            interval_secs = self.poll_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            loop {
                match self.run_once(&cancel).await {
                    Ok(CycleOutcome::Processed { has_more: true, report })
                        if !cancel.is_cancelled() && !report.advanced.is_empty() =>
                    {
                        continue;
                    }
                    Ok(_) => break,
                    Err(AppError::Cancelled) => break,
                    Err(e) => {
                        // Cursors are untouched; the next tick re-fetches the window.
                        tracing::error!(chain_id, error = %e, "Reconciliation cycle failed");
                        break;
                    }
                }
            }
        }

        tracing::info!(chain_id, "Reconciliation loop stopped");
    }

    async fn record_lag(&self, lag_secs: i64) -> Result<(), AppError> {
        let chain_id = self.ctx.chain_id();
        self.ctx.cursors.record_graph_lag(chain_id, lag_secs).await?;
        if lag_secs > self.ctx.lag_alert.as_secs() as i64 {
            tracing::warn!(
                chain_id,
                lag_secs,
                threshold_secs = self.ctx.lag_alert.as_secs(),
                "Subgraph is lagging behind the chain"
            );
        }
        Ok(())
    }
}
