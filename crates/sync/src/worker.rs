//! The single classify-and-apply consumer of a chain.
//!
//! Both the polling loop (whole windows) and the live subscription (single
//! events) publish into one bounded channel; the worker drains it in order.

use std::sync::Arc;

use chainbook_core::{AppError, RawEvent, Stream};
use chainbook_storage::ApplyOutcome;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::classifier::classify;
use crate::context::ReconcilerContext;
use crate::cursor::with_failure_floor;
use crate::scheduler::WindowBatch;
use crate::updater;

pub enum SourceMessage {
    /// A polled window; the report is sent back once its cursors moved.
    Window {
        batch: WindowBatch,
        done: oneshot::Sender<BatchReport>,
    },
    /// An event pushed by a live subscription. Never moves a cursor.
    Live(RawEvent),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: usize,
    pub duplicates: usize,
    /// Malformed events dropped without retry.
    pub skipped: usize,
    /// Events that will be retried with the next fetch of their window.
    pub failed: usize,
    /// Cursors moved by this batch.
    pub advanced: Vec<(Stream, u64)>,
}

pub struct ApplyWorker {
    ctx: Arc<ReconcilerContext>,
}

impl ApplyWorker {
    pub fn new(ctx: Arc<ReconcilerContext>) -> Self {
        Self { ctx }
    }

    /// Spawn a worker behind a channel of `capacity` messages.
    pub fn spawn(
        ctx: Arc<ReconcilerContext>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (mpsc::Sender<SourceMessage>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = Self::new(ctx);
        let handle = tokio::spawn(worker.run(rx, cancel));
        (tx, handle)
    }

    pub async fn run(self, mut rx: mpsc::Receiver<SourceMessage>, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match message {
                SourceMessage::Window { batch, done } => {
                    let report = self.process_batch(batch).await;
                    // The loop may have given up waiting during shutdown.
                    let _ = done.send(report);
                }
                SourceMessage::Live(raw) => self.process_live(&raw).await,
            }
        }
        tracing::debug!(chain_id = self.ctx.chain_id(), "Apply worker stopped");
    }

    async fn handle(&self, raw: &RawEvent) -> Result<ApplyOutcome, AppError> {
        let event = classify(raw, self.ctx.chain_id(), &self.ctx.tokens)?;
        updater::apply(&self.ctx, &event).await
    }

    /// Apply every event of the batch, then advance each stream's cursor as far
    /// as its events allow.
    pub async fn process_batch(&self, batch: WindowBatch) -> BatchReport {
        let chain_id = self.ctx.chain_id();
        let mut report = BatchReport::default();

        for window in batch.streams {
            let mut failed_block: Option<u64> = None;

            for raw in &window.events {
                match self.handle(raw).await {
                    Ok(ApplyOutcome::Applied) => report.applied += 1,
                    Ok(ApplyOutcome::AlreadyProcessed) => report.duplicates += 1,
                    Err(AppError::Decode(reason)) => {
                        report.skipped += 1;
                        tracing::warn!(
                            chain_id,
                            stream = %window.stream,
                            tx_hash = %raw.tx_hash,
                            log_index = raw.log_index,
                            %reason,
                            "Skipping malformed event"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        failed_block = Some(failed_block.map_or(raw.block_number, |b| b.min(raw.block_number)));
                        tracing::error!(
                            chain_id,
                            stream = %window.stream,
                            tx_hash = %raw.tx_hash,
                            log_index = raw.log_index,
                            block = raw.block_number,
                            error = %e,
                            "Failed to apply event; it will be retried"
                        );
                    }
                }
            }

            let target = with_failure_floor(window.advance_to, failed_block).filter(|t| *t > window.cursor);
            let Some(target) = target else {
                continue;
            };
            match self
                .ctx
                .cursors
                .advance_cursor(chain_id, window.stream, target)
                .await
            {
                Ok(()) => {
                    tracing::debug!(chain_id, stream = %window.stream, from = window.cursor, to = target, "Cursor advanced");
                    report.advanced.push((window.stream, target));
                }
                Err(e) => tracing::error!(
                    chain_id,
                    stream = %window.stream,
                    block = target,
                    error = %e,
                    "Failed to advance cursor; window will be re-fetched"
                ),
            }
        }

        report
    }

    async fn process_live(&self, raw: &RawEvent) {
        match self.handle(raw).await {
            Ok(outcome) => tracing::debug!(
                chain_id = self.ctx.chain_id(),
                tx_hash = %raw.tx_hash,
                log_index = raw.log_index,
                ?outcome,
                "Live event processed"
            ),
            // Backfill fetches the same log again; the guard keeps that safe.
            Err(e) => tracing::warn!(
                chain_id = self.ctx.chain_id(),
                tx_hash = %raw.tx_hash,
                log_index = raw.log_index,
                error = %e,
                "Live event not applied"
            ),
        }
    }
}
