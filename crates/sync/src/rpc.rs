//! JSON-RPC adapter: windowed `eth_getLogs` backfill and live log subscriptions.

use std::sync::Arc;

use alloy::providers::{DynProvider, Provider};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use chainbook_core::{AppError, RawEvent, RetryConfig, Stream};
use chainbook_evm::{ContractSet, decode_log};
use chainbook_storage::Cursor;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cursor::BlockRange;
use crate::retry::{compute_backoff, sleep_or_cancel};
use crate::scheduler::{FetchOutcome, StreamWindow, WindowBatch, WindowSource};
use crate::worker::SourceMessage;

/// The two provider calls backfill needs.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn head(&self) -> Result<u64, AppError>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, AppError>;
}

#[async_trait]
impl LogSource for DynProvider {
    async fn head(&self) -> Result<u64, AppError> {
        self.get_block_number()
            .await
            .map_err(|e| AppError::Rpc(e.to_string()))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, AppError> {
        self.get_logs(filter)
            .await
            .map_err(|e| AppError::Rpc(e.to_string()))
    }
}

pub struct RpcAdapter {
    source: Arc<dyn LogSource>,
    contracts: ContractSet,
    /// Blocks reconciled per cycle.
    block_window: u64,
    /// Blocks per `eth_getLogs` call.
    rpc_window: u64,
    retry: RetryConfig,
}

impl RpcAdapter {
    pub fn new(
        source: Arc<dyn LogSource>,
        contracts: ContractSet,
        block_window: u64,
        rpc_window: u64,
        retry: RetryConfig,
    ) -> Self {
        Self {
            source,
            contracts,
            block_window,
            rpc_window: rpc_window.max(1),
            retry,
        }
    }

    /// Fetch and decode every watched log in `[from, to]`.
    ///
    /// A failed call pauses with exponential backoff, rewinds one window and
    /// tries again, giving up after `max_attempts` consecutive failures.
    pub async fn backfill(&self, from: u64, to: u64, cancel: &CancellationToken) -> Result<Vec<RawEvent>, AppError> {
        let addresses = self.contracts.addresses();
        let mut events = Vec::new();
        let mut next = from;
        let mut attempt = 0u32;
        // Start of the furthest failed call. Attempts only reset once a call
        // covering it succeeds, so a rewound window that reads fine cannot
        // hide a call that keeps failing.
        let mut failed_at: Option<u64> = None;

        while next <= to {
            let end = next.saturating_add(self.rpc_window - 1).min(to);
            let filter = Filter::new()
                .address(addresses.clone())
                .from_block(next)
                .to_block(end);

            match self.source.logs(&filter).await {
                Ok(logs) => {
                    if failed_at.is_none_or(|f| end >= f) {
                        attempt = 0;
                        failed_at = None;
                    }
                    tracing::debug!(from = next, to = end, logs = logs.len(), "Fetched logs");
                    for log in &logs {
                        match decode_log(log, &self.contracts) {
                            Ok(Some(raw)) => events.push(raw),
                            Ok(None) => {}
                            Err(e) => tracing::warn!(error = %e, "Skipping undecodable log"),
                        }
                    }
                    next = end + 1;
                }
                Err(e) => {
                    attempt += 1;
                    failed_at = Some(failed_at.map_or(next, |f| f.max(next)));
                    if attempt >= self.retry.max_attempts {
                        return Err(e);
                    }
                    let delay = compute_backoff(&self.retry, attempt);
                    let rewound = next.saturating_sub(self.rpc_window).max(from);
                    tracing::warn!(
                        attempt,
                        max = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        from = next,
                        rewind_to = rewound,
                        error = %e,
                        "getLogs failed, retrying"
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        return Err(AppError::Cancelled);
                    }
                    next = rewound;
                }
            }
        }

        // A rewind re-reads logs that were already collected.
        events.sort_by(|a, b| (a.block_number, a.log_index).cmp(&(b.block_number, b.log_index)));
        events.dedup_by(|a, b| a.tx_hash == b.tx_hash && a.log_index == b.log_index);
        Ok(events)
    }
}

#[async_trait]
impl WindowSource for RpcAdapter {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn fetch(&self, cursor: &Cursor, cancel: &CancellationToken) -> Result<FetchOutcome, AppError> {
        let head = self.source.head().await?;
        let lowest = Stream::ALL
            .iter()
            .map(|s| cursor.get(*s))
            .min()
            .unwrap_or(cursor.transfer);
        let Some(range) = BlockRange::after(lowest, self.block_window).clamp(head) else {
            return Ok(FetchOutcome::Idle { lag_secs: None });
        };

        tracing::info!(from = range.from, to = range.to, head, "Backfilling logs");
        let events = self.backfill(range.from, range.to, cancel).await?;

        let streams = Stream::ALL
            .iter()
            .map(|&stream| {
                let position = cursor.get(stream);
                StreamWindow {
                    stream,
                    cursor: position,
                    events: events
                        .iter()
                        .filter(|e| e.kind.stream() == stream && e.block_number > position)
                        .cloned()
                        .collect(),
                    advance_to: (range.to > position).then_some(range.to),
                }
            })
            .collect();

        Ok(FetchOutcome::Window(WindowBatch {
            streams,
            lag_secs: None,
            has_more: range.to < head,
        }))
    }
}

/// Forward live logs of the watched contracts to the apply worker until
/// `cancel` fires, resubscribing whenever the stream drops.
pub async fn run_live(
    provider: DynProvider,
    contracts: ContractSet,
    worker: mpsc::Sender<SourceMessage>,
    retry: RetryConfig,
    cancel: CancellationToken,
) {
    let filter = Filter::new().address(contracts.addresses());
    let mut attempt = 0u32;

    loop {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return,
            sub = async { provider.subscribe_logs(&filter).await } => sub,
        };

        match subscribed {
            Ok(sub) => {
                attempt = 0;
                tracing::info!("Subscribed to live contract logs");
                let mut stream = sub.into_stream();
                loop {
                    let log = tokio::select! {
                        _ = cancel.cancelled() => return,
                        log = stream.next() => log,
                    };
                    let Some(log) = log else {
                        break;
                    };
                    match decode_log(&log, &contracts) {
                        Ok(Some(raw)) => {
                            if worker.send(SourceMessage::Live(raw)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(error = %e, "Skipping undecodable live log"),
                    }
                }
                tracing::warn!("Log subscription ended; resubscribing");
            }
            Err(e) => {
                attempt += 1;
                tracing::warn!(attempt, error = %e, "Log subscription failed");
            }
        }

        if !sleep_or_cancel(compute_backoff(&retry, attempt.max(1)), &cancel).await {
            return;
        }
    }
}
