//! Backoff for transient upstream failures.

use std::time::Duration;

use chainbook_core::RetryConfig;
use tokio_util::sync::CancellationToken;

/// Delay before retry number `attempt` (1-indexed).
///
/// `initial_backoff_ms * backoff_multiplier^(attempt - 1)`, capped at `max_backoff_ms`.
#[must_use]
pub fn compute_backoff(cfg: &RetryConfig, attempt: u32) -> Duration {
    let base = cfg.initial_backoff_ms as f64
        * cfg
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
    let capped = base.min(cfg.max_backoff_ms as f64);
    Duration::from_millis(capped as u64)
}

/// Sleep for `delay` unless `cancel` fires first. Returns `false` when cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
