use tracing_subscriber::{EnvFilter, fmt};

/// Default directives when `RUST_LOG` is unset. sqlx statement logging is noisy at `info`.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Initialise the global tracing subscriber for a reconciler process.
///
/// Respects `RUST_LOG`. Integrity warnings are emitted under the `integrity`
/// target so they can be filtered or routed on their own.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}
