//! Chain event reconciliation engine.
//!
//! A [`Reconciler`] per chain pulls windows of events from a [`WindowSource`]
//! (subgraph or JSON-RPC), hands them to the single [`ApplyWorker`] of the chain
//! and advances the stream cursors the worker reports as fully processed.

pub mod classifier;
pub mod context;
pub mod cursor;
pub mod retry;
pub mod rpc;
pub mod scheduler;
pub mod subgraph;
pub mod updater;
pub mod worker;

pub use classifier::classify;
pub use context::ReconcilerContext;
pub use rpc::{LogSource, RpcAdapter};
pub use scheduler::{CycleOutcome, FetchOutcome, Reconciler, StreamWindow, WindowBatch, WindowSource};
pub use subgraph::{SubgraphAdapter, SubgraphClient};
pub use updater::{BalanceUpdateStrategy, DeltaStrategy, SnapshotStrategy};
pub use worker::{ApplyWorker, BatchReport, SourceMessage};
