pub mod amount;
pub mod config;
pub mod error;
pub mod event;
pub mod network;
pub mod telemetry;

pub use amount::Amount;
pub use config::{IntegrityPolicy, RetryConfig, Settings, SourceMode, TokenRegistry, TrackedToken};
pub use error::AppError;
pub use event::{EventKey, EventType, LedgerEvent, RawAmount, RawEvent, RawKind, Snapshot, Source, Stream};
pub use network::Network;
