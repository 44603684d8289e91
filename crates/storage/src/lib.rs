pub mod memory;
pub mod models;
pub mod mutation;
pub mod postgres;
pub mod repos;
pub mod store;

pub use memory::{MemoryStore, MemorySummary};
pub use models::Cursor;
pub use mutation::{ApplyOutcome, Mutation};
pub use postgres::PgStore;
pub use sqlx::postgres::PgPool;
pub use store::{CursorStore, LedgerStore};

use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Connect to PostgreSQL with a production-ready connection pool.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .connect(database_url)
        .await
}

/// Apply the ledger schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}
