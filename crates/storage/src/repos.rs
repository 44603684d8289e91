use chainbook_core::Stream;
use sqlx::{Executor, PgPool, Postgres};

use crate::models::*;
use crate::mutation::{BountyPool, SubLedger};

// ─── Cursor Queries ─────────────────────────────────────────────────────────

/// Create the chain's cursor row at `initial` (ignore if it already exists).
pub async fn ensure_setting<'e, E>(
    executor: E,
    chain_id: i64,
    initial: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO settings (chain_id, last_block_fetched_for_transfer, last_block_fetched_for_protocol_tx, last_block_fetched_for_nft)
        VALUES ($1, $2, $2, $2)
        ON CONFLICT (chain_id) DO NOTHING
        "#,
    )
    .bind(chain_id)
    .bind(initial)
    .execute(executor)
    .await?;
    Ok(())
}

/// Get the cursor row of a chain.
pub async fn get_setting(pool: &PgPool, chain_id: i64) -> Result<Option<Setting>, sqlx::Error> {
    sqlx::query_as::<_, Setting>(
        r#"
        SELECT chain_id, last_block_fetched_for_transfer, last_block_fetched_for_protocol_tx,
               last_block_fetched_for_nft, synced_diff_time_of_graph
        FROM settings WHERE chain_id = $1
        "#,
    )
    .bind(chain_id)
    .fetch_optional(pool)
    .await
}

/// Move a stream cursor forward. `GREATEST` keeps it monotonic.
pub async fn advance_cursor<'e, E>(
    executor: E,
    chain_id: i64,
    stream: Stream,
    block_number: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = match stream {
        Stream::Transfer => {
            "UPDATE settings SET last_block_fetched_for_transfer = GREATEST(last_block_fetched_for_transfer, $2), updated_at = NOW() WHERE chain_id = $1"
        }
        Stream::ProtocolTx => {
            "UPDATE settings SET last_block_fetched_for_protocol_tx = GREATEST(last_block_fetched_for_protocol_tx, $2), updated_at = NOW() WHERE chain_id = $1"
        }
        Stream::NftTransfer => {
            "UPDATE settings SET last_block_fetched_for_nft = GREATEST(last_block_fetched_for_nft, $2), updated_at = NOW() WHERE chain_id = $1"
        }
    };
    sqlx::query(sql)
        .bind(chain_id)
        .bind(block_number)
        .execute(executor)
        .await?;
    Ok(())
}

/// Record how many seconds the subgraph head trails wall-clock time.
pub async fn set_graph_lag<'e, E>(executor: E, chain_id: i64, lag_secs: i64) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE settings SET synced_diff_time_of_graph = $2 WHERE chain_id = $1")
        .bind(chain_id)
        .bind(lag_secs)
        .execute(executor)
        .await?;
    Ok(())
}

// ─── Transaction Queries ────────────────────────────────────────────────────

/// Insert a transaction unless its (tx_hash, log_index, chain_id) already exists.
/// Returns `true` only for a fresh insert.
pub async fn insert_transaction_if_absent<'e, E>(
    executor: E,
    t: &NewTransaction,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO transactions (chain_id, tx_hash, log_index, block_number, event_type, from_address, to_address, token_address, token_id, amount, status, source)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (tx_hash, log_index, chain_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(t.chain_id)
    .bind(&t.tx_hash)
    .bind(t.log_index)
    .bind(t.block_number)
    .bind(&t.event_type)
    .bind(&t.from_address)
    .bind(&t.to_address)
    .bind(&t.token_address)
    .bind(&t.token_id)
    .bind(&t.amount)
    .bind(&t.status)
    .bind(&t.source)
    .fetch_optional(executor)
    .await?;
    Ok(row.is_some())
}

// ─── Balance Queries ────────────────────────────────────────────────────────

/// Replace the wallet balance with an absolute value.
pub async fn set_wallet_balance<'e, E>(
    executor: E,
    chain_id: i64,
    address: &str,
    token_address: &str,
    value: &str,
    block_number: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO balances (address, chain_id, token_address, wallet_balance, updated_at_block)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (address, chain_id, token_address) DO UPDATE
        SET wallet_balance = $4,
            updated_at_block = GREATEST(balances.updated_at_block, $5)
        "#,
    )
    .bind(address)
    .bind(chain_id)
    .bind(token_address)
    .bind(value)
    .bind(block_number)
    .execute(executor)
    .await?;
    Ok(())
}

/// Add a signed delta to the wallet balance, clamped at 0.
pub async fn adjust_wallet_balance<'e, E>(
    executor: E,
    chain_id: i64,
    address: &str,
    token_address: &str,
    delta: &str,
    block_number: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO balances (address, chain_id, token_address, wallet_balance, updated_at_block)
        VALUES ($1, $2, $3, GREATEST(0, CAST($4 AS NUMERIC))::TEXT, $5)
        ON CONFLICT (address, chain_id, token_address) DO UPDATE
        SET wallet_balance = GREATEST(0, CAST(balances.wallet_balance AS NUMERIC) + CAST($4 AS NUMERIC))::TEXT,
            updated_at_block = GREATEST(balances.updated_at_block, $5)
        "#,
    )
    .bind(address)
    .bind(chain_id)
    .bind(token_address)
    .bind(delta)
    .bind(block_number)
    .execute(executor)
    .await?;
    Ok(())
}

/// `balance += amount; deposited += amount`.
pub async fn add_deposit<'e, E>(
    executor: E,
    chain_id: i64,
    address: &str,
    token_address: &str,
    amount: &str,
    block_number: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO balances (address, chain_id, token_address, balance, deposited, updated_at_block)
        VALUES ($1, $2, $3, $4, $4, $5)
        ON CONFLICT (address, chain_id, token_address) DO UPDATE
        SET balance = (CAST(balances.balance AS NUMERIC) + CAST($4 AS NUMERIC))::TEXT,
            deposited = (CAST(balances.deposited AS NUMERIC) + CAST($4 AS NUMERIC))::TEXT,
            updated_at_block = GREATEST(balances.updated_at_block, $5)
        "#,
    )
    .bind(address)
    .bind(chain_id)
    .bind(token_address)
    .bind(amount)
    .bind(block_number)
    .execute(executor)
    .await?;
    Ok(())
}

/// `claimed += amount; pending -= amount`. Returns the resulting `pending`.
pub async fn apply_claim_to_balance<'e, E>(
    executor: E,
    chain_id: i64,
    address: &str,
    token_address: &str,
    amount: &str,
    block_number: i64,
) -> Result<String, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (String,) = sqlx::query_as(
        r#"
        INSERT INTO balances (address, chain_id, token_address, claimed, pending, updated_at_block)
        VALUES ($1, $2, $3, $4, (0 - CAST($4 AS NUMERIC))::TEXT, $5)
        ON CONFLICT (address, chain_id, token_address) DO UPDATE
        SET claimed = (CAST(balances.claimed AS NUMERIC) + CAST($4 AS NUMERIC))::TEXT,
            pending = (CAST(balances.pending AS NUMERIC) - CAST($4 AS NUMERIC))::TEXT,
            updated_at_block = GREATEST(balances.updated_at_block, $5)
        RETURNING pending
        "#,
    )
    .bind(address)
    .bind(chain_id)
    .bind(token_address)
    .bind(amount)
    .bind(block_number)
    .fetch_one(executor)
    .await?;
    Ok(row.0)
}

/// Replace the staked total.
pub async fn set_staked<'e, E>(
    executor: E,
    chain_id: i64,
    address: &str,
    token_address: &str,
    value: &str,
    block_number: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO balances (address, chain_id, token_address, staked, updated_at_block)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (address, chain_id, token_address) DO UPDATE
        SET staked = $4,
            updated_at_block = GREATEST(balances.updated_at_block, $5)
        "#,
    )
    .bind(address)
    .bind(chain_id)
    .bind(token_address)
    .bind(value)
    .bind(block_number)
    .execute(executor)
    .await?;
    Ok(())
}

/// Credit one of the payout sub-ledgers.
pub async fn credit_sub_ledger<'e, E>(
    executor: E,
    chain_id: i64,
    address: &str,
    token_address: &str,
    ledger: SubLedger,
    amount: &str,
    block_number: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = match ledger {
        SubLedger::Tips => {
            r#"
            INSERT INTO balances (address, chain_id, token_address, tips_earned, updated_at_block)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (address, chain_id, token_address) DO UPDATE
            SET tips_earned = (CAST(balances.tips_earned AS NUMERIC) + CAST($4 AS NUMERIC))::TEXT,
                updated_at_block = GREATEST(balances.updated_at_block, $5)
            "#
        }
        SubLedger::Ppv => {
            r#"
            INSERT INTO balances (address, chain_id, token_address, ppv_earned, updated_at_block)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (address, chain_id, token_address) DO UPDATE
            SET ppv_earned = (CAST(balances.ppv_earned AS NUMERIC) + CAST($4 AS NUMERIC))::TEXT,
                updated_at_block = GREATEST(balances.updated_at_block, $5)
            "#
        }
        SubLedger::Bounty => {
            r#"
            INSERT INTO balances (address, chain_id, token_address, bounty_earned, updated_at_block)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (address, chain_id, token_address) DO UPDATE
            SET bounty_earned = (CAST(balances.bounty_earned AS NUMERIC) + CAST($4 AS NUMERIC))::TEXT,
                updated_at_block = GREATEST(balances.updated_at_block, $5)
            "#
        }
    };
    sqlx::query(sql)
        .bind(address)
        .bind(chain_id)
        .bind(token_address)
        .bind(amount)
        .bind(block_number)
        .execute(executor)
        .await?;
    Ok(())
}

// ─── Claim Queries ──────────────────────────────────────────────────────────

/// Flip a claim to `confirmed` unless it already is. Returns `true` on transition.
pub async fn confirm_claim<'e, E>(
    executor: E,
    chain_id: i64,
    claim_id: i64,
    token_address: &str,
    receiver: &str,
    tx_hash: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE claim_transactions
        SET status = 'confirmed', tx_hash = $5, confirmed_at = NOW()
        WHERE id = $1 AND chain_id = $2 AND token_address = $3 AND receiver_address = $4
          AND status <> 'confirmed'
        RETURNING id
        "#,
    )
    .bind(claim_id)
    .bind(chain_id)
    .bind(token_address)
    .bind(receiver)
    .bind(tx_hash)
    .fetch_optional(executor)
    .await?;
    Ok(row.is_some())
}

/// Current status of a claim, if the claim exists.
pub async fn get_claim_status<'e, E>(
    executor: E,
    chain_id: i64,
    claim_id: i64,
    token_address: &str,
    receiver: &str,
) -> Result<Option<String>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT status FROM claim_transactions
        WHERE id = $1 AND chain_id = $2 AND token_address = $3 AND receiver_address = $4
        "#,
    )
    .bind(claim_id)
    .bind(chain_id)
    .bind(token_address)
    .bind(receiver)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|r| r.0))
}

// ─── Token Queries ──────────────────────────────────────────────────────────

pub async fn token_exists<'e, E>(executor: E, chain_id: i64, token_id: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1::BIGINT FROM tokens WHERE chain_id = $1 AND token_id = $2")
            .bind(chain_id)
            .bind(token_id)
            .fetch_optional(executor)
            .await?;
    Ok(row.is_some())
}

/// Add to `total_tips` when `receiver` owns or minted the token. Returns rows touched.
pub async fn add_token_tips<'e, E>(
    executor: E,
    chain_id: i64,
    token_id: &str,
    receiver: &str,
    amount: &str,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE tokens
        SET total_tips = (CAST(total_tips AS NUMERIC) + CAST($4 AS NUMERIC))::TEXT
        WHERE chain_id = $1 AND token_id = $2 AND (owner = $3 OR minter = $3)
        "#,
    )
    .bind(chain_id)
    .bind(token_id)
    .bind(receiver)
    .bind(amount)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// `total_funds += amount`. Returns rows touched.
pub async fn add_token_funds<'e, E>(
    executor: E,
    chain_id: i64,
    token_id: &str,
    amount: &str,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE tokens
        SET total_funds = (CAST(total_funds AS NUMERIC) + CAST($3 AS NUMERIC))::TEXT
        WHERE chain_id = $1 AND token_id = $2
        "#,
    )
    .bind(chain_id)
    .bind(token_id)
    .bind(amount)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Decrement a locked bounty pool. Returns the remaining pool, or `None` when the token is unknown.
pub async fn drain_bounty<'e, E>(
    executor: E,
    chain_id: i64,
    token_id: &str,
    pool: BountyPool,
    amount: &str,
) -> Result<Option<String>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = match pool {
        BountyPool::Viewer => {
            r#"
            UPDATE tokens
            SET bounty_viewer = (CAST(bounty_viewer AS NUMERIC) - CAST($3 AS NUMERIC))::TEXT
            WHERE chain_id = $1 AND token_id = $2
            RETURNING bounty_viewer
            "#
        }
        BountyPool::Commentor => {
            r#"
            UPDATE tokens
            SET bounty_commentor = (CAST(bounty_commentor AS NUMERIC) - CAST($3 AS NUMERIC))::TEXT
            WHERE chain_id = $1 AND token_id = $2
            RETURNING bounty_commentor
            "#
        }
    };
    let row: Option<(String,)> = sqlx::query_as(sql)
        .bind(chain_id)
        .bind(token_id)
        .bind(amount)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(|r| r.0))
}

/// Set the owner of an NFT. Transfers ordered before the last applied one by
/// `(block, log index)` are ignored.
pub async fn upsert_nft_owner<'e, E>(
    executor: E,
    chain_id: i64,
    token_id: &str,
    collection: &str,
    owner: &str,
    block_number: i64,
    log_index: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO tokens (chain_id, token_id, collection, owner, updated_at_block, updated_at_log_index)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (chain_id, token_id) DO UPDATE
        SET owner = $4, collection = $3, updated_at_block = $5, updated_at_log_index = $6
        WHERE (tokens.updated_at_block, tokens.updated_at_log_index) <= ($5, $6)
        "#,
    )
    .bind(chain_id)
    .bind(token_id)
    .bind(collection)
    .bind(owner)
    .bind(block_number)
    .bind(log_index)
    .execute(executor)
    .await?;
    Ok(())
}

/// Record the minter and flip the token to `minted`.
pub async fn mark_minted<'e, E>(
    executor: E,
    chain_id: i64,
    token_id: &str,
    minter: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE tokens SET minter = $3, status = 'minted' WHERE chain_id = $1 AND token_id = $2")
        .bind(chain_id)
        .bind(token_id)
        .bind(minter)
        .execute(executor)
        .await?;
    Ok(())
}

// ─── Account Queries ────────────────────────────────────────────────────────

pub async fn add_sent_tips<'e, E>(executor: E, address: &str, amount: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO accounts (address, sent_tips) VALUES ($1, $2)
        ON CONFLICT (address) DO UPDATE
        SET sent_tips = (CAST(accounts.sent_tips AS NUMERIC) + CAST($2 AS NUMERIC))::TEXT
        "#,
    )
    .bind(address)
    .bind(amount)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn add_received_tips<'e, E>(
    executor: E,
    address: &str,
    amount: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO accounts (address, received_tips) VALUES ($1, $2)
        ON CONFLICT (address) DO UPDATE
        SET received_tips = (CAST(accounts.received_tips AS NUMERIC) + CAST($2 AS NUMERIC))::TEXT
        "#,
    )
    .bind(address)
    .bind(amount)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn increment_uploads<'e, E>(executor: E, address: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO accounts (address, uploads) VALUES ($1, 1)
        ON CONFLICT (address) DO UPDATE SET uploads = accounts.uploads + 1
        "#,
    )
    .bind(address)
    .execute(executor)
    .await?;
    Ok(())
}

// ─── Audit Rows ─────────────────────────────────────────────────────────────

pub async fn insert_reward<'e, E>(executor: E, reward: &Reward) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO rewards (chain_id, tx_hash, log_index, kind, address, token_id, token_address, amount, block_number)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (chain_id, tx_hash, log_index) DO NOTHING
        "#,
    )
    .bind(reward.chain_id)
    .bind(&reward.tx_hash)
    .bind(reward.log_index)
    .bind(&reward.kind)
    .bind(&reward.address)
    .bind(&reward.token_id)
    .bind(&reward.token_address)
    .bind(&reward.amount)
    .bind(reward.block_number)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn insert_ppv<'e, E>(executor: E, ppv: &PpvTransaction) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO ppv_transactions (chain_id, tx_hash, log_index, token_id, payer, token_address, amount, block_number)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (chain_id, tx_hash, log_index) DO NOTHING
        "#,
    )
    .bind(ppv.chain_id)
    .bind(&ppv.tx_hash)
    .bind(ppv.log_index)
    .bind(&ppv.token_id)
    .bind(&ppv.payer)
    .bind(&ppv.token_address)
    .bind(&ppv.amount)
    .bind(ppv.block_number)
    .execute(executor)
    .await?;
    Ok(())
}
