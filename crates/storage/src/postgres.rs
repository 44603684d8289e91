use async_trait::async_trait;
use chainbook_core::{AppError, Amount, IntegrityPolicy, LedgerEvent, Stream, event::ZERO_ADDRESS};
use sqlx::{PgConnection, PgPool};

use crate::models::{ClaimStatus, Cursor, NewTransaction, PpvTransaction, Reward};
use crate::mutation::{ApplyOutcome, Mutation};
use crate::repos;
use crate::store::{CursorStore, LedgerStore, integrity_violation};

fn db(e: sqlx::Error) -> AppError {
    AppError::Database(e.to_string())
}

/// Postgres-backed cursor and ledger store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn execute(
        conn: &mut PgConnection,
        event: &LedgerEvent,
        mutation: &Mutation,
        policy: IntegrityPolicy,
    ) -> Result<(), AppError> {
        let chain_id = event.chain_id as i64;
        let block = event.block_number as i64;

        match mutation {
            Mutation::SetWalletBalance {
                address,
                token_address,
                value,
            } => {
                repos::set_wallet_balance(
                    &mut *conn,
                    chain_id,
                    address,
                    token_address,
                    &value.to_string(),
                    block,
                )
                .await
                .map_err(db)?;
            }
            Mutation::AdjustWalletBalance {
                address,
                token_address,
                delta,
            } => {
                repos::adjust_wallet_balance(
                    &mut *conn,
                    chain_id,
                    address,
                    token_address,
                    &delta.to_string(),
                    block,
                )
                .await
                .map_err(db)?;
            }
            Mutation::Deposit {
                address,
                token_address,
                amount,
            } => {
                repos::add_deposit(
                    &mut *conn,
                    chain_id,
                    address,
                    token_address,
                    &amount.to_string(),
                    block,
                )
                .await
                .map_err(db)?;
            }
            Mutation::ConfirmClaim {
                claim_id,
                receiver,
                token_address,
                amount,
            } => {
                let transitioned = repos::confirm_claim(
                    &mut *conn,
                    chain_id,
                    *claim_id,
                    token_address,
                    receiver,
                    &event.tx_hash,
                )
                .await
                .map_err(db)?;

                if !transitioned {
                    let status =
                        repos::get_claim_status(&mut *conn, chain_id, *claim_id, token_address, receiver)
                            .await
                            .map_err(db)?;
                    return match status {
                        Some(s) if s == ClaimStatus::Confirmed.as_str() => {
                            tracing::debug!(claim_id, "Claim already confirmed");
                            Ok(())
                        }
                        _ => Err(AppError::NotFound(format!(
                            "claim {claim_id} for {receiver} on token {token_address}"
                        ))),
                    };
                }

                let pending = repos::apply_claim_to_balance(
                    &mut *conn,
                    chain_id,
                    receiver,
                    token_address,
                    &amount.to_string(),
                    block,
                )
                .await
                .map_err(db)?;
                if Amount::parse(&pending)?.is_negative() {
                    integrity_violation(
                        policy,
                        event,
                        format!("claim {claim_id} drives pending of {receiver} to {pending}"),
                    )?;
                }
            }
            Mutation::SetStaked {
                address,
                token_address,
                value,
            } => {
                repos::set_staked(
                    &mut *conn,
                    chain_id,
                    address,
                    token_address,
                    &value.to_string(),
                    block,
                )
                .await
                .map_err(db)?;
            }
            Mutation::Tip {
                sender,
                receiver,
                token_id,
                amount,
            } => {
                let amount = amount.to_string();
                repos::add_sent_tips(&mut *conn, sender, &amount)
                    .await
                    .map_err(db)?;
                repos::add_received_tips(&mut *conn, receiver, &amount)
                    .await
                    .map_err(db)?;
                let touched = repos::add_token_tips(&mut *conn, chain_id, token_id, receiver, &amount)
                    .await
                    .map_err(db)?;
                if touched == 0 {
                    if repos::token_exists(&mut *conn, chain_id, token_id)
                        .await
                        .map_err(db)?
                    {
                        tracing::debug!(token_id = %token_id, receiver = %receiver, "Tip receiver does not own token");
                    } else {
                        integrity_violation(policy, event, format!("tipped token {token_id} not found"))?;
                    }
                }
            }
            Mutation::CreditSubLedger {
                address,
                token_address,
                ledger,
                amount,
            } => {
                repos::credit_sub_ledger(
                    &mut *conn,
                    chain_id,
                    address,
                    token_address,
                    *ledger,
                    &amount.to_string(),
                    block,
                )
                .await
                .map_err(db)?;
            }
            Mutation::RecordPpv {
                payer,
                token_id,
                token_address,
                amount,
            } => {
                let ppv = PpvTransaction {
                    chain_id,
                    tx_hash: event.tx_hash.clone(),
                    log_index: event.log_index as i64,
                    token_id: token_id.clone(),
                    payer: payer.clone(),
                    token_address: token_address.clone(),
                    amount: amount.to_string(),
                    block_number: block,
                };
                repos::insert_ppv(&mut *conn, &ppv).await.map_err(db)?;
                let touched = repos::add_token_funds(&mut *conn, chain_id, token_id, &ppv.amount)
                    .await
                    .map_err(db)?;
                if touched == 0 {
                    integrity_violation(policy, event, format!("PPV token {token_id} not found"))?;
                }
            }
            Mutation::DrainBounty {
                token_id,
                pool,
                amount,
            } => {
                let remaining =
                    repos::drain_bounty(&mut *conn, chain_id, token_id, *pool, &amount.to_string())
                        .await
                        .map_err(db)?;
                match remaining {
                    None => {
                        integrity_violation(policy, event, format!("bounty token {token_id} not found"))?
                    }
                    Some(left) if Amount::parse(&left)?.is_negative() => integrity_violation(
                        policy,
                        event,
                        format!("{pool:?} bounty of token {token_id} overdrawn to {left}"),
                    )?,
                    Some(_) => {}
                }
            }
            Mutation::TransferNft {
                token_id,
                collection,
                from,
                to,
            } => {
                let log_index = event.log_index as i64;
                repos::upsert_nft_owner(&mut *conn, chain_id, token_id, collection, to, block, log_index)
                    .await
                    .map_err(db)?;
                if from == ZERO_ADDRESS {
                    repos::mark_minted(&mut *conn, chain_id, token_id, to)
                        .await
                        .map_err(db)?;
                    repos::increment_uploads(&mut *conn, to).await.map_err(db)?;
                }
            }
            Mutation::RecordReward {
                kind,
                address,
                token_id,
                token_address,
                amount,
            } => {
                let reward = Reward {
                    chain_id,
                    tx_hash: event.tx_hash.clone(),
                    log_index: event.log_index as i64,
                    kind: kind.as_str().to_string(),
                    address: address.clone(),
                    token_id: token_id.clone(),
                    token_address: token_address.clone(),
                    amount: amount.to_string(),
                    block_number: block,
                };
                repos::insert_reward(&mut *conn, &reward).await.map_err(db)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CursorStore for PgStore {
    async fn load_cursor(&self, chain_id: u64, start_block: u64) -> Result<Cursor, AppError> {
        let initial = Cursor::initial(chain_id, start_block);
        repos::ensure_setting(&self.pool, chain_id as i64, initial.transfer as i64)
            .await
            .map_err(db)?;
        let setting = repos::get_setting(&self.pool, chain_id as i64)
            .await
            .map_err(db)?
            .ok_or_else(|| AppError::NotFound(format!("settings row for chain {chain_id}")))?;
        Ok(setting.into())
    }

    async fn advance_cursor(
        &self,
        chain_id: u64,
        stream: Stream,
        block: u64,
    ) -> Result<(), AppError> {
        repos::advance_cursor(&self.pool, chain_id as i64, stream, block as i64)
            .await
            .map_err(db)
    }

    async fn record_graph_lag(&self, chain_id: u64, lag_secs: i64) -> Result<(), AppError> {
        repos::set_graph_lag(&self.pool, chain_id as i64, lag_secs)
            .await
            .map_err(db)
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn commit(
        &self,
        event: &LedgerEvent,
        mutations: &[Mutation],
        policy: IntegrityPolicy,
    ) -> Result<ApplyOutcome, AppError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        // The marker insert is the guard: a concurrent writer of the same key
        // blocks on the unique index until this transaction ends.
        let fresh = repos::insert_transaction_if_absent(&mut *tx, &NewTransaction::from(event))
            .await
            .map_err(db)?;
        if !fresh {
            tx.rollback().await.map_err(db)?;
            return Ok(ApplyOutcome::AlreadyProcessed);
        }

        for mutation in mutations {
            // An error drops `tx`, rolling back the marker with the effects.
            Self::execute(&mut *tx, event, mutation, policy).await?;
        }

        tx.commit().await.map_err(db)?;
        Ok(ApplyOutcome::Applied)
    }
}
