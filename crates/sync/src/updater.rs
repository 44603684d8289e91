//! Ledger updater: per-type mutation planning and guarded application.

use chainbook_core::{AppError, EventType, LedgerEvent, event::ZERO_ADDRESS};
use chainbook_storage::{
    ApplyOutcome, Mutation,
    mutation::{BountyPool, RewardKind, SubLedger},
};

use crate::context::ReconcilerContext;

/// How `TRANSFER` events move wallet balances.
///
/// A deployment picks exactly one implementation per chain, matching its event
/// source, so the two never write the same `(chain, token)` balances.
pub trait BalanceUpdateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn transfer(&self, event: &LedgerEvent) -> Result<Vec<Mutation>, AppError>;
}

/// Replace wallet balances with the absolute values reported by the subgraph.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotStrategy;

impl BalanceUpdateStrategy for SnapshotStrategy {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn transfer(&self, event: &LedgerEvent) -> Result<Vec<Mutation>, AppError> {
        let sides = [
            (&event.from_address, event.snapshot.from_balance),
            (&event.to_address, event.snapshot.to_balance),
        ];
        if sides.iter().all(|(_, snapshot)| snapshot.is_none()) {
            return Err(AppError::Decode(format!(
                "transfer {} carries no balance snapshot",
                event.key()
            )));
        }
        Ok(sides
            .into_iter()
            .filter(|(address, _)| address.as_str() != ZERO_ADDRESS)
            .filter_map(|(address, snapshot)| {
                snapshot.map(|value| Mutation::SetWalletBalance {
                    address: address.clone(),
                    token_address: event.token_address.clone(),
                    value,
                })
            })
            .collect())
    }
}

/// Move wallet balances by `±amount`, for sources that only see the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaStrategy;

impl BalanceUpdateStrategy for DeltaStrategy {
    fn name(&self) -> &'static str {
        "delta"
    }

    fn transfer(&self, event: &LedgerEvent) -> Result<Vec<Mutation>, AppError> {
        let mut mutations = Vec::with_capacity(2);
        if event.from_address != ZERO_ADDRESS {
            mutations.push(Mutation::AdjustWalletBalance {
                address: event.from_address.clone(),
                token_address: event.token_address.clone(),
                delta: -event.amount,
            });
        }
        if event.to_address != ZERO_ADDRESS {
            mutations.push(Mutation::AdjustWalletBalance {
                address: event.to_address.clone(),
                token_address: event.token_address.clone(),
                delta: event.amount,
            });
        }
        Ok(mutations)
    }
}

fn token_id(event: &LedgerEvent) -> Result<String, AppError> {
    event
        .token_id
        .clone()
        .ok_or_else(|| AppError::Decode(format!("{} event {} has no token id", event.event_type, event.key())))
}

/// Plan the effects of `event`. Pure; nothing is written.
pub fn plan(
    event: &LedgerEvent,
    strategy: &dyn BalanceUpdateStrategy,
) -> Result<Vec<Mutation>, AppError> {
    let token_address = || event.token_address.clone();

    let mutations = match event.event_type {
        EventType::Transfer => strategy.transfer(event)?,
        EventType::Deposit => vec![Mutation::Deposit {
            address: event.from_address.clone(),
            token_address: token_address(),
            amount: event.amount,
        }],
        EventType::Claim => {
            let raw_id = token_id(event)?;
            let claim_id = raw_id
                .parse::<i64>()
                .map_err(|_| AppError::Decode(format!("claim id {raw_id:?} is not an integer")))?;
            vec![Mutation::ConfirmClaim {
                claim_id,
                receiver: event.to_address.clone(),
                token_address: token_address(),
                amount: event.amount,
            }]
        }
        EventType::Stake | EventType::Unstake => {
            let value = event.snapshot.staked.ok_or_else(|| {
                AppError::Decode(format!("{} event {} has no staked total", event.event_type, event.key()))
            })?;
            vec![Mutation::SetStaked {
                address: event.from_address.clone(),
                token_address: token_address(),
                value,
            }]
        }
        EventType::Tip => {
            let token_id = token_id(event)?;
            vec![
                Mutation::Tip {
                    sender: event.from_address.clone(),
                    receiver: event.to_address.clone(),
                    token_id: token_id.clone(),
                    amount: event.amount,
                },
                Mutation::CreditSubLedger {
                    address: event.to_address.clone(),
                    token_address: token_address(),
                    ledger: SubLedger::Tips,
                    amount: event.amount,
                },
                Mutation::RecordReward {
                    kind: RewardKind::Tip,
                    address: event.to_address.clone(),
                    token_id: Some(token_id),
                    token_address: token_address(),
                    amount: event.amount,
                },
            ]
        }
        EventType::Ppv => vec![
            Mutation::RecordPpv {
                payer: event.from_address.clone(),
                token_id: token_id(event)?,
                token_address: token_address(),
                amount: event.amount,
            },
            Mutation::CreditSubLedger {
                address: event.to_address.clone(),
                token_address: token_address(),
                ledger: SubLedger::Ppv,
                amount: event.amount,
            },
        ],
        EventType::BountyViewer | EventType::BountyCommentor => {
            let (pool, kind) = if event.event_type == EventType::BountyViewer {
                (BountyPool::Viewer, RewardKind::BountyViewer)
            } else {
                (BountyPool::Commentor, RewardKind::BountyCommentor)
            };
            let token_id = token_id(event)?;
            vec![
                Mutation::DrainBounty {
                    token_id: token_id.clone(),
                    pool,
                    amount: event.amount,
                },
                Mutation::CreditSubLedger {
                    address: event.to_address.clone(),
                    token_address: token_address(),
                    ledger: SubLedger::Bounty,
                    amount: event.amount,
                },
                Mutation::RecordReward {
                    kind,
                    address: event.to_address.clone(),
                    token_id: Some(token_id),
                    token_address: token_address(),
                    amount: event.amount,
                },
            ]
        }
        EventType::NftMint | EventType::NftTransfer => vec![Mutation::TransferNft {
            token_id: token_id(event)?,
            collection: token_address(),
            from: event.from_address.clone(),
            to: event.to_address.clone(),
        }],
    };

    Ok(mutations)
}

/// Apply `event` exactly once: the idempotency marker and every planned
/// mutation commit together, or nothing does.
pub async fn apply(ctx: &ReconcilerContext, event: &LedgerEvent) -> Result<ApplyOutcome, AppError> {
    let mutations = plan(event, ctx.strategy.as_ref())?;
    let outcome = ctx.ledger.commit(event, &mutations, ctx.integrity).await?;

    match outcome {
        ApplyOutcome::Applied => tracing::debug!(
            chain_id = event.chain_id,
            tx_hash = %event.tx_hash,
            log_index = event.log_index,
            event_type = %event.event_type,
            mutations = mutations.len(),
            "Applied event"
        ),
        ApplyOutcome::AlreadyProcessed => tracing::trace!(
            chain_id = event.chain_id,
            tx_hash = %event.tx_hash,
            log_index = event.log_index,
            "Event already processed"
        ),
    }
    Ok(outcome)
}
