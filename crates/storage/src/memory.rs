//! In-process store with the same semantics as [`crate::PgStore`].
//!
//! Backs `--dry-run` reconciliation and the engine's tests. A commit journals
//! the prior value of every entry a mutation touches and replays the journal
//! when a later mutation fails, which gives the same all-or-nothing behaviour
//! as the Postgres transaction without copying the whole ledger per event.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chainbook_core::{
    AppError, Amount, EventKey, IntegrityPolicy, LedgerEvent, Stream, event::ZERO_ADDRESS,
};

use crate::models::*;
use crate::mutation::{ApplyOutcome, BountyPool, Mutation, SubLedger};
use crate::store::{CursorStore, LedgerStore, integrity_violation};

type BalanceKey = (String, i64, String);
type ClaimKey = (i64, i64, String, String);

/// Prior value of one entry, restored when a commit fails part way.
enum Undo {
    Balance(BalanceKey, Option<Balance>),
    Claim(ClaimKey, Option<ClaimTransaction>),
    Token((i64, String), Option<Token>),
    Account(String, Option<Account>),
    Rewards(usize),
    Ppv(usize),
}

fn restore<K: Eq + std::hash::Hash, V>(map: &mut HashMap<K, V>, key: K, prior: Option<V>) {
    match prior {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    cursors: HashMap<u64, Cursor>,
    cursor_history: Vec<(u64, Stream, u64)>,
    transactions: BTreeMap<EventKey, NewTransaction>,
    balances: HashMap<BalanceKey, Balance>,
    claims: HashMap<ClaimKey, ClaimTransaction>,
    tokens: HashMap<(i64, String), Token>,
    accounts: HashMap<String, Account>,
    rewards: Vec<Reward>,
    ppv: Vec<PpvTransaction>,
}

/// Counts of what a store holds, for dry-run reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySummary {
    pub transactions: usize,
    pub balances: usize,
    pub tokens: usize,
    pub accounts: usize,
    pub rewards: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn add(current: &str, delta: Amount) -> Result<String, AppError> {
    Ok((Amount::parse(current)? + delta).to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a claim request, as the API would when a user asks to claim.
    pub fn insert_claim(&self, claim: ClaimTransaction) {
        let key = (
            claim.id,
            claim.chain_id,
            claim.token_address.clone(),
            claim.receiver_address.clone(),
        );
        self.state().claims.insert(key, claim);
    }

    /// Seed or replace an NFT record.
    pub fn insert_token(&self, token: Token) {
        self.state()
            .tokens
            .insert((token.chain_id, token.token_id.clone()), token);
    }

    /// Seed or replace a balance row.
    pub fn insert_balance(&self, balance: Balance) {
        let key = (
            balance.address.clone(),
            balance.chain_id,
            balance.token_address.clone(),
        );
        self.state().balances.insert(key, balance);
    }

    pub fn balance(&self, chain_id: u64, address: &str, token_address: &str) -> Option<Balance> {
        self.state()
            .balances
            .get(&(address.to_string(), chain_id as i64, token_address.to_string()))
            .cloned()
    }

    pub fn claim(
        &self,
        chain_id: u64,
        claim_id: i64,
        token_address: &str,
        receiver: &str,
    ) -> Option<ClaimTransaction> {
        self.state()
            .claims
            .get(&(
                claim_id,
                chain_id as i64,
                token_address.to_string(),
                receiver.to_string(),
            ))
            .cloned()
    }

    pub fn token(&self, chain_id: u64, token_id: &str) -> Option<Token> {
        self.state()
            .tokens
            .get(&(chain_id as i64, token_id.to_string()))
            .cloned()
    }

    pub fn account(&self, address: &str) -> Option<Account> {
        self.state().accounts.get(address).cloned()
    }

    pub fn transactions(&self) -> Vec<NewTransaction> {
        self.state().transactions.values().cloned().collect()
    }

    pub fn rewards(&self) -> Vec<Reward> {
        self.state().rewards.clone()
    }

    pub fn ppv_transactions(&self) -> Vec<PpvTransaction> {
        self.state().ppv.clone()
    }

    pub fn cursor(&self, chain_id: u64) -> Option<Cursor> {
        self.state().cursors.get(&chain_id).copied()
    }

    /// Every `advance_cursor` call in order, as `(chain_id, stream, block)`.
    pub fn cursor_history(&self) -> Vec<(u64, Stream, u64)> {
        self.state().cursor_history.clone()
    }

    pub fn summary(&self) -> MemorySummary {
        let s = self.state();
        MemorySummary {
            transactions: s.transactions.len(),
            balances: s.balances.len(),
            tokens: s.tokens.len(),
            accounts: s.accounts.len(),
            rewards: s.rewards.len(),
        }
    }
}

impl State {
    fn balance_mut(&mut self, chain_id: i64, address: &str, token_address: &str) -> &mut Balance {
        self.balances
            .entry((address.to_string(), chain_id, token_address.to_string()))
            .or_insert_with(|| Balance::empty(address, chain_id, token_address))
    }

    fn account_mut(&mut self, address: &str) -> &mut Account {
        self.accounts
            .entry(address.to_string())
            .or_insert_with(|| Account::empty(address))
    }

    fn journal(&self, event: &LedgerEvent, mutation: &Mutation, undo: &mut Vec<Undo>) {
        let chain_id = event.chain_id as i64;
        match mutation {
            Mutation::SetWalletBalance { address, token_address, .. }
            | Mutation::AdjustWalletBalance { address, token_address, .. }
            | Mutation::Deposit { address, token_address, .. }
            | Mutation::SetStaked { address, token_address, .. }
            | Mutation::CreditSubLedger { address, token_address, .. } => {
                self.journal_balance(chain_id, address, token_address, undo)
            }
            Mutation::ConfirmClaim {
                claim_id,
                receiver,
                token_address,
                ..
            } => {
                self.journal_balance(chain_id, receiver, token_address, undo);
                let key = (*claim_id, chain_id, token_address.clone(), receiver.clone());
                undo.push(Undo::Claim(key.clone(), self.claims.get(&key).cloned()));
            }
            Mutation::Tip {
                sender,
                receiver,
                token_id,
                ..
            } => {
                for address in [sender, receiver] {
                    undo.push(Undo::Account(address.clone(), self.accounts.get(address).cloned()));
                }
                self.journal_token(chain_id, token_id, undo);
            }
            Mutation::RecordPpv { token_id, .. } => {
                undo.push(Undo::Ppv(self.ppv.len()));
                self.journal_token(chain_id, token_id, undo);
            }
            Mutation::DrainBounty { token_id, .. } => self.journal_token(chain_id, token_id, undo),
            Mutation::TransferNft { token_id, to, .. } => {
                undo.push(Undo::Account(to.clone(), self.accounts.get(to).cloned()));
                self.journal_token(chain_id, token_id, undo);
            }
            Mutation::RecordReward { .. } => undo.push(Undo::Rewards(self.rewards.len())),
        }
    }

    fn journal_balance(&self, chain_id: i64, address: &str, token_address: &str, undo: &mut Vec<Undo>) {
        let key = (address.to_string(), chain_id, token_address.to_string());
        let prior = self.balances.get(&key).cloned();
        undo.push(Undo::Balance(key, prior));
    }

    fn journal_token(&self, chain_id: i64, token_id: &str, undo: &mut Vec<Undo>) {
        let key = (chain_id, token_id.to_string());
        let prior = self.tokens.get(&key).cloned();
        undo.push(Undo::Token(key, prior));
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Balance(key, prior) => restore(&mut self.balances, key, prior),
                Undo::Claim(key, prior) => restore(&mut self.claims, key, prior),
                Undo::Token(key, prior) => restore(&mut self.tokens, key, prior),
                Undo::Account(key, prior) => restore(&mut self.accounts, key, prior),
                Undo::Rewards(len) => self.rewards.truncate(len),
                Undo::Ppv(len) => self.ppv.truncate(len),
            }
        }
    }

    fn apply(
        &mut self,
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
                let b = self.balance_mut(chain_id, address, token_address);
                b.wallet_balance = value.to_string();
                b.updated_at_block = b.updated_at_block.max(block);
            }
            Mutation::AdjustWalletBalance {
                address,
                token_address,
                delta,
            } => {
                let b = self.balance_mut(chain_id, address, token_address);
                let next = Amount::parse(&b.wallet_balance)? + *delta;
                b.wallet_balance = next.max(Amount::ZERO).to_string();
                b.updated_at_block = b.updated_at_block.max(block);
            }
            Mutation::Deposit {
                address,
                token_address,
                amount,
            } => {
                let b = self.balance_mut(chain_id, address, token_address);
                b.balance = add(&b.balance, *amount)?;
                b.deposited = add(&b.deposited, *amount)?;
                b.updated_at_block = b.updated_at_block.max(block);
            }
            Mutation::ConfirmClaim {
                claim_id,
                receiver,
                token_address,
                amount,
            } => {
                let key = (*claim_id, chain_id, token_address.clone(), receiver.clone());
                let claim = self.claims.get_mut(&key).ok_or_else(|| {
                    AppError::NotFound(format!(
                        "claim {claim_id} for {receiver} on token {token_address}"
                    ))
                })?;
                if claim.status == ClaimStatus::Confirmed.as_str() {
                    tracing::debug!(claim_id, "Claim already confirmed");
                    return Ok(());
                }
                claim.status = ClaimStatus::Confirmed.as_str().to_string();
                claim.tx_hash = Some(event.tx_hash.clone());

                let b = self.balance_mut(chain_id, receiver, token_address);
                b.claimed = add(&b.claimed, *amount)?;
                b.pending = add(&b.pending, -*amount)?;
                b.updated_at_block = b.updated_at_block.max(block);
                let pending = b.pending.clone();
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
                let b = self.balance_mut(chain_id, address, token_address);
                b.staked = value.to_string();
                b.updated_at_block = b.updated_at_block.max(block);
            }
            Mutation::Tip {
                sender,
                receiver,
                token_id,
                amount,
            } => {
                let a = self.account_mut(sender);
                a.sent_tips = add(&a.sent_tips, *amount)?;
                let a = self.account_mut(receiver);
                a.received_tips = add(&a.received_tips, *amount)?;

                match self.tokens.get_mut(&(chain_id, token_id.clone())) {
                    Some(t) if t.owner == *receiver || t.minter.as_deref() == Some(receiver.as_str()) => {
                        t.total_tips = add(&t.total_tips, *amount)?;
                    }
                    Some(_) => {
                        tracing::debug!(token_id = %token_id, receiver = %receiver, "Tip receiver does not own token");
                    }
                    None => {
                        integrity_violation(policy, event, format!("tipped token {token_id} not found"))?
                    }
                }
            }
            Mutation::CreditSubLedger {
                address,
                token_address,
                ledger,
                amount,
            } => {
                let b = self.balance_mut(chain_id, address, token_address);
                let field = match ledger {
                    SubLedger::Tips => &mut b.tips_earned,
                    SubLedger::Ppv => &mut b.ppv_earned,
                    SubLedger::Bounty => &mut b.bounty_earned,
                };
                *field = add(field, *amount)?;
                b.updated_at_block = b.updated_at_block.max(block);
            }
            Mutation::RecordPpv {
                payer,
                token_id,
                token_address,
                amount,
            } => {
                self.ppv.push(PpvTransaction {
                    chain_id,
                    tx_hash: event.tx_hash.clone(),
                    log_index: event.log_index as i64,
                    token_id: token_id.clone(),
                    payer: payer.clone(),
                    token_address: token_address.clone(),
                    amount: amount.to_string(),
                    block_number: block,
                });
                match self.tokens.get_mut(&(chain_id, token_id.clone())) {
                    Some(t) => t.total_funds = add(&t.total_funds, *amount)?,
                    None => {
                        integrity_violation(policy, event, format!("PPV token {token_id} not found"))?
                    }
                }
            }
            Mutation::DrainBounty {
                token_id,
                pool,
                amount,
            } => match self.tokens.get_mut(&(chain_id, token_id.clone())) {
                Some(t) => {
                    let field = match pool {
                        BountyPool::Viewer => &mut t.bounty_viewer,
                        BountyPool::Commentor => &mut t.bounty_commentor,
                    };
                    *field = add(field, -*amount)?;
                    let left = field.clone();
                    if Amount::parse(&left)?.is_negative() {
                        integrity_violation(
                            policy,
                            event,
                            format!("{pool:?} bounty of token {token_id} overdrawn to {left}"),
                        )?;
                    }
                }
                None => {
                    integrity_violation(policy, event, format!("bounty token {token_id} not found"))?
                }
            },
            Mutation::TransferNft {
                token_id,
                collection,
                from,
                to,
            } => {
                let log_index = event.log_index as i64;
                let token = self
                    .tokens
                    .entry((chain_id, token_id.clone()))
                    .or_insert_with(|| Token {
                        chain_id,
                        token_id: token_id.clone(),
                        collection: collection.clone(),
                        owner: to.clone(),
                        minter: None,
                        status: "pending".into(),
                        total_tips: "0".into(),
                        total_funds: "0".into(),
                        bounty_viewer: "0".into(),
                        bounty_commentor: "0".into(),
                        views: 0,
                        updated_at_block: block,
                        updated_at_log_index: log_index,
                    });
                if (token.updated_at_block, token.updated_at_log_index) <= (block, log_index) {
                    token.owner = to.clone();
                    token.collection = collection.clone();
                    token.updated_at_block = block;
                    token.updated_at_log_index = log_index;
                }
                if from == ZERO_ADDRESS {
                    token.minter = Some(to.clone());
                    token.status = "minted".into();
                    self.account_mut(to).uploads += 1;
                }
            }
            Mutation::RecordReward {
                kind,
                address,
                token_id,
                token_address,
                amount,
            } => {
                let exists = self
                    .rewards
                    .iter()
                    .any(|r| r.chain_id == chain_id && r.tx_hash == event.tx_hash && r.log_index == event.log_index as i64);
                if !exists {
                    self.rewards.push(Reward {
                        chain_id,
                        tx_hash: event.tx_hash.clone(),
                        log_index: event.log_index as i64,
                        kind: kind.as_str().to_string(),
                        address: address.clone(),
                        token_id: token_id.clone(),
                        token_address: token_address.clone(),
                        amount: amount.to_string(),
                        block_number: block,
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn load_cursor(&self, chain_id: u64, start_block: u64) -> Result<Cursor, AppError> {
        Ok(*self
            .state()
            .cursors
            .entry(chain_id)
            .or_insert_with(|| Cursor::initial(chain_id, start_block)))
    }

    async fn advance_cursor(
        &self,
        chain_id: u64,
        stream: Stream,
        block: u64,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        state.cursor_history.push((chain_id, stream, block));
        let cursor = state
            .cursors
            .get_mut(&chain_id)
            .ok_or_else(|| AppError::NotFound(format!("cursor for chain {chain_id}")))?;
        if block > cursor.get(stream) {
            cursor.set(stream, block);
        }
        Ok(())
    }

    async fn record_graph_lag(&self, chain_id: u64, lag_secs: i64) -> Result<(), AppError> {
        if let Some(cursor) = self.state().cursors.get_mut(&chain_id) {
            cursor.graph_lag_secs = Some(lag_secs);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn commit(
        &self,
        event: &LedgerEvent,
        mutations: &[Mutation],
        policy: IntegrityPolicy,
    ) -> Result<ApplyOutcome, AppError> {
        let mut state = self.state();
        let key = event.key();
        if state.transactions.contains_key(&key) {
            return Ok(ApplyOutcome::AlreadyProcessed);
        }

        let mut undo = Vec::new();
        for mutation in mutations {
            state.journal(event, mutation, &mut undo);
            if let Err(e) = state.apply(event, mutation, policy) {
                state.rollback(undo);
                return Err(e);
            }
        }
        state.transactions.insert(key, NewTransaction::from(event));
        Ok(ApplyOutcome::Applied)
    }
}
