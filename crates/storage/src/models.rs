use chainbook_core::{LedgerEvent, Stream};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ─── Cursor ─────────────────────────────────────────────────────────────────

/// Per-chain reconciliation cursors (`settings` row).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Setting {
    pub chain_id: i64,
    pub last_block_fetched_for_transfer: i64,
    pub last_block_fetched_for_protocol_tx: i64,
    pub last_block_fetched_for_nft: i64,
    pub synced_diff_time_of_graph: Option<i64>,
}

/// Last fully processed block of each stream, plus the subgraph lag in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub chain_id: u64,
    pub transfer: u64,
    pub protocol_tx: u64,
    pub nft_transfer: u64,
    pub graph_lag_secs: Option<i64>,
}

impl Cursor {
    /// A fresh cursor positioned just before `start_block`.
    pub fn initial(chain_id: u64, start_block: u64) -> Self {
        let at = start_block.saturating_sub(1);
        Self {
            chain_id,
            transfer: at,
            protocol_tx: at,
            nft_transfer: at,
            graph_lag_secs: None,
        }
    }

    pub fn get(&self, stream: Stream) -> u64 {
        match stream {
            Stream::Transfer => self.transfer,
            Stream::ProtocolTx => self.protocol_tx,
            Stream::NftTransfer => self.nft_transfer,
        }
    }

    pub(crate) fn set(&mut self, stream: Stream, block: u64) {
        match stream {
            Stream::Transfer => self.transfer = block,
            Stream::ProtocolTx => self.protocol_tx = block,
            Stream::NftTransfer => self.nft_transfer = block,
        }
    }
}

impl From<Setting> for Cursor {
    fn from(s: Setting) -> Self {
        Self {
            chain_id: s.chain_id as u64,
            transfer: s.last_block_fetched_for_transfer.max(0) as u64,
            protocol_tx: s.last_block_fetched_for_protocol_tx.max(0) as u64,
            nft_transfer: s.last_block_fetched_for_nft.max(0) as u64,
            graph_lag_secs: s.synced_diff_time_of_graph,
        }
    }
}

// ─── Transaction ────────────────────────────────────────────────────────────

/// A classified event as stored in `transactions`; the row doubles as the
/// idempotency marker.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub chain_id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub event_type: String,
    pub from_address: String,
    pub to_address: String,
    pub token_address: String,
    pub token_id: Option<String>,
    pub amount: String,
    pub status: Option<String>,
    pub source: String,
}

impl From<&LedgerEvent> for NewTransaction {
    fn from(e: &LedgerEvent) -> Self {
        Self {
            chain_id: e.chain_id as i64,
            tx_hash: e.tx_hash.clone(),
            log_index: e.log_index as i64,
            block_number: e.block_number as i64,
            event_type: e.event_type.to_string(),
            from_address: e.from_address.clone(),
            to_address: e.to_address.clone(),
            token_address: e.token_address.clone(),
            token_id: e.token_id.clone(),
            amount: e.amount.to_string(),
            status: (e.event_type == chainbook_core::EventType::Claim)
                .then(|| ClaimStatus::Confirmed.as_str().to_string()),
            source: e.source.as_str().to_string(),
        }
    }
}

// ─── Balance ────────────────────────────────────────────────────────────────

/// Ledger position of one address for one token on one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Balance {
    pub address: String,
    pub chain_id: i64,
    pub token_address: String,
    /// Mirrors the on-chain ERC-20 balance.
    pub wallet_balance: String,
    /// Spendable in-app balance.
    pub balance: String,
    pub deposited: String,
    pub claimed: String,
    pub pending: String,
    pub staked: String,
    pub tips_earned: String,
    pub ppv_earned: String,
    pub bounty_earned: String,
    pub updated_at_block: i64,
}

impl Balance {
    pub fn empty(address: &str, chain_id: i64, token_address: &str) -> Self {
        Self {
            address: address.to_string(),
            chain_id,
            token_address: token_address.to_string(),
            wallet_balance: "0".into(),
            balance: "0".into(),
            deposited: "0".into(),
            claimed: "0".into(),
            pending: "0".into(),
            staked: "0".into(),
            tips_earned: "0".into(),
            ppv_earned: "0".into(),
            bounty_earned: "0".into(),
            updated_at_block: 0,
        }
    }
}

// ─── ClaimTransaction ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    Pending,
    Confirmed,
    Expired,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Confirmed => "confirmed",
            ClaimStatus::Expired => "expired",
        }
    }
}

/// A claim request, keyed by `(id, chain_id, token_address, receiver_address)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ClaimTransaction {
    pub id: i64,
    pub chain_id: i64,
    pub token_address: String,
    pub receiver_address: String,
    pub amount: String,
    pub status: String,
    pub tx_hash: Option<String>,
}

// ─── Token ──────────────────────────────────────────────────────────────────

/// A marketplace NFT and its reconciled aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Token {
    pub chain_id: i64,
    pub token_id: String,
    pub collection: String,
    pub owner: String,
    pub minter: Option<String>,
    pub status: String,
    pub total_tips: String,
    pub total_funds: String,
    pub bounty_viewer: String,
    pub bounty_commentor: String,
    pub views: i64,
    /// Position of the last applied ownership change, as `(block, log index)`.
    pub updated_at_block: i64,
    pub updated_at_log_index: i64,
}

// ─── Account ────────────────────────────────────────────────────────────────

/// Per-user aggregates shared with the rest of the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub address: String,
    pub sent_tips: String,
    pub received_tips: String,
    pub uploads: i64,
}

impl Account {
    pub fn empty(address: &str) -> Self {
        Self {
            address: address.to_string(),
            sent_tips: "0".into(),
            received_tips: "0".into(),
            uploads: 0,
        }
    }
}

// ─── Reward ─────────────────────────────────────────────────────────────────

/// Append-only payout record (tips, bounty claims).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Reward {
    pub chain_id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub kind: String,
    pub address: String,
    pub token_id: Option<String>,
    pub token_address: String,
    pub amount: String,
    pub block_number: i64,
}

/// Pay-per-view unlock audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PpvTransaction {
    pub chain_id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub token_id: String,
    pub payer: String,
    pub token_address: String,
    pub amount: String,
    pub block_number: i64,
}
