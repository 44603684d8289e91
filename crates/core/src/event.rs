//! Event shapes flowing through the reconciliation pipeline.
//!
//! Adapters emit [`RawEvent`]s; the classifier turns them into [`LedgerEvent`]s,
//! which the ledger applies exactly once per [`EventKey`].

use std::fmt;

use alloy::primitives::U256;

use crate::Amount;

/// Zero address, as the lower-cased hex string used throughout the ledger.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// One of the three independently cursored event streams of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stream {
    /// ERC-20 transfers of tracked tokens.
    Transfer,
    /// Protocol contract events (deposits, claims, stakes, tips, ...).
    ProtocolTx,
    /// NFT (ERC-721 / ERC-1155) transfers.
    NftTransfer,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Transfer, Stream::ProtocolTx, Stream::NftTransfer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Transfer => "transfer",
            Stream::ProtocolTx => "protocol_tx",
            Stream::NftTransfer => "nft_transfer",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an event was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Subgraph,
    Rpc,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Subgraph => "subgraph",
            Source::Rpc => "rpc",
        }
    }
}

/// Canonical ledger event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Transfer,
    Deposit,
    Claim,
    Stake,
    Unstake,
    Tip,
    Ppv,
    BountyViewer,
    BountyCommentor,
    NftMint,
    NftTransfer,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Transfer => "TRANSFER",
            EventType::Deposit => "DEPOSIT",
            EventType::Claim => "CLAIM",
            EventType::Stake => "STAKE",
            EventType::Unstake => "UNSTAKE",
            EventType::Tip => "TIP",
            EventType::Ppv => "PPV",
            EventType::BountyViewer => "BOUNTY_VIEWER",
            EventType::BountyCommentor => "BOUNTY_COMMENTOR",
            EventType::NftMint => "NFT_MINT",
            EventType::NftTransfer => "NFT_TRANSFER",
        }
    }

    /// Map a protocol transaction type tag to its event type.
    ///
    /// Only tags the protocol contract can emit are accepted; transfers and NFT
    /// movements come from their own collections.
    pub fn from_protocol_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "DEPOSIT" => Some(EventType::Deposit),
            "CLAIM" => Some(EventType::Claim),
            "STAKE" => Some(EventType::Stake),
            "UNSTAKE" => Some(EventType::Unstake),
            "TIP" => Some(EventType::Tip),
            "PPV" => Some(EventType::Ppv),
            "BOUNTY_VIEWER" => Some(EventType::BountyViewer),
            "BOUNTY_COMMENTOR" => Some(EventType::BountyCommentor),
            _ => None,
        }
    }

    pub fn stream(&self) -> Stream {
        match self {
            EventType::Transfer => Stream::Transfer,
            EventType::NftMint | EventType::NftTransfer => Stream::NftTransfer,
            _ => Stream::ProtocolTx,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one on-chain log entry: `(chainId, txHash, logIndex)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub chain_id: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain_id, self.tx_hash, self.log_index)
    }
}

/// An amount as delivered by a source, before decimals are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawAmount {
    /// Base-unit integer; scaled by the token's decimals.
    Units(U256),
    /// Already a decimal quantity.
    Decimal(String),
}

/// What kind of record an adapter produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawKind {
    Erc20Transfer,
    /// Protocol event with its type tag (`DEPOSIT`, `CLAIM`, ...).
    Protocol(String),
    NftTransfer,
}

impl RawKind {
    pub fn stream(&self) -> Stream {
        match self {
            RawKind::Erc20Transfer => Stream::Transfer,
            RawKind::Protocol(_) => Stream::ProtocolTx,
            RawKind::NftTransfer => Stream::NftTransfer,
        }
    }
}

/// An undecoded-ish event as emitted by either source adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub source: Source,
    pub kind: RawKind,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub from: String,
    pub to: String,
    /// ERC-20 token for fungible events; NFT collection for NFT transfers.
    pub token_address: String,
    /// NFT id, or the claim sequence number for `CLAIM`.
    pub token_id: Option<String>,
    pub amount: Option<RawAmount>,
    /// Absolute wallet balances after the event (subgraph only).
    pub from_balance: Option<RawAmount>,
    pub to_balance: Option<RawAmount>,
    /// Running staked total after a stake/unstake.
    pub staked: Option<RawAmount>,
}

/// Balance snapshots carried by an event, already in decimal form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub from_balance: Option<Amount>,
    pub to_balance: Option<Amount>,
    pub staked: Option<Amount>,
}

/// Canonical, classified event. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub chain_id: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub event_type: EventType,
    pub from_address: String,
    pub to_address: String,
    pub token_address: String,
    pub token_id: Option<String>,
    pub amount: Amount,
    pub snapshot: Snapshot,
    pub source: Source,
}

impl LedgerEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            chain_id: self.chain_id,
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
        }
    }
}
