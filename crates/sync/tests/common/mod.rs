//! Shared fixtures for the reconciliation integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::U256;
use chainbook_core::{RawAmount, RawEvent, RawKind, Settings, Source};
use chainbook_storage::models::Token;
use chainbook_storage::{CursorStore, LedgerStore, MemoryStore};
use chainbook_sync::ReconcilerContext;

pub const CHAIN_ID: u64 = 56;
pub const DHB: &str = "0x1111111111111111111111111111111111111111";
pub const PROTOCOL: &str = "0x2222222222222222222222222222222222222222";
pub const COLLECTION: &str = "0x3333333333333333333333333333333333333333";
pub const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const CAROL: &str = "0xcccccccccccccccccccccccccccccccccccccccc";
pub const ZERO: &str = "0x0000000000000000000000000000000000000000";

/// Settings for `bsc` starting at block 1000, with `overrides` on top.
pub fn settings(overrides: &[(&str, &str)]) -> Settings {
    let mut vars: HashMap<String, String> = [
        ("TOKENS", DHB),
        ("EVENT_SOURCE", "subgraph"),
        ("SUBGRAPH_URL", "http://127.0.0.1:1/subgraph"),
        ("RPC_URL", "http://127.0.0.1:1/rpc"),
        ("PROTOCOL_ADDRESS", PROTOCOL),
        ("NFT_ADDRESSES", COLLECTION),
        ("START_BLOCK", "1000"),
        ("BLOCK_WINDOW", "1000"),
        ("RETRY_INITIAL_BACKOFF_MS", "1"),
        ("RETRY_MAX_BACKOFF_MS", "5"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    Settings::from_lookup("bsc", move |key| vars.get(key).cloned()).unwrap()
}

pub fn context(settings: &Settings, store: &Arc<MemoryStore>) -> Arc<ReconcilerContext> {
    Arc::new(ReconcilerContext::new(
        settings,
        store.clone() as Arc<dyn CursorStore>,
        store.clone() as Arc<dyn LedgerStore>,
    ))
}

/// Whole tokens in 18-decimal base units.
pub fn units(whole: u64) -> U256 {
    U256::from(whole) * U256::from(10u64).pow(U256::from(18u64))
}

pub fn tx(n: u64) -> String {
    format!("0x{n:064x}")
}

pub fn protocol_event(
    tag: &str,
    tx_hash: &str,
    block_number: u64,
    from: &str,
    to: &str,
    whole: u64,
    token_id: Option<&str>,
) -> RawEvent {
    RawEvent {
        source: Source::Subgraph,
        kind: RawKind::Protocol(tag.to_string()),
        tx_hash: tx_hash.to_string(),
        log_index: 0,
        block_number,
        from: from.to_string(),
        to: to.to_string(),
        token_address: DHB.to_string(),
        token_id: token_id.map(str::to_string),
        amount: Some(RawAmount::Units(units(whole))),
        from_balance: None,
        to_balance: None,
        staked: None,
    }
}

pub fn transfer_event(
    source: Source,
    tx_hash: &str,
    block_number: u64,
    from: &str,
    to: &str,
    amount: &str,
    balances: Option<(u64, u64)>,
) -> RawEvent {
    RawEvent {
        source,
        kind: RawKind::Erc20Transfer,
        tx_hash: tx_hash.to_string(),
        log_index: 1,
        block_number,
        from: from.to_string(),
        to: to.to_string(),
        token_address: DHB.to_string(),
        token_id: None,
        amount: Some(RawAmount::Decimal(amount.to_string())),
        from_balance: balances.map(|(f, _)| RawAmount::Units(units(f))),
        to_balance: balances.map(|(_, t)| RawAmount::Units(units(t))),
        staked: None,
    }
}

pub fn nft_event(tx_hash: &str, block_number: u64, from: &str, to: &str, token_id: &str) -> RawEvent {
    RawEvent {
        source: Source::Subgraph,
        kind: RawKind::NftTransfer,
        tx_hash: tx_hash.to_string(),
        log_index: 2,
        block_number,
        from: from.to_string(),
        to: to.to_string(),
        token_address: COLLECTION.to_string(),
        token_id: Some(token_id.to_string()),
        amount: None,
        from_balance: None,
        to_balance: None,
        staked: None,
    }
}

pub fn minted_token(token_id: &str, owner: &str, minter: &str) -> Token {
    Token {
        chain_id: CHAIN_ID as i64,
        token_id: token_id.to_string(),
        collection: COLLECTION.to_string(),
        owner: owner.to_string(),
        minter: Some(minter.to_string()),
        status: "minted".into(),
        total_tips: "0".into(),
        total_funds: "0".into(),
        bounty_viewer: "0".into(),
        bounty_commentor: "0".into(),
        views: 0,
        updated_at_block: 900,
        updated_at_log_index: 0,
    }
}
