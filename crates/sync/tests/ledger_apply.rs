//! Ledger effects of classified events against the in-memory store.

mod common;

use std::sync::Arc;

use chainbook_core::{AppError, RawEvent, Source};
use chainbook_storage::models::{Balance, ClaimTransaction};
use chainbook_storage::{ApplyOutcome, MemoryStore};
use chainbook_sync::classify;
use chainbook_sync::context::ReconcilerContext;
use chainbook_sync::updater::apply;
use common::*;

async fn deliver(ctx: &ReconcilerContext, raw: &RawEvent) -> Result<ApplyOutcome, AppError> {
    let event = classify(raw, ctx.chain_id(), &ctx.tokens)?;
    apply(ctx, &event).await
}

fn pending_claim(id: i64, receiver: &str, amount: &str) -> ClaimTransaction {
    ClaimTransaction {
        id,
        chain_id: CHAIN_ID as i64,
        token_address: DHB.to_string(),
        receiver_address: receiver.to_string(),
        amount: amount.to_string(),
        status: "pending".into(),
        tx_hash: None,
    }
}

fn balance_with_pending(address: &str, pending: &str) -> Balance {
    Balance {
        pending: pending.to_string(),
        ..Balance::empty(address, CHAIN_ID as i64, DHB)
    }
}

#[tokio::test]
async fn deposit_is_applied_once() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&settings(&[]), &store);
    let deposit = protocol_event("DEPOSIT", &tx(1), 1_000, ALICE, PROTOCOL, 100, None);

    assert_eq!(deliver(&ctx, &deposit).await.unwrap(), ApplyOutcome::Applied);
    let after_first = store.balance(CHAIN_ID, ALICE, DHB).unwrap();
    assert_eq!(after_first.balance, "100");
    assert_eq!(after_first.deposited, "100");
    assert_eq!(after_first.updated_at_block, 1_000);

    assert_eq!(deliver(&ctx, &deposit).await.unwrap(), ApplyOutcome::AlreadyProcessed);
    assert_eq!(store.balance(CHAIN_ID, ALICE, DHB).unwrap(), after_first);
    assert_eq!(store.transactions().len(), 1);
}

#[tokio::test]
async fn claim_confirms_pending_request_once() {
    let store = Arc::new(MemoryStore::new());
    store.insert_claim(pending_claim(7, BOB, "40"));
    store.insert_balance(balance_with_pending(BOB, "40"));
    let ctx = context(&settings(&[]), &store);

    let claim = protocol_event("CLAIM", &tx(2), 1_010, PROTOCOL, BOB, 40, Some("7"));
    assert_eq!(deliver(&ctx, &claim).await.unwrap(), ApplyOutcome::Applied);

    let confirmed = store.claim(CHAIN_ID, 7, DHB, BOB).unwrap();
    assert_eq!(confirmed.status, "confirmed");
    assert_eq!(confirmed.tx_hash.as_deref(), Some(tx(2).as_str()));
    let after_first = store.balance(CHAIN_ID, BOB, DHB).unwrap();
    assert_eq!(after_first.claimed, "40");
    assert_eq!(after_first.pending, "0");

    // Redelivery of the same log, and a second log naming the same claim.
    assert_eq!(deliver(&ctx, &claim).await.unwrap(), ApplyOutcome::AlreadyProcessed);
    let replay = protocol_event("CLAIM", &tx(3), 1_011, PROTOCOL, BOB, 40, Some("7"));
    assert_eq!(deliver(&ctx, &replay).await.unwrap(), ApplyOutcome::Applied);

    assert_eq!(store.balance(CHAIN_ID, BOB, DHB).unwrap().claimed, "40");
    assert_eq!(store.balance(CHAIN_ID, BOB, DHB).unwrap().pending, "0");
}

#[tokio::test]
async fn claim_without_request_is_retried_until_it_exists() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&settings(&[]), &store);
    let claim = protocol_event("CLAIM", &tx(4), 1_020, PROTOCOL, BOB, 10, Some("9"));

    let err = deliver(&ctx, &claim).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
    assert!(store.transactions().is_empty());
    assert!(store.balance(CHAIN_ID, BOB, DHB).is_none());

    store.insert_claim(pending_claim(9, BOB, "10"));
    store.insert_balance(balance_with_pending(BOB, "10"));
    assert_eq!(deliver(&ctx, &claim).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(store.balance(CHAIN_ID, BOB, DHB).unwrap().claimed, "10");
}

#[tokio::test]
async fn negative_pending_follows_integrity_policy() {
    let warn_store = Arc::new(MemoryStore::new());
    warn_store.insert_claim(pending_claim(1, BOB, "40"));
    let warn = context(&settings(&[]), &warn_store);
    let claim = protocol_event("CLAIM", &tx(5), 1_030, PROTOCOL, BOB, 40, Some("1"));

    assert_eq!(deliver(&warn, &claim).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(warn_store.balance(CHAIN_ID, BOB, DHB).unwrap().pending, "-40");

    let strict_store = Arc::new(MemoryStore::new());
    strict_store.insert_claim(pending_claim(1, BOB, "40"));
    let strict = context(&settings(&[("INTEGRITY_POLICY", "strict")]), &strict_store);

    let err = deliver(&strict, &claim).await.unwrap_err();
    assert!(matches!(err, AppError::Integrity(_)), "got {err:?}");
    assert!(strict_store.transactions().is_empty());
    assert_eq!(strict_store.claim(CHAIN_ID, 1, DHB, BOB).unwrap().status, "pending");
}

#[tokio::test]
async fn tip_to_minter_updates_token_and_accounts() {
    let store = Arc::new(MemoryStore::new());
    store.insert_token(minted_token("42", CAROL, BOB));
    let ctx = context(&settings(&[]), &store);

    let tip = protocol_event("TIP", &tx(6), 1_040, ALICE, BOB, 5, Some("42"));
    assert_eq!(deliver(&ctx, &tip).await.unwrap(), ApplyOutcome::Applied);

    assert_eq!(store.account(ALICE).unwrap().sent_tips, "5");
    assert_eq!(store.account(BOB).unwrap().received_tips, "5");
    assert_eq!(store.token(CHAIN_ID, "42").unwrap().total_tips, "5");
    assert_eq!(store.balance(CHAIN_ID, BOB, DHB).unwrap().tips_earned, "5");

    let rewards = store.rewards();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].kind, "tip");
    assert_eq!(rewards[0].address, BOB);
}

#[tokio::test]
async fn tip_to_stranger_leaves_token_total() {
    let store = Arc::new(MemoryStore::new());
    store.insert_token(minted_token("42", CAROL, CAROL));
    let ctx = context(&settings(&[]), &store);

    let tip = protocol_event("TIP", &tx(7), 1_041, ALICE, BOB, 5, Some("42"));
    assert_eq!(deliver(&ctx, &tip).await.unwrap(), ApplyOutcome::Applied);

    assert_eq!(store.token(CHAIN_ID, "42").unwrap().total_tips, "0");
    assert_eq!(store.account(BOB).unwrap().received_tips, "5");
}

#[tokio::test]
async fn ppv_and_bounty_credit_sub_ledgers() {
    let store = Arc::new(MemoryStore::new());
    store.insert_token(chainbook_storage::models::Token {
        bounty_viewer: "10".into(),
        ..minted_token("42", CAROL, CAROL)
    });
    let ctx = context(&settings(&[]), &store);

    let ppv = protocol_event("PPV", &tx(8), 1_050, ALICE, CAROL, 3, Some("42"));
    let bounty = protocol_event("BOUNTY_VIEWER", &tx(9), 1_051, PROTOCOL, BOB, 4, Some("42"));
    assert_eq!(deliver(&ctx, &ppv).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(deliver(&ctx, &bounty).await.unwrap(), ApplyOutcome::Applied);

    let token = store.token(CHAIN_ID, "42").unwrap();
    assert_eq!(token.total_funds, "3");
    assert_eq!(token.bounty_viewer, "6");
    assert_eq!(store.balance(CHAIN_ID, CAROL, DHB).unwrap().ppv_earned, "3");
    assert_eq!(store.balance(CHAIN_ID, BOB, DHB).unwrap().bounty_earned, "4");

    let ppv_rows = store.ppv_transactions();
    assert_eq!(ppv_rows.len(), 1);
    assert_eq!(ppv_rows[0].payer, ALICE);
    assert_eq!(store.rewards()[0].kind, "bounty_viewer");
}

#[tokio::test]
async fn nft_mint_then_transfer_tracks_owner() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&settings(&[]), &store);

    let mint = nft_event(&tx(10), 1_060, ZERO, BOB, "77");
    let transfer = nft_event(&tx(11), 1_070, BOB, CAROL, "77");
    assert_eq!(deliver(&ctx, &mint).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(deliver(&ctx, &transfer).await.unwrap(), ApplyOutcome::Applied);

    let token = store.token(CHAIN_ID, "77").unwrap();
    assert_eq!(token.owner, CAROL);
    assert_eq!(token.minter.as_deref(), Some(BOB));
    assert_eq!(token.status, "minted");
    assert_eq!(store.account(BOB).unwrap().uploads, 1);

    // An older transfer arriving late does not roll the owner back.
    let stale = nft_event(&tx(12), 1_065, BOB, ALICE, "77");
    assert_eq!(deliver(&ctx, &stale).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(store.token(CHAIN_ID, "77").unwrap().owner, CAROL);
}

#[tokio::test]
async fn same_block_transfers_order_by_log_index() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&settings(&[]), &store);

    // Mint and hand-off in one block, delivered in reverse log order.
    let transfer = RawEvent {
        log_index: 5,
        ..nft_event(&tx(15), 1_090, BOB, CAROL, "88")
    };
    let mint = RawEvent {
        log_index: 3,
        ..nft_event(&tx(15), 1_090, ZERO, BOB, "88")
    };
    assert_eq!(deliver(&ctx, &transfer).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(deliver(&ctx, &mint).await.unwrap(), ApplyOutcome::Applied);

    let token = store.token(CHAIN_ID, "88").unwrap();
    assert_eq!(token.owner, CAROL);
    assert_eq!(token.minter.as_deref(), Some(BOB));
    assert_eq!(token.status, "minted");
    assert_eq!((token.updated_at_block, token.updated_at_log_index), (1_090, 5));

    // A later log in the same block does move the owner.
    let onward = RawEvent {
        log_index: 9,
        ..nft_event(&tx(16), 1_090, CAROL, ALICE, "88")
    };
    assert_eq!(deliver(&ctx, &onward).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(store.token(CHAIN_ID, "88").unwrap().owner, ALICE);
}

#[tokio::test]
async fn stake_sets_running_total() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&settings(&[]), &store);

    let mut stake = protocol_event("STAKE", &tx(13), 1_080, ALICE, PROTOCOL, 5, None);
    stake.staked = Some(chainbook_core::RawAmount::Units(units(25)));
    assert_eq!(deliver(&ctx, &stake).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(store.balance(CHAIN_ID, ALICE, DHB).unwrap().staked, "25");

    let mut missing = protocol_event("UNSTAKE", &tx(14), 1_081, ALICE, PROTOCOL, 5, None);
    missing.staked = None;
    let err = deliver(&ctx, &missing).await.unwrap_err();
    assert!(matches!(err, AppError::Decode(_)), "got {err:?}");
}

#[tokio::test]
async fn same_transfer_from_both_sources_is_applied_once() {
    let store = Arc::new(MemoryStore::new());
    let subgraph = context(&settings(&[]), &store);
    let rpc = context(&settings(&[("EVENT_SOURCE", "rpc")]), &store);

    let from_graph = transfer_event(Source::Subgraph, &tx(15), 1_090, ALICE, BOB, "5", Some((95, 5)));
    let from_rpc = transfer_event(Source::Rpc, &tx(15), 1_090, ALICE, BOB, "5", None);

    assert_eq!(deliver(&subgraph, &from_graph).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(deliver(&rpc, &from_rpc).await.unwrap(), ApplyOutcome::AlreadyProcessed);

    assert_eq!(store.transactions().len(), 1);
    assert_eq!(store.transactions()[0].source, "subgraph");
    assert_eq!(store.balance(CHAIN_ID, ALICE, DHB).unwrap().wallet_balance, "95");
    assert_eq!(store.balance(CHAIN_ID, BOB, DHB).unwrap().wallet_balance, "5");
}

#[tokio::test]
async fn replaying_a_history_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.insert_claim(pending_claim(1, ALICE, "10"));
    store.insert_claim(pending_claim(2, ALICE, "20"));
    store.insert_balance(balance_with_pending(ALICE, "30"));
    let ctx = context(&settings(&[]), &store);

    let history = vec![
        protocol_event("DEPOSIT", &tx(20), 1_100, ALICE, PROTOCOL, 50, None),
        transfer_event(Source::Subgraph, &tx(21), 1_101, ALICE, BOB, "5", Some((45, 5))),
        protocol_event("CLAIM", &tx(22), 1_102, PROTOCOL, ALICE, 10, Some("1")),
        nft_event(&tx(23), 1_103, ZERO, ALICE, "5"),
        protocol_event("TIP", &tx(24), 1_104, BOB, ALICE, 1, Some("5")),
        protocol_event("CLAIM", &tx(25), 1_105, PROTOCOL, ALICE, 20, Some("2")),
    ];

    for raw in &history {
        assert_eq!(deliver(&ctx, raw).await.unwrap(), ApplyOutcome::Applied);
    }
    let balance = store.balance(CHAIN_ID, ALICE, DHB).unwrap();
    let token = store.token(CHAIN_ID, "5").unwrap();
    let account = store.account(ALICE).unwrap();
    let summary = store.summary();

    for raw in &history {
        assert_eq!(deliver(&ctx, raw).await.unwrap(), ApplyOutcome::AlreadyProcessed);
    }
    assert_eq!(store.balance(CHAIN_ID, ALICE, DHB).unwrap(), balance);
    assert_eq!(store.token(CHAIN_ID, "5").unwrap(), token);
    assert_eq!(store.account(ALICE).unwrap(), account);
    assert_eq!(store.summary(), summary);

    // Claims never exceed deposits once every request is confirmed.
    assert_eq!(balance.deposited, "50");
    assert_eq!(balance.claimed, "30");
    assert_eq!(balance.pending, "0");
    assert_eq!(balance.tips_earned, "1");
    assert_eq!(token.total_tips, "1");
}

#[tokio::test]
async fn unknown_protocol_type_is_a_decode_error() {
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&settings(&[]), &store);
    let raw = protocol_event("AIRDROP", &tx(30), 1_200, PROTOCOL, ALICE, 1, None);

    let err = deliver(&ctx, &raw).await.unwrap_err();
    assert!(matches!(err, AppError::Decode(_)), "got {err:?}");
    assert!(store.transactions().is_empty());
}
