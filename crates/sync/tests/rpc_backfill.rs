//! `eth_getLogs` backfill against a scripted log source.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, B256, LogData};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use chainbook_core::{AppError, RetryConfig, Source};
use chainbook_evm::{ContractSet, ERC20, ERC721, MediaProtocol};
use chainbook_storage::MemoryStore;
use chainbook_sync::{ApplyWorker, CycleOutcome, LogSource, Reconciler, RpcAdapter};
use common::*;
use tokio_util::sync::CancellationToken;

/// A chain at a fixed head that fails the `getLogs` calls listed in
/// `fail_calls`, and every call whose range starts at `fail_from`.
struct ScriptedChain {
    head: u64,
    logs: Vec<Log>,
    fail_calls: HashSet<usize>,
    fail_from: Option<u64>,
    calls: Mutex<Vec<(u64, u64)>>,
}

impl ScriptedChain {
    fn new(head: u64, logs: Vec<Log>) -> Self {
        Self {
            head,
            logs,
            fail_calls: HashSet::new(),
            fail_from: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_calls = calls.into_iter().collect();
        self
    }

    fn failing_from(mut self, block: u64) -> Self {
        self.fail_from = Some(block);
        self
    }

    fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSource for ScriptedChain {
    async fn head(&self) -> Result<u64, AppError> {
        Ok(self.head)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, AppError> {
        let from = filter.get_from_block().unwrap();
        let to = filter.get_to_block().unwrap();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((from, to));
            calls.len() - 1
        };
        if self.fail_calls.contains(&call) || self.fail_from == Some(from) {
            return Err(AppError::Rpc("429 Too Many Requests".into()));
        }
        Ok(self
            .logs
            .iter()
            .filter(|l| (from..=to).contains(&l.block_number.unwrap_or_default()))
            .cloned()
            .collect())
    }
}

fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

fn contracts() -> ContractSet {
    ContractSet::new(vec![addr(DHB)], Some(addr(PROTOCOL)), vec![addr(COLLECTION)])
}

fn retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        backoff_multiplier: 2.0,
    }
}

fn log(address: &str, data: LogData, block: u64, tx: u8, log_index: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: addr(address),
            data,
        },
        block_number: Some(block),
        transaction_hash: Some(B256::repeat_byte(tx)),
        log_index: Some(log_index),
        ..Default::default()
    }
}

fn erc20_transfer(block: u64, tx: u8, from: &str, to: &str, whole: u64) -> Log {
    let data = ERC20::Transfer {
        from: addr(from),
        to: addr(to),
        value: units(whole),
    }
    .encode_log_data();
    log(DHB, data, block, tx, 0)
}

fn user_deposit(block: u64, tx: u8, user: &str, whole: u64) -> Log {
    let data = MediaProtocol::UserDeposit {
        user: addr(user),
        token: addr(DHB),
        amount: units(whole),
    }
    .encode_log_data();
    log(PROTOCOL, data, block, tx, 1)
}

fn nft_mint(block: u64, tx: u8, to: &str, token_id: u64) -> Log {
    let data = ERC721::Transfer {
        from: Address::ZERO,
        to: addr(to),
        tokenId: alloy::primitives::U256::from(token_id),
    }
    .encode_log_data();
    log(COLLECTION, data, block, tx, 2)
}

#[tokio::test]
async fn backfill_walks_the_range_in_rpc_windows() {
    let chain = Arc::new(ScriptedChain::new(
        5_000,
        vec![erc20_transfer(1_050, 1, ALICE, BOB, 1), erc20_transfer(1_250, 2, BOB, ALICE, 1)],
    ));
    let adapter = RpcAdapter::new(chain.clone(), contracts(), 1_000, 100, retry(3));

    let events = adapter.backfill(1_000, 1_299, &CancellationToken::new()).await.unwrap();

    assert_eq!(chain.calls(), vec![(1_000, 1_099), (1_100, 1_199), (1_200, 1_299)]);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.source == Source::Rpc));
    assert_eq!(events[0].block_number, 1_050);
    assert_eq!(events[1].block_number, 1_250);
}

#[tokio::test]
async fn failed_call_rewinds_one_window_and_retries() {
    let chain = Arc::new(
        ScriptedChain::new(5_000, vec![erc20_transfer(1_050, 1, ALICE, BOB, 1)]).failing([1]),
    );
    let adapter = RpcAdapter::new(chain.clone(), contracts(), 1_000, 100, retry(3));

    let events = adapter.backfill(1_000, 1_299, &CancellationToken::new()).await.unwrap();

    assert_eq!(
        chain.calls(),
        vec![(1_000, 1_099), (1_100, 1_199), (1_000, 1_099), (1_100, 1_199), (1_200, 1_299)]
    );
    // The rewound window is read twice but yields its log once.
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn backfill_gives_up_after_max_attempts() {
    let chain = Arc::new(ScriptedChain::new(5_000, vec![]).failing(0..10));
    let adapter = RpcAdapter::new(chain.clone(), contracts(), 1_000, 100, retry(3));

    let err = adapter
        .backfill(1_000, 1_299, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Rpc(_)), "got {err:?}");
    assert_eq!(chain.calls().len(), 3);
}

#[tokio::test]
async fn persistent_failure_behind_a_good_window_still_gives_up() {
    let chain = Arc::new(ScriptedChain::new(5_000, vec![]).failing_from(1_100));
    let adapter = RpcAdapter::new(chain.clone(), contracts(), 1_000, 100, retry(3));

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        adapter.backfill(1_000, 1_299, &CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, AppError::Rpc(_)), "got {err:?}");
    let calls = chain.calls();
    assert_eq!(calls.iter().filter(|(from, _)| *from == 1_100).count(), 3);
    assert_eq!(
        calls,
        vec![(1_000, 1_099), (1_100, 1_199), (1_000, 1_099), (1_100, 1_199), (1_000, 1_099), (1_100, 1_199)]
    );
}

#[tokio::test]
async fn cancelled_backoff_stops_backfill() {
    let chain = Arc::new(ScriptedChain::new(5_000, vec![]).failing(0..10));
    let slow = RetryConfig {
        initial_backoff_ms: 60_000,
        max_backoff_ms: 60_000,
        ..retry(5)
    };
    let adapter = RpcAdapter::new(chain, contracts(), 1_000, 100, slow);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), adapter.backfill(1_000, 1_299, &cancel))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, AppError::Cancelled), "got {err:?}");
}

#[tokio::test]
async fn rpc_cycle_applies_deltas_and_advances_every_stream() {
    let settings = settings(&[("EVENT_SOURCE", "rpc")]);
    let store = Arc::new(MemoryStore::new());
    let ctx = context(&settings, &store);
    let cancel = CancellationToken::new();
    let (worker, _handle) = ApplyWorker::spawn(ctx.clone(), settings.channel_capacity, cancel.clone());

    let chain = Arc::new(ScriptedChain::new(
        1_500,
        vec![
            erc20_transfer(1_010, 1, ALICE, BOB, 5),
            user_deposit(1_020, 2, ALICE, 100),
            nft_mint(1_030, 3, CAROL, 42),
        ],
    ));
    let adapter = RpcAdapter::new(
        chain,
        ContractSet::from_settings(&settings).unwrap(),
        settings.block_window,
        settings.rpc_window,
        settings.retry.clone(),
    );
    let reconciler = Reconciler::new(ctx, Arc::new(adapter), worker, Duration::from_secs(1));

    let CycleOutcome::Processed { report, has_more } = reconciler.run_once(&cancel).await.unwrap() else {
        panic!("expected a processed window");
    };
    assert_eq!(report.applied, 3);
    assert!(!has_more);

    let cursor = store.cursor(CHAIN_ID).unwrap();
    assert_eq!((cursor.transfer, cursor.protocol_tx, cursor.nft_transfer), (1_500, 1_500, 1_500));
    assert_eq!(cursor.graph_lag_secs, None);

    assert_eq!(store.balance(CHAIN_ID, BOB, DHB).unwrap().wallet_balance, "5");
    // Debits floor at zero when the sender's earlier history is unknown.
    assert_eq!(store.balance(CHAIN_ID, ALICE, DHB).unwrap().wallet_balance, "0");
    assert_eq!(store.balance(CHAIN_ID, ALICE, DHB).unwrap().deposited, "100");
    assert_eq!(store.token(CHAIN_ID, "42").unwrap().owner, CAROL);
    assert!(store.transactions().iter().all(|t| t.source == "rpc"));

    // Caught up: the next cycle has nothing to fetch.
    assert_eq!(reconciler.run_once(&cancel).await.unwrap(), CycleOutcome::Idle);
}
