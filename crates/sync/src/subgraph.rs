//! GraphQL subgraph adapter.
//!
//! One document fetches the three event collections, each bounded by its own
//! stream's window, plus the `_meta` sync head of the indexer.

use std::time::Duration;

use alloy::primitives::U256;
use async_trait::async_trait;
use chainbook_core::{AppError, RawAmount, RawEvent, RawKind, Source, Stream};
use chainbook_storage::Cursor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::cursor::{BlockRange, PageStats, advance_target};
use crate::scheduler::{FetchOutcome, StreamWindow, WindowBatch, WindowSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const WINDOW_QUERY: &str = r#"
query ReconcileWindow(
  $first: Int!,
  $transferFrom: BigInt!, $transferTo: BigInt!,
  $protocolFrom: BigInt!, $protocolTo: BigInt!,
  $nftFrom: BigInt!, $nftTo: BigInt!
) {
  _meta { block { number timestamp } }
  transfers(
    first: $first
    where: { blockNumber_gte: $transferFrom, blockNumber_lte: $transferTo }
    orderBy: blockNumber
    orderDirection: asc
  ) {
    transaction { id }
    tokenAddress { id }
    to { id balances { token { id } balance } }
    from { id balances { token { id } balance } }
    realAmount
    blockNumber
    logIndex
  }
  protocolTxes(
    first: $first
    where: { blockNumber_gte: $protocolFrom, blockNumber_lte: $protocolTo }
    orderBy: blockNumber
    orderDirection: asc
  ) {
    type
    tokenId
    amount
    blockNumber
    transaction { id }
    token { id }
    to { id }
    from { id balances { staked token { id } } }
    logIndex
  }
  nftTransfers(
    first: $first
    where: { blockNumber_gte: $nftFrom, blockNumber_lte: $nftTo }
    orderBy: blockNumber
    orderDirection: asc
  ) {
    id
    tokenId
    from { id }
    to { id }
    collection
    blockNumber
  }
}
"#;

// ─── Response Shapes ────────────────────────────────────────────────────────

/// Graph `BigInt`s arrive as strings; plain `Int`s as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(u64),
    Str(String),
}

fn de_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    match NumOrString::deserialize(d)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn de_opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    match Option::<NumOrString>::deserialize(d)? {
        None => Ok(None),
        Some(NumOrString::Num(n)) => Ok(Some(n)),
        Some(NumOrString::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct GraphResponse {
    data: Option<WindowData>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowData {
    #[serde(rename = "_meta")]
    meta: Meta,
    // Items stay raw so one malformed entry cannot reject the whole window.
    #[serde(default)]
    transfers: Vec<Value>,
    #[serde(default)]
    protocol_txes: Vec<Value>,
    #[serde(default)]
    nft_transfers: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    block: MetaBlock,
}

#[derive(Debug, Deserialize)]
struct MetaBlock {
    #[serde(deserialize_with = "de_u64")]
    number: u64,
    #[serde(default, deserialize_with = "de_opt_u64")]
    timestamp: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Entity {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AccountRef {
    id: String,
    #[serde(default)]
    balances: Vec<BalanceRef>,
}

impl AccountRef {
    fn balance_of(&self, token: &str) -> Option<&BalanceRef> {
        self.balances
            .iter()
            .find(|b| b.token.id.eq_ignore_ascii_case(token))
    }
}

#[derive(Debug, Deserialize)]
struct BalanceRef {
    token: Entity,
    #[serde(default)]
    balance: Option<String>,
    #[serde(default)]
    staked: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferItem {
    transaction: Entity,
    token_address: Entity,
    to: AccountRef,
    from: AccountRef,
    real_amount: String,
    #[serde(deserialize_with = "de_u64")]
    block_number: u64,
    #[serde(deserialize_with = "de_u64")]
    log_index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolTxItem {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    token_id: Option<String>,
    amount: String,
    #[serde(deserialize_with = "de_u64")]
    block_number: u64,
    transaction: Entity,
    token: Entity,
    to: AccountRef,
    from: AccountRef,
    #[serde(deserialize_with = "de_u64")]
    log_index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NftTransferItem {
    /// `<txHash>-<logIndex>`.
    id: String,
    token_id: String,
    from: Entity,
    to: Entity,
    collection: String,
    #[serde(deserialize_with = "de_u64")]
    block_number: u64,
}

fn units(s: &str) -> Result<RawAmount, AppError> {
    U256::from_str_radix(s.trim(), 10)
        .map(RawAmount::Units)
        .map_err(|e| AppError::Decode(format!("invalid BigInt {s:?}: {e}")))
}

fn blank(source: Source, kind: RawKind, tx_hash: String, log_index: u64, block_number: u64) -> RawEvent {
    RawEvent {
        source,
        kind,
        tx_hash,
        log_index,
        block_number,
        from: String::new(),
        to: String::new(),
        token_address: String::new(),
        token_id: None,
        amount: None,
        from_balance: None,
        to_balance: None,
        staked: None,
    }
}

impl TransferItem {
    fn into_raw(self) -> Result<RawEvent, AppError> {
        let token = self.token_address.id;
        let from_balance = self
            .from
            .balance_of(&token)
            .and_then(|b| b.balance.as_deref())
            .map(units)
            .transpose()?;
        let to_balance = self
            .to
            .balance_of(&token)
            .and_then(|b| b.balance.as_deref())
            .map(units)
            .transpose()?;
        Ok(RawEvent {
            from: self.from.id,
            to: self.to.id,
            amount: Some(RawAmount::Decimal(self.real_amount)),
            from_balance,
            to_balance,
            token_address: token,
            ..blank(
                Source::Subgraph,
                RawKind::Erc20Transfer,
                self.transaction.id,
                self.log_index,
                self.block_number,
            )
        })
    }
}

impl ProtocolTxItem {
    fn into_raw(self) -> Result<RawEvent, AppError> {
        let token = self.token.id;
        let staked = self
            .from
            .balance_of(&token)
            .and_then(|b| b.staked.as_deref())
            .map(units)
            .transpose()?;
        Ok(RawEvent {
            from: self.from.id,
            to: self.to.id,
            token_id: self.token_id,
            amount: Some(units(&self.amount)?),
            staked,
            token_address: token,
            ..blank(
                Source::Subgraph,
                RawKind::Protocol(self.tag),
                self.transaction.id,
                self.log_index,
                self.block_number,
            )
        })
    }
}

impl NftTransferItem {
    fn into_raw(self) -> Result<RawEvent, AppError> {
        let (tx_hash, log_index) = self
            .id
            .rsplit_once('-')
            .and_then(|(tx, idx)| Some((tx.to_string(), idx.parse::<u64>().ok()?)))
            .ok_or_else(|| AppError::Decode(format!("NFT transfer id {:?} is not <tx>-<logIndex>", self.id)))?;
        Ok(RawEvent {
            from: self.from.id,
            to: self.to.id,
            token_id: Some(self.token_id),
            token_address: self.collection,
            ..blank(Source::Subgraph, RawKind::NftTransfer, tx_hash, log_index, self.block_number)
        })
    }
}

// ─── Client ─────────────────────────────────────────────────────────────────

/// One collection of a fetched window, with its shape before decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub events: Vec<RawEvent>,
    pub stats: PageStats,
}

impl Page {
    /// Decode a collection item by item. A malformed item is skipped, but its
    /// block still shapes the page so the cursor plan sees the full page.
    fn collect<T: DeserializeOwned>(
        stream: Stream,
        items: Vec<Value>,
        into_raw: fn(T) -> Result<RawEvent, AppError>,
    ) -> Self {
        let returned = items.len();
        let blocks: Vec<u64> = items.iter().filter_map(item_block).collect();
        let stats = PageStats {
            returned,
            ..PageStats::of(blocks)
        };

        let events = items
            .into_iter()
            .filter_map(|item| {
                let decoded = serde_json::from_value::<T>(item)
                    .map_err(|e| AppError::Decode(e.to_string()))
                    .and_then(into_raw);
                match decoded {
                    Ok(raw) => Some(raw),
                    Err(e) => {
                        tracing::warn!(%stream, error = %e, "Skipping malformed subgraph item");
                        None
                    }
                }
            })
            .collect();
        Self { events, stats }
    }
}

fn item_block(item: &Value) -> Option<u64> {
    match item.get("blockNumber")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Result of one window query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubgraphWindow {
    pub sync_head_block: u64,
    pub sync_head_timestamp: Option<u64>,
    pub transfers: Page,
    pub protocol_txes: Page,
    pub nft_transfers: Page,
}

/// Per-stream block ranges of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRanges {
    pub transfer: BlockRange,
    pub protocol_tx: BlockRange,
    pub nft_transfer: BlockRange,
}

impl WindowRanges {
    pub fn after(cursor: &Cursor, window: u64) -> Self {
        Self {
            transfer: BlockRange::after(cursor.transfer, window),
            protocol_tx: BlockRange::after(cursor.protocol_tx, window),
            nft_transfer: BlockRange::after(cursor.nft_transfer, window),
        }
    }

    pub fn get(&self, stream: Stream) -> BlockRange {
        match stream {
            Stream::Transfer => self.transfer,
            Stream::ProtocolTx => self.protocol_tx,
            Stream::NftTransfer => self.nft_transfer,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubgraphClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SubgraphClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// Query every collection within its range, `first` items at most each.
    pub async fn fetch_window(&self, ranges: &WindowRanges, first: usize) -> Result<SubgraphWindow, AppError> {
        let body = json!({
            "query": WINDOW_QUERY,
            "variables": {
                "first": first,
                "transferFrom": ranges.transfer.from.to_string(),
                "transferTo": ranges.transfer.to.to_string(),
                "protocolFrom": ranges.protocol_tx.from.to_string(),
                "protocolTo": ranges.protocol_tx.to.to_string(),
                "nftFrom": ranges.nft_transfer.from.to_string(),
                "nftTo": ranges.nft_transfer.to.to_string(),
            }
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Subgraph(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::Subgraph(e.to_string()))?;
        let parsed: GraphResponse = response
            .json()
            .await
            .map_err(|e| AppError::Subgraph(format!("unexpected response shape: {e}")))?;

        if !parsed.errors.is_empty() {
            let messages: Vec<_> = parsed.errors.into_iter().map(|e| e.message).collect();
            return Err(AppError::Subgraph(messages.join("; ")));
        }
        let data = parsed
            .data
            .ok_or_else(|| AppError::Subgraph("response has no data".into()))?;

        Ok(SubgraphWindow {
            sync_head_block: data.meta.block.number,
            sync_head_timestamp: data.meta.block.timestamp,
            transfers: Page::collect(Stream::Transfer, data.transfers, TransferItem::into_raw),
            protocol_txes: Page::collect(Stream::ProtocolTx, data.protocol_txes, ProtocolTxItem::into_raw),
            nft_transfers: Page::collect(Stream::NftTransfer, data.nft_transfers, NftTransferItem::into_raw),
        })
    }
}

// ─── Window Source ──────────────────────────────────────────────────────────

/// Polls the subgraph for the windows following each stream cursor.
pub struct SubgraphAdapter {
    client: SubgraphClient,
    block_window: u64,
    item_limit: usize,
}

impl SubgraphAdapter {
    pub fn new(client: SubgraphClient, block_window: u64, item_limit: usize) -> Self {
        Self {
            client,
            block_window,
            item_limit,
        }
    }
}

#[async_trait]
impl WindowSource for SubgraphAdapter {
    fn name(&self) -> &'static str {
        "subgraph"
    }

    async fn fetch(&self, cursor: &Cursor, _cancel: &CancellationToken) -> Result<FetchOutcome, AppError> {
        let ranges = WindowRanges::after(cursor, self.block_window);
        let window = self.client.fetch_window(&ranges, self.item_limit).await?;

        let head = window.sync_head_block;
        let lag_secs = window
            .sync_head_timestamp
            .map(|ts| chrono::Utc::now().timestamp() - ts as i64);

        let pages = [
            (Stream::Transfer, window.transfers),
            (Stream::ProtocolTx, window.protocol_txes),
            (Stream::NftTransfer, window.nft_transfers),
        ];
        let mut streams = Vec::with_capacity(pages.len());
        let mut has_more = false;

        for (stream, page) in pages {
            let position = cursor.get(stream);
            let Some(range) = ranges.get(stream).clamp(head) else {
                tracing::debug!(%stream, head, cursor = position, "Subgraph has not reached the stream cursor");
                continue;
            };
            let advance_to = advance_target(position, range, page.stats, self.item_limit);
            has_more |= advance_to.is_some_and(|t| t < head);
            streams.push(StreamWindow {
                stream,
                cursor: position,
                events: page.events,
                advance_to,
            });
        }

        if streams.is_empty() {
            tracing::info!(head, "Subgraph is behind the requested window; skipping cycle");
            return Ok(FetchOutcome::Idle { lag_secs });
        }

        Ok(FetchOutcome::Window(WindowBatch {
            streams,
            lag_secs,
            has_more,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_and_numeric_block_numbers() {
        let item: NftTransferItem = serde_json::from_value(json!({
            "id": "0xabc-3",
            "tokenId": "42",
            "from": { "id": "0x0000000000000000000000000000000000000000" },
            "to": { "id": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb" },
            "collection": "0x3333333333333333333333333333333333333333",
            "blockNumber": "1200"
        }))
        .unwrap();
        assert_eq!(item.block_number, 1_200);

        let raw = item.into_raw().unwrap();
        assert_eq!(raw.tx_hash, "0xabc");
        assert_eq!(raw.log_index, 3);
        assert_eq!(raw.token_id.as_deref(), Some("42"));

        let meta: MetaBlock = serde_json::from_value(json!({ "number": 1500, "timestamp": 1700000000 })).unwrap();
        assert_eq!(meta.number, 1_500);
        assert_eq!(meta.timestamp, Some(1_700_000_000));
    }

    #[test]
    fn transfer_picks_snapshot_of_its_token() {
        let item: TransferItem = serde_json::from_value(json!({
            "transaction": { "id": "0xabc" },
            "tokenAddress": { "id": "0x1111111111111111111111111111111111111111" },
            "to": {
                "id": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                "balances": [
                    { "token": { "id": "0x9999999999999999999999999999999999999999" }, "balance": "1" },
                    { "token": { "id": "0x1111111111111111111111111111111111111111" }, "balance": "5000" }
                ]
            },
            "from": { "id": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "balances": [] },
            "realAmount": "0.005",
            "blockNumber": "1000",
            "logIndex": "2"
        }))
        .unwrap();

        let raw = item.into_raw().unwrap();
        assert_eq!(raw.to_balance, Some(RawAmount::Units(U256::from(5_000))));
        assert_eq!(raw.from_balance, None);
        assert_eq!(raw.amount, Some(RawAmount::Decimal("0.005".into())));
    }

    #[test]
    fn malformed_nft_id_is_rejected() {
        let item = NftTransferItem {
            id: "no-index-here".into(),
            token_id: "1".into(),
            from: Entity { id: "0x1".into() },
            to: Entity { id: "0x2".into() },
            collection: "0x3".into(),
            block_number: 1,
        };
        assert!(matches!(item.into_raw(), Err(AppError::Decode(_))));
    }
}
