//! Raw adapter output to canonical [`LedgerEvent`]s.
//!
//! Classification is pure: the same raw event always yields the same ledger
//! event, which is what makes re-delivery safe.

use chainbook_core::{
    AppError, Amount, EventType, LedgerEvent, RawAmount, RawEvent, RawKind, Snapshot,
    TokenRegistry, event::ZERO_ADDRESS,
};

/// NFT quantities are plain counts.
const NFT_DECIMALS: u8 = 0;

fn to_amount(raw: &RawAmount, decimals: u8) -> Result<Amount, AppError> {
    match raw {
        RawAmount::Units(units) => Amount::from_units(*units, decimals),
        RawAmount::Decimal(s) => Amount::parse(s),
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Classify a raw event observed on `chain_id`.
///
/// Fails with [`AppError::Decode`] when the type tag is unknown, a required
/// field is missing, or an amount is malformed or negative.
pub fn classify(
    raw: &RawEvent,
    chain_id: u64,
    tokens: &TokenRegistry,
) -> Result<LedgerEvent, AppError> {
    let from_address = normalize(&raw.from);
    let to_address = normalize(&raw.to);
    let token_address = normalize(&raw.token_address);

    let event_type = match &raw.kind {
        RawKind::Erc20Transfer => EventType::Transfer,
        RawKind::Protocol(tag) => EventType::from_protocol_tag(tag)
            .ok_or_else(|| AppError::Decode(format!("unknown protocol event type {tag:?}")))?,
        RawKind::NftTransfer if from_address == ZERO_ADDRESS => EventType::NftMint,
        RawKind::NftTransfer => EventType::NftTransfer,
    };

    let token_id = raw
        .token_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let needs_token_id = !matches!(
        event_type,
        EventType::Transfer | EventType::Deposit | EventType::Stake | EventType::Unstake
    );
    if needs_token_id && token_id.is_none() {
        return Err(AppError::Decode(format!(
            "{event_type} event {}:{} has no token id",
            raw.tx_hash, raw.log_index
        )));
    }

    let decimals = match event_type {
        EventType::NftMint | EventType::NftTransfer => NFT_DECIMALS,
        _ => tokens.decimals(&token_address).unwrap_or_else(|| {
            tracing::debug!(token = %token_address, "Untracked token, assuming 18 decimals");
            TokenRegistry::DEFAULT_DECIMALS
        }),
    };

    let amount = match (&raw.amount, event_type) {
        (Some(a), _) => to_amount(a, decimals)?,
        (None, EventType::NftMint | EventType::NftTransfer) => Amount::parse("1")?,
        (None, _) => {
            return Err(AppError::Decode(format!(
                "{event_type} event {}:{} has no amount",
                raw.tx_hash, raw.log_index
            )));
        }
    };
    if amount.is_negative() {
        return Err(AppError::Decode(format!("negative amount {amount}")));
    }

    let snapshot_of = |v: &Option<RawAmount>| v.as_ref().map(|a| to_amount(a, decimals)).transpose();
    let snapshot = Snapshot {
        from_balance: snapshot_of(&raw.from_balance)?,
        to_balance: snapshot_of(&raw.to_balance)?,
        staked: snapshot_of(&raw.staked)?,
    };

    Ok(LedgerEvent {
        chain_id,
        tx_hash: raw.tx_hash.trim().to_ascii_lowercase(),
        log_index: raw.log_index,
        block_number: raw.block_number,
        event_type,
        from_address,
        to_address,
        token_address,
        token_id,
        amount,
        snapshot,
        source: raw.source,
    })
}
