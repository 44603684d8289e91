use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use chainbook_core::{AppError, RawAmount, RawEvent, RawKind, Settings, Source};

use crate::abi::{ERC20, ERC721, ERC1155, MediaProtocol};

/// What a watched contract is to the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractRole {
    Token,
    Protocol,
    Nft,
}

/// The contracts whose logs are reconciled on one chain.
#[derive(Debug, Clone, Default)]
pub struct ContractSet {
    tokens: Vec<Address>,
    protocol: Option<Address>,
    nfts: Vec<Address>,
}

impl ContractSet {
    pub fn new(tokens: Vec<Address>, protocol: Option<Address>, nfts: Vec<Address>) -> Self {
        Self {
            tokens,
            protocol,
            nfts,
        }
    }

    /// Tracked tokens, protocol contract and NFT collections from configuration.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let parse = |raw: &str| {
            raw.parse::<Address>()
                .map_err(|e| AppError::Config(format!("invalid address {raw:?}: {e}")))
        };
        Ok(Self {
            tokens: settings.tokens.addresses().map(parse).collect::<Result<_, _>>()?,
            protocol: settings.protocol_address.as_deref().map(parse).transpose()?,
            nfts: settings
                .nft_addresses
                .iter()
                .map(|a| parse(a))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn role(&self, address: Address) -> Option<ContractRole> {
        if self.protocol == Some(address) {
            Some(ContractRole::Protocol)
        } else if self.tokens.contains(&address) {
            Some(ContractRole::Token)
        } else if self.nfts.contains(&address) {
            Some(ContractRole::Nft)
        } else {
            None
        }
    }

    /// Every watched address, for `eth_getLogs` / `eth_subscribe` filters.
    pub fn addresses(&self) -> Vec<Address> {
        self.tokens
            .iter()
            .chain(self.protocol.iter())
            .chain(self.nfts.iter())
            .copied()
            .collect()
    }
}

fn hex(a: Address) -> String {
    format!("{a:#x}")
}

fn units(v: U256) -> Option<RawAmount> {
    Some(RawAmount::Units(v))
}

/// Decode a log from a watched contract into a [`RawEvent`].
///
/// Returns `Ok(None)` for removed (reorged) logs, unwatched contracts and
/// events the reconciler does not consume. A log that is missing its block
/// position is a decode error.
pub fn decode_log(log: &Log, contracts: &ContractSet) -> Result<Option<RawEvent>, AppError> {
    if log.removed {
        tracing::debug!(tx_hash = ?log.transaction_hash, log_index = ?log.log_index, "Ignoring removed log");
        return Ok(None);
    }
    let contract = log.address();
    let Some(role) = contracts.role(contract) else {
        return Ok(None);
    };

    let missing = |field: &str| AppError::Decode(format!("log from {contract:#x} has no {field}"));
    let block_number = log.block_number.ok_or_else(|| missing("block number"))?;
    let tx_hash = log
        .transaction_hash
        .map(|h| format!("{h:#x}"))
        .ok_or_else(|| missing("transaction hash"))?;
    let log_index = log.log_index.ok_or_else(|| missing("log index"))?;

    let event = |kind: RawKind, from: Address, to: Address, token: Address| RawEvent {
        source: Source::Rpc,
        kind,
        tx_hash: tx_hash.clone(),
        log_index,
        block_number,
        from: hex(from),
        to: hex(to),
        token_address: hex(token),
        token_id: None,
        amount: None,
        from_balance: None,
        to_balance: None,
        staked: None,
    };

    let raw = match role {
        ContractRole::Token => match log.log_decode::<ERC20::Transfer>() {
            Ok(decoded) => {
                let d = decoded.inner.data;
                RawEvent {
                    amount: units(d.value),
                    ..event(RawKind::Erc20Transfer, d.from, d.to, contract)
                }
            }
            Err(_) => return Ok(None),
        },
        ContractRole::Nft => {
            if let Ok(decoded) = log.log_decode::<ERC721::Transfer>() {
                let d = decoded.inner.data;
                RawEvent {
                    token_id: Some(d.tokenId.to_string()),
                    amount: units(U256::from(1)),
                    ..event(RawKind::NftTransfer, d.from, d.to, contract)
                }
            } else if let Ok(decoded) = log.log_decode::<ERC1155::TransferSingle>() {
                let d = decoded.inner.data;
                RawEvent {
                    token_id: Some(d.id.to_string()),
                    amount: units(d.value),
                    ..event(RawKind::NftTransfer, d.from, d.to, contract)
                }
            } else {
                return Ok(None);
            }
        }
        ContractRole::Protocol => {
            let tag = |t: &str| RawKind::Protocol(t.to_string());
            if let Ok(decoded) = log.log_decode::<MediaProtocol::UserDeposit>() {
                let d = decoded.inner.data;
                RawEvent {
                    amount: units(d.amount),
                    ..event(tag("DEPOSIT"), d.user, contract, d.token)
                }
            } else if let Ok(decoded) = log.log_decode::<MediaProtocol::Claim>() {
                let d = decoded.inner.data;
                RawEvent {
                    token_id: Some(d.id.to_string()),
                    amount: units(d.amount),
                    ..event(tag("CLAIM"), contract, d.receiver, d.token)
                }
            } else if let Ok(decoded) = log.log_decode::<MediaProtocol::Staked>() {
                let d = decoded.inner.data;
                RawEvent {
                    amount: units(d.amount),
                    staked: units(d.totalStaked),
                    ..event(tag("STAKE"), d.user, contract, d.token)
                }
            } else if let Ok(decoded) = log.log_decode::<MediaProtocol::Unstaked>() {
                let d = decoded.inner.data;
                RawEvent {
                    amount: units(d.amount),
                    staked: units(d.totalStaked),
                    ..event(tag("UNSTAKE"), d.user, contract, d.token)
                }
            } else {
                return Ok(None);
            }
        }
    };

    Ok(Some(raw))
}
