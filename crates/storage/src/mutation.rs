//! Typed ledger effects.
//!
//! A classified event is planned into a list of [`Mutation`]s; a store backend
//! executes the list atomically together with the event's idempotency marker.

use chainbook_core::Amount;

/// Balance sub-ledger credited by marketplace payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubLedger {
    Tips,
    Ppv,
    Bounty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BountyPool {
    Viewer,
    Commentor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardKind {
    Tip,
    BountyViewer,
    BountyCommentor,
}

impl RewardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardKind::Tip => "tip",
            RewardKind::BountyViewer => "bounty_viewer",
            RewardKind::BountyCommentor => "bounty_commentor",
        }
    }
}

/// One effect of an event. The chain id, block and event identity come from
/// the event the mutation is committed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Replace the wallet balance with an absolute snapshot.
    SetWalletBalance {
        address: String,
        token_address: String,
        value: Amount,
    },
    /// Move the wallet balance by a signed delta (floored at zero).
    AdjustWalletBalance {
        address: String,
        token_address: String,
        delta: Amount,
    },
    /// `balance += amount; deposited += amount`.
    Deposit {
        address: String,
        token_address: String,
        amount: Amount,
    },
    /// Confirm a pending claim, then `claimed += amount; pending -= amount`.
    ConfirmClaim {
        claim_id: i64,
        receiver: String,
        token_address: String,
        amount: Amount,
    },
    /// Replace the staked total with the contract's running value.
    SetStaked {
        address: String,
        token_address: String,
        value: Amount,
    },
    /// Tip aggregates on both accounts and, when the receiver owns or minted
    /// the NFT, on the token.
    Tip {
        sender: String,
        receiver: String,
        token_id: String,
        amount: Amount,
    },
    CreditSubLedger {
        address: String,
        token_address: String,
        ledger: SubLedger,
        amount: Amount,
    },
    /// PPV audit row plus `token.total_funds += amount`.
    RecordPpv {
        payer: String,
        token_id: String,
        token_address: String,
        amount: Amount,
    },
    DrainBounty {
        token_id: String,
        pool: BountyPool,
        amount: Amount,
    },
    /// Move NFT ownership; a transfer from the zero address also mints.
    TransferNft {
        token_id: String,
        collection: String,
        from: String,
        to: String,
    },
    RecordReward {
        kind: RewardKind,
        address: String,
        token_id: Option<String>,
        token_address: String,
        amount: Amount,
    },
}

/// Result of committing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First sighting; all mutations were applied.
    Applied,
    /// The idempotency key was already present; nothing changed.
    AlreadyProcessed,
}
