use thiserror::Error;

use crate::{access::Capability, account::Account, ledger::Amount};

/// Rejected referral requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferralError {
    #[error("account {0} cannot refer itself")]
    SelfReferral(Account),

    #[error("the null account cannot take part in a referral")]
    NullAccount,

    #[error("account {referee} already has referrer {referrer}")]
    AlreadyReferred { referee: Account, referrer: Account },

    #[error("referrer {referrer} is at level {level}, the deepest allowed")]
    LevelCapReached { referrer: Account, level: u8 },

    #[error("referrer {0} is not a registered community owner")]
    NotCommunityOwner(Account),

    #[error("referrer {referrer} has no registered community owner above it (recorded owner {owner})")]
    NoOwningAncestor { referrer: Account, owner: Account },
}

/// Invalid project or partner pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("partner fee {0} bps exceeds 10000")]
    PartnerFeeOutOfRange(u16),

    #[error("discount {0} bps exceeds 10000")]
    DiscountOutOfRange(u16),

    #[error("{0} commission levels configured, at most 30 allowed")]
    TooManyLevels(usize),

    #[error("level {level} fee {fee} bps exceeds 10000")]
    LevelFeeOutOfRange { level: usize, fee: u16 },

    #[error("entry {index}: pool destinations must not be the null account")]
    NullPool { index: usize },

    #[error("entry {index}: {owner} is not a registered community owner")]
    PoolOwnerNotRegistered { index: usize, owner: Account },
}

/// An outbound value movement that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("cannot pay {amount} to the null account")]
    NullDestination { amount: Amount },

    #[error("destination {to} refused {amount}")]
    Rejected { to: Account, amount: Amount },

    #[error("escrow holds {available}, cannot pay out {needed}")]
    InsufficientEscrow { needed: Amount, available: Amount },

    #[error("account {account} holds {available}, cannot attach {needed}")]
    InsufficientFunds {
        account: Account,
        needed: Amount,
        available: Amount,
    },

    #[error("destination {to} failed: {reason}")]
    Destination { to: Account, reason: String },

    #[error("crediting {amount} would overflow the balance of {to}")]
    BalanceOverflow { to: Account, amount: Amount },

    #[error("settlement backend panicked: {reason}")]
    Aborted { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    Policy,
    Configuration,
    Lookup,
    Transfer,
    Access,
    Reentrancy,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{caller} lacks the {capability} capability")]
    Unauthorized {
        caller: Account,
        capability: Capability,
    },

    #[error(transparent)]
    Referral(#[from] ReferralError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("commission level {level} out of range, project defines {levels} levels")]
    LevelOutOfRange { level: usize, levels: usize },

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("reentrant call rejected")]
    Reentrant,

    #[error("engine lock poisoned by an earlier panic")]
    Poisoned,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Unauthorized { .. } => ErrorKind::Access,
            EngineError::Referral(err) => match err {
                ReferralError::NotCommunityOwner(_) | ReferralError::NoOwningAncestor { .. } => {
                    ErrorKind::Policy
                }
                _ => ErrorKind::Structural,
            },
            EngineError::Config(_) => ErrorKind::Configuration,
            EngineError::LevelOutOfRange { .. } => ErrorKind::Lookup,
            EngineError::Transfer(_) => ErrorKind::Transfer,
            EngineError::Reentrant | EngineError::Poisoned => ErrorKind::Reentrancy,
        }
    }
}
