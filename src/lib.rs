//! Referral graph and commission engine.
//!
//! Applications register who referred whom ([`referral`]), configure per
//! project fee tables ([`settings`]) and submit monetized operations to the
//! [`engine`], which pays partner pools and the payer's referral chain and
//! hands the remainder back, all or nothing, through a [`ledger::Payable`]
//! backend.
//!
//! * [`account`]: opaque 32-byte participant identifiers.
//! * [`access`]: the capability gate privileged calls go through.
//! * [`ledger`]: in-process settlement backend with rollback.
//! * [`config`]: genesis configuration and persisted CLI state.

pub mod access;
pub mod account;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod referral;
pub mod settings;

mod serde_entries;

pub use access::{AccessGate, Capability, RoleTable};
pub use account::Account;
pub use engine::{CommissionEngine, Distribution, SharedEngine};
pub use error::{ConfigError, EngineError, ErrorKind, ReferralError, TransferError};
pub use events::Notification;
pub use ledger::{Amount, Ledger, Payable};
pub use referral::ReferralGraph;
pub use settings::{PartnerPools, ProjectSettings};
