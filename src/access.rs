//! Capability gate consulted before every privileged operation.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

use crate::account::Account;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Configuration identities: owners, policy, projects, partner pools.
    Administrator,
    /// Applications allowed to create referrals and submit monetized operations.
    TrustedApplication,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Administrator => f.write_str("administrator"),
            Capability::TrustedApplication => f.write_str("trusted-application"),
        }
    }
}

/// Yes/no answer for (caller, capability), plus the grant side needed when a
/// configured project turns its application into a trusted one.
pub trait AccessGate {
    fn allows(&self, caller: &Account, capability: Capability) -> bool;
    fn grant(&mut self, account: Account, capability: Capability);
    fn revoke(&mut self, account: &Account, capability: Capability);
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RoleTable {
    roles: BTreeMap<Capability, BTreeSet<Account>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_administrators<I>(admins: I) -> Self
    where
        I: IntoIterator<Item = Account>,
    {
        let mut table = Self::new();
        for admin in admins {
            table.grant(admin, Capability::Administrator);
        }
        table
    }

    pub fn holders(&self, capability: Capability) -> impl Iterator<Item = &Account> {
        self.roles.get(&capability).into_iter().flatten()
    }
}

impl AccessGate for RoleTable {
    fn allows(&self, caller: &Account, capability: Capability) -> bool {
        self.roles
            .get(&capability)
            .map(|set| set.contains(caller))
            .unwrap_or(false)
    }

    fn grant(&mut self, account: Account, capability: Capability) {
        self.roles.entry(capability).or_default().insert(account);
    }

    fn revoke(&mut self, account: &Account, capability: Capability) {
        if let Some(set) = self.roles.get_mut(&capability) {
            set.remove(account);
        }
    }
}
