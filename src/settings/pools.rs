use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{account::Account, error::ConfigError, referral::ReferralGraph};

/// Payout destinations sharing a community owner's partner fee.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PartnerPools {
    pub developer: Account,
    pub partner: Account,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PartnerPoolRegistry {
    pools: BTreeMap<Account, PartnerPools>,
}

impl PartnerPoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every entry or none of them.
    pub fn register(
        &mut self,
        entries: &[(Account, PartnerPools)],
        graph: &ReferralGraph,
    ) -> Result<(), ConfigError> {
        for (index, (owner, pools)) in entries.iter().enumerate() {
            if pools.developer.is_null() || pools.partner.is_null() {
                return Err(ConfigError::NullPool { index });
            }
            if !graph.is_community_owner(owner) {
                return Err(ConfigError::PoolOwnerNotRegistered {
                    index,
                    owner: *owner,
                });
            }
        }
        self.pools.extend(entries.iter().copied());
        Ok(())
    }

    pub fn remove(&mut self, owners: &[Account]) {
        for owner in owners {
            self.pools.remove(owner);
        }
    }

    pub fn get(&self, owner: &Account) -> Option<&PartnerPools> {
        self.pools.get(owner)
    }
}

/// Which community owner an externally issued item is attributed to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PartnerLinks {
    partners: BTreeMap<u64, Account>,
    minted: BTreeMap<Account, u64>,
}

impl PartnerLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, external_id: u64, partner: Account) {
        self.partners.insert(external_id, partner);
        *self.minted.entry(partner).or_default() += 1;
    }

    pub fn partner_of(&self, external_id: u64) -> Option<Account> {
        self.partners.get(&external_id).copied()
    }

    pub fn minted_count(&self, partner: &Account) -> u64 {
        self.minted.get(partner).copied().unwrap_or(0)
    }
}
