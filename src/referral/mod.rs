//! Directed referral graph.
//!
//! Every account that has been referred holds exactly one referrer, assigned
//! once and never changed. Community owners are the roots sponsors hang from;
//! each referee remembers which owner it is credited to and how deep it sits
//! below that owner.

mod tree;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{account::Account, error::ReferralError};

pub use tree::{Ancestors, TreeWalk};

/// Deepest level a referrer may have and still accept referees.
pub const MAX_LEVEL: u8 = 254;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReferralNode {
    pub referrer: Account,
    pub community_owner: Account,
    pub level: u8,
    pub referees: Vec<Account>,
}

/// Outcome of a successful [`ReferralGraph::add_referral`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferralLink {
    pub referrer: Account,
    pub referee: Account,
    pub community_owner: Account,
    pub level: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralGraph {
    nodes: BTreeMap<Account, ReferralNode>,
    community_owners: BTreeSet<Account>,
    require_community_owner: bool,
}

impl Default for ReferralGraph {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            community_owners: BTreeSet::new(),
            require_community_owner: true,
        }
    }
}

impl ReferralGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_community_owners(&mut self, accounts: &[Account]) {
        self.community_owners.extend(accounts.iter().copied());
    }

    pub fn remove_community_owners(&mut self, accounts: &[Account]) {
        for account in accounts {
            self.community_owners.remove(account);
        }
    }

    pub fn is_community_owner(&self, account: &Account) -> bool {
        self.community_owners.contains(account)
    }

    pub fn community_owners(&self) -> impl Iterator<Item = &Account> {
        self.community_owners.iter()
    }

    pub fn set_require_community_owner(&mut self, enabled: bool) {
        self.require_community_owner = enabled;
    }

    pub fn require_community_owner(&self) -> bool {
        self.require_community_owner
    }

    /// Structural preconditions of a referral, without the ownership policy.
    pub fn referee_is_valid(&self, referrer: &Account, referee: &Account) -> bool {
        self.check_structure(referrer, referee).is_ok()
    }

    fn check_structure(&self, referrer: &Account, referee: &Account) -> Result<(), ReferralError> {
        if referrer == referee {
            return Err(ReferralError::SelfReferral(*referee));
        }
        if referrer.is_null() || referee.is_null() {
            return Err(ReferralError::NullAccount);
        }
        let existing = self.referrer(referee);
        if !existing.is_null() {
            return Err(ReferralError::AlreadyReferred {
                referee: *referee,
                referrer: existing,
            });
        }
        Ok(())
    }

    fn resolve_owner(&self, referrer: &Account) -> Result<Account, ReferralError> {
        if self.community_owners.contains(referrer) {
            return Ok(*referrer);
        }
        if self.require_community_owner {
            return Err(ReferralError::NotCommunityOwner(*referrer));
        }
        let owner = self.community_owner(referrer);
        if !owner.is_null() && self.community_owners.contains(&owner) {
            Ok(owner)
        } else {
            Err(ReferralError::NoOwningAncestor {
                referrer: *referrer,
                owner,
            })
        }
    }

    /// Links `referee` under `referrer`. Nothing is written unless every
    /// check passes; the first failing check is reported.
    pub fn add_referral(
        &mut self,
        referrer: Account,
        referee: Account,
    ) -> Result<ReferralLink, ReferralError> {
        self.check_structure(&referrer, &referee)?;
        let referrer_level = self.referral_level(&referrer);
        if referrer_level >= MAX_LEVEL {
            return Err(ReferralError::LevelCapReached {
                referrer,
                level: referrer_level,
            });
        }
        let community_owner = self.resolve_owner(&referrer)?;
        let level = referrer_level + 1;

        self.nodes
            .entry(referrer)
            .or_default()
            .referees
            .push(referee);
        let node = self.nodes.entry(referee).or_default();
        node.referrer = referrer;
        node.community_owner = community_owner;
        node.level = level;

        Ok(ReferralLink {
            referrer,
            referee,
            community_owner,
            level,
        })
    }

    pub fn node(&self, account: &Account) -> Option<&ReferralNode> {
        self.nodes.get(account)
    }

    pub fn is_referee(&self, account: &Account) -> bool {
        !self.referrer(account).is_null()
    }

    pub fn referrer(&self, account: &Account) -> Account {
        self.nodes
            .get(account)
            .map(|n| n.referrer)
            .unwrap_or(Account::NULL)
    }

    pub fn community_owner(&self, account: &Account) -> Account {
        self.nodes
            .get(account)
            .map(|n| n.community_owner)
            .unwrap_or(Account::NULL)
    }

    pub fn referral_level(&self, account: &Account) -> u8 {
        self.nodes.get(account).map(|n| n.level).unwrap_or(0)
    }

    pub fn referee_count(&self, account: &Account) -> usize {
        self.nodes
            .get(account)
            .map(|n| n.referees.len())
            .unwrap_or(0)
    }

    pub fn referees(&self, account: &Account) -> &[Account] {
        self.nodes
            .get(account)
            .map(|n| n.referees.as_slice())
            .unwrap_or(&[])
    }

    /// Pre-order walk of `root` and its descendants, root at level 0.
    pub fn referral_tree(&self, root: Account) -> TreeWalk<'_> {
        TreeWalk::new(self, root)
    }

    /// Depth of `target` below `root`, counting direct referees as 1.
    pub fn referee_level_in_tree(&self, root: Account, target: &Account) -> Option<u8> {
        self.referral_tree(root)
            .skip(1)
            .find(|(account, _)| account == target)
            .map(|(_, level)| level)
    }

    /// Referrers above `account`, nearest first.
    pub fn ancestors(&self, account: Account) -> Ancestors<'_> {
        Ancestors::new(self, account)
    }

    /// Last account reached walking up from `account`'s referrer; null when
    /// `account` is not a referee.
    pub fn top_referrer(&self, account: Account) -> Account {
        self.ancestors(account).last().unwrap_or(Account::NULL)
    }
}
