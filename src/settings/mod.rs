//! Per-application configuration and the small keyed stores the engine reads
//! on every operation.

mod discount;
mod pools;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{account::Account, error::ConfigError, ledger::Amount};

pub use discount::DiscountLedger;
pub use pools::{PartnerLinks, PartnerPoolRegistry, PartnerPools};

/// Basis points, out of [`BPS_DENOMINATOR`].
pub type Bps = u16;

pub const BPS_DENOMINATOR: u16 = 10_000;
pub const MAX_COMMISSION_LEVELS: usize = 30;

/// `amount * bps / 10000`, truncated.
pub fn apply_bps(amount: Amount, bps: Bps) -> Amount {
    (u128::from(amount) * u128::from(bps) / u128::from(BPS_DENOMINATOR)) as Amount
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProjectSettings {
    pub partner_fee_bps: Bps,
    /// Index 0 pays the payer's direct referrer.
    pub level_fees_bps: Vec<Bps>,
    pub discount_bps: Bps,
    /// When set the discount applies on every eligible operation instead of
    /// once per (payer, application).
    pub constant_discount: bool,
}

static UNCONFIGURED: ProjectSettings = ProjectSettings {
    partner_fee_bps: 0,
    level_fees_bps: Vec::new(),
    discount_bps: 0,
    constant_discount: false,
};

impl ProjectSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partner_fee_bps > BPS_DENOMINATOR {
            return Err(ConfigError::PartnerFeeOutOfRange(self.partner_fee_bps));
        }
        if self.discount_bps > BPS_DENOMINATOR {
            return Err(ConfigError::DiscountOutOfRange(self.discount_bps));
        }
        if self.level_fees_bps.len() > MAX_COMMISSION_LEVELS {
            return Err(ConfigError::TooManyLevels(self.level_fees_bps.len()));
        }
        if let Some((level, fee)) = self
            .level_fees_bps
            .iter()
            .enumerate()
            .find(|(_, fee)| **fee > BPS_DENOMINATOR)
        {
            return Err(ConfigError::LevelFeeOutOfRange { level, fee: *fee });
        }
        Ok(())
    }

    pub fn discount(&self, fee: Amount) -> Amount {
        apply_bps(fee, self.discount_bps)
    }

    pub fn commission(&self, amount: Amount, level: usize) -> Option<Amount> {
        self.level_fees_bps
            .get(level)
            .map(|bps| apply_bps(amount, *bps))
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectKey {
    pub application: Account,
    pub sub_index: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProjectStore {
    #[serde(with = "crate::serde_entries")]
    projects: BTreeMap<ProjectKey, ProjectSettings>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole entry; partial updates are not supported.
    pub fn set(
        &mut self,
        application: Account,
        sub_index: u32,
        settings: ProjectSettings,
    ) -> Result<(), ConfigError> {
        settings.validate()?;
        self.projects.insert(
            ProjectKey {
                application,
                sub_index,
            },
            settings,
        );
        Ok(())
    }

    pub fn remove(&mut self, application: Account, sub_index: u32) -> Option<ProjectSettings> {
        self.projects.remove(&ProjectKey {
            application,
            sub_index,
        })
    }

    pub fn get(&self, application: Account, sub_index: u32) -> Option<&ProjectSettings> {
        self.projects.get(&ProjectKey {
            application,
            sub_index,
        })
    }

    /// Configured settings, or all-zero settings for an unknown project.
    pub fn settings(&self, application: Account, sub_index: u32) -> &ProjectSettings {
        self.get(application, sub_index).unwrap_or(&UNCONFIGURED)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProjectKey, &ProjectSettings)> {
        self.projects.iter()
    }

    /// Re-checks every stored entry, for stores read back from disk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.projects.values().try_for_each(ProjectSettings::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(partner: Bps, levels: Vec<Bps>, discount: Bps) -> ProjectSettings {
        ProjectSettings {
            partner_fee_bps: partner,
            level_fees_bps: levels,
            discount_bps: discount,
            constant_discount: false,
        }
    }

    #[test]
    fn bps_math_truncates() {
        assert_eq!(apply_bps(100, 1_000), 10);
        assert_eq!(apply_bps(99, 1_000), 9);
        assert_eq!(apply_bps(1, 9_999), 0);
        assert_eq!(apply_bps(u64::MAX, 10_000), u64::MAX);
        assert_eq!(apply_bps(u64::MAX, 5_000), u64::MAX / 2);
    }

    #[test]
    fn validation_bounds() {
        assert!(project(10_000, vec![10_000; 30], 10_000).validate().is_ok());
        assert_eq!(
            project(10_001, vec![], 0).validate(),
            Err(ConfigError::PartnerFeeOutOfRange(10_001))
        );
        assert_eq!(
            project(0, vec![], 10_001).validate(),
            Err(ConfigError::DiscountOutOfRange(10_001))
        );
        assert_eq!(
            project(0, vec![1; 31], 0).validate(),
            Err(ConfigError::TooManyLevels(31))
        );
        assert_eq!(
            project(0, vec![100, 20_000], 0).validate(),
            Err(ConfigError::LevelFeeOutOfRange {
                level: 1,
                fee: 20_000
            })
        );
    }

    #[test]
    fn store_replaces_and_deletes() {
        let app = Account::derive("app");
        let mut store = ProjectStore::new();
        assert_eq!(store.settings(app, 0), &ProjectSettings::default());

        store.set(app, 0, project(500, vec![1_000, 500], 2_500)).unwrap();
        store.set(app, 0, project(0, vec![300], 0)).unwrap();
        assert_eq!(store.settings(app, 0).level_fees_bps, vec![300]);
        assert_eq!(store.settings(app, 0).partner_fee_bps, 0);
        assert!(store.get(app, 1).is_none());

        assert!(store.set(app, 0, project(0, vec![1; 31], 0)).is_err());
        assert_eq!(store.settings(app, 0).level_fees_bps, vec![300]);

        assert!(store.remove(app, 0).is_some());
        assert!(store.get(app, 0).is_none());
    }

    #[test]
    fn discount_and_commission_helpers() {
        let settings = project(0, vec![1_000], 2_500);
        assert_eq!(settings.discount(100), 25);
        assert_eq!(settings.commission(100, 0), Some(10));
        assert_eq!(settings.commission(100, 1), None);
    }

    #[test]
    fn store_survives_json() {
        let mut store = ProjectStore::new();
        store
            .set(Account::derive("app"), 7, project(100, vec![1_000], 0))
            .unwrap();
        let json = serde_json::to_string(&store).unwrap();
        let back: ProjectStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
