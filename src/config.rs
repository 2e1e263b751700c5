//! Genesis configuration and the on-disk state file used by the CLI.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    access::RoleTable,
    account::Account,
    engine::CommissionEngine,
    error::EngineError,
    ledger::{Amount, Ledger},
    settings::{PartnerPools, ProjectSettings},
};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration names no administrator")]
    NoAdministrator,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectEntry {
    pub application: Account,
    #[serde(default)]
    pub sub_index: u32,
    #[serde(flatten)]
    pub settings: ProjectSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolEntry {
    pub owner: Account,
    pub developer: Account,
    pub partner: Account,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceEntry {
    pub account: Account,
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub administrators: Vec<Account>,
    pub community_owners: Vec<Account>,
    pub require_community_owner: bool,
    pub projects: Vec<ProjectEntry>,
    pub partner_pools: Vec<PoolEntry>,
    pub balances: Vec<BalanceEntry>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            administrators: Vec::new(),
            community_owners: Vec::new(),
            require_community_owner: true,
            projects: Vec::new(),
            partner_pools: Vec::new(),
            balances: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let bytes = read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replays the configuration through the privileged entry points, so it
    /// is validated exactly like runtime changes.
    pub fn build(&self) -> Result<State, StateError> {
        let admin = *self
            .administrators
            .first()
            .ok_or(StateError::NoAdministrator)?;
        let mut engine =
            CommissionEngine::new(RoleTable::with_administrators(self.administrators.iter().copied()));
        engine.register_community_owners(admin, &self.community_owners)?;
        engine.set_require_community_owner(admin, self.require_community_owner)?;
        for entry in &self.projects {
            engine.set_project(admin, entry.application, entry.sub_index, entry.settings.clone())?;
        }
        let pools: Vec<(Account, PartnerPools)> = self
            .partner_pools
            .iter()
            .map(|p| {
                (
                    p.owner,
                    PartnerPools {
                        developer: p.developer,
                        partner: p.partner,
                    },
                )
            })
            .collect();
        engine.register_partner_pools(admin, &pools)?;

        let mut ledger = Ledger::new();
        for entry in &self.balances {
            ledger.deposit(entry.account, entry.amount);
        }
        Ok(State { engine, ledger })
    }
}

/// Everything persisted between CLI invocations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct State {
    pub engine: CommissionEngine,
    pub ledger: Ledger,
}

impl State {
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let bytes = read(path)?;
        let state: State = serde_json::from_slice(&bytes)?;
        state
            .engine
            .projects()
            .validate()
            .map_err(EngineError::from)?;
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StateError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        fs::write(path, json).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn read(path: &Path) -> Result<Vec<u8>, StateError> {
    fs::read(path).map_err(|source| StateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, ErrorKind};

    fn sample() -> EngineConfig {
        let owner = Account::derive("owner");
        EngineConfig {
            administrators: vec![Account::derive("admin")],
            community_owners: vec![owner],
            require_community_owner: false,
            projects: vec![ProjectEntry {
                application: Account::derive("app"),
                sub_index: 3,
                settings: ProjectSettings {
                    partner_fee_bps: 500,
                    level_fees_bps: vec![1_000, 500],
                    discount_bps: 2_500,
                    constant_discount: true,
                },
            }],
            partner_pools: vec![PoolEntry {
                owner,
                developer: Account::derive("dev"),
                partner: Account::derive("partner"),
            }],
            balances: vec![BalanceEntry {
                account: Account::derive("app"),
                amount: 10_000,
            }],
        }
    }

    #[test]
    fn config_builds_state() {
        let state = sample().build().unwrap();
        let app = Account::derive("app");
        assert!(!state.engine.graph().require_community_owner());
        assert!(state.engine.graph().is_community_owner(&Account::derive("owner")));
        assert_eq!(state.engine.projects().settings(app, 3).level_fees_bps, vec![1_000, 500]);
        assert!(state.engine.partner_pools(&Account::derive("owner")).is_some());
        assert_eq!(state.ledger.balance(&app), 10_000);
    }

    #[test]
    fn config_json_uses_flat_project_entries() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["projects"][0]["sub_index"], 3);
        assert_eq!(json["projects"][0]["partner_fee_bps"], 500);
        let back: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample());

        let minimal: EngineConfig =
            serde_json::from_str(&format!("{{\"administrators\":[\"{}\"]}}", Account::derive("a")))
                .unwrap();
        assert!(minimal.require_community_owner);
        assert!(minimal.build().is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            EngineConfig::default().build(),
            Err(StateError::NoAdministrator)
        ));
        let mut config = sample();
        config.projects[0].settings.level_fees_bps = vec![100; 31];
        match config.build() {
            Err(StateError::Engine(err)) => {
                assert_eq!(err.kind(), ErrorKind::Configuration);
                assert_eq!(err, EngineError::Config(ConfigError::TooManyLevels(31)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn state_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("referral-engine-{}", std::process::id()));
        let path = dir.join("state.json");
        let mut state = sample().build().unwrap();
        let admin = Account::derive("admin");
        let app = Account::derive("app");
        let payer = Account::derive("payer");
        state
            .engine
            .add_referral(app, Account::derive("owner"), payer)
            .unwrap();
        state.engine.set_require_community_owner(admin, true).unwrap();
        state.save(&path).unwrap();

        let loaded = State::load(&path).unwrap();
        assert_eq!(loaded.engine.referrer(&payer), Account::derive("owner"));
        assert!(loaded.engine.graph().require_community_owner());
        assert_eq!(loaded.engine.events(), state.engine.events());
        assert_eq!(loaded.ledger.snapshot(), state.ledger.snapshot());
        fs::remove_dir_all(&dir).ok();

        assert!(matches!(
            State::load(&dir.join("missing.json")),
            Err(StateError::Io { .. })
        ));
    }

    #[test]
    fn hand_edited_fees_are_rejected_on_load() {
        let dir = std::env::temp_dir().join(format!("referral-engine-edit-{}", std::process::id()));
        let path = dir.join("state.json");
        sample().build().unwrap().save(&path).unwrap();

        let mut json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        json["engine"]["projects"]["projects"][0][1]["partner_fee_bps"] = 20_000.into();
        fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        match State::load(&path) {
            Err(StateError::Engine(err)) => {
                assert_eq!(err, EngineError::Config(ConfigError::PartnerFeeOutOfRange(20_000)));
            }
            other => panic!("unexpected {other:?}"),
        }
        fs::remove_dir_all(&dir).ok();
    }
}
