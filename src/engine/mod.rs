//! Commission engine: referral bookkeeping, per-operation discount and the
//! commission cascade, settled through a [`Payable`] backend.
//!
//! Every value-moving call runs inside a checkpoint of the backend. If any
//! payout fails, the backend is rolled back and every engine-side effect of
//! the call (discount consumption, notifications) is undone as well.

mod distribution;
mod shared;

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use serde::{Deserialize, Serialize};

use crate::{
    access::{AccessGate, Capability, RoleTable},
    account::Account,
    error::{EngineError, TransferError},
    events::Notification,
    ledger::{Amount, Payable},
    referral::{ReferralGraph, ReferralLink},
    settings::{
        DiscountLedger, PartnerLinks, PartnerPoolRegistry, PartnerPools, ProjectSettings,
        ProjectStore,
    },
};

pub use distribution::{
    plan_distribution, Distribution, Payout, PayoutKind, DEVELOPER_POOL_SHARE_BPS,
    PARTNER_POOL_SHARE_BPS,
};
pub use shared::SharedEngine;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct CommissionEngine<G = RoleTable> {
    gate: G,
    graph: ReferralGraph,
    projects: ProjectStore,
    pools: PartnerPoolRegistry,
    discounts: DiscountLedger,
    links: PartnerLinks,
    events: Vec<Notification>,
}

impl<G: AccessGate> CommissionEngine<G> {
    pub fn new(gate: G) -> Self {
        Self {
            gate,
            graph: ReferralGraph::new(),
            projects: ProjectStore::new(),
            pools: PartnerPoolRegistry::new(),
            discounts: DiscountLedger::new(),
            links: PartnerLinks::new(),
            events: Vec::new(),
        }
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }

    pub fn graph(&self) -> &ReferralGraph {
        &self.graph
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    pub fn partner_pools(&self, owner: &Account) -> Option<&PartnerPools> {
        self.pools.get(owner)
    }

    pub fn discounts(&self) -> &DiscountLedger {
        &self.discounts
    }

    pub fn links(&self) -> &PartnerLinks {
        &self.links
    }

    pub fn events(&self) -> &[Notification] {
        &self.events
    }

    fn require(&self, caller: &Account, capability: Capability) -> Result<(), EngineError> {
        if self.gate.allows(caller, capability) {
            Ok(())
        } else {
            Err(EngineError::Unauthorized {
                caller: *caller,
                capability,
            })
        }
    }

    // ---- community owners and policy ----

    pub fn register_community_owners(
        &mut self,
        caller: Account,
        accounts: &[Account],
    ) -> Result<(), EngineError> {
        self.require(&caller, Capability::Administrator)?;
        self.graph.register_community_owners(accounts);
        Ok(())
    }

    pub fn remove_community_owners(
        &mut self,
        caller: Account,
        accounts: &[Account],
    ) -> Result<(), EngineError> {
        self.require(&caller, Capability::Administrator)?;
        self.graph.remove_community_owners(accounts);
        Ok(())
    }

    pub fn set_require_community_owner(
        &mut self,
        caller: Account,
        enabled: bool,
    ) -> Result<(), EngineError> {
        self.require(&caller, Capability::Administrator)?;
        self.graph.set_require_community_owner(enabled);
        Ok(())
    }

    pub fn add_referral(
        &mut self,
        caller: Account,
        referrer: Account,
        referee: Account,
    ) -> Result<ReferralLink, EngineError> {
        self.require(&caller, Capability::TrustedApplication)?;
        let link = self.graph.add_referral(referrer, referee)?;
        self.events.push(Notification::ReferralCreated {
            application: caller,
            referrer,
            referee,
        });
        Ok(link)
    }

    // ---- projects and pools ----

    /// Replaces the settings of `(application, sub_index)` and makes
    /// `application` a trusted application.
    pub fn set_project(
        &mut self,
        caller: Account,
        application: Account,
        sub_index: u32,
        settings: ProjectSettings,
    ) -> Result<(), EngineError> {
        self.require(&caller, Capability::Administrator)?;
        let event = Notification::ProjectConfigured {
            application,
            sub_index,
            partner_fee_bps: settings.partner_fee_bps,
            level_fees_bps: settings.level_fees_bps.clone(),
            discount_bps: settings.discount_bps,
            constant_discount: settings.constant_discount,
        };
        self.projects.set(application, sub_index, settings)?;
        self.gate.grant(application, Capability::TrustedApplication);
        self.events.push(event);
        Ok(())
    }

    pub fn remove_project(
        &mut self,
        caller: Account,
        application: Account,
        sub_index: u32,
    ) -> Result<Option<ProjectSettings>, EngineError> {
        self.require(&caller, Capability::Administrator)?;
        Ok(self.projects.remove(application, sub_index))
    }

    pub fn register_partner_pools(
        &mut self,
        caller: Account,
        entries: &[(Account, PartnerPools)],
    ) -> Result<(), EngineError> {
        self.require(&caller, Capability::Administrator)?;
        self.pools.register(entries, &self.graph)?;
        Ok(())
    }

    pub fn remove_partner_pools(
        &mut self,
        caller: Account,
        owners: &[Account],
    ) -> Result<(), EngineError> {
        self.require(&caller, Capability::Administrator)?;
        self.pools.remove(owners);
        Ok(())
    }

    /// Attributes `external_id` to the payer's community owner, if it has one.
    pub fn store_partner_link(
        &mut self,
        caller: Account,
        payer: Account,
        external_id: u64,
    ) -> Result<Option<Account>, EngineError> {
        self.require(&caller, Capability::TrustedApplication)?;
        let partner = self.graph.community_owner(&payer);
        if partner.is_null() {
            return Ok(None);
        }
        self.links.store(external_id, partner);
        self.events.push(Notification::PartnerLinkStored {
            partner,
            external_id,
        });
        Ok(Some(partner))
    }

    // ---- reads ----

    pub fn is_referee(&self, account: &Account) -> bool {
        self.graph.is_referee(account)
    }

    pub fn referrer(&self, account: &Account) -> Account {
        self.graph.referrer(account)
    }

    pub fn community_owner(&self, account: &Account) -> Account {
        self.graph.community_owner(account)
    }

    pub fn should_apply_discount(
        &self,
        application: Account,
        payer: Account,
        sub_index: u32,
    ) -> bool {
        if !self.graph.is_referee(&payer) {
            return false;
        }
        self.projects.settings(application, sub_index).constant_discount
            || !self.discounts.is_used(&payer, &application)
    }

    pub fn calculate_discount(&self, application: Account, fee: Amount, sub_index: u32) -> Amount {
        self.projects.settings(application, sub_index).discount(fee)
    }

    pub fn apply_discount(&self, application: Account, fee: Amount, sub_index: u32) -> Amount {
        fee - self.calculate_discount(application, fee, sub_index)
    }

    pub fn calculate_commission(
        &self,
        application: Account,
        amount: Amount,
        level: usize,
        sub_index: u32,
    ) -> Result<Amount, EngineError> {
        let settings = self.projects.settings(application, sub_index);
        settings
            .commission(amount, level)
            .ok_or(EngineError::LevelOutOfRange {
                level,
                levels: settings.level_fees_bps.len(),
            })
    }

    /// The payouts a distribution of `value` would make right now.
    pub fn preview_distribution(
        &self,
        application: Account,
        payer: Account,
        sub_index: u32,
        value: Amount,
    ) -> Distribution {
        plan_distribution(
            &self.graph,
            self.projects.settings(application, sub_index),
            &self.pools,
            application,
            payer,
            value,
        )
    }

    // ---- value-moving operations ----

    /// Settles one monetized operation: collects `value` from the calling
    /// application, spends or checks the payer's discount, pays the partner
    /// pools and the referral chain, and returns the remainder to the
    /// application. Returns the discount the application should honour.
    pub fn process_operation<P: Payable + ?Sized>(
        &mut self,
        caller: Account,
        payer: Account,
        gross_fee: Amount,
        sub_index: u32,
        value: Amount,
        payable: &mut P,
    ) -> Result<Amount, EngineError> {
        self.require(&caller, Capability::TrustedApplication)?;
        payable.checkpoint();
        let events_mark = self.events.len();
        let mut discount_mark = None;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_operation(
                caller,
                payer,
                gross_fee,
                sub_index,
                value,
                payable,
                &mut discount_mark,
            )
        }))
        .unwrap_or_else(|payload| Err(aborted(payload)));
        match result {
            Ok(discount) => {
                payable.commit();
                Ok(discount)
            }
            Err(err) => {
                payable.rollback();
                self.events.truncate(events_mark);
                if let Some(was_used) = discount_mark {
                    self.discounts.restore(payer, caller, was_used);
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_operation<P: Payable + ?Sized>(
        &mut self,
        application: Account,
        payer: Account,
        gross_fee: Amount,
        sub_index: u32,
        value: Amount,
        payable: &mut P,
        discount_mark: &mut Option<bool>,
    ) -> Result<Amount, EngineError> {
        payable.collect(&application, value)?;
        if !self.graph.is_referee(&payer) {
            self.execute(&self.preview_distribution(application, payer, sub_index, value), payable)?;
            return Ok(0);
        }

        let eligible = self.should_apply_discount(application, payer, sub_index);
        let settings = self.projects.settings(application, sub_index);
        let discount = if eligible {
            settings.discount(gross_fee)
        } else {
            0
        };
        if !settings.constant_discount {
            *discount_mark = Some(self.discounts.mark_used(payer, application));
        }

        let plan = self.preview_distribution(application, payer, sub_index, value);
        self.execute(&plan, payable)?;
        self.events.push(Notification::OperationProcessed {
            application,
            referrer: self.graph.top_referrer(payer),
            payer,
            value,
        });
        Ok(discount)
    }

    /// Distributes `value` attached by the calling application without any
    /// discount bookkeeping.
    pub fn distribute_funds<P: Payable + ?Sized>(
        &mut self,
        caller: Account,
        payer: Account,
        sub_index: u32,
        value: Amount,
        payable: &mut P,
    ) -> Result<Distribution, EngineError> {
        self.require(&caller, Capability::TrustedApplication)?;
        payable.checkpoint();
        let plan = self.preview_distribution(caller, payer, sub_index, value);
        let result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), EngineError> {
            payable.collect(&caller, value)?;
            self.execute(&plan, payable)
        }))
        .unwrap_or_else(|payload| Err(aborted(payload)));
        match result {
            Ok(()) => {
                payable.commit();
                Ok(plan)
            }
            Err(err) => {
                payable.rollback();
                Err(err)
            }
        }
    }

    fn execute<P: Payable + ?Sized>(
        &self,
        plan: &Distribution,
        payable: &mut P,
    ) -> Result<(), EngineError> {
        for payout in &plan.payouts {
            payable.pay(&payout.to, payout.amount, &payout.kind.memo())?;
        }
        Ok(())
    }
}

/// A panic raised by the settlement backend fails the operation like any
/// other transfer error, so the caller still rolls back.
fn aborted(payload: Box<dyn Any + Send>) -> EngineError {
    let reason = payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    TransferError::Aborted { reason }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ErrorKind,
        ledger::Ledger,
    };

    struct World {
        engine: CommissionEngine,
        ledger: Ledger,
        admin: Account,
        app: Account,
        owner: Account,
    }

    fn acct(label: &str) -> Account {
        Account::derive(label)
    }

    fn world(settings: ProjectSettings) -> World {
        let admin = acct("admin");
        let app = acct("app");
        let owner = acct("owner");
        let mut engine = CommissionEngine::new(RoleTable::with_administrators([admin]));
        engine.register_community_owners(admin, &[owner]).unwrap();
        engine.set_project(admin, app, 0, settings).unwrap();
        let mut ledger = Ledger::new();
        ledger.deposit(app, 1_000_000);
        World {
            engine,
            ledger,
            admin,
            app,
            owner,
        }
    }

    fn one_level(discount: u16, constant: bool) -> ProjectSettings {
        ProjectSettings {
            partner_fee_bps: 0,
            level_fees_bps: vec![1_000],
            discount_bps: discount,
            constant_discount: constant,
        }
    }

    #[test]
    fn privileged_calls_are_gated() {
        let mut w = world(one_level(0, false));
        let intruder = acct("intruder");
        let err = w
            .engine
            .register_community_owners(intruder, &[intruder])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Access);
        assert!(!w.engine.graph().is_community_owner(&intruder));

        let err = w.engine.add_referral(intruder, w.owner, acct("a")).unwrap_err();
        assert_eq!(
            err,
            EngineError::Unauthorized {
                caller: intruder,
                capability: Capability::TrustedApplication
            }
        );
        assert!(w
            .engine
            .process_operation(intruder, acct("a"), 1, 0, 1, &mut w.ledger)
            .is_err());
        assert!(w.engine.set_require_community_owner(w.app, false).is_err());
    }

    #[test]
    fn set_project_trusts_the_application() {
        let w = world(one_level(0, false));
        assert!(w.engine.gate().allows(&w.app, Capability::TrustedApplication));
        assert!(matches!(
            w.engine.events().last(),
            Some(Notification::ProjectConfigured { sub_index: 0, .. })
        ));
    }

    #[test]
    fn rejected_project_changes_nothing() {
        let mut w = world(one_level(0, false));
        let other = acct("other-app");
        let err = w
            .engine
            .set_project(
                w.admin,
                other,
                0,
                ProjectSettings {
                    discount_bps: 10_001,
                    ..ProjectSettings::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!w.engine.gate().allows(&other, Capability::TrustedApplication));
        assert!(w.engine.projects().get(other, 0).is_none());
    }

    #[test]
    fn constant_discount_scenario() {
        let mut w = world(one_level(2_500, true));
        let payer = acct("payer");
        w.engine.add_referral(w.app, w.owner, payer).unwrap();

        let discount = w
            .engine
            .process_operation(w.app, payer, 100, 0, 100, &mut w.ledger)
            .unwrap();
        assert_eq!(discount, 25);
        assert_eq!(w.ledger.balance(&w.owner), 10);
        assert_eq!(w.ledger.balance(&w.app), 1_000_000 - 10);
        assert!(w.engine.should_apply_discount(w.app, payer, 0));
        let again = w
            .engine
            .process_operation(w.app, payer, 100, 0, 100, &mut w.ledger)
            .unwrap();
        assert_eq!(again, 25);
        assert!(matches!(
            w.engine.events().last(),
            Some(Notification::OperationProcessed { value: 100, .. })
        ));
    }

    #[test]
    fn one_time_discount_is_consumed() {
        let mut w = world(one_level(1_000, false));
        let payer = acct("payer");
        w.engine.add_referral(w.app, w.owner, payer).unwrap();
        assert!(w.engine.should_apply_discount(w.app, payer, 0));

        let first = w
            .engine
            .process_operation(w.app, payer, 500, 0, 450, &mut w.ledger)
            .unwrap();
        assert_eq!(first, 50);
        assert!(!w.engine.should_apply_discount(w.app, payer, 0));
        let second = w
            .engine
            .process_operation(w.app, payer, 500, 0, 500, &mut w.ledger)
            .unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn non_referee_value_is_returned() {
        let mut w = world(one_level(1_000, false));
        let stranger = acct("stranger");
        let events = w.engine.events().len();
        let discount = w
            .engine
            .process_operation(w.app, stranger, 100, 0, 100, &mut w.ledger)
            .unwrap();
        assert_eq!(discount, 0);
        assert_eq!(w.ledger.balance(&w.app), 1_000_000);
        assert_eq!(w.ledger.escrow(), 0);
        assert!(!w.engine.discounts().is_used(&stranger, &w.app));
        assert_eq!(w.engine.events().len(), events);
    }

    #[test]
    fn failed_transfer_reverts_the_discount_flag() {
        let mut w = world(one_level(1_000, false));
        let payer = acct("payer");
        w.engine.add_referral(w.app, w.owner, payer).unwrap();
        w.ledger.set_refusing(w.owner, true);
        let before = w.ledger.snapshot();
        let events = w.engine.events().len();

        let err = w
            .engine
            .process_operation(w.app, payer, 100, 0, 100, &mut w.ledger)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Transfer(TransferError::Rejected {
                to: w.owner,
                amount: 10
            })
        );
        assert_eq!(w.ledger.snapshot(), before);
        assert!(!w.engine.discounts().is_used(&payer, &w.app));
        assert!(w.engine.should_apply_discount(w.app, payer, 0));
        assert_eq!(w.engine.events().len(), events);

        w.ledger.set_refusing(w.owner, false);
        let discount = w
            .engine
            .process_operation(w.app, payer, 100, 0, 100, &mut w.ledger)
            .unwrap();
        assert_eq!(discount, 10);
    }

    #[test]
    fn insufficient_attachment_fails_cleanly() {
        let mut w = world(one_level(1_000, false));
        let payer = acct("payer");
        w.engine.add_referral(w.app, w.owner, payer).unwrap();
        let err = w
            .engine
            .process_operation(w.app, payer, 1, 0, 2_000_000, &mut w.ledger)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert!(!w.engine.discounts().is_used(&payer, &w.app));
    }

    #[test]
    fn commission_lookup_out_of_range() {
        let w = world(one_level(0, false));
        assert_eq!(w.engine.calculate_commission(w.app, 100, 0, 0), Ok(10));
        let err = w.engine.calculate_commission(w.app, 100, 1, 0).unwrap_err();
        assert_eq!(err, EngineError::LevelOutOfRange { level: 1, levels: 1 });
        assert_eq!(err.kind(), ErrorKind::Lookup);
    }

    #[test]
    fn discount_helpers_add_up() {
        let w = world(one_level(3_333, false));
        for fee in [0u64, 1, 3, 100, 9_999, 123_456_789] {
            assert_eq!(
                w.engine.apply_discount(w.app, fee, 0) + w.engine.calculate_discount(w.app, fee, 0),
                fee
            );
        }
    }

    #[test]
    fn distribute_funds_conserves_value() {
        let mut w = world(ProjectSettings {
            partner_fee_bps: 750,
            level_fees_bps: vec![1_200, 800, 400],
            discount_bps: 0,
            constant_discount: false,
        });
        w.engine.set_require_community_owner(w.admin, false).unwrap();
        w.engine
            .register_partner_pools(
                w.admin,
                &[(
                    w.owner,
                    PartnerPools {
                        developer: acct("dev"),
                        partner: acct("partner"),
                    },
                )],
            )
            .unwrap();
        let (a, b, c) = (acct("a"), acct("b"), acct("c"));
        w.engine.add_referral(w.app, w.owner, a).unwrap();
        w.engine.add_referral(w.app, a, b).unwrap();
        w.engine.add_referral(w.app, b, c).unwrap();

        let app_before = w.ledger.balance(&w.app);
        let plan = w
            .engine
            .distribute_funds(w.app, c, 0, 98_765, &mut w.ledger)
            .unwrap();
        assert_eq!(plan.total(), 98_765);
        let paid_out: Amount = [acct("dev"), acct("partner"), a, b, w.owner]
            .iter()
            .map(|acc| w.ledger.balance(acc))
            .sum();
        assert_eq!(paid_out + w.ledger.balance(&w.app), app_before);
        assert_eq!(w.ledger.escrow(), 0);
        assert_eq!(w.ledger.balance(&w.owner), plan.paid_to(&w.owner));
        assert!(w.ledger.balance(&w.owner) > 0);
    }

    #[test]
    fn partner_fee_without_pools_fails_the_operation() {
        let mut w = world(ProjectSettings {
            partner_fee_bps: 5_000,
            ..ProjectSettings::default()
        });
        let payer = acct("payer");
        w.engine.add_referral(w.app, w.owner, payer).unwrap();
        let before = w.ledger.snapshot();

        let err = w
            .engine
            .distribute_funds(w.app, payer, 0, 1_000, &mut w.ledger)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Transfer(TransferError::NullDestination { amount: 300 })
        );
        assert_eq!(w.ledger.snapshot(), before);
        assert!(w
            .engine
            .process_operation(w.app, payer, 100, 0, 1_000, &mut w.ledger)
            .is_err());
        assert_eq!(w.ledger.balance(&w.app), 1_000_000);
    }

    #[test]
    fn partner_links_follow_the_community_owner() {
        let mut w = world(one_level(0, false));
        let payer = acct("payer");
        assert_eq!(w.engine.store_partner_link(w.app, payer, 1).unwrap(), None);
        w.engine.add_referral(w.app, w.owner, payer).unwrap();
        assert_eq!(
            w.engine.store_partner_link(w.app, payer, 2).unwrap(),
            Some(w.owner)
        );
        assert_eq!(w.engine.links().partner_of(2), Some(w.owner));
        assert_eq!(w.engine.links().partner_of(1), None);
        assert_eq!(w.engine.links().minted_count(&w.owner), 1);
        assert!(matches!(
            w.engine.events().last(),
            Some(Notification::PartnerLinkStored { external_id: 2, .. })
        ));
    }

    #[test]
    fn pool_registration_requires_owner() {
        let mut w = world(one_level(0, false));
        let pools = PartnerPools {
            developer: acct("dev"),
            partner: acct("partner"),
        };
        let err = w
            .engine
            .register_partner_pools(w.admin, &[(w.owner, pools), (acct("x"), pools)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(w.engine.partner_pools(&w.owner).is_none());
        w.engine
            .register_partner_pools(w.admin, &[(w.owner, pools)])
            .unwrap();
        w.engine.remove_partner_pools(w.admin, &[w.owner]).unwrap();
        assert!(w.engine.partner_pools(&w.owner).is_none());
    }
}
