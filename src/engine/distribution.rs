use serde::{Deserialize, Serialize};

use crate::{
    account::Account,
    ledger::Amount,
    referral::ReferralGraph,
    settings::{apply_bps, Bps, PartnerPoolRegistry, ProjectSettings, MAX_COMMISSION_LEVELS},
};

/// Fixed developer / partner split of the partner fee.
pub const DEVELOPER_POOL_SHARE_BPS: Bps = 6_000;
pub const PARTNER_POOL_SHARE_BPS: Bps = 4_000;
const PARTNER_SPLIT_DENOMINATOR: Bps = DEVELOPER_POOL_SHARE_BPS + PARTNER_POOL_SHARE_BPS;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayoutKind {
    /// Payer is not a referee; the whole value goes back to the application.
    Refund,
    DeveloperPool,
    PartnerPool,
    /// Zero-based level in the commission table.
    Commission { level: usize },
    Remainder,
}

impl PayoutKind {
    pub fn memo(&self) -> String {
        match self {
            PayoutKind::Refund => "refund".to_string(),
            PayoutKind::DeveloperPool => "developer-pool".to_string(),
            PayoutKind::PartnerPool => "partner-pool".to_string(),
            PayoutKind::Commission { level } => format!("referral L{}", level + 1),
            PayoutKind::Remainder => "remainder".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payout {
    pub to: Account,
    pub amount: Amount,
    pub kind: PayoutKind,
}

/// Ordered transfers settling one attached value. Zero amounts are left out.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Distribution {
    pub payouts: Vec<Payout>,
}

impl Distribution {
    pub fn total(&self) -> Amount {
        self.payouts.iter().map(|p| p.amount).sum()
    }

    pub fn paid_to(&self, account: &Account) -> Amount {
        self.payouts
            .iter()
            .filter(|p| p.to == *account)
            .map(|p| p.amount)
            .sum()
    }

    fn push(&mut self, to: Account, amount: Amount, kind: PayoutKind) {
        if amount > 0 {
            self.payouts.push(Payout { to, amount, kind });
        }
    }
}

/// Computes how `value` attached by `application` on behalf of `payer` is
/// split. Truncation leftovers end up in the final remainder payout, so the
/// payouts always sum to `value`.
pub fn plan_distribution(
    graph: &ReferralGraph,
    settings: &ProjectSettings,
    pools: &PartnerPoolRegistry,
    application: Account,
    payer: Account,
    value: Amount,
) -> Distribution {
    let mut plan = Distribution::default();
    if !graph.is_referee(&payer) {
        plan.push(application, value, PayoutKind::Refund);
        return plan;
    }

    let mut remaining = value;
    if settings.partner_fee_bps != 0 {
        // an owner without registered pools resolves to the null account,
        // which no settlement backend accepts
        let pool = pools
            .get(&graph.community_owner(&payer))
            .copied()
            .unwrap_or_default();
        let partner_commission = apply_bps(remaining, settings.partner_fee_bps);
        let developer = split(partner_commission, DEVELOPER_POOL_SHARE_BPS);
        let partner = split(partner_commission, PARTNER_POOL_SHARE_BPS);
        remaining -= developer + partner;
        plan.push(pool.developer, developer, PayoutKind::DeveloperPool);
        plan.push(pool.partner, partner, PayoutKind::PartnerPool);
    }

    let levels = settings.level_fees_bps.len().min(MAX_COMMISSION_LEVELS);
    for (level, account) in graph.ancestors(payer).take(levels).enumerate() {
        let commission = apply_bps(remaining, settings.level_fees_bps[level]);
        remaining -= commission;
        plan.push(account, commission, PayoutKind::Commission { level });
    }

    plan.push(application, remaining, PayoutKind::Remainder);
    plan
}

fn split(amount: Amount, share: Bps) -> Amount {
    (u128::from(amount) * u128::from(share) / u128::from(PARTNER_SPLIT_DENOMINATOR)) as Amount
}
