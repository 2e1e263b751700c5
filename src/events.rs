use serde::{Deserialize, Serialize};

use crate::{account::Account, ledger::Amount, settings::Bps};

/// Observable notifications. The engine only appends them; nothing inside the
/// crate consumes them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    ReferralCreated {
        application: Account,
        referrer: Account,
        referee: Account,
    },
    OperationProcessed {
        application: Account,
        referrer: Account,
        payer: Account,
        value: Amount,
    },
    ProjectConfigured {
        application: Account,
        sub_index: u32,
        partner_fee_bps: Bps,
        level_fees_bps: Vec<Bps>,
        discount_bps: Bps,
        constant_discount: bool,
    },
    PartnerLinkStored {
        partner: Account,
        external_id: u64,
    },
}
