use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::account::Account;

/// (payer, application) pairs whose one-time discount is spent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DiscountLedger {
    used: BTreeSet<(Account, Account)>,
}

impl DiscountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_used(&self, payer: &Account, application: &Account) -> bool {
        self.used.contains(&(*payer, *application))
    }

    /// Marks the pair as used and returns whether it already was.
    pub fn mark_used(&mut self, payer: Account, application: Account) -> bool {
        !self.used.insert((payer, application))
    }

    /// Puts the pair back to `was_used`, undoing a [`mark_used`](Self::mark_used).
    pub fn restore(&mut self, payer: Account, application: Account, was_used: bool) {
        if !was_used {
            self.used.remove(&(payer, application));
        }
    }
}
