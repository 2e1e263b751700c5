use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{account::Account, error::TransferError};

pub type Amount = u64;

/// Value movement capability the commission engine settles through.
///
/// Every value-moving operation brackets its calls between [`checkpoint`]
/// and either [`commit`] or [`rollback`]; after a rollback no collect or
/// payment made since the checkpoint may remain visible.
///
/// [`checkpoint`]: Payable::checkpoint
/// [`commit`]: Payable::commit
/// [`rollback`]: Payable::rollback
pub trait Payable {
    /// Moves the value attached to an operation from `from` into escrow.
    fn collect(&mut self, from: &Account, amount: Amount) -> Result<(), TransferError>;
    /// Pays `amount` out of escrow to `to`.
    ///
    /// Destination hooks run inside the engine's operation. A hook may call
    /// back into a [`SharedEngine`](crate::SharedEngine) on the same thread
    /// and is refused, but must not hand that call to another thread and
    /// wait for it: the other thread queues behind the operation in flight.
    /// A panic here fails the operation and rolls it back.
    fn pay(&mut self, to: &Account, amount: Amount, memo: &str) -> Result<(), TransferError>;
    fn checkpoint(&mut self);
    fn commit(&mut self);
    fn rollback(&mut self);
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
    pub previous_root: Option<[u8; 32]>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub balances: BTreeMap<Account, Amount>,
    pub escrow: Amount,
    #[serde(with = "hex_root")]
    pub merkle_root: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Deposit {
        to: Account,
        amount: Amount,
    },
    Collected {
        from: Account,
        amount: Amount,
    },
    Paid {
        to: Account,
        amount: Amount,
        memo: String,
    },
}

#[derive(Clone, Debug, Default)]
struct Journal {
    balances: Vec<(Account, Option<Amount>)>,
    escrow: Amount,
    events: usize,
}

/// In-process settlement backend: account balances, an escrow holding the
/// value attached to the operation in flight, and an event journal.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Ledger {
    pub meta: SnapshotMetadata,
    balances: BTreeMap<Account, Amount>,
    escrow: Amount,
    refusing: BTreeSet<Account>,
    events: Vec<LedgerEvent>,
    #[serde(skip)]
    staged: Option<Journal>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, account: &Account) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &BTreeMap<Account, Amount> {
        &self.balances
    }

    pub fn escrow(&self) -> Amount {
        self.escrow
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Credits fresh value to `account`.
    pub fn deposit(&mut self, account: Account, amount: Amount) {
        self.set_balance(account, self.balance(&account).saturating_add(amount));
        self.events.push(LedgerEvent::Deposit {
            to: account,
            amount,
        });
    }

    /// Makes `account` refuse every incoming payment, the way a destination
    /// whose receive hook fails would.
    pub fn set_refusing(&mut self, account: Account, refusing: bool) {
        if refusing {
            self.refusing.insert(account);
        } else {
            self.refusing.remove(&account);
        }
    }

    fn set_balance(&mut self, account: Account, amount: Amount) {
        let previous = self.balances.insert(account, amount);
        if let Some(journal) = self.staged.as_mut() {
            journal.balances.push((account, previous));
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            balances: self.balances.clone(),
            escrow: self.escrow,
            merkle_root: compute_merkle_root(&self.balances, self.escrow),
        }
    }
}

impl Payable for Ledger {
    fn collect(&mut self, from: &Account, amount: Amount) -> Result<(), TransferError> {
        let available = self.balance(from);
        if available < amount {
            return Err(TransferError::InsufficientFunds {
                account: *from,
                needed: amount,
                available,
            });
        }
        self.set_balance(*from, available - amount);
        self.escrow += amount;
        self.events.push(LedgerEvent::Collected {
            from: *from,
            amount,
        });
        Ok(())
    }

    fn pay(&mut self, to: &Account, amount: Amount, memo: &str) -> Result<(), TransferError> {
        if to.is_null() {
            return Err(TransferError::NullDestination { amount });
        }
        if self.refusing.contains(to) {
            return Err(TransferError::Rejected { to: *to, amount });
        }
        if self.escrow < amount {
            return Err(TransferError::InsufficientEscrow {
                needed: amount,
                available: self.escrow,
            });
        }
        let credited = self
            .balance(to)
            .checked_add(amount)
            .ok_or(TransferError::BalanceOverflow { to: *to, amount })?;
        self.escrow -= amount;
        self.set_balance(*to, credited);
        self.events.push(LedgerEvent::Paid {
            to: *to,
            amount,
            memo: memo.to_string(),
        });
        Ok(())
    }

    fn checkpoint(&mut self) {
        self.staged = Some(Journal {
            balances: Vec::new(),
            escrow: self.escrow,
            events: self.events.len(),
        });
    }

    fn commit(&mut self) {
        if self.staged.take().is_some() {
            self.meta.height += 1;
            self.meta.previous_root = Some(compute_merkle_root(&self.balances, self.escrow));
        }
    }

    fn rollback(&mut self) {
        let Some(journal) = self.staged.take() else {
            return;
        };
        for (account, previous) in journal.balances.into_iter().rev() {
            match previous {
                Some(amount) => {
                    self.balances.insert(account, amount);
                }
                None => {
                    self.balances.remove(&account);
                }
            }
        }
        self.escrow = journal.escrow;
        self.events.truncate(journal.events);
    }
}

fn compute_merkle_root(balances: &BTreeMap<Account, Amount>, escrow: Amount) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(balances.len() + 1);
    for (account, amount) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(amount.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    let mut hasher = Sha256::new();
    hasher.update(b"escrow");
    hasher.update(escrow.to_le_bytes());
    leaves.push(hasher.finalize().into());
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"referral-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("merkle root must be 32 bytes"))
    }
}
