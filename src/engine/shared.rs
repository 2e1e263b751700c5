use std::{
    sync::{Mutex, MutexGuard},
    thread::{self, ThreadId},
};

use super::{CommissionEngine, Distribution};
use crate::{
    access::{AccessGate, RoleTable},
    account::Account,
    error::EngineError,
    ledger::{Amount, Ledger, Payable},
};

struct Inner<G, P> {
    engine: CommissionEngine<G>,
    payable: P,
}

/// Thread-safe handle owning an engine and its settlement backend.
///
/// Operations from different threads are serialized. A call made from the
/// thread that is already inside an operation (for instance from a payout
/// destination's receive hook) is rejected with [`EngineError::Reentrant`]
/// instead of running nested. Reentry is recognised by thread, so a hook
/// that forwards the call to a helper thread and joins it deadlocks; see
/// [`Payable::pay`].
///
/// A panic raised by the backend during an operation is rolled back and
/// leaves the handle usable. Only a panic in a [`with`](Self::with) closure
/// poisons it.
pub struct SharedEngine<G = RoleTable, P = Ledger> {
    inner: Mutex<Inner<G, P>>,
    holder: Mutex<Option<ThreadId>>,
}

struct Entered<'a, G, P> {
    guard: MutexGuard<'a, Inner<G, P>>,
    holder: &'a Mutex<Option<ThreadId>>,
}

impl<G, P> Drop for Entered<'_, G, P> {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.holder.lock() {
            *holder = None;
        }
    }
}

impl<G: AccessGate, P: Payable> SharedEngine<G, P> {
    pub fn new(engine: CommissionEngine<G>, payable: P) -> Self {
        Self {
            inner: Mutex::new(Inner { engine, payable }),
            holder: Mutex::new(None),
        }
    }

    fn enter(&self) -> Result<Entered<'_, G, P>, EngineError> {
        let me = thread::current().id();
        if *self.holder.lock().map_err(|_| EngineError::Poisoned)? == Some(me) {
            return Err(EngineError::Reentrant);
        }
        let guard = self.inner.lock().map_err(|_| EngineError::Poisoned)?;
        *self.holder.lock().map_err(|_| EngineError::Poisoned)? = Some(me);
        Ok(Entered {
            guard,
            holder: &self.holder,
        })
    }

    pub fn process_operation(
        &self,
        caller: Account,
        payer: Account,
        gross_fee: Amount,
        sub_index: u32,
        value: Amount,
    ) -> Result<Amount, EngineError> {
        let mut entered = self.enter()?;
        let Inner { engine, payable } = &mut *entered.guard;
        engine.process_operation(caller, payer, gross_fee, sub_index, value, payable)
    }

    pub fn distribute_funds(
        &self,
        caller: Account,
        payer: Account,
        sub_index: u32,
        value: Amount,
    ) -> Result<Distribution, EngineError> {
        let mut entered = self.enter()?;
        let Inner { engine, payable } = &mut *entered.guard;
        engine.distribute_funds(caller, payer, sub_index, value, payable)
    }

    /// Runs any other engine call under the same lock.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut CommissionEngine<G>, &mut P) -> T,
    ) -> Result<T, EngineError> {
        let mut entered = self.enter()?;
        let Inner { engine, payable } = &mut *entered.guard;
        Ok(f(engine, payable))
    }

    pub fn into_inner(self) -> Result<(CommissionEngine<G>, P), EngineError> {
        let inner = self.inner.into_inner().map_err(|_| EngineError::Poisoned)?;
        Ok((inner.engine, inner.payable))
    }
}
