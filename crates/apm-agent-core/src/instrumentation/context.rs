// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The "current transaction" slot.
//!
//! Asynchronous code loses track of which transaction it works for as soon
//! as it crosses a callback or an `.await`. Continuations therefore have to
//! be bound explicitly: [`Correlator::bind`] and [`Correlator::bind_future`]
//! remember the transaction that is current when they are created and make it
//! current again whenever the continuation runs.
//!
//! A bound future keeps its transaction in a tokio task-local, a bound
//! callback in a thread-local frame that lives for the duration of the call.
//! Code running outside of any bound continuation reads and writes the shared
//! slot of the [`Correlator`].

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::task::futures::TaskLocalFuture;
use tracing::debug;

use crate::instrumentation::transaction::Transaction;

/// Slot owned by one bound continuation.
#[derive(Debug)]
struct Scope {
    owner: usize,
    transaction: RefCell<Option<Transaction>>,
}

tokio::task_local! {
    static TASK_SCOPE: Scope;
}

thread_local! {
    static CALL_SCOPES: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone, Default)]
pub struct Correlator {
    slot: Arc<Mutex<Option<Transaction>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared(&self) -> MutexGuard<'_, Option<Transaction>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifies the scopes this correlator opened. Clones share it.
    fn owner(&self) -> usize {
        Arc::as_ptr(&self.slot) as usize
    }

    /// Runs `f` on the innermost bound slot of this correlator: the frame of
    /// a bound callback being called on this thread first, then the scope of
    /// the bound future being polled. `None` outside of both.
    fn with_scope<R>(&self, f: impl FnOnce(&mut Option<Transaction>) -> R) -> Option<R> {
        let owner = self.owner();
        let mut f = Some(f);

        let in_call = CALL_SCOPES
            .try_with(|scopes| {
                let scopes = scopes.borrow();
                let scope = scopes.iter().rev().find(|scope| scope.owner == owner)?;
                let mut transaction = scope.transaction.borrow_mut();
                f.take().map(|f| f(&mut transaction))
            })
            .ok()
            .flatten();
        if in_call.is_some() {
            return in_call;
        }

        TASK_SCOPE
            .try_with(|scope| {
                if scope.owner != owner {
                    return None;
                }
                let mut transaction = scope.transaction.borrow_mut();
                f.take().map(|f| f(&mut transaction))
            })
            .ok()
            .flatten()
    }

    pub fn current(&self) -> Option<Transaction> {
        self.with_scope(|slot| slot.clone())
            .unwrap_or_else(|| self.shared().clone())
    }

    /// Swaps the innermost slot and hands back what it held.
    fn replace(&self, transaction: Option<Transaction>) -> Option<Transaction> {
        let mut pending = Some(transaction);
        if let Some(previous) =
            self.with_scope(|slot| std::mem::replace(slot, pending.take().flatten()))
        {
            return previous;
        }
        std::mem::replace(&mut *self.shared(), pending.flatten())
    }

    pub fn set(&self, transaction: Option<Transaction>) {
        // The previous value is dropped once no slot is borrowed anymore
        let _previous = self.replace(transaction);
    }

    pub fn clear(&self) {
        self.set(None);
    }

    /// Puts `transaction` back in the slot if something else is there.
    pub(crate) fn restore(&self, transaction: &Transaction) {
        if self.current().as_ref() == Some(transaction) {
            return;
        }
        let previous = self.replace(Some(transaction.clone()));

        debug!(
            uuid = %transaction.uuid(),
            previous = ?previous.as_ref().map(Transaction::uuid),
            "recovering from wrong current transaction"
        );
    }

    /// Wraps `f` so it runs with the transaction that is current now, no
    /// matter what is current when it is eventually called. The binding is
    /// released once `f` returns or unwinds.
    pub fn bind<F, R>(&self, f: F) -> impl FnOnce() -> R
    where
        F: FnOnce() -> R,
    {
        let owner = self.owner();
        let bound = self.current();
        move || {
            let _frame = CallFrame::enter(owner, bound);
            f()
        }
    }

    /// Same as [`Correlator::bind`] for callbacks invoked more than once.
    pub fn bind_fn<A, R, F>(&self, f: F) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        let owner = self.owner();
        let bound = self.current();
        move |arg| {
            let _frame = CallFrame::enter(owner, bound.clone());
            f(arg)
        }
    }

    /// Wraps `future` so every poll runs with the transaction that is
    /// current now.
    pub fn bind_future<F: Future>(&self, future: F) -> Bound<F> {
        let scope = Scope {
            owner: self.owner(),
            transaction: RefCell::new(self.current()),
        };
        Bound {
            inner: Box::pin(TASK_SCOPE.scope(scope, future)),
        }
    }
}

/// Frame pushed for the duration of a bound callback, popped on drop.
struct CallFrame {
    entered: bool,
}

impl CallFrame {
    fn enter(owner: usize, transaction: Option<Transaction>) -> Self {
        let scope = Scope {
            owner,
            transaction: RefCell::new(transaction),
        };
        let entered = CALL_SCOPES
            .try_with(|scopes| scopes.borrow_mut().push(scope))
            .is_ok();
        CallFrame { entered }
    }
}

impl Drop for CallFrame {
    fn drop(&mut self) {
        if !self.entered {
            return;
        }
        let _frame = CALL_SCOPES
            .try_with(|scopes| scopes.borrow_mut().pop())
            .ok()
            .flatten();
    }
}

/// Future returned by [`Correlator::bind_future`].
#[must_use = "futures do nothing unless polled"]
pub struct Bound<F> {
    inner: Pin<Box<TaskLocalFuture<Scope, F>>>,
}

impl<F: Future> Future for Bound<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::{Instrumentation, TraceSettings};
    use crate::traces::aggregator::TransactionQueue;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn instrumentation() -> Arc<Instrumentation> {
        Instrumentation::new(Arc::new(TransactionQueue::new(100)), TraceSettings::default())
    }

    #[test]
    fn test_bind_runs_with_bound_transaction_then_releases() {
        let ins = instrumentation();
        let a = ins.start_transaction(Some("A"), None);
        let correlator = ins.correlator().clone();

        let continuation = correlator.bind(|| ins.current_transaction());
        let b = ins.start_transaction(Some("B"), None);

        assert_eq!(continuation(), Some(a));
        assert_eq!(ins.current_transaction(), Some(b));
    }

    #[test]
    fn test_bind_fn_can_be_called_repeatedly() {
        let ins = instrumentation();
        let _a = ins.start_transaction(Some("A"), None);
        let callback = ins.correlator().bind_fn(|n: u32| {
            (n, ins.current_transaction().map(|t| t.name()))
        });

        ins.correlator().clear();
        assert_eq!(callback(1), (1, Some("A".to_string())));
        assert!(ins.current_transaction().is_none());
        assert_eq!(callback(2), (2, Some("A".to_string())));
    }

    #[test]
    fn test_set_inside_bound_callback_stays_in_its_frame() {
        let ins = instrumentation();
        let a = ins.start_transaction(Some("A"), None);

        let observer = ins.clone();
        let continuation = ins.bind(move || {
            let inner = observer.start_transaction(Some("inner"), None);
            (observer.current_transaction(), inner)
        });

        let (seen, inner) = continuation();
        assert_eq!(seen, Some(inner));
        assert_eq!(ins.current_transaction(), Some(a));
    }

    #[test]
    fn test_panicking_callback_releases_binding() {
        let ins = instrumentation();
        let a = ins.start_transaction(Some("A"), None);
        let continuation = ins.bind(|| panic!("callback failed"));
        ins.correlator().clear();

        let result = catch_unwind(AssertUnwindSafe(continuation));
        assert!(result.is_err());
        assert!(ins.current_transaction().is_none());

        // an inner frame unwinding leaves the outer one in place
        ins.set_current_transaction(Some(a.clone()));
        let outer = ins.bind(|| {
            let inner = ins.bind(|| panic!("inner failed"));
            ins.correlator().clear();
            let _ = catch_unwind(AssertUnwindSafe(inner));
            ins.current_transaction()
        });
        ins.correlator().clear();

        assert_eq!(outer(), None);
        assert!(ins.current_transaction().is_none());
        assert!(CALL_SCOPES.with(|scopes| scopes.borrow().is_empty()));
    }

    #[test]
    fn test_restore_replaces_other_transaction() {
        let ins = instrumentation();
        let a = ins.start_transaction(Some("A"), None);
        let b = ins.start_transaction(Some("B"), None);
        assert_eq!(ins.current_transaction().as_ref(), Some(&b));

        ins.correlator().restore(&a);
        assert_eq!(ins.current_transaction().as_ref(), Some(&a));
    }

    #[test]
    fn test_correlators_do_not_share_frames() {
        let first = instrumentation();
        let second = instrumentation();
        let a = first.start_transaction(Some("A"), None);
        let b = second.start_transaction(Some("B"), None);

        let (in_first, in_second) = (first.clone(), second.clone());
        let continuation =
            first.bind(move || (in_first.current_transaction(), in_second.current_transaction()));
        first.correlator().clear();

        assert_eq!(continuation(), (Some(a), Some(b)));
        assert!(first.current_transaction().is_none());
    }

    #[tokio::test]
    async fn test_bind_future_keeps_transaction_across_polls() {
        let ins = instrumentation();
        let _a = ins.start_transaction(Some("A"), None);

        let observer = ins.clone();
        let task = ins.bind_future(async move {
            let before = observer.current_transaction().map(|t| t.name());
            tokio::task::yield_now().await;
            let after = observer.current_transaction().map(|t| t.name());
            (before, after)
        });

        let b = ins.start_transaction(Some("B"), None);
        let (before, after) = task.await;
        assert_eq!(before.as_deref(), Some("A"));
        assert_eq!(after.as_deref(), Some("A"));
        assert_eq!(ins.current_transaction(), Some(b));
    }

    #[tokio::test]
    async fn test_set_inside_bound_future_stays_in_its_task() {
        let ins = instrumentation();
        ins.set_current_transaction(None);

        let worker = ins.clone();
        let started = tokio::spawn(ins.bind_future(async move {
            let txn = worker.start_transaction(Some("spawned"), None);
            tokio::task::yield_now().await;
            assert_eq!(worker.current_transaction().as_ref(), Some(&txn));
            txn
        }))
        .await
        .unwrap();

        assert_eq!(started.name(), "spawned");
        assert!(ins.current_transaction().is_none());
    }
}
