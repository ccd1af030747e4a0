//! Admission guards: predicates over the immutable engine state.

use crate::op::Operation;
use crate::state::State;

/// Decides whether an operation may run, must wait, or must be canceled.
///
/// Both predicates are evaluated by the dispatcher while the engine state
/// lock is held, against the same state snapshot that any subsequent
/// pre-execution mutation will see. Guards read state; they never mutate it.
///
/// An operation without a guard is always executable.
pub trait OperationGuard: Send + Sync + 'static {
    /// Whether the current state admits the operation.
    fn can_execute(&self, state: &State, op: &Operation) -> bool;

    /// Whether the current state requires the operation to be canceled
    /// instead of waiting. Checked only when `can_execute` is false.
    fn must_cancel(&self, _state: &State, _op: &Operation) -> bool {
        false
    }
}

fn never_cancel(_state: &State) -> bool {
    false
}

/// Adapts closures over `&State` into an [`OperationGuard`].
///
/// # Example
///
/// ```
/// use modest_engine::op::GuardFn;
///
/// // Runs while fewer than 3 connections are open; canceled on shutdown.
/// let guard = GuardFn::new(|s| s.get_u32("connections").unwrap_or(0) < 3)
///     .with_cancel(|s| s.get_bool("shutdown") == Some(true));
/// # let _ = guard;
/// ```
pub struct GuardFn<C, X = fn(&State) -> bool> {
    can_execute: C,
    must_cancel: X,
}

impl<C> GuardFn<C>
where
    C: Fn(&State) -> bool + Send + Sync + 'static,
{
    /// Guard with the given admission predicate and no cancel condition.
    pub fn new(can_execute: C) -> Self {
        Self { can_execute, must_cancel: never_cancel }
    }
}

impl<C, X> GuardFn<C, X> {
    /// Add a cancel predicate.
    pub fn with_cancel<X2>(self, must_cancel: X2) -> GuardFn<C, X2>
    where
        X2: Fn(&State) -> bool + Send + Sync + 'static,
    {
        GuardFn { can_execute: self.can_execute, must_cancel }
    }
}

impl<C, X> OperationGuard for GuardFn<C, X>
where
    C: Fn(&State) -> bool + Send + Sync + 'static,
    X: Fn(&State) -> bool + Send + Sync + 'static,
{
    fn can_execute(&self, state: &State, _op: &Operation) -> bool {
        (self.can_execute)(state)
    }

    fn must_cancel(&self, state: &State, _op: &Operation) -> bool {
        (self.must_cancel)(state)
    }
}
