//! State mutators: hooks that alter the engine state around execution.

use crate::op::Operation;
use crate::state::State;

/// Alters the engine state directly before and/or after an operation runs.
///
/// `pre_execute` runs inside the dispatcher's admission critical section,
/// under the same state lock that evaluated the operation's guard; this is
/// the only window in which an operation can change state atomically with
/// its own admission. The mutation is never rolled back — once it has run,
/// the operation is committed to execute.
///
/// `post_execute` runs on the worker after the operation reaches a terminal
/// state, with the state lock re-acquired. A mutator that has no post-pass
/// work returns `false` from `wants_post_execute` to skip the extra lock
/// round-trip.
pub trait StateMutator: Send + Sync + 'static {
    /// Alter the state directly before the operation executes.
    fn pre_execute(&self, state: &mut State, op: &Operation);

    /// Alter the state after the operation finished or was canceled.
    ///
    /// The operation's status flags can be inspected to tell the two apart.
    fn post_execute(&self, _state: &mut State, _op: &Operation) {}

    /// Whether `post_execute` should be invoked at all.
    fn wants_post_execute(&self) -> bool {
        true
    }
}

/// Adapts closures over `&mut State` into a [`StateMutator`].
///
/// Built with only a pre-execution closure, `wants_post_execute` is false;
/// adding one with [`with_post`](MutatorFn::with_post) turns it on.
///
/// # Example
///
/// ```
/// use modest_engine::op::MutatorFn;
/// use modest_engine::state::Value;
///
/// let mutator = MutatorFn::new(|s| { s.set("busy", Value::Bool(true)); })
///     .with_post(|s| { s.set("busy", Value::Bool(false)); });
/// # let _ = mutator;
/// ```
pub struct MutatorFn<P, Q = fn(&mut State)> {
    pre: P,
    post: Option<Q>,
}

impl<P> MutatorFn<P>
where
    P: Fn(&mut State) + Send + Sync + 'static,
{
    /// Mutator with a pre-execution hook only.
    pub fn new(pre: P) -> Self {
        Self { pre, post: None }
    }
}

impl<P, Q> MutatorFn<P, Q> {
    /// Add a post-execution hook.
    pub fn with_post<Q2>(self, post: Q2) -> MutatorFn<P, Q2>
    where
        Q2: Fn(&mut State) + Send + Sync + 'static,
    {
        MutatorFn { pre: self.pre, post: Some(post) }
    }
}

impl<P, Q> StateMutator for MutatorFn<P, Q>
where
    P: Fn(&mut State) + Send + Sync + 'static,
    Q: Fn(&mut State) + Send + Sync + 'static,
{
    fn pre_execute(&self, state: &mut State, _op: &Operation) {
        (self.pre)(state);
    }

    fn post_execute(&self, state: &mut State, _op: &Operation) {
        if let Some(post) = &self.post {
            post(state);
        }
    }

    fn wants_post_execute(&self) -> bool {
        self.post.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::RunnableFn;
    use crate::state::Value;

    #[test]
    fn pre_only_skips_post() {
        let m = MutatorFn::new(|s: &mut State| s.set("n", Value::Int64(1)));
        assert!(!m.wants_post_execute());

        let mut state = State::new();
        let op = Operation::new(RunnableFn::new("t", || {}));
        m.pre_execute(&mut state, &op);
        assert_eq!(state.get_i64("n"), Some(1));
    }

    #[test]
    fn with_post_enables_post() {
        let m = MutatorFn::new(|s: &mut State| s.set("busy", Value::Bool(true)))
            .with_post(|s: &mut State| s.set("busy", Value::Bool(false)));
        assert!(m.wants_post_execute());

        let mut state = State::new();
        let op = Operation::new(RunnableFn::new("t", || {}));
        m.pre_execute(&mut state, &op);
        assert_eq!(state.get_bool("busy"), Some(true));
        m.post_execute(&mut state, &op);
        assert_eq!(state.get_bool("busy"), Some(false));
    }
}
