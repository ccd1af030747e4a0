//! An aggregate of operations supporting bulk interrupt, wait and prune.

use parking_lot::Mutex;

use crate::op::Operation;

/// An ordered, lockable collection of operations.
///
/// All methods are safe under concurrent access. Waiters release the list
/// lock while blocked, so operations may be added while another thread is
/// inside [`wait_all`](Self::wait_all); late additions are waited on too.
///
/// The ownership flag decides whether [`prune`](Self::prune) eagerly drops
/// the list's handles to finalized operations; with shared handles the
/// backing memory is reclaimed once the last clone goes away regardless.
pub struct OperationList {
    ops: Mutex<Vec<Operation>>,
    owns: bool,
}

impl OperationList {
    /// Create a list that releases finalized operations on prune.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ownership(true)
    }

    /// Create a list with explicit ownership behavior.
    #[must_use]
    pub fn with_ownership(owns: bool) -> Self {
        Self { ops: Mutex::new(Vec::new()), owns }
    }

    /// Append an operation.
    pub fn add(&self, op: Operation) {
        self.ops.lock().push(op);
    }

    /// Interrupt every operation in the list.
    pub fn interrupt_all(&self) {
        let snapshot = self.ops.lock().clone();
        for op in &snapshot {
            op.interrupt();
        }
    }

    /// Wait for every operation in insertion order.
    ///
    /// Completion is monotonic, so waiting in order is exhaustive: by the
    /// time the walk passes an operation it is terminal and stays terminal.
    /// Returns `false` as soon as the calling thread is interrupted (only
    /// possible when `interruptible` is set).
    pub fn wait_all(&self, interruptible: bool) -> bool {
        let mut index = 0;
        loop {
            let op = {
                let ops = self.ops.lock();
                match ops.get(index) {
                    Some(op) => op.clone(),
                    None => return true,
                }
            };
            if !op.wait_for(interruptible) {
                return false;
            }
            index += 1;
        }
    }

    /// Remove every finished or canceled operation from the list.
    ///
    /// An owning list releases the pruned handles and returns an empty
    /// vector; a non-owning list hands them back to the caller instead.
    pub fn prune(&self) -> Vec<Operation> {
        let mut removed = Vec::new();
        {
            let mut ops = self.ops.lock();
            ops.retain(|op| {
                let terminal = op.finished() || op.canceled();
                if terminal {
                    removed.push(op.clone());
                }
                !terminal
            });
        }
        if self.owns {
            Vec::new()
        } else {
            removed
        }
    }

    /// Interrupt, wait for, then prune every operation.
    pub fn terminate(&self) {
        self.interrupt_all();
        self.wait_all(false);
        self.prune();
    }

    /// Number of operations currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    /// Whether the list holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }
}

impl Default for OperationList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::RunnableFn;

    fn noop() -> Operation {
        Operation::new(RunnableFn::new("t", || {}))
    }

    #[test]
    fn add_and_len() {
        let list = OperationList::new();
        assert!(list.is_empty());
        list.add(noop());
        list.add(noop());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn prune_drops_only_terminal() {
        let list = OperationList::new();
        let done = noop();
        done.set_terminal(false);
        let pending = noop();
        list.add(done);
        list.add(pending.clone());
        assert!(list.prune().is_empty());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn non_owning_prune_returns_handles() {
        let list = OperationList::with_ownership(false);
        let done = noop();
        done.set_terminal(false);
        list.add(done.clone());
        let pruned = list.prune();
        assert_eq!(pruned.len(), 1);
        assert!(pruned[0].same_as(&done));
        assert!(list.is_empty());
    }

    #[test]
    fn interrupt_all_reaches_every_operation() {
        let list = OperationList::new();
        let a = noop();
        let b = noop();
        list.add(a.clone());
        list.add(b.clone());
        list.interrupt_all();
        assert!(a.interrupted() && b.interrupted());
    }

    #[test]
    fn wait_all_on_terminal_list_returns_true() {
        let list = OperationList::new();
        for _ in 0..3 {
            let op = noop();
            op.set_terminal(false);
            list.add(op);
        }
        assert!(list.wait_all(false));
    }
}
