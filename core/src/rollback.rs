//! # Rollback
//!
//! Ordered undo actions for multi-step construction.
//!
//! Each acquired resource pushes the action that releases it. If the
//! construction bails out early the actions run in reverse order when the
//! chain is dropped; [`Rollback::commit`] dismisses them once the object is
//! fully built.

use std::fmt;

struct RollbackEntry<'a> {
    description: &'static str,
    action: Box<dyn FnOnce() + 'a>,
}

/// A LIFO chain of undo actions
pub struct Rollback<'a> {
    actions: Vec<RollbackEntry<'a>>,
    committed: bool,
}

impl<'a> Rollback<'a> {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            committed: false,
        }
    }

    /// Push an undo action
    pub fn push<F: FnOnce() + 'a>(&mut self, description: &'static str, action: F) {
        self.actions.push(RollbackEntry {
            description,
            action: Box::new(action),
        });
    }

    /// Number of pending actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no action is pending
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Dismiss every pending action
    pub fn commit(mut self) {
        self.committed = true;
        self.actions.clear();
    }
}

impl Default for Rollback<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(entry) = self.actions.pop() {
            log::debug!("rollback: {}", entry.description);
            (entry.action)();
        }
    }
}

impl fmt::Debug for Rollback<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(|e| e.description))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_rollback_runs_in_reverse() {
        let log = RefCell::new(Vec::new());
        {
            let mut chain = Rollback::new();
            chain.push("first", || log.borrow_mut().push(1));
            chain.push("second", || log.borrow_mut().push(2));
            chain.push("third", || log.borrow_mut().push(3));
            assert_eq!(chain.len(), 3);
        }
        assert_eq!(*log.borrow(), vec![3, 2, 1]);
    }

    #[test]
    fn test_commit_dismisses() {
        let log = RefCell::new(Vec::new());
        let mut chain = Rollback::new();
        chain.push("only", || log.borrow_mut().push(1));
        chain.commit();
        assert!(log.borrow().is_empty());
    }
}
