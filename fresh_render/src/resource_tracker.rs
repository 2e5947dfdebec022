//! Live resource accounting
//!
//! Every resource a context creates carries a [`TrackedResource`] token. The
//! token decrements the shared counter when the resource is dropped, so a
//! context can report how many of its resources are still referenced.

use std::cell::Cell;
use std::rc::Rc;

/// Counter of live resources created by one context
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    live: Rc<Cell<usize>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new resource; keep the token alive as long as the resource
    pub fn track(&self) -> TrackedResource {
        self.live.set(self.live.get() + 1);
        TrackedResource {
            live: Rc::clone(&self.live),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.get()
    }

    /// Log a warning naming the number of resources that outlive `source`'s context
    pub fn warn_leaks(&self, source: &str) {
        let live = self.live.get();
        if live > 0 {
            crate::engine_warn!(
                source,
                "{} resource(s) still referenced at shutdown; they must be dropped before the context",
                live
            );
        }
    }
}

/// Membership token held by a tracked resource
#[derive(Debug)]
pub struct TrackedResource {
    live: Rc<Cell<usize>>,
}

impl Drop for TrackedResource {
    fn drop(&mut self) {
        self.live.set(self.live.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_count_live_resources() {
        let tracker = ResourceTracker::new();
        let a = tracker.track();
        let b = tracker.track();
        assert_eq!(tracker.live_count(), 2);
        drop(a);
        assert_eq!(tracker.live_count(), 1);
        drop(b);
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_clones_share_the_counter() {
        let tracker = ResourceTracker::new();
        let clone = tracker.clone();
        let _token = clone.track();
        assert_eq!(tracker.live_count(), 1);
    }
}
