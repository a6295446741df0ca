//! The children-array LRU (`spec.md` §3.3, §4.2).
//!
//! A parent's children are *not* stored on the node itself — they live
//! in this bounded cache, keyed by the parent's [`NodeId`]. Evicting a
//! parent's entry is therefore silent and safe: the next lookup
//! synthesizes an empty list and the parent's `READDIR_CALLED` bit is
//! cleared so the next `readdir` reissues IO (§3.3, §3.5).
//!
//! Backed by `moka::sync::Cache` with a custom weigher implementing
//! the "`length + 1` size units per parent" accounting from §4.2.

use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::node::NodeId;

/// `children[0..provisional)` are real (last readdir saw them);
/// `children[provisional..]` are provisional (interned via `child()`
/// but never confirmed, or not yet re-seen by the most recent
/// readdir).
#[derive(Debug, Default)]
pub struct ChildrenList {
    pub children: Vec<NodeId>,
    pub provisional: usize,
}

impl ChildrenList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn real(&self) -> &[NodeId] {
        &self.children[..self.provisional]
    }

    pub fn provisional_slice(&self) -> &[NodeId] {
        &self.children[self.provisional..]
    }
}

/// Default cap, in list-size-units, for the children-array LRU
/// (`spec.md` §4.2: 16 Ki entries).
pub const DEFAULT_CAPACITY: u64 = 16 * 1024;

pub struct ChildrenCache {
    cache: moka::sync::Cache<NodeId, Arc<Mutex<ChildrenList>>>,
}

impl ChildrenCache {
    pub fn new(capacity_units: u64) -> Self {
        let cache = moka::sync::Cache::builder()
            .max_capacity(capacity_units)
            .weigher(|_parent: &NodeId, list: &Arc<Mutex<ChildrenList>>| -> u32 {
                let len = list.lock().unwrap().children.len();
                (len + 1) as u32
            })
            .eviction_listener(|parent: Arc<NodeId>, list: Arc<Mutex<ChildrenList>>, cause| {
                let children = list.lock().unwrap().children.len();
                trace!(node = parent.0, children, ?cause, "children list evicted");
            })
            .build();
        ChildrenCache { cache }
    }

    /// Returns the children list for `parent`. If it was absent (never
    /// seen, or evicted since), synthesizes an empty one, stores it,
    /// and reports `true` so the caller can clear `READDIR_CALLED`.
    pub fn get_or_insert(&self, parent: NodeId) -> (Arc<Mutex<ChildrenList>>, bool) {
        let mut created = false;
        let entry = self.cache.get_with(parent, || {
            created = true;
            Arc::new(Mutex::new(ChildrenList::new()))
        });
        (entry, created)
    }

    /// Peeks without synthesizing a fresh entry on a miss.
    pub fn peek(&self, parent: NodeId) -> Option<Arc<Mutex<ChildrenList>>> {
        self.cache.get(&parent)
    }

    /// Re-inserts `list` under `parent` so the weigher re-runs against
    /// its current length. The weigher only fires on insertion
    /// (`spec.md` §4.2); mutating a list through the `Arc<Mutex<_>>` a
    /// caller already holds happens behind moka's back and would
    /// otherwise leave the cached weight pinned at whatever it was when
    /// the entry was created. Callers must invoke this after any
    /// mutation that changes `list.children.len()`.
    pub fn reweigh(&self, parent: NodeId, list: Arc<Mutex<ChildrenList>>) {
        self.cache.insert(parent, list);
    }

    pub fn invalidate(&self, parent: NodeId) {
        self.cache.invalidate(&parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_synthesizes_empty_list() {
        let cache = ChildrenCache::new(4);
        let parent = NodeId(1);
        let (list, created) = cache.get_or_insert(parent);
        assert!(created);
        list.lock().unwrap().children.push(NodeId(2));
        list.lock().unwrap().provisional = 1;

        // Push enough unrelated entries to evict `parent` under the tiny cap.
        for i in 10..20u32 {
            let (l, _) = cache.get_or_insert(NodeId(i));
            l.lock().unwrap().children.push(NodeId(i + 100));
        }
        cache.cache.run_pending_tasks();

        if cache.peek(parent).is_none() {
            let (_, created_again) = cache.get_or_insert(parent);
            assert!(created_again);
        }
    }
}
