//! The path node (`spec.md` §3.1) and its arena index.
//!
//! Nodes live in [`crate::graph::Graph`]'s arena and are addressed by
//! [`NodeId`] rather than by pointer, so that evicting a parent's
//! children list (§3.3/§4.2) never leaves a dangling reference — it
//! just drops a `Vec<NodeId>` (design notes, §9: "prefer arena +
//! integer-index for all node references").

use std::cell::Cell;
use std::sync::Arc;

use crate::bits::TypeState;
use crate::fsprovider::Stat;

/// Arena index standing in for a reference to a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Memoized derived strings, populated write-once until invalidated
/// by `chdir`/`setAsCwd` (`relative`/`relativePosix` only — `fullpath`
/// and `depth` are structural and never invalidated, §4.1.7).
#[derive(Debug, Default, Clone)]
pub(crate) struct Cached {
    pub fullpath: Option<Arc<str>>,
    pub fullpath_posix: Option<Arc<str>>,
    pub relative: Option<Arc<str>>,
    pub relative_posix: Option<Arc<str>>,
}

/// One entry in the path graph: existent or not, directory or not,
/// root or not. See `spec.md` §3.1.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) match_name: Arc<str>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) root: NodeId,
    pub(crate) state: TypeState,
    pub(crate) link_target: Option<NodeId>,
    pub(crate) realpath: Option<NodeId>,
    pub(crate) stat: Option<Stat>,
    pub(crate) cached: Cached,
    pub(crate) depth: Cell<Option<u32>>,
    pub(crate) nocase: bool,
}

impl Node {
    pub(crate) fn new_root(name: String, nocase: bool) -> Self {
        let match_name = crate::unicode::match_key(&name, nocase);
        Node {
            name,
            match_name,
            parent: None,
            // Patched to self by the caller once the root's NodeId is known.
            root: NodeId(0),
            state: TypeState::new(),
            link_target: None,
            realpath: None,
            stat: None,
            cached: Cached::default(),
            depth: Cell::new(Some(0)),
            nocase,
        }
    }

    pub(crate) fn new_child(
        name: String,
        parent: NodeId,
        root: NodeId,
        nocase: bool,
        born_enoent: bool,
    ) -> Self {
        let match_name = crate::unicode::match_key(&name, nocase);
        let mut state = TypeState::new();
        if born_enoent {
            state.mark_enoent();
        }
        Node {
            name,
            match_name,
            parent: Some(parent),
            root,
            state,
            link_target: None,
            realpath: None,
            stat: None,
            cached: Cached::default(),
            depth: Cell::new(None),
            nocase,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn state(&self) -> TypeState {
        self.state
    }

    pub fn stat(&self) -> Option<&Stat> {
        self.stat.as_ref()
    }

    /// Compares match keys rather than names directly — `spec.md`
    /// §4.1.8: comparing `.name` is forbidden externally because
    /// Unicode normalization mismatches would yield false negatives.
    pub fn is_named(&self, other: &str) -> bool {
        self.match_name == crate::unicode::match_key(other, self.nocase)
    }

    pub(crate) fn is_named_key(&self, other_key: &Arc<str>) -> bool {
        &self.match_name == other_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_named_is_nfkd_stable() {
        let n = Node::new_root("caf\u{00e9}".to_owned(), false);
        assert!(n.is_named("cafe\u{0301}"));
    }

    #[test]
    fn is_named_nocase_folds() {
        let n = Node::new_root("README".to_owned(), true);
        assert!(n.is_named("readme"));
    }
}
