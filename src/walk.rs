//! The walk engine: array, iterator, and backpressured stream forms
//! over one shared traversal algorithm (`spec.md` §4.4).
//!
//! All three forms share the same "growing queue" idiom: directories
//! to visit live in a `Vec<NodeId>` that is iterated by index while
//! still being appended to, so newly discovered subdirectories are
//! picked up without a second collection pass. A side `HashSet<NodeId>`
//! tracks directory identity (the node itself, or its realpath when
//! `follow` is set) to suppress revisits and symlink cycles.
//!
//! Rust's futures have no "callback fires synchronously vs. on a
//! microtask" hazard the way JS promises do, so the zalgo-containment
//! machinery described in §4.4 has no counterpart here: every `.await`
//! point is an explicit, uniform suspension. The stream form's
//! backpressure is the bounded `tokio::sync::mpsc` channel itself —
//! `Sender::send` already blocks the producer until the consumer
//! drains, which is the same contract as "pause on `write() === false`,
//! resume on `drain`".

use std::collections::{HashSet, VecDeque};

use crate::graph::Graph;
use crate::node::NodeId;

type Predicate = Box<dyn Fn(&Graph, NodeId) -> bool>;

/// Traversal options (`spec.md` §6 "Walk options").
#[derive(Default)]
pub struct WalkOptions {
    pub follow: bool,
    filter: Option<Predicate>,
    walk_filter: Option<Predicate>,
}

impl WalkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    /// Gates emission only — a rejected entry is never yielded, but its
    /// subdirectories are still descended into.
    pub fn filter(mut self, f: impl Fn(&Graph, NodeId) -> bool + 'static) -> Self {
        self.filter = Some(Box::new(f));
        self
    }

    /// Gates descent only — a rejected directory is still emitted (if
    /// `filter` accepts it) but never walked into.
    pub fn walk_filter(mut self, f: impl Fn(&Graph, NodeId) -> bool + 'static) -> Self {
        self.walk_filter = Some(Box::new(f));
        self
    }

    fn accepts(&self, graph: &Graph, id: NodeId) -> bool {
        self.filter.as_ref().map_or(true, |f| f(graph, id))
    }

    fn walk_accepts(&self, graph: &Graph, id: NodeId) -> bool {
        self.walk_filter.as_ref().map_or(true, |f| f(graph, id))
    }
}

fn resolve_candidate_sync(graph: &Graph, child: NodeId, follow: bool) -> NodeId {
    if follow && graph.state(child).is_symlink() {
        if let Some(target) = graph.realpath_sync(child) {
            if graph.state(target).is_unknown_type() {
                graph.lstat_sync(target);
            }
            return target;
        }
    }
    child
}

async fn resolve_candidate_async(graph: &Graph, child: NodeId, follow: bool) -> NodeId {
    if follow && graph.state(child).is_symlink() {
        if let Some(target) = graph.realpath(child).await {
            if graph.state(target).is_unknown_type() {
                graph.lstat(target).await;
            }
            return target;
        }
    }
    child
}

fn dir_identity_sync(graph: &Graph, dir: NodeId, follow: bool) -> NodeId {
    if follow {
        graph.realpath_sync(dir).unwrap_or(dir)
    } else {
        dir
    }
}

async fn dir_identity_async(graph: &Graph, dir: NodeId, follow: bool) -> NodeId {
    if follow {
        graph.realpath(dir).await.unwrap_or(dir)
    } else {
        dir
    }
}

/// `shouldWalk` (§4.4 step 3c): true iff the candidate is a directory,
/// not already visited, and `walkFilter` accepts it.
fn should_walk(graph: &Graph, candidate: NodeId, key: NodeId, seen: &HashSet<NodeId>, opts: &WalkOptions) -> bool {
    graph.state(candidate).is_dir() && !seen.contains(&key) && opts.walk_accepts(graph, candidate)
}

/// Array form, sync (`spec.md` §6 `walkSync`).
pub fn walk_sync(graph: &Graph, root: NodeId, opts: &WalkOptions) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut queue: Vec<NodeId> = Vec::new();

    if opts.accepts(graph, root) {
        out.push(root);
    }
    seen.insert(dir_identity_sync(graph, root, opts.follow));
    queue.push(root);

    let mut cursor = 0;
    while cursor < queue.len() {
        let dir = queue[cursor];
        cursor += 1;
        for child in graph.readdir_sync(dir) {
            if opts.accepts(graph, child) {
                out.push(child);
            }
            let candidate = resolve_candidate_sync(graph, child, opts.follow);
            let key = dir_identity_sync(graph, candidate, opts.follow);
            if should_walk(graph, candidate, key, &seen, opts) {
                seen.insert(key);
                queue.push(candidate);
            }
        }
    }
    out
}

/// Array form, async (`spec.md` §6 `walk`).
pub async fn walk(graph: &Graph, root: NodeId, opts: &WalkOptions) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut queue: Vec<NodeId> = Vec::new();

    if opts.accepts(graph, root) {
        out.push(root);
    }
    seen.insert(dir_identity_async(graph, root, opts.follow).await);
    queue.push(root);

    let mut cursor = 0;
    while cursor < queue.len() {
        let dir = queue[cursor];
        cursor += 1;
        for child in graph.readdir(dir).await {
            if opts.accepts(graph, child) {
                out.push(child);
            }
            let candidate = resolve_candidate_async(graph, child, opts.follow).await;
            let key = dir_identity_async(graph, candidate, opts.follow).await;
            if should_walk(graph, candidate, key, &seen, opts) {
                seen.insert(key);
                queue.push(candidate);
            }
        }
    }
    out
}

/// Iterator form, sync (`spec.md` §6 `iterateSync`). Pulls one
/// directory's `readdir_sync` at a time, buffering its accepted
/// entries until drained.
pub struct WalkIter<'g> {
    graph: &'g Graph,
    opts: WalkOptions,
    seen: HashSet<NodeId>,
    queue: Vec<NodeId>,
    cursor: usize,
    pending: VecDeque<NodeId>,
    started: bool,
}

impl<'g> WalkIter<'g> {
    fn new(graph: &'g Graph, root: NodeId, opts: WalkOptions) -> Self {
        WalkIter {
            graph,
            opts,
            seen: HashSet::new(),
            queue: vec![root],
            cursor: 0,
            pending: VecDeque::new(),
            started: false,
        }
    }

    fn fill(&mut self) {
        while self.pending.is_empty() && self.cursor < self.queue.len() {
            let dir = self.queue[self.cursor];
            self.cursor += 1;
            for child in self.graph.readdir_sync(dir) {
                if self.opts.accepts(self.graph, child) {
                    self.pending.push_back(child);
                }
                let candidate = resolve_candidate_sync(self.graph, child, self.opts.follow);
                let key = dir_identity_sync(self.graph, candidate, self.opts.follow);
                if should_walk(self.graph, candidate, key, &self.seen, &self.opts) {
                    self.seen.insert(key);
                    self.queue.push(candidate);
                }
            }
        }
    }
}

impl<'g> Iterator for WalkIter<'g> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if !self.started {
            self.started = true;
            let root = self.queue[0];
            self.seen.insert(dir_identity_sync(self.graph, root, self.opts.follow));
            if self.opts.accepts(self.graph, root) {
                return Some(root);
            }
        }
        if self.pending.is_empty() {
            self.fill();
        }
        self.pending.pop_front()
    }
}

pub fn iterate_sync<'g>(graph: &'g Graph, root: NodeId, opts: WalkOptions) -> WalkIter<'g> {
    WalkIter::new(graph, root, opts)
}

/// Stream form (`spec.md` §6 `stream`): pushes emitted nodes through a
/// bounded channel, which is itself the backpressure mechanism — a
/// full channel makes `send` block the traversal until the consumer
/// drains it.
pub async fn stream(
    graph: &Graph,
    root: NodeId,
    opts: WalkOptions,
    tx: tokio::sync::mpsc::Sender<NodeId>,
) {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut queue: Vec<NodeId> = Vec::new();

    if opts.accepts(graph, root) {
        if tx.send(root).await.is_err() {
            return;
        }
    }
    seen.insert(dir_identity_async(graph, root, opts.follow).await);
    queue.push(root);

    let mut cursor = 0;
    while cursor < queue.len() {
        let dir = queue[cursor];
        cursor += 1;
        for child in graph.readdir(dir).await {
            if opts.accepts(graph, child) {
                if tx.send(child).await.is_err() {
                    return;
                }
            }
            let candidate = resolve_candidate_async(graph, child, opts.follow).await;
            let key = dir_identity_async(graph, candidate, opts.follow).await;
            if should_walk(graph, candidate, key, &seen, &opts) {
                seen.insert(key);
                queue.push(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsprovider::{DirEntry, FileKind, FsProvider, Stat};
    use crate::graph::GraphConfig;
    use crate::platform::Platform;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Default)]
    struct TreeFs {
        dirs: StdMutex<HashMap<String, Vec<DirEntry>>>,
    }

    impl TreeFs {
        fn set_dir(&self, path: &str, entries: Vec<DirEntry>) {
            self.dirs.lock().unwrap().insert(path.to_owned(), entries);
        }
    }

    #[async_trait::async_trait]
    impl FsProvider for TreeFs {
        fn lstat_sync(&self, _path: &Path) -> std::io::Result<Stat> {
            Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
        }

        fn readdir_sync(&self, path: &Path) -> std::io::Result<Vec<DirEntry>> {
            self.dirs
                .lock()
                .unwrap()
                .get(&path.to_string_lossy().into_owned())
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }

        fn readlink_sync(&self, _path: &Path) -> std::io::Result<PathBuf> {
            Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
        }

        fn realpath_sync(&self, path: &Path) -> std::io::Result<PathBuf> {
            Ok(path.to_path_buf())
        }

        async fn lstat(&self, path: &Path) -> std::io::Result<Stat> {
            self.lstat_sync(path)
        }

        async fn readdir(&self, path: &Path) -> std::io::Result<Vec<DirEntry>> {
            self.readdir_sync(path)
        }

        async fn readlink(&self, path: &Path) -> std::io::Result<PathBuf> {
            self.readlink_sync(path)
        }

        async fn realpath(&self, path: &Path) -> std::io::Result<PathBuf> {
            self.realpath_sync(path)
        }
    }

    fn small_tree() -> Graph {
        let fs = TreeFs::default();
        fs.set_dir(
            "/",
            vec![
                DirEntry { name: "a".into(), kind: FileKind::Directory },
                DirEntry { name: "f.txt".into(), kind: FileKind::Regular },
            ],
        );
        fs.set_dir("/a", vec![DirEntry { name: "b".into(), kind: FileKind::Directory }]);
        fs.set_dir("/a/b", vec![DirEntry { name: "c.txt".into(), kind: FileKind::Regular }]);
        Graph::new(
            GraphConfig::new()
                .cwd("/")
                .platform(Platform::Posix)
                .nocase(false)
                .fs_provider(Arc::new(fs)),
        )
        .unwrap()
    }

    #[test]
    fn walk_sync_visits_every_node_once() {
        let g = small_tree();
        let root = g.path("/");
        let out = walk_sync(&g, root, &WalkOptions::new());
        let names: HashSet<String> = out.iter().map(|&id| g.name(id)).collect();
        assert!(names.contains("a"));
        assert!(names.contains("f.txt"));
        assert!(names.contains("b"));
        assert!(names.contains("c.txt"));
        assert_eq!(out.len(), 5); // root + a + f.txt + b + c.txt
    }

    #[test]
    fn iterate_sync_matches_walk_sync_set() {
        let g = small_tree();
        let root = g.path("/");
        let array: HashSet<NodeId> = walk_sync(&g, root, &WalkOptions::new()).into_iter().collect();
        let iterated: HashSet<NodeId> = iterate_sync(&g, root, WalkOptions::new()).collect();
        assert_eq!(array, iterated);
    }

    #[test]
    fn filter_gates_emission_not_descent() {
        let g = small_tree();
        let root = g.path("/");
        let opts = WalkOptions::new().filter(|g, id| !g.name(id).ends_with(".txt"));
        let out = walk_sync(&g, root, &opts);
        assert!(out.iter().all(|&id| !g.name(id).ends_with(".txt")));
    }

    #[test]
    fn walk_filter_gates_descent_not_emission() {
        let g = small_tree();
        let root = g.path("/");
        let opts = WalkOptions::new().walk_filter(|g, id| g.name(id) != "a");
        let out = walk_sync(&g, root, &opts);
        let names: HashSet<String> = out.iter().map(|&id| g.name(id)).collect();
        assert!(names.contains("a")); // still emitted
        assert!(!names.contains("b")); // never descended into
    }

    // `Graph` is `!Sync` (it relies on `RefCell`, see its module docs),
    // so a future holding `&Graph` across an `.await` is not `Send` and
    // cannot go through `tokio::spawn`. Run producer and consumer as
    // two local tasks on a `LocalSet` instead.
    #[tokio::test]
    async fn stream_respects_small_buffer() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let g = Rc::new(small_tree());
                let root = g.path("/");
                let (tx, mut rx) = tokio::sync::mpsc::channel(1);
                let g2 = g.clone();
                let handle = tokio::task::spawn_local(async move {
                    stream(&g2, root, WalkOptions::new(), tx).await;
                });
                let mut count = 0;
                while rx.recv().await.is_some() {
                    count += 1;
                }
                handle.await.unwrap();
                assert_eq!(count, 5);
            })
            .await;
    }
}
