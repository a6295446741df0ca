//! A cached, incrementally built filesystem path graph: lazy nodes,
//! bounded-memory readdir/lstat/readlink/realpath caching, and a
//! walk engine with symlink-follow and cycle suppression.

mod bits;
mod children_cache;
mod error;
mod fsprovider;
mod graph;
mod node;
mod platform;
mod unicode;
mod walk;

pub use bits::TypeState;
pub use error::{PathGraphError, Result};
pub use fsprovider::{DirEntry, FileKind, FsErrorKind, FsProvider, OsProvider, Stat};
pub use graph::{Graph, GraphConfig};
pub use node::NodeId;
pub use platform::Platform;
pub use walk::{iterate_sync, stream, walk, walk_sync, WalkIter, WalkOptions};
