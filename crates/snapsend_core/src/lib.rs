//! # Snapsend Core
//!
//! Computes the difference between two snapshots of a copy-on-write tree
//! and encodes it as a send stream.
//!
//! A send walks the target snapshot (and, for incremental sends, its
//! parent) in key order and emits the commands a receiver holding the
//! parent needs to reproduce the target:
//!
//! - [`TreeComparator`] merges both trees and reports differing keys
//! - [`SendSession`] turns each change into renames, links, writes, clones
//!   and metadata updates, tracking where every inode currently lives at the
//!   receiver
//! - [`PathBuilder`] and [`NameCache`] make path resolution cheap
//!
//! ## Ordering
//!
//! Inodes are processed in ascending number. A new inode is created under a
//! temporary orphan name in the root directory and moved into place once
//! its names are processed. Names that collide with inodes not yet
//! processed are freed by moving those inodes to their orphan names first.
//! Directories are removed once every entry they held has been processed.
//!
//! ## Usage
//!
//! ```rust
//! use snapsend_core::{SendConfig, SendRequest, SendSession};
//! use snapsend_stream::{decode_stream, CommandType};
//! use snapsend_tree::MemFs;
//!
//! let fs = MemFs::new();
//! let base = fs.create_subvolume("base");
//! base.write_file("a.txt", 0o644, b"alpha").unwrap();
//! let next = fs.snapshot(&base, "next");
//! next.rename("a.txt", "b.txt").unwrap();
//!
//! let request = SendRequest::full(&*next, &fs, &*next).parent(&*base);
//! let (stream, _) = SendSession::new(request, SendConfig::default(), Vec::new())
//!     .unwrap()
//!     .run()
//!     .unwrap();
//! let commands = decode_stream(&stream).unwrap();
//! assert_eq!(commands[0].kind, CommandType::Snapshot);
//! assert!(commands.iter().any(|c| c.kind == CommandType::Rename));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod compare;
mod config;
mod error;
mod extent;
mod name_cache;
mod path;
mod refs;
mod resolver;
mod session;
mod state;
mod xattr;

pub use compare::{
    Change, ChangeKind, ChangeVisitor, CompareStats, ReadLease, TreeComparator,
};
pub use config::SendConfig;
pub use error::{ErrorKind, SendError, SendResult};
pub use name_cache::{NameCache, NameCacheEntry, NameCacheStats};
pub use path::PathBuilder;
pub use session::{SendRequest, SendSession, SendStats};
pub use state::Lifecycle;
