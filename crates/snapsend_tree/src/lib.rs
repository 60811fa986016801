//! # Snapsend Tree
//!
//! Read-side contracts for snapshot trees and an in-memory implementation.
//!
//! The send engine never touches storage directly. It consumes three
//! collaborators:
//!
//! - [`TreeReader`] - ordered key/item access to one snapshot
//! - [`BackrefResolver`] - maps a disk location to every file range using it
//! - [`ContentReader`] - reads file bytes of the snapshot being sent
//!
//! ## Key Space
//!
//! Items are addressed by [`Key`] `(objectid, item_type, offset)` and sorted
//! lexicographically, so all items of an inode are adjacent and its
//! [`ItemType::InodeItem`] comes first. Item payload formats live in
//! [`items`].
//!
//! ## In-Memory Filesystem
//!
//! [`MemFs`] holds a shared data disk and any number of copy-on-write
//! snapshots ([`MemTree`]). It implements all three contracts and offers a
//! path-level mutation API for building test scenarios.
//!
//! ```rust
//! use snapsend_tree::{MemFs, TreeReader, ROOT_DIR_INO};
//!
//! let fs = MemFs::new();
//! let tree = fs.create_subvolume("data");
//! let ino = tree.write_file("notes.txt", 0o644, b"hello").unwrap();
//! assert_eq!(tree.first_ref(ino).unwrap(), Some((ROOT_DIR_INO, b"notes.txt".to_vec())));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod items;
mod key;
mod memory;
mod memtree;
mod reader;

pub use error::{TreeError, TreeResult};
pub use items::{FileType, InodeItem, Timespec};
pub use key::{name_hash, ItemType, Key, KEY_SIZE, ROOT_DIR_INO};
pub use memory::{MemDisk, MemFs};
pub use memtree::MemTree;
pub use reader::{
    BackrefHit, BackrefResolver, ContentReader, ExtentLocation, SnapshotId, SnapshotMeta,
    TreeItem, TreeReader,
};
