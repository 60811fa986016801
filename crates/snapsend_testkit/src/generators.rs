//! Property-based test generators using proptest.
//!
//! Operations draw their paths from a small fixed pool so that random
//! sequences collide often: renames over existing names, links into
//! directories that later move, writes to files that get replaced. Most
//! generated operations are invalid for the tree they are applied to;
//! [`apply_ops`] skips those.

use proptest::prelude::*;
use snapsend_tree::{FileType, MemTree};

/// Paths operations are drawn from.
pub const PATH_POOL: [&str; 14] = [
    "a", "b", "c", "d", "x", "y", "x/a", "x/b", "x/z", "y/a", "y/b", "x/z/a", "x/z/b", "y/x",
];

/// Xattr names operations are drawn from.
pub const XATTR_POOL: [&str; 3] = ["user.a", "user.b", "system.posix_acl_access"];

/// One mutation of a [`MemTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsOp {
    /// Create a file with content.
    Create {
        /// Path.
        path: String,
        /// Initial content.
        data: Vec<u8>,
    },
    /// Create a directory.
    Mkdir {
        /// Path.
        path: String,
    },
    /// Create a symbolic link.
    Symlink {
        /// Path.
        path: String,
        /// Link target.
        target: String,
    },
    /// Create a fifo.
    Mkfifo {
        /// Path.
        path: String,
    },
    /// Write into an existing file.
    Write {
        /// Path.
        path: String,
        /// Byte offset.
        offset: u64,
        /// Data.
        data: Vec<u8>,
    },
    /// Change a file's size.
    Truncate {
        /// Path.
        path: String,
        /// New size.
        size: u64,
    },
    /// Share a range of one file into another.
    CloneRange {
        /// Destination path.
        dst: String,
        /// Destination offset.
        dst_offset: u64,
        /// Source path.
        src: String,
        /// Source offset.
        src_offset: u64,
        /// Length.
        len: u64,
    },
    /// Rename, replacing a compatible target.
    Rename {
        /// Source path.
        from: String,
        /// Destination path.
        to: String,
    },
    /// Add a hard link.
    Link {
        /// Existing path.
        existing: String,
        /// New name.
        path: String,
    },
    /// Remove a non-directory.
    Unlink {
        /// Path.
        path: String,
    },
    /// Remove an empty directory.
    Rmdir {
        /// Path.
        path: String,
    },
    /// Change permission bits.
    Chmod {
        /// Path.
        path: String,
        /// Permission bits.
        perm: u32,
    },
    /// Change ownership.
    Chown {
        /// Path.
        path: String,
        /// Owner.
        uid: u32,
        /// Group.
        gid: u32,
    },
    /// Set an xattr.
    SetXattr {
        /// Path.
        path: String,
        /// Name.
        name: String,
        /// Value.
        value: Vec<u8>,
    },
    /// Remove an xattr.
    RemoveXattr {
        /// Path.
        path: String,
        /// Name.
        name: String,
    },
    /// Update timestamps.
    Touch {
        /// Path.
        path: String,
    },
    /// Switch reuse of freed inode numbers on or off.
    ReuseNumbers {
        /// Whether new inodes take freed numbers.
        enabled: bool,
    },
}

/// Strategy for a path from [`PATH_POOL`].
pub fn path_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(PATH_POOL.to_vec()).prop_map(str::to_string)
}

/// Strategy for file content, sometimes empty.
pub fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..200)
}

fn xattr_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(XATTR_POOL.to_vec()).prop_map(str::to_string)
}

fn namespace_op_strategy() -> impl Strategy<Value = FsOp> {
    prop_oneof![
        4 => (path_strategy(), data_strategy()).prop_map(|(path, data)| FsOp::Create { path, data }),
        3 => path_strategy().prop_map(|path| FsOp::Mkdir { path }),
        1 => (path_strategy(), path_strategy())
            .prop_map(|(path, target)| FsOp::Symlink { path, target }),
        1 => path_strategy().prop_map(|path| FsOp::Mkfifo { path }),
        3 => (path_strategy(), 0u64..400, data_strategy())
            .prop_map(|(path, offset, data)| FsOp::Write { path, offset, data }),
        1 => (path_strategy(), 0u64..400).prop_map(|(path, size)| FsOp::Truncate { path, size }),
        2 => (path_strategy(), 0u64..200, path_strategy(), 0u64..100, 1u64..100).prop_map(
            |(dst, dst_offset, src, src_offset, len)| FsOp::CloneRange {
                dst,
                dst_offset,
                src,
                src_offset,
                len,
            }
        ),
        4 => (path_strategy(), path_strategy()).prop_map(|(from, to)| FsOp::Rename { from, to }),
        2 => (path_strategy(), path_strategy())
            .prop_map(|(existing, path)| FsOp::Link { existing, path }),
        2 => path_strategy().prop_map(|path| FsOp::Unlink { path }),
    ]
}

fn metadata_op_strategy() -> impl Strategy<Value = FsOp> {
    prop_oneof![
        2 => path_strategy().prop_map(|path| FsOp::Rmdir { path }),
        1 => (path_strategy(), 0u32..0o1000).prop_map(|(path, perm)| FsOp::Chmod { path, perm }),
        1 => (path_strategy(), 0u32..3, 0u32..3)
            .prop_map(|(path, uid, gid)| FsOp::Chown { path, uid, gid }),
        1 => (path_strategy(), xattr_name_strategy(), prop::collection::vec(any::<u8>(), 0..8))
            .prop_map(|(path, name, value)| FsOp::SetXattr { path, name, value }),
        1 => (path_strategy(), xattr_name_strategy())
            .prop_map(|(path, name)| FsOp::RemoveXattr { path, name }),
        1 => path_strategy().prop_map(|path| FsOp::Touch { path }),
        1 => any::<bool>().prop_map(|enabled| FsOp::ReuseNumbers { enabled }),
    ]
}

/// Strategy for a single operation.
pub fn fs_op_strategy() -> impl Strategy<Value = FsOp> {
    prop_oneof![
        23 => namespace_op_strategy(),
        8 => metadata_op_strategy(),
    ]
}

/// Strategy for a sequence of up to `max` operations.
pub fn fs_ops_strategy(max: usize) -> impl Strategy<Value = Vec<FsOp>> {
    prop::collection::vec(fs_op_strategy(), 0..=max)
}

/// Applies `op` to `tree`. Returns false if the tree rejected it.
pub fn apply_op(tree: &MemTree, op: &FsOp) -> bool {
    let result = match op {
        FsOp::Create { path, data } => tree.write_file(path, 0o644, data).map(|_| ()),
        FsOp::Mkdir { path } => tree.mkdir(path, 0o755).map(|_| ()),
        FsOp::Symlink { path, target } => tree.symlink(path, target).map(|_| ()),
        FsOp::Mkfifo { path } => tree.mknod(path, FileType::Fifo, 0o644, 0).map(|_| ()),
        FsOp::Write { path, offset, data } => tree.write(path, *offset, data),
        FsOp::Truncate { path, size } => tree.truncate(path, *size),
        FsOp::CloneRange {
            dst,
            dst_offset,
            src,
            src_offset,
            len,
        } => tree.clone_range(dst, *dst_offset, tree, src, *src_offset, *len),
        FsOp::Rename { from, to } => tree.rename(from, to),
        FsOp::Link { existing, path } => tree.link(existing, path),
        FsOp::Unlink { path } => tree.unlink(path),
        FsOp::Rmdir { path } => tree.rmdir(path),
        FsOp::Chmod { path, perm } => tree.chmod(path, *perm),
        FsOp::Chown { path, uid, gid } => tree.chown(path, *uid, *gid),
        FsOp::SetXattr { path, name, value } => tree.set_xattr(path, name, value),
        FsOp::RemoveXattr { path, name } => tree.remove_xattr(path, name),
        FsOp::Touch { path } => tree.touch(path),
        FsOp::ReuseNumbers { enabled } => {
            tree.reuse_inode_numbers(*enabled);
            Ok(())
        }
    };
    result.is_ok()
}

/// Applies every operation in order, skipping rejected ones. Returns how
/// many were applied.
pub fn apply_ops(tree: &MemTree, ops: &[FsOp]) -> usize {
    ops.iter().filter(|op| apply_op(tree, op)).count()
}
