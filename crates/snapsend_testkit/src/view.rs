//! Canonical, comparable views of a file tree.
//!
//! A [`FsView`] maps every path to what a user can observe there: type,
//! permissions, ownership, content, xattrs and timestamps, plus which paths
//! share an inode. Views built from a source snapshot and from the
//! receiver's copy of it must be equal after a correct send.

use crate::receiver::{NodeKind, ReceivedTree, ROOT_NODE};
use serde::Serialize;
use snapsend_tree::items::S_IFMT;
use snapsend_tree::{FileType, MemTree, TreeReader, TreeResult, ROOT_DIR_INO};
use std::collections::{BTreeMap, BTreeSet};

/// Xattrs whose empty value a receiver stores as an empty ACL header.
const POSIX_ACL_NAMES: [&[u8]; 2] = [b"system.posix_acl_access", b"system.posix_acl_default"];

/// Observable kind of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Symlink,
    /// Device node, fifo or socket, with its type bits.
    Special(u32),
}

/// Everything observable at one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryView {
    /// Type of the entry.
    pub kind: EntryKind,
    /// Permission bits; zero for symlinks.
    pub perm: u32,
    /// Owner; zero for symlinks.
    pub uid: u32,
    /// Group; zero for symlinks.
    pub gid: u32,
    /// Device number of special files.
    pub rdev: u64,
    /// File content or symlink target.
    pub data: Vec<u8>,
    /// Extended attributes, by name.
    pub xattrs: BTreeMap<String, Vec<u8>>,
    /// `[atime, mtime, ctime]` as `(sec, nsec)`.
    pub times: [(u64, u32); 3],
}

/// A whole tree, keyed by path. The root directory is the empty path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FsView {
    /// Every reachable path.
    pub entries: BTreeMap<String, EntryView>,
    /// Sets of two or more paths naming the same inode.
    pub links: BTreeSet<Vec<String>>,
}

impl FsView {
    /// Builds the view of a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be read.
    pub fn from_tree(tree: &MemTree) -> TreeResult<Self> {
        let mut inodes: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        let mut entries = BTreeMap::new();
        let mut pending = vec![(ROOT_DIR_INO, String::new())];
        while let Some((ino, path)) = pending.pop() {
            let item = tree
                .inode(ino)?
                .ok_or_else(|| snapsend_tree::TreeError::not_found(format!("inode {ino}")))?;
            let file_type = item.file_type();
            let (kind, data) = match file_type {
                Some(FileType::Directory) => {
                    for (name, child) in tree.read_dir(ino)? {
                        pending.push((child, join(&path, &name)));
                    }
                    (EntryKind::Dir, Vec::new())
                }
                Some(FileType::Regular) => (EntryKind::File, tree.read_file(ino)?),
                Some(FileType::Symlink) => (EntryKind::Symlink, tree.read_link(ino)?),
                _ => (EntryKind::Special(item.mode & S_IFMT), Vec::new()),
            };
            let xattrs = tree
                .xattrs(ino)?
                .into_iter()
                .map(|(name, value)| normalize_xattr(&name, value))
                .collect();
            let entry = EntryView {
                perm: item.mode & 0o7777,
                uid: item.uid,
                gid: item.gid,
                rdev: item.rdev,
                data,
                xattrs,
                times: [
                    (item.atime.sec, item.atime.nsec),
                    (item.mtime.sec, item.mtime.nsec),
                    (item.ctime.sec, item.ctime.nsec),
                ],
                kind,
            };
            inodes.entry(ino).or_default().push(path.clone());
            entries.insert(path, mask_symlink(entry));
        }
        Ok(Self {
            entries,
            links: link_groups(inodes),
        })
    }

    /// Builds the view of a received subvolume.
    #[must_use]
    pub fn from_received(tree: &ReceivedTree) -> Self {
        let mut nodes: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        let mut entries = BTreeMap::new();
        let mut pending = vec![(ROOT_NODE, String::new())];
        while let Some((id, path)) = pending.pop() {
            let Some(node) = tree.node(id) else {
                continue;
            };
            let (kind, data, rdev) = match &node.kind {
                NodeKind::Dir(children) => {
                    for (name, child) in children {
                        pending.push((*child, join(&path, name)));
                    }
                    (EntryKind::Dir, Vec::new(), 0)
                }
                NodeKind::File(data) => (EntryKind::File, data.clone(), 0),
                NodeKind::Symlink(target) => (EntryKind::Symlink, target.clone(), 0),
                NodeKind::Special { rdev } => {
                    (EntryKind::Special(node.mode & S_IFMT), Vec::new(), *rdev)
                }
            };
            let entry = EntryView {
                kind,
                perm: node.mode & 0o7777,
                uid: node.uid,
                gid: node.gid,
                rdev,
                data,
                xattrs: node
                    .xattrs
                    .iter()
                    .map(|(name, value)| (String::from_utf8_lossy(name).into_owned(), value.clone()))
                    .collect(),
                times: [node.atime, node.mtime, node.ctime],
            };
            nodes.entry(id).or_default().push(path.clone());
            entries.insert(path, mask_symlink(entry));
        }
        Self {
            entries,
            links: link_groups(nodes),
        }
    }

    /// Lists the differences against `other`, one line per path.
    #[must_use]
    pub fn diff(&self, other: &Self) -> Vec<String> {
        let mut out = Vec::new();
        let paths: BTreeSet<&String> = self.entries.keys().chain(other.entries.keys()).collect();
        for path in paths {
            match (self.entries.get(path), other.entries.get(path)) {
                (Some(left), Some(right)) if left != right => {
                    out.push(format!("~ /{path}: {left:?} != {right:?}"));
                }
                (Some(_), None) => out.push(format!("- /{path}")),
                (None, Some(_)) => out.push(format!("+ /{path}")),
                _ => {}
            }
        }
        if self.links != other.links {
            out.push(format!("links: {:?} != {:?}", self.links, other.links));
        }
        out
    }

    /// Serializes the view for failure messages and golden files.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unserializable: {e}>"))
    }
}

fn join(dir: &str, name: &[u8]) -> String {
    let name = String::from_utf8_lossy(name);
    if dir.is_empty() {
        name.into_owned()
    } else {
        format!("{dir}/{name}")
    }
}

fn normalize_xattr(name: &[u8], value: Vec<u8>) -> (String, Vec<u8>) {
    let value = if value.is_empty() && POSIX_ACL_NAMES.contains(&name) {
        2u32.to_le_bytes().to_vec()
    } else {
        value
    };
    (String::from_utf8_lossy(name).into_owned(), value)
}

// Symlink ownership and permissions are not transferred.
fn mask_symlink(mut entry: EntryView) -> EntryView {
    if entry.kind == EntryKind::Symlink {
        entry.perm = 0;
        entry.uid = 0;
        entry.gid = 0;
    }
    entry
}

fn link_groups(inodes: BTreeMap<u64, Vec<String>>) -> BTreeSet<Vec<String>> {
    inodes
        .into_values()
        .filter(|paths| paths.len() > 1)
        .map(|mut paths| {
            paths.sort();
            paths
        })
        .collect()
}
