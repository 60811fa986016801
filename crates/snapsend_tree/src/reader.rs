//! Read-side contracts consumed by the send engine.

use crate::error::{TreeError, TreeResult};
use crate::items::{decode_dir_entries, decode_inode_refs, DirEntry, InodeItem, InodeRefEntry};
use crate::key::{name_hash, ItemType, Key};
use std::fmt;
use std::io;
use uuid::Uuid;

/// Identifier of a snapshot (subvolume root id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// Creates a snapshot id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot:{}", self.0)
    }
}

/// Identity of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    /// Root id.
    pub id: SnapshotId,
    /// Globally unique identity, used by receivers to locate clone sources.
    pub uuid: Uuid,
    /// Name the snapshot is received under.
    pub name: String,
}

/// One item of a snapshot tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    /// Item key.
    pub key: Key,
    /// Encoded payload.
    pub data: Vec<u8>,
}

/// Ordered, read-only access to one snapshot's items.
///
/// # Invariants
///
/// - Items are visited in ascending [`Key`] order
/// - `ctransid` changes whenever the tree is modified
///
/// # Implementors
///
/// - [`crate::MemTree`] - in-memory copy-on-write tree
pub trait TreeReader {
    /// Identity of the snapshot.
    fn meta(&self) -> &SnapshotMeta;

    /// Current transaction counter of the snapshot.
    ///
    /// Readers compare this value across a walk to detect concurrent
    /// modification.
    fn ctransid(&self) -> u64;

    /// Returns the payload stored at exactly `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn lookup(&self, key: &Key) -> TreeResult<Option<Vec<u8>>>;

    /// Returns the first item whose key is strictly greater than `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn next_after(&self, key: &Key) -> TreeResult<Option<TreeItem>>;

    /// Returns the last item whose key is less than or equal to `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn prev_at_or_before(&self, key: &Key) -> TreeResult<Option<TreeItem>>;

    /// Returns the first item whose key is greater than or equal to `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn seek(&self, key: &Key) -> TreeResult<Option<TreeItem>> {
        if let Some(data) = self.lookup(key)? {
            return Ok(Some(TreeItem { key: *key, data }));
        }
        self.next_after(key)
    }

    /// Collects every item of `objectid` with the given type, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn items_of(&self, objectid: u64, item_type: ItemType) -> TreeResult<Vec<TreeItem>> {
        let mut items = Vec::new();
        let mut next = self.seek(&Key::new(objectid, item_type, 0))?;
        while let Some(item) = next {
            if !item.key.is(objectid, item_type) {
                break;
            }
            next = self.next_after(&item.key)?;
            items.push(item);
        }
        Ok(items)
    }

    /// Reads the inode item of `ino`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the item exists but cannot be decoded.
    fn inode(&self, ino: u64) -> TreeResult<Option<InodeItem>> {
        let key = Key::inode(ino);
        self.lookup(&key)?
            .map(|data| InodeItem::decode(&key, &data))
            .transpose()
    }

    /// Returns the first name of `ino`: the first entry of its lowest
    /// inode ref, as `(parent directory, name)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ref item cannot be decoded.
    fn first_ref(&self, ino: u64) -> TreeResult<Option<(u64, Vec<u8>)>> {
        let Some(item) = self.seek(&Key::new(ino, ItemType::InodeRef, 0))? else {
            return Ok(None);
        };
        if !item.key.is(ino, ItemType::InodeRef) {
            return Ok(None);
        }
        let mut entries = decode_inode_refs(&item.key, &item.data)?;
        let InodeRefEntry { name, .. } = entries.swap_remove(0);
        Ok(Some((item.key.offset, name)))
    }

    /// Looks up `name` inside directory `dir` and returns the inode it
    /// points at.
    ///
    /// # Errors
    ///
    /// Returns an error if the dir item cannot be decoded.
    fn lookup_dir_entry(&self, dir: u64, name: &[u8]) -> TreeResult<Option<DirEntry>> {
        let key = Key::new(dir, ItemType::DirItem, name_hash(name));
        let Some(data) = self.lookup(&key)? else {
            return Ok(None);
        };
        Ok(decode_dir_entries(&key, &data)?
            .into_iter()
            .find(|entry| entry.name == name))
    }
}

/// Location of file data on disk: the start of a disk extent plus an
/// offset into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtentLocation {
    /// Start of the disk extent.
    pub disk_bytenr: u64,
    /// Offset into the disk extent.
    pub offset: u64,
}

/// A file range that references a given disk location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackrefHit {
    /// Inode holding the reference.
    pub ino: u64,
    /// File offset at which the referenced byte appears.
    pub offset: u64,
    /// Snapshot containing the inode.
    pub root: SnapshotId,
}

/// Maps a disk location to every file range that references it.
pub trait BackrefResolver {
    /// Finds every `(inode, file offset, snapshot)` whose extent covers
    /// `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the extent metadata cannot be read.
    fn find_referencing_inodes(&self, location: ExtentLocation) -> TreeResult<Vec<BackrefHit>>;
}

/// Reads file content of the snapshot being sent.
pub trait ContentReader {
    /// Reads up to `len` bytes of `ino` starting at `offset`.
    ///
    /// Returns fewer bytes only at end of file.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be read.
    fn read(&self, ino: u64, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

impl From<TreeError> for io::Error {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
