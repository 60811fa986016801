//! In-memory filesystem holding a shared data disk and a set of snapshots.

use crate::error::TreeResult;
use crate::items::{ExtentBody, FileExtentItem};
use crate::key::ItemType;
use crate::memtree::MemTree;
use crate::reader::{
    BackrefHit, BackrefResolver, ExtentLocation, SnapshotId, SnapshotMeta, TreeReader,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Alignment of allocated disk extents.
const SECTOR_SIZE: u64 = 4096;

/// First byte number handed out by the allocator. Zero marks a hole.
const FIRST_BYTENR: u64 = 1 << 20;

/// First snapshot root id.
const FIRST_ROOT_ID: u64 = 256;

/// Append-only store of immutable data extents shared by all snapshots.
#[derive(Debug)]
pub struct MemDisk {
    extents: RwLock<BTreeMap<u64, Arc<[u8]>>>,
    next_bytenr: AtomicU64,
}

impl Default for MemDisk {
    fn default() -> Self {
        Self {
            extents: RwLock::new(BTreeMap::new()),
            next_bytenr: AtomicU64::new(FIRST_BYTENR),
        }
    }
}

impl MemDisk {
    /// Stores `data` in a new extent and returns its byte number.
    pub fn allocate(&self, data: &[u8]) -> u64 {
        let len = (data.len() as u64).max(1);
        let aligned = len.div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        let bytenr = self.next_bytenr.fetch_add(aligned, Ordering::SeqCst);
        self.extents.write().insert(bytenr, Arc::from(data));
        bytenr
    }

    /// Fills `out` with the bytes starting `offset` bytes into the extent at
    /// `bytenr`. Bytes past the end of the extent read as zero.
    pub fn read_into(&self, bytenr: u64, offset: u64, out: &mut [u8]) {
        let extents = self.extents.read();
        let Some(data) = extents.get(&bytenr) else {
            out.fill(0);
            return;
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let avail = &data[start..];
        let n = avail.len().min(out.len());
        out[..n].copy_from_slice(&avail[..n]);
        out[n..].fill(0);
    }

    /// Number of stored extents.
    #[must_use]
    pub fn extent_count(&self) -> usize {
        self.extents.read().len()
    }
}

/// A filesystem made of snapshots that share one [`MemDisk`].
///
/// Snapshots are copy-on-write: [`MemFs::snapshot`] copies the item map of
/// its source, so both trees reference the same data extents until one of
/// them is rewritten.
///
/// # Example
///
/// ```rust
/// use snapsend_tree::MemFs;
///
/// let fs = MemFs::new();
/// let base = fs.create_subvolume("base");
/// base.write_file("hello.txt", 0o644, b"hello world!").unwrap();
/// let next = fs.snapshot(&base, "next");
/// next.rename("hello.txt", "greeting.txt").unwrap();
/// assert!(next.lookup_path("greeting.txt").unwrap().is_some());
/// assert!(base.lookup_path("hello.txt").unwrap().is_some());
/// ```
#[derive(Debug)]
pub struct MemFs {
    disk: Arc<MemDisk>,
    transid: Arc<AtomicU64>,
    next_root: AtomicU64,
    trees: RwLock<Vec<Arc<MemTree>>>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self {
            disk: Arc::new(MemDisk::default()),
            transid: Arc::new(AtomicU64::new(1)),
            next_root: AtomicU64::new(FIRST_ROOT_ID),
            trees: RwLock::new(Vec::new()),
        }
    }
}

impl MemFs {
    /// Creates an empty filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_meta(&self, name: &str) -> SnapshotMeta {
        SnapshotMeta {
            id: SnapshotId::new(self.next_root.fetch_add(1, Ordering::SeqCst)),
            uuid: Uuid::new_v4(),
            name: name.to_string(),
        }
    }

    /// Creates a new subvolume containing only its root directory.
    pub fn create_subvolume(&self, name: &str) -> Arc<MemTree> {
        let tree = Arc::new(MemTree::empty(
            self.next_meta(name),
            Arc::clone(&self.disk),
            Arc::clone(&self.transid),
        ));
        self.trees.write().push(Arc::clone(&tree));
        tree
    }

    /// Creates a writable snapshot of `source`.
    pub fn snapshot(&self, source: &MemTree, name: &str) -> Arc<MemTree> {
        let tree = Arc::new(source.fork(self.next_meta(name)));
        self.trees.write().push(Arc::clone(&tree));
        tree
    }

    /// Finds a snapshot by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<MemTree>> {
        self.trees
            .read()
            .iter()
            .find(|tree| tree.meta().name == name)
            .cloned()
    }

    /// Returns every snapshot in creation order.
    #[must_use]
    pub fn trees(&self) -> Vec<Arc<MemTree>> {
        self.trees.read().clone()
    }

    /// The shared data disk.
    #[must_use]
    pub fn disk(&self) -> &Arc<MemDisk> {
        &self.disk
    }
}

impl BackrefResolver for MemFs {
    fn find_referencing_inodes(&self, location: ExtentLocation) -> TreeResult<Vec<BackrefHit>> {
        let mut hits = Vec::new();
        for tree in self.trees.read().iter() {
            let root = tree.meta().id;
            for item in tree.items_of_type(ItemType::ExtentData) {
                let extent = FileExtentItem::decode(&item.key, &item.data)?;
                let disk = match extent.body {
                    ExtentBody::Regular(disk) | ExtentBody::Prealloc(disk) => disk,
                    ExtentBody::Inline(_) => continue,
                };
                if disk.disk_bytenr != location.disk_bytenr
                    || location.offset < disk.offset
                    || location.offset >= disk.offset + disk.num_bytes
                {
                    continue;
                }
                hits.push(BackrefHit {
                    ino: item.key.objectid,
                    offset: item.key.offset + (location.offset - disk.offset),
                    root,
                });
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_distinct() {
        let disk = MemDisk::default();
        let a = disk.allocate(b"abc");
        let b = disk.allocate(&[7u8; 5000]);
        assert_eq!(a % SECTOR_SIZE, 0);
        assert_eq!(b, a + SECTOR_SIZE);
        assert_eq!(disk.extent_count(), 2);

        let mut out = [1u8; 5];
        disk.read_into(a, 1, &mut out);
        assert_eq!(&out, b"bc\0\0\0");
    }

    #[test]
    fn snapshot_ids_increase() {
        let fs = MemFs::new();
        let a = fs.create_subvolume("a");
        let b = fs.snapshot(&a, "b");
        assert!(a.meta().id < b.meta().id);
        assert_ne!(a.meta().uuid, b.meta().uuid);
        assert_eq!(fs.get("b").unwrap().meta().id, b.meta().id);
        assert!(fs.get("missing").is_none());
    }

    #[test]
    fn backrefs_span_snapshots() {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        let ino = base.write_file("f", 0o644, &[1u8; 8192]).unwrap();
        let next = fs.snapshot(&base, "next");

        let extents = base.items_of(ino, ItemType::ExtentData).unwrap();
        let disk = FileExtentItem::decode(&extents[0].key, &extents[0].data)
            .unwrap()
            .disk()
            .copied()
            .unwrap();

        let hits = fs
            .find_referencing_inodes(ExtentLocation {
                disk_bytenr: disk.disk_bytenr,
                offset: 4096,
            })
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.ino == ino && h.offset == 4096));
        assert!(hits.iter().any(|h| h.root == next.meta().id));
    }
}
