//! Mutable in-memory snapshot tree.

use crate::error::{TreeError, TreeResult};
use crate::items::{
    decode_dir_entries, decode_inode_refs, encode_dir_entries, encode_inode_refs, is_dir,
    is_regular, DirEntry, DiskExtent, ExtentBody, FileExtentItem, FileType, InodeItem,
    InodeRefEntry, Timespec, DIRENT_TYPE_XATTR, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG,
};
use crate::key::{name_hash, ItemType, Key, ROOT_DIR_INO};
use crate::memory::MemDisk;
use crate::reader::{ContentReader, SnapshotMeta, TreeItem, TreeReader};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Base of the synthetic clock: timestamps are `EPOCH + transid` seconds.
const EPOCH: u64 = 1_700_000_000;

/// Longest allowed directory entry name.
const NAME_MAX: usize = 255;

/// First directory index handed out in a directory.
const FIRST_DIR_INDEX: u64 = 2;

fn stamp(transid: u64) -> Timespec {
    Timespec::new(EPOCH + transid, 0)
}

fn components(path: &str) -> Vec<&[u8]> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(str::as_bytes)
        .collect()
}

fn display(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

#[derive(Debug, Clone)]
struct TreeState {
    items: BTreeMap<Key, Vec<u8>>,
    ctransid: u64,
    next_ino: u64,
    next_index: HashMap<u64, u64>,
    freed: BTreeSet<u64>,
    reuse_freed: bool,
}

impl TreeState {
    fn inode(&self, ino: u64) -> TreeResult<InodeItem> {
        let key = Key::inode(ino);
        let data = self
            .items
            .get(&key)
            .ok_or_else(|| TreeError::not_found(format!("inode {ino}")))?;
        InodeItem::decode(&key, data)
    }

    fn put_inode(&mut self, ino: u64, item: &InodeItem) {
        self.items.insert(Key::inode(ino), item.encode());
    }

    fn touch(&mut self, ino: u64, transid: u64, data_changed: bool) -> TreeResult<()> {
        let mut item = self.inode(ino)?;
        item.transid = transid;
        item.ctime = stamp(transid);
        if data_changed {
            item.mtime = stamp(transid);
        }
        self.put_inode(ino, &item);
        Ok(())
    }

    fn child(&self, dir: u64, name: &[u8]) -> TreeResult<Option<u64>> {
        let key = Key::new(dir, ItemType::DirItem, name_hash(name));
        let Some(data) = self.items.get(&key) else {
            return Ok(None);
        };
        Ok(decode_dir_entries(&key, data)?
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.location.objectid))
    }

    fn walk(&self, comps: &[&[u8]], path: &str) -> TreeResult<u64> {
        let mut ino = ROOT_DIR_INO;
        for comp in comps {
            if !is_dir(self.inode(ino)?.mode) {
                return Err(TreeError::invalid(format!("{path}: not a directory")));
            }
            ino = self
                .child(ino, comp)?
                .ok_or_else(|| TreeError::not_found(path.to_string()))?;
        }
        Ok(ino)
    }

    fn resolve(&self, path: &str) -> TreeResult<u64> {
        self.walk(&components(path), path)
    }

    fn resolve_parent<'p>(&self, path: &'p str) -> TreeResult<(u64, &'p [u8])> {
        let mut comps = components(path);
        let name = comps
            .pop()
            .ok_or_else(|| TreeError::invalid("the root directory has no parent"))?;
        let dir = self.walk(&comps, path)?;
        if !is_dir(self.inode(dir)?.mode) {
            return Err(TreeError::invalid(format!("{path}: parent is not a directory")));
        }
        Ok((dir, name))
    }

    fn new_inode(&mut self, mode: u32, rdev: u64, transid: u64) -> u64 {
        let reused = if self.reuse_freed {
            self.freed.pop_first()
        } else {
            None
        };
        let ino = match reused {
            Some(ino) => ino,
            None => {
                self.next_ino += 1;
                self.next_ino - 1
            }
        };
        let item = InodeItem {
            generation: transid,
            transid,
            mode,
            rdev,
            atime: stamp(transid),
            mtime: stamp(transid),
            ctime: stamp(transid),
            ..InodeItem::default()
        };
        self.put_inode(ino, &item);
        ino
    }

    fn add_entry(&mut self, dir: u64, name: &[u8], ino: u64, transid: u64) -> TreeResult<()> {
        if name.is_empty() || name.len() > NAME_MAX || name.contains(&b'/') {
            return Err(TreeError::invalid(format!("invalid name {:?}", display(name))));
        }
        if self.child(dir, name)?.is_some() {
            return Err(TreeError::AlreadyExists(display(name)));
        }
        let mut inode = self.inode(ino)?;
        let kind = inode
            .file_type()
            .map_or(FileType::Regular.dirent_type(), FileType::dirent_type);

        let counter = self.next_index.entry(dir).or_insert(FIRST_DIR_INDEX);
        let index = *counter;
        *counter += 1;

        let entry = DirEntry {
            location: Key::inode(ino),
            kind,
            name: name.to_vec(),
            data: Vec::new(),
        };
        let item_key = Key::new(dir, ItemType::DirItem, name_hash(name));
        let mut entries = match self.items.get(&item_key) {
            Some(data) => decode_dir_entries(&item_key, data)?,
            None => Vec::new(),
        };
        entries.push(entry.clone());
        self.items.insert(item_key, encode_dir_entries(&entries));
        self.items.insert(
            Key::new(dir, ItemType::DirIndex, index),
            encode_dir_entries(&[entry]),
        );

        let ref_key = Key::new(ino, ItemType::InodeRef, dir);
        let mut refs = match self.items.get(&ref_key) {
            Some(data) => decode_inode_refs(&ref_key, data)?,
            None => Vec::new(),
        };
        refs.push(InodeRefEntry {
            index,
            name: name.to_vec(),
        });
        self.items.insert(ref_key, encode_inode_refs(&refs));

        inode.nlink += 1;
        inode.transid = transid;
        inode.ctime = stamp(transid);
        self.put_inode(ino, &inode);
        self.touch(dir, transid, true)
    }

    fn remove_entry(&mut self, dir: u64, name: &[u8], ino: u64, transid: u64) -> TreeResult<u32> {
        let item_key = Key::new(dir, ItemType::DirItem, name_hash(name));
        if let Some(data) = self.items.get(&item_key) {
            let mut entries = decode_dir_entries(&item_key, data)?;
            entries.retain(|e| e.name != name);
            if entries.is_empty() {
                self.items.remove(&item_key);
            } else {
                self.items.insert(item_key, encode_dir_entries(&entries));
            }
        }

        let ref_key = Key::new(ino, ItemType::InodeRef, dir);
        let data = self
            .items
            .get(&ref_key)
            .ok_or_else(|| TreeError::not_found(format!("ref of inode {ino} in {dir}")))?;
        let mut refs = decode_inode_refs(&ref_key, data)?;
        let pos = refs
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| TreeError::not_found(display(name)))?;
        let removed = refs.remove(pos);
        if refs.is_empty() {
            self.items.remove(&ref_key);
        } else {
            self.items.insert(ref_key, encode_inode_refs(&refs));
        }
        self.items
            .remove(&Key::new(dir, ItemType::DirIndex, removed.index));

        let mut inode = self.inode(ino)?;
        inode.nlink = inode.nlink.saturating_sub(1);
        inode.transid = transid;
        inode.ctime = stamp(transid);
        self.put_inode(ino, &inode);
        self.touch(dir, transid, true)?;
        Ok(inode.nlink)
    }

    fn purge_inode(&mut self, ino: u64) {
        let first = Key::inode(ino);
        let last = Key::new(ino, ItemType::ExtentData, u64::MAX);
        let keys: Vec<Key> = self.items.range(first..=last).map(|(k, _)| *k).collect();
        for key in keys {
            self.items.remove(&key);
        }
        self.next_index.remove(&ino);
        self.freed.insert(ino);
    }

    fn is_empty_dir(&self, ino: u64) -> bool {
        let first = Key::new(ino, ItemType::DirIndex, 0);
        let last = Key::new(ino, ItemType::DirIndex, u64::MAX);
        self.items.range(first..=last).next().is_none()
    }

    fn is_ancestor(&self, ancestor: u64, mut ino: u64) -> TreeResult<bool> {
        while ino != ROOT_DIR_INO {
            if ino == ancestor {
                return Ok(true);
            }
            let first = Key::new(ino, ItemType::InodeRef, 0);
            let last = Key::new(ino, ItemType::InodeRef, u64::MAX);
            match self.items.range(first..=last).next() {
                Some((key, _)) => ino = key.offset,
                None => return Ok(false),
            }
        }
        Ok(ancestor == ROOT_DIR_INO)
    }

    fn extents_overlapping(
        &self,
        ino: u64,
        start: u64,
        end: u64,
    ) -> TreeResult<Vec<(Key, FileExtentItem)>> {
        let first = Key::new(ino, ItemType::ExtentData, 0);
        let last = Key::new(ino, ItemType::ExtentData, end);
        let mut out = Vec::new();
        for (key, data) in self.items.range(first..last) {
            let extent = FileExtentItem::decode(key, data)?;
            if key.offset + extent.len() > start {
                out.push((*key, extent));
            }
        }
        Ok(out)
    }

    /// Removes file data in `[start, end)`, splitting extents that straddle
    /// either boundary.
    fn punch(&mut self, ino: u64, start: u64, end: u64) -> TreeResult<()> {
        for (key, extent) in self.extents_overlapping(ino, start, end)? {
            self.items.remove(&key);
            let ext_end = key.offset + extent.len();
            if key.offset < start {
                let head = clip(&extent, 0, start - key.offset);
                self.items.insert(key, head.encode());
            }
            if ext_end > end {
                let tail = clip(&extent, end - key.offset, ext_end - end);
                self.items.insert(
                    Key::new(ino, ItemType::ExtentData, end),
                    tail.encode(),
                );
            }
        }
        Ok(())
    }

    fn fill_hole(&mut self, ino: u64, start: u64, end: u64, transid: u64) {
        if end <= start {
            return;
        }
        let hole = FileExtentItem::regular(
            transid,
            DiskExtent {
                disk_bytenr: 0,
                disk_num_bytes: 0,
                offset: 0,
                num_bytes: end - start,
            },
        );
        self.items
            .insert(Key::new(ino, ItemType::ExtentData, start), hole.encode());
    }

    fn regular_inode(&self, path: &str) -> TreeResult<(u64, InodeItem)> {
        let ino = self.resolve(path)?;
        let inode = self.inode(ino)?;
        if !is_regular(inode.mode) {
            return Err(TreeError::invalid(format!("{path}: not a regular file")));
        }
        Ok((ino, inode))
    }
}

/// Returns the part of `extent` that starts `skip` bytes in and is `len`
/// bytes long.
fn clip(extent: &FileExtentItem, skip: u64, len: u64) -> FileExtentItem {
    let body = match &extent.body {
        ExtentBody::Inline(data) => {
            let from = usize::try_from(skip).unwrap_or(usize::MAX).min(data.len());
            let to = usize::try_from(skip + len)
                .unwrap_or(usize::MAX)
                .min(data.len());
            ExtentBody::Inline(data[from..to].to_vec())
        }
        ExtentBody::Regular(disk) => ExtentBody::Regular(clip_disk(disk, skip, len)),
        ExtentBody::Prealloc(disk) => ExtentBody::Prealloc(clip_disk(disk, skip, len)),
    };
    FileExtentItem {
        body,
        ..extent.clone()
    }
}

fn clip_disk(disk: &DiskExtent, skip: u64, len: u64) -> DiskExtent {
    DiskExtent {
        offset: if disk.is_hole() { 0 } else { disk.offset + skip },
        num_bytes: len,
        ..*disk
    }
}

/// A snapshot tree held in memory.
///
/// Path arguments are `/`-separated and relative to the snapshot root;
/// the empty path names the root directory. Every mutation runs in its own
/// transaction and advances [`TreeReader::ctransid`].
#[derive(Debug)]
pub struct MemTree {
    meta: SnapshotMeta,
    disk: Arc<MemDisk>,
    transid: Arc<AtomicU64>,
    state: RwLock<TreeState>,
}

impl MemTree {
    pub(crate) fn empty(meta: SnapshotMeta, disk: Arc<MemDisk>, transid: Arc<AtomicU64>) -> Self {
        let t = transid.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = TreeState {
            items: BTreeMap::new(),
            ctransid: t,
            next_ino: ROOT_DIR_INO + 1,
            next_index: HashMap::new(),
            freed: BTreeSet::new(),
            reuse_freed: false,
        };
        let root = InodeItem {
            generation: t,
            transid: t,
            nlink: 1,
            mode: S_IFDIR | 0o755,
            atime: stamp(t),
            mtime: stamp(t),
            ctime: stamp(t),
            ..InodeItem::default()
        };
        state.put_inode(ROOT_DIR_INO, &root);
        Self {
            meta,
            disk,
            transid,
            state: RwLock::new(state),
        }
    }

    pub(crate) fn fork(&self, meta: SnapshotMeta) -> Self {
        let mut state = self.state.read().clone();
        state.ctransid = self.transid.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            meta,
            disk: Arc::clone(&self.disk),
            transid: Arc::clone(&self.transid),
            state: RwLock::new(state),
        }
    }

    fn begin(&self) -> (RwLockWriteGuard<'_, TreeState>, u64) {
        let t = self.transid.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write();
        state.ctransid = t;
        (state, t)
    }

    fn create_node(&self, path: &str, mode: u32, rdev: u64, inline: Option<&[u8]>) -> TreeResult<u64> {
        let (mut st, t) = self.begin();
        let (dir, name) = st.resolve_parent(path)?;
        if st.child(dir, name)?.is_some() {
            return Err(TreeError::AlreadyExists(path.to_string()));
        }
        let ino = st.new_inode(mode, rdev, t);
        if let Some(data) = inline {
            let mut inode = st.inode(ino)?;
            inode.size = data.len() as u64;
            st.put_inode(ino, &inode);
            st.items.insert(
                Key::new(ino, ItemType::ExtentData, 0),
                FileExtentItem::inline(t, data.to_vec()).encode(),
            );
        }
        st.add_entry(dir, name, ino, t)?;
        Ok(ino)
    }

    /// Makes new inodes take the lowest number freed by an earlier unlink
    /// or rmdir before drawing a fresh one. Snapshots taken afterwards
    /// inherit the setting and the freed numbers.
    pub fn reuse_inode_numbers(&self, enabled: bool) {
        self.state.write().reuse_freed = enabled;
    }

    /// Creates a directory.
    pub fn mkdir(&self, path: &str, perm: u32) -> TreeResult<u64> {
        self.create_node(path, S_IFDIR | (perm & 0o7777), 0, None)
    }

    /// Creates an empty regular file.
    pub fn create(&self, path: &str, perm: u32) -> TreeResult<u64> {
        self.create_node(path, S_IFREG | (perm & 0o7777), 0, None)
    }

    /// Creates a regular file holding `data`.
    pub fn write_file(&self, path: &str, perm: u32, data: &[u8]) -> TreeResult<u64> {
        let ino = self.create(path, perm)?;
        self.write(path, 0, data)?;
        Ok(ino)
    }

    /// Creates a device node, fifo or socket.
    pub fn mknod(&self, path: &str, file_type: FileType, perm: u32, rdev: u64) -> TreeResult<u64> {
        if matches!(
            file_type,
            FileType::Regular | FileType::Directory | FileType::Symlink
        ) {
            return Err(TreeError::invalid(format!("{path}: mknod of {file_type:?}")));
        }
        self.create_node(path, file_type.mode_bits() | (perm & 0o7777), rdev, None)
    }

    /// Creates a symbolic link pointing at `target`.
    pub fn symlink(&self, path: &str, target: &str) -> TreeResult<u64> {
        self.create_node(path, S_IFLNK | 0o777, 0, Some(target.as_bytes()))
    }

    /// Writes `data` at `offset`, extending the file as needed.
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let (ino, mut inode) = st.regular_inode(path)?;
        if !data.is_empty() {
            let end = offset + data.len() as u64;
            st.punch(ino, offset, end)?;
            st.fill_hole(ino, inode.size, offset, t);
            let len = data.len() as u64;
            let disk = DiskExtent {
                disk_bytenr: self.disk.allocate(data),
                disk_num_bytes: len,
                offset: 0,
                num_bytes: len,
            };
            st.items.insert(
                Key::new(ino, ItemType::ExtentData, offset),
                FileExtentItem::regular(t, disk).encode(),
            );
            inode.size = inode.size.max(end);
        }
        inode.transid = t;
        inode.mtime = stamp(t);
        inode.ctime = stamp(t);
        st.put_inode(ino, &inode);
        Ok(())
    }

    /// Sets the size of a regular file, dropping or zero-filling data.
    pub fn truncate(&self, path: &str, size: u64) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let (ino, mut inode) = st.regular_inode(path)?;
        if size < inode.size {
            st.punch(ino, size, inode.size)?;
        } else {
            st.fill_hole(ino, inode.size, size, t);
        }
        inode.size = size;
        inode.transid = t;
        inode.mtime = stamp(t);
        inode.ctime = stamp(t);
        st.put_inode(ino, &inode);
        Ok(())
    }

    /// Shares `len` bytes of `src_path` in `src` (which may be this tree)
    /// at `dst_offset` of `dst_path`, without copying data.
    pub fn clone_range(
        &self,
        dst_path: &str,
        dst_offset: u64,
        src: &MemTree,
        src_path: &str,
        src_offset: u64,
        len: u64,
    ) -> TreeResult<()> {
        let pieces = {
            let st = src.state.read();
            let (src_ino, src_inode) = st.regular_inode(src_path)?;
            let src_end = src_offset + len;
            if src_end > src_inode.size {
                return Err(TreeError::invalid(format!(
                    "{src_path}: clone range ends at {src_end}, past size {}",
                    src_inode.size
                )));
            }
            let mut pieces = Vec::new();
            for (key, extent) in st.extents_overlapping(src_ino, src_offset, src_end)? {
                let start = key.offset.max(src_offset);
                let end = (key.offset + extent.len()).min(src_end);
                let piece = clip(&extent, start - key.offset, end - start);
                pieces.push((dst_offset + (start - src_offset), piece));
            }
            pieces
        };

        let (mut st, t) = self.begin();
        let (ino, mut inode) = st.regular_inode(dst_path)?;
        st.punch(ino, dst_offset, dst_offset + len)?;
        st.fill_hole(ino, inode.size, dst_offset, t);
        for (offset, piece) in pieces {
            st.items
                .insert(Key::new(ino, ItemType::ExtentData, offset), piece.encode());
        }
        inode.size = inode.size.max(dst_offset + len);
        inode.transid = t;
        inode.mtime = stamp(t);
        inode.ctime = stamp(t);
        st.put_inode(ino, &inode);
        Ok(())
    }

    /// Adds `new_path` as another name of the inode at `existing`.
    pub fn link(&self, existing: &str, new_path: &str) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let ino = st.resolve(existing)?;
        if is_dir(st.inode(ino)?.mode) {
            return Err(TreeError::invalid(format!("{existing}: cannot link a directory")));
        }
        let (dir, name) = st.resolve_parent(new_path)?;
        st.add_entry(dir, name, ino, t)
    }

    /// Removes a non-directory name, deleting the inode with its last name.
    pub fn unlink(&self, path: &str) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let (dir, name) = st.resolve_parent(path)?;
        let ino = st
            .child(dir, name)?
            .ok_or_else(|| TreeError::not_found(path.to_string()))?;
        if is_dir(st.inode(ino)?.mode) {
            return Err(TreeError::invalid(format!("{path}: is a directory")));
        }
        if st.remove_entry(dir, name, ino, t)? == 0 {
            st.purge_inode(ino);
        }
        Ok(())
    }

    /// Removes an empty directory.
    pub fn rmdir(&self, path: &str) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let (dir, name) = st.resolve_parent(path)?;
        let ino = st
            .child(dir, name)?
            .ok_or_else(|| TreeError::not_found(path.to_string()))?;
        if !is_dir(st.inode(ino)?.mode) {
            return Err(TreeError::invalid(format!("{path}: not a directory")));
        }
        if !st.is_empty_dir(ino) {
            return Err(TreeError::invalid(format!("{path}: directory not empty")));
        }
        st.remove_entry(dir, name, ino, t)?;
        st.purge_inode(ino);
        Ok(())
    }

    /// Moves `from` to `to`, replacing a compatible existing entry.
    pub fn rename(&self, from: &str, to: &str) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let (src_dir, src_name) = st.resolve_parent(from)?;
        let ino = st
            .child(src_dir, src_name)?
            .ok_or_else(|| TreeError::not_found(from.to_string()))?;
        let moving_dir = is_dir(st.inode(ino)?.mode);
        let (dst_dir, dst_name) = st.resolve_parent(to)?;
        if moving_dir && st.is_ancestor(ino, dst_dir)? {
            return Err(TreeError::invalid(format!("{to}: inside {from}")));
        }

        if let Some(existing) = st.child(dst_dir, dst_name)? {
            if existing == ino {
                return Ok(());
            }
            let existing_dir = is_dir(st.inode(existing)?.mode);
            if existing_dir != moving_dir {
                return Err(TreeError::invalid(format!("{to}: type mismatch")));
            }
            if existing_dir && !st.is_empty_dir(existing) {
                return Err(TreeError::invalid(format!("{to}: directory not empty")));
            }
            let remaining = st.remove_entry(dst_dir, dst_name, existing, t)?;
            if existing_dir || remaining == 0 {
                st.purge_inode(existing);
            }
        }

        st.remove_entry(src_dir, src_name, ino, t)?;
        st.add_entry(dst_dir, dst_name, ino, t)
    }

    /// Sets an extended attribute.
    pub fn set_xattr(&self, path: &str, name: &str, value: &[u8]) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let ino = st.resolve(path)?;
        let key = Key::new(ino, ItemType::XattrItem, name_hash(name.as_bytes()));
        let mut entries = match st.items.get(&key) {
            Some(data) => decode_dir_entries(&key, data)?,
            None => Vec::new(),
        };
        entries.retain(|e| e.name != name.as_bytes());
        entries.push(DirEntry {
            location: Key::MIN,
            kind: DIRENT_TYPE_XATTR,
            name: name.as_bytes().to_vec(),
            data: value.to_vec(),
        });
        st.items.insert(key, encode_dir_entries(&entries));
        st.touch(ino, t, false)
    }

    /// Removes an extended attribute.
    pub fn remove_xattr(&self, path: &str, name: &str) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let ino = st.resolve(path)?;
        let key = Key::new(ino, ItemType::XattrItem, name_hash(name.as_bytes()));
        let data = st
            .items
            .get(&key)
            .ok_or_else(|| TreeError::not_found(format!("{path}: xattr {name}")))?;
        let mut entries = decode_dir_entries(&key, data)?;
        let before = entries.len();
        entries.retain(|e| e.name != name.as_bytes());
        if entries.len() == before {
            return Err(TreeError::not_found(format!("{path}: xattr {name}")));
        }
        if entries.is_empty() {
            st.items.remove(&key);
        } else {
            st.items.insert(key, encode_dir_entries(&entries));
        }
        st.touch(ino, t, false)
    }

    /// Changes permission bits.
    pub fn chmod(&self, path: &str, perm: u32) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let ino = st.resolve(path)?;
        let mut inode = st.inode(ino)?;
        inode.mode = (inode.mode & S_IFMT) | (perm & 0o7777);
        st.put_inode(ino, &inode);
        st.touch(ino, t, false)
    }

    /// Changes ownership.
    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let ino = st.resolve(path)?;
        let mut inode = st.inode(ino)?;
        inode.uid = uid;
        inode.gid = gid;
        st.put_inode(ino, &inode);
        st.touch(ino, t, false)
    }

    /// Updates the timestamps of an inode without other changes.
    pub fn touch(&self, path: &str) -> TreeResult<()> {
        let (mut st, t) = self.begin();
        let ino = st.resolve(path)?;
        st.touch(ino, t, true)
    }

    /// Resolves a path to an inode number.
    pub fn lookup_path(&self, path: &str) -> TreeResult<Option<u64>> {
        match self.state.read().resolve(path) {
            Ok(ino) => Ok(Some(ino)),
            Err(TreeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lists a directory as `(name, inode)` pairs in index order.
    pub fn read_dir(&self, dir: u64) -> TreeResult<Vec<(Vec<u8>, u64)>> {
        let st = self.state.read();
        let first = Key::new(dir, ItemType::DirIndex, 0);
        let last = Key::new(dir, ItemType::DirIndex, u64::MAX);
        let mut out = Vec::new();
        for (key, data) in st.items.range(first..=last) {
            for entry in decode_dir_entries(key, data)? {
                out.push((entry.name, entry.location.objectid));
            }
        }
        Ok(out)
    }

    /// Reads the whole content of a file.
    pub fn read_file(&self, ino: u64) -> TreeResult<Vec<u8>> {
        let size = self.state.read().inode(ino)?.size;
        self.read_range(ino, 0, usize::try_from(size).unwrap_or(usize::MAX))
    }

    /// Reads the target of a symbolic link.
    pub fn read_link(&self, ino: u64) -> TreeResult<Vec<u8>> {
        let st = self.state.read();
        let key = Key::new(ino, ItemType::ExtentData, 0);
        let data = st
            .items
            .get(&key)
            .ok_or_else(|| TreeError::not_found(format!("symlink target of {ino}")))?;
        match FileExtentItem::decode(&key, data)?.body {
            ExtentBody::Inline(target) => Ok(target),
            _ => Err(TreeError::corrupted(key, "symlink target is not inline")),
        }
    }

    /// Returns every extended attribute of an inode.
    pub fn xattrs(&self, ino: u64) -> TreeResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        let st = self.state.read();
        let first = Key::new(ino, ItemType::XattrItem, 0);
        let last = Key::new(ino, ItemType::XattrItem, u64::MAX);
        let mut out = BTreeMap::new();
        for (key, data) in st.items.range(first..=last) {
            for entry in decode_dir_entries(key, data)? {
                out.insert(entry.name, entry.data);
            }
        }
        Ok(out)
    }

    /// Returns a copy of every item of the given type across all inodes.
    #[must_use]
    pub fn items_of_type(&self, item_type: ItemType) -> Vec<TreeItem> {
        self.state
            .read()
            .items
            .iter()
            .filter(|(key, _)| key.item_type == item_type)
            .map(|(key, data)| TreeItem {
                key: *key,
                data: data.clone(),
            })
            .collect()
    }

    /// Number of items in the tree.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.state.read().items.len()
    }

    fn read_range(&self, ino: u64, offset: u64, len: usize) -> TreeResult<Vec<u8>> {
        let st = self.state.read();
        let size = st.inode(ino)?.size;
        let end = offset.saturating_add(len as u64).min(size);
        if offset >= end {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; usize::try_from(end - offset).unwrap_or(usize::MAX)];
        for (key, extent) in st.extents_overlapping(ino, offset, end)? {
            let start = key.offset.max(offset);
            let stop = (key.offset + extent.len()).min(end);
            let out = &mut buf[(start - offset) as usize..(stop - offset) as usize];
            let skip = start - key.offset;
            match &extent.body {
                ExtentBody::Inline(data) => {
                    let from = (skip as usize).min(data.len());
                    let to = (from + out.len()).min(data.len());
                    out[..to - from].copy_from_slice(&data[from..to]);
                }
                ExtentBody::Regular(disk) if !disk.is_hole() => {
                    self.disk
                        .read_into(disk.disk_bytenr, disk.offset + skip, out);
                }
                ExtentBody::Regular(_) | ExtentBody::Prealloc(_) => out.fill(0),
            }
        }
        Ok(buf)
    }
}

impl TreeReader for MemTree {
    fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    fn ctransid(&self) -> u64 {
        self.state.read().ctransid
    }

    fn lookup(&self, key: &Key) -> TreeResult<Option<Vec<u8>>> {
        Ok(self.state.read().items.get(key).cloned())
    }

    fn next_after(&self, key: &Key) -> TreeResult<Option<TreeItem>> {
        Ok(self
            .state
            .read()
            .items
            .range((Bound::Excluded(*key), Bound::Unbounded))
            .next()
            .map(|(key, data)| TreeItem {
                key: *key,
                data: data.clone(),
            }))
    }

    fn prev_at_or_before(&self, key: &Key) -> TreeResult<Option<TreeItem>> {
        Ok(self
            .state
            .read()
            .items
            .range(..=*key)
            .next_back()
            .map(|(key, data)| TreeItem {
                key: *key,
                data: data.clone(),
            }))
    }
}

impl ContentReader for MemTree {
    fn read(&self, ino: u64, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        Ok(self.read_range(ino, offset, len)?)
    }
}
