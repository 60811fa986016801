//! Item payload formats.
//!
//! All integers are little-endian and fixed width. Names are raw bytes
//! (not necessarily UTF-8) prefixed by a `u16` length.

use crate::error::{TreeError, TreeResult};
use crate::key::{Key, KEY_SIZE};

/// File type mask of a mode.
pub const S_IFMT: u32 = 0o170_000;
/// Socket.
pub const S_IFSOCK: u32 = 0o140_000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120_000;
/// Regular file.
pub const S_IFREG: u32 = 0o100_000;
/// Block device.
pub const S_IFBLK: u32 = 0o060_000;
/// Directory.
pub const S_IFDIR: u32 = 0o040_000;
/// Character device.
pub const S_IFCHR: u32 = 0o020_000;
/// Named pipe.
pub const S_IFIFO: u32 = 0o010_000;

/// Size of an encoded [`Timespec`].
pub const TIMESPEC_SIZE: usize = 12;

/// Size of an encoded [`InodeItem`].
pub const INODE_ITEM_SIZE: usize = 8 * 3 + 4 * 4 + 8 + TIMESPEC_SIZE * 3;

/// Kind of inode, derived from the type bits of its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Regular file.
    Regular,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named pipe.
    Fifo,
    /// Unix socket.
    Socket,
}

impl FileType {
    /// Classifies a mode. Returns `None` for unknown type bits.
    #[must_use]
    pub const fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(Self::Regular),
            S_IFDIR => Some(Self::Directory),
            S_IFLNK => Some(Self::Symlink),
            S_IFCHR => Some(Self::CharDevice),
            S_IFBLK => Some(Self::BlockDevice),
            S_IFIFO => Some(Self::Fifo),
            S_IFSOCK => Some(Self::Socket),
            _ => None,
        }
    }

    /// Type bits for a mode.
    #[must_use]
    pub const fn mode_bits(self) -> u32 {
        match self {
            Self::Regular => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
            Self::CharDevice => S_IFCHR,
            Self::BlockDevice => S_IFBLK,
            Self::Fifo => S_IFIFO,
            Self::Socket => S_IFSOCK,
        }
    }

    /// Directory entry type byte.
    #[must_use]
    pub const fn dirent_type(self) -> u8 {
        match self {
            Self::Regular => 1,
            Self::Directory => 2,
            Self::CharDevice => 3,
            Self::BlockDevice => 4,
            Self::Fifo => 5,
            Self::Socket => 6,
            Self::Symlink => 7,
        }
    }
}

/// Directory entry type byte used for xattr items.
pub const DIRENT_TYPE_XATTR: u8 = 8;

/// Returns true if `mode` describes a directory.
#[must_use]
pub const fn is_dir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

/// Returns true if `mode` describes a regular file.
#[must_use]
pub const fn is_regular(mode: u32) -> bool {
    mode & S_IFMT == S_IFREG
}

/// Returns true if `mode` describes a symbolic link.
#[must_use]
pub const fn is_symlink(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}

/// Bounds-checked little-endian reader over an item payload.
struct ItemCursor<'a> {
    key: &'a Key,
    data: &'a [u8],
    pos: usize,
}

impl<'a> ItemCursor<'a> {
    fn new(key: &'a Key, data: &'a [u8]) -> Self {
        Self { key, data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> TreeResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| TreeError::corrupted(self.key, "unexpected end of item"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> TreeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> TreeResult<u16> {
        let mut b = [0u8; 2];
        b.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(b))
    }

    fn u32(&mut self) -> TreeResult<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> TreeResult<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    fn timespec(&mut self) -> TreeResult<Timespec> {
        Ok(Timespec {
            sec: self.u64()?,
            nsec: self.u32()?,
        })
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn finish(&self) -> TreeResult<()> {
        if self.pos != self.data.len() {
            return Err(TreeError::corrupted(
                self.key,
                format!("{} trailing bytes", self.data.len() - self.pos),
            ));
        }
        Ok(())
    }
}

fn name_len(name: &[u8]) -> u16 {
    // Names are bounded by the mutation API; clamp rather than wrap.
    u16::try_from(name.len()).unwrap_or(u16::MAX)
}

/// A point in time with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timespec {
    /// Seconds since the epoch.
    pub sec: u64,
    /// Nanoseconds within the second.
    pub nsec: u32,
}

impl Timespec {
    /// Creates a timestamp.
    #[must_use]
    pub const fn new(sec: u64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.sec.to_le_bytes());
        buf.extend_from_slice(&self.nsec.to_le_bytes());
    }
}

/// Inode metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InodeItem {
    /// Generation the inode was created in.
    pub generation: u64,
    /// Transaction that last modified the inode.
    pub transid: u64,
    /// Size in bytes.
    pub size: u64,
    /// Number of names referencing the inode.
    pub nlink: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Type and permission bits.
    pub mode: u32,
    /// Device number for device nodes.
    pub rdev: u64,
    /// Last access.
    pub atime: Timespec,
    /// Last data modification.
    pub mtime: Timespec,
    /// Last status change.
    pub ctime: Timespec,
}

impl InodeItem {
    /// Encodes the inode item.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INODE_ITEM_SIZE);
        buf.extend_from_slice(&self.generation.to_le_bytes());
        buf.extend_from_slice(&self.transid.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.nlink.to_le_bytes());
        buf.extend_from_slice(&self.uid.to_le_bytes());
        buf.extend_from_slice(&self.gid.to_le_bytes());
        buf.extend_from_slice(&self.mode.to_le_bytes());
        buf.extend_from_slice(&self.rdev.to_le_bytes());
        self.atime.encode_into(&mut buf);
        self.mtime.encode_into(&mut buf);
        self.ctime.encode_into(&mut buf);
        buf
    }

    /// Decodes the inode item stored under `key`.
    pub fn decode(key: &Key, data: &[u8]) -> TreeResult<Self> {
        let mut cur = ItemCursor::new(key, data);
        let item = Self {
            generation: cur.u64()?,
            transid: cur.u64()?,
            size: cur.u64()?,
            nlink: cur.u32()?,
            uid: cur.u32()?,
            gid: cur.u32()?,
            mode: cur.u32()?,
            rdev: cur.u64()?,
            atime: cur.timespec()?,
            mtime: cur.timespec()?,
            ctime: cur.timespec()?,
        };
        cur.finish()?;
        Ok(item)
    }

    /// File type of the inode, if known.
    #[must_use]
    pub const fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.mode)
    }
}

/// One name of an inode inside a parent directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeRefEntry {
    /// Directory index of the name.
    pub index: u64,
    /// Entry name.
    pub name: Vec<u8>,
}

/// Encodes all names an inode has in one parent directory.
#[must_use]
pub fn encode_inode_refs(entries: &[InodeRefEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    for entry in entries {
        buf.extend_from_slice(&entry.index.to_le_bytes());
        buf.extend_from_slice(&name_len(&entry.name).to_le_bytes());
        buf.extend_from_slice(&entry.name);
    }
    buf
}

/// Decodes an inode ref item.
pub fn decode_inode_refs(key: &Key, data: &[u8]) -> TreeResult<Vec<InodeRefEntry>> {
    let mut cur = ItemCursor::new(key, data);
    let mut entries = Vec::new();
    while !cur.is_empty() {
        let index = cur.u64()?;
        let len = usize::from(cur.u16()?);
        let name = cur.take(len)?.to_vec();
        entries.push(InodeRefEntry { index, name });
    }
    if entries.is_empty() {
        return Err(TreeError::corrupted(key, "empty inode ref"));
    }
    Ok(entries)
}

/// A directory entry or extended attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Key of the inode the entry points at (unused for xattrs).
    pub location: Key,
    /// Entry type byte.
    pub kind: u8,
    /// Entry or attribute name.
    pub name: Vec<u8>,
    /// Attribute value (empty for directory entries).
    pub data: Vec<u8>,
}

/// Encodes a list of directory entries sharing one key.
#[must_use]
pub fn encode_dir_entries(entries: &[DirEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    for entry in entries {
        entry.location.encode_into(&mut buf);
        let data_len = u16::try_from(entry.data.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&data_len.to_le_bytes());
        buf.extend_from_slice(&name_len(&entry.name).to_le_bytes());
        buf.push(entry.kind);
        buf.extend_from_slice(&entry.name);
        buf.extend_from_slice(&entry.data[..usize::from(data_len)]);
    }
    buf
}

/// Decodes a dir item, dir index or xattr item.
pub fn decode_dir_entries(key: &Key, data: &[u8]) -> TreeResult<Vec<DirEntry>> {
    let mut cur = ItemCursor::new(key, data);
    let mut entries = Vec::new();
    while !cur.is_empty() {
        let location = Key::decode(cur.take(KEY_SIZE)?)?;
        let data_len = usize::from(cur.u16()?);
        let name_len = usize::from(cur.u16()?);
        let kind = cur.u8()?;
        let name = cur.take(name_len)?.to_vec();
        let data = cur.take(data_len)?.to_vec();
        entries.push(DirEntry {
            location,
            kind,
            name,
            data,
        });
    }
    if entries.is_empty() {
        return Err(TreeError::corrupted(key, "empty directory item"));
    }
    Ok(entries)
}

/// Reference from a file extent to on-disk data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiskExtent {
    /// Start of the on-disk extent; 0 denotes a hole.
    pub disk_bytenr: u64,
    /// Size of the on-disk extent.
    pub disk_num_bytes: u64,
    /// Offset into the on-disk extent where this file range starts.
    pub offset: u64,
    /// Length of the file range.
    pub num_bytes: u64,
}

impl DiskExtent {
    /// Returns true if the extent is a hole.
    #[must_use]
    pub const fn is_hole(&self) -> bool {
        self.disk_bytenr == 0
    }
}

/// Payload of a file extent item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtentBody {
    /// Data stored inside the item.
    Inline(Vec<u8>),
    /// Data stored in a disk extent.
    Regular(DiskExtent),
    /// Preallocated, unwritten range.
    Prealloc(DiskExtent),
}

/// A file extent item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExtentItem {
    /// Transaction that wrote the extent.
    pub generation: u64,
    /// Uncompressed size of the referenced data.
    pub ram_bytes: u64,
    /// Compression type (0 = none).
    pub compression: u8,
    /// Extent payload.
    pub body: ExtentBody,
}

const EXTENT_INLINE: u8 = 0;
const EXTENT_REGULAR: u8 = 1;
const EXTENT_PREALLOC: u8 = 2;

impl FileExtentItem {
    /// Creates an uncompressed regular extent.
    #[must_use]
    pub fn regular(generation: u64, disk: DiskExtent) -> Self {
        Self {
            generation,
            ram_bytes: disk.disk_num_bytes,
            compression: 0,
            body: ExtentBody::Regular(disk),
        }
    }

    /// Creates an inline extent.
    #[must_use]
    pub fn inline(generation: u64, data: Vec<u8>) -> Self {
        Self {
            generation,
            ram_bytes: data.len() as u64,
            compression: 0,
            body: ExtentBody::Inline(data),
        }
    }

    /// Disk reference for regular and preallocated extents.
    #[must_use]
    pub const fn disk(&self) -> Option<&DiskExtent> {
        match &self.body {
            ExtentBody::Regular(disk) | ExtentBody::Prealloc(disk) => Some(disk),
            ExtentBody::Inline(_) => None,
        }
    }

    /// Number of file bytes the extent covers.
    #[must_use]
    pub fn len(&self) -> u64 {
        match &self.body {
            ExtentBody::Inline(data) => data.len() as u64,
            ExtentBody::Regular(disk) | ExtentBody::Prealloc(disk) => disk.num_bytes,
        }
    }

    /// Returns true if the extent covers no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes the extent item.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(50);
        buf.extend_from_slice(&self.generation.to_le_bytes());
        buf.extend_from_slice(&self.ram_bytes.to_le_bytes());
        buf.push(self.compression);
        match &self.body {
            ExtentBody::Inline(data) => {
                buf.push(EXTENT_INLINE);
                buf.extend_from_slice(data);
            }
            ExtentBody::Regular(disk) | ExtentBody::Prealloc(disk) => {
                buf.push(if matches!(self.body, ExtentBody::Regular(_)) {
                    EXTENT_REGULAR
                } else {
                    EXTENT_PREALLOC
                });
                buf.extend_from_slice(&disk.disk_bytenr.to_le_bytes());
                buf.extend_from_slice(&disk.disk_num_bytes.to_le_bytes());
                buf.extend_from_slice(&disk.offset.to_le_bytes());
                buf.extend_from_slice(&disk.num_bytes.to_le_bytes());
            }
        }
        buf
    }

    /// Decodes the extent item stored under `key`.
    pub fn decode(key: &Key, data: &[u8]) -> TreeResult<Self> {
        let mut cur = ItemCursor::new(key, data);
        let generation = cur.u64()?;
        let ram_bytes = cur.u64()?;
        let compression = cur.u8()?;
        let kind = cur.u8()?;
        let body = match kind {
            EXTENT_INLINE => ExtentBody::Inline(cur.rest().to_vec()),
            EXTENT_REGULAR | EXTENT_PREALLOC => {
                let disk = DiskExtent {
                    disk_bytenr: cur.u64()?,
                    disk_num_bytes: cur.u64()?,
                    offset: cur.u64()?,
                    num_bytes: cur.u64()?,
                };
                if kind == EXTENT_REGULAR {
                    ExtentBody::Regular(disk)
                } else {
                    ExtentBody::Prealloc(disk)
                }
            }
            other => {
                return Err(TreeError::corrupted(
                    key,
                    format!("unknown extent kind {other}"),
                ))
            }
        };
        cur.finish()?;
        Ok(Self {
            generation,
            ram_bytes,
            compression,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ItemType;

    fn sample_inode() -> InodeItem {
        InodeItem {
            generation: 7,
            transid: 9,
            size: 12,
            nlink: 2,
            uid: 1000,
            gid: 100,
            mode: S_IFREG | 0o644,
            rdev: 0,
            atime: Timespec::new(1, 2),
            mtime: Timespec::new(3, 4),
            ctime: Timespec::new(5, 6),
        }
    }

    #[test]
    fn inode_item_has_fixed_size() {
        let encoded = sample_inode().encode();
        assert_eq!(encoded.len(), INODE_ITEM_SIZE);
        let decoded = InodeItem::decode(&Key::inode(257), &encoded).unwrap();
        assert_eq!(decoded, sample_inode());
    }

    #[test]
    fn inode_item_rejects_trailing_bytes() {
        let mut encoded = sample_inode().encode();
        encoded.push(0);
        assert!(InodeItem::decode(&Key::inode(257), &encoded).is_err());
    }

    #[test]
    fn inode_item_rejects_truncation() {
        let encoded = sample_inode().encode();
        assert!(InodeItem::decode(&Key::inode(257), &encoded[..40]).is_err());
    }

    #[test]
    fn file_type_classification() {
        assert_eq!(FileType::from_mode(S_IFDIR | 0o755), Some(FileType::Directory));
        assert_eq!(FileType::from_mode(S_IFLNK | 0o777), Some(FileType::Symlink));
        assert_eq!(FileType::from_mode(0o644), None);
        assert!(is_dir(S_IFDIR));
        assert!(is_regular(S_IFREG | 0o600));
        assert!(is_symlink(S_IFLNK));
    }

    #[test]
    fn inode_refs_keep_entry_order() {
        let key = Key::new(260, ItemType::InodeRef, 256);
        let entries = vec![
            InodeRefEntry {
                index: 2,
                name: b"a".to_vec(),
            },
            InodeRefEntry {
                index: 5,
                name: b"b".to_vec(),
            },
        ];
        let decoded = decode_inode_refs(&key, &encode_inode_refs(&entries)).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn empty_inode_ref_is_corrupt() {
        let key = Key::new(260, ItemType::InodeRef, 256);
        assert!(decode_inode_refs(&key, &[]).is_err());
    }

    #[test]
    fn dir_entries_carry_data() {
        let key = Key::new(257, ItemType::XattrItem, 1);
        let entries = vec![DirEntry {
            location: Key::MIN,
            kind: DIRENT_TYPE_XATTR,
            name: b"user.tag".to_vec(),
            data: b"blue".to_vec(),
        }];
        let decoded = decode_dir_entries(&key, &encode_dir_entries(&entries)).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn extent_kinds_decode() {
        let key = Key::new(257, ItemType::ExtentData, 0);
        let disk = DiskExtent {
            disk_bytenr: 4096,
            disk_num_bytes: 8192,
            offset: 4096,
            num_bytes: 4096,
        };
        let regular = FileExtentItem::regular(3, disk);
        assert_eq!(FileExtentItem::decode(&key, &regular.encode()).unwrap(), regular);
        assert_eq!(regular.len(), 4096);

        let inline = FileExtentItem::inline(3, b"target".to_vec());
        let decoded = FileExtentItem::decode(&key, &inline.encode()).unwrap();
        assert_eq!(decoded.body, ExtentBody::Inline(b"target".to_vec()));
        assert!(decoded.disk().is_none());
    }

    #[test]
    fn unknown_extent_kind_is_corrupt() {
        let key = Key::new(257, ItemType::ExtentData, 0);
        let mut encoded = FileExtentItem::inline(1, vec![1]).encode();
        encoded[17] = 9;
        assert!(FileExtentItem::decode(&key, &encoded).is_err());
    }
}
