//! Item keys and the ordering of the snapshot key space.

use crate::error::{TreeError, TreeResult};
use std::fmt;

/// Inode number of the root directory of every snapshot.
pub const ROOT_DIR_INO: u64 = 256;

/// Size of an encoded [`Key`].
pub const KEY_SIZE: usize = 17;

/// Kind of item stored under a key.
///
/// Variants are declared in ascending on-disk order so the derived `Ord`
/// matches the numeric ordering of the type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ItemType {
    /// Inode metadata, offset 0.
    InodeItem = 1,
    /// Back-reference from an inode to a parent directory, offset = parent.
    InodeRef = 12,
    /// Extended attribute, offset = name hash.
    XattrItem = 24,
    /// Directory entry by name hash, offset = name hash.
    DirItem = 84,
    /// Directory entry by insertion index, offset = index.
    DirIndex = 96,
    /// File extent, offset = file offset.
    ExtentData = 108,
}

impl ItemType {
    /// Converts a type byte to an item type.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::InodeItem),
            12 => Some(Self::InodeRef),
            24 => Some(Self::XattrItem),
            84 => Some(Self::DirItem),
            96 => Some(Self::DirIndex),
            108 => Some(Self::ExtentData),
            _ => None,
        }
    }

    /// Returns the type byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Short lowercase name used in logs and dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InodeItem => "inode_item",
            Self::InodeRef => "inode_ref",
            Self::XattrItem => "xattr_item",
            Self::DirItem => "dir_item",
            Self::DirIndex => "dir_index",
            Self::ExtentData => "extent_data",
        }
    }
}

/// A key in a snapshot tree: `(objectid, item_type, offset)`.
///
/// Keys sort lexicographically by field, which groups every item of one
/// inode together with its inode item first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    /// Inode number the item belongs to.
    pub objectid: u64,
    /// Item kind.
    pub item_type: ItemType,
    /// Type-specific offset.
    pub offset: u64,
}

impl Key {
    /// Smallest possible key.
    pub const MIN: Key = Key::new(0, ItemType::InodeItem, 0);

    /// Creates a new key.
    #[must_use]
    pub const fn new(objectid: u64, item_type: ItemType, offset: u64) -> Self {
        Self {
            objectid,
            item_type,
            offset,
        }
    }

    /// Key of the inode item for `ino`.
    #[must_use]
    pub const fn inode(ino: u64) -> Self {
        Self::new(ino, ItemType::InodeItem, 0)
    }

    /// Returns true if the key belongs to `objectid` and has `item_type`.
    #[must_use]
    pub fn is(&self, objectid: u64, item_type: ItemType) -> bool {
        self.objectid == objectid && self.item_type == item_type
    }

    /// Encodes the key (17 bytes, little-endian).
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.objectid.to_le_bytes());
        buf.push(self.item_type.as_byte());
        buf.extend_from_slice(&self.offset.to_le_bytes());
    }

    /// Decodes a key from exactly [`KEY_SIZE`] bytes.
    pub fn decode(bytes: &[u8]) -> TreeResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(TreeError::corrupted(
                "location",
                format!("key must be {KEY_SIZE} bytes, got {}", bytes.len()),
            ));
        }
        let mut objectid = [0u8; 8];
        objectid.copy_from_slice(&bytes[0..8]);
        let item_type = ItemType::from_byte(bytes[8]).ok_or_else(|| {
            TreeError::corrupted("location", format!("unknown item type {}", bytes[8]))
        })?;
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&bytes[9..17]);
        Ok(Self::new(
            u64::from_le_bytes(objectid),
            item_type,
            u64::from_le_bytes(offset),
        ))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} {} {})",
            self.objectid,
            self.item_type.name(),
            self.offset
        )
    }
}

/// Hash of a directory entry or xattr name, used as the key offset of
/// name-addressed items.
#[must_use]
pub fn name_hash(name: &[u8]) -> u64 {
    u64::from(crc32c::crc32c(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_type_order_matches_type_byte() {
        let types = [
            ItemType::InodeItem,
            ItemType::InodeRef,
            ItemType::XattrItem,
            ItemType::DirItem,
            ItemType::DirIndex,
            ItemType::ExtentData,
        ];
        for pair in types.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].as_byte() < pair[1].as_byte());
        }
    }

    #[test]
    fn inode_item_sorts_before_other_items_of_same_inode() {
        let inode = Key::inode(300);
        let extent = Key::new(300, ItemType::ExtentData, 0);
        let next_inode = Key::inode(301);
        assert!(inode < extent);
        assert!(extent < next_inode);
    }

    #[test]
    fn key_encoding_is_stable() {
        let key = Key::new(257, ItemType::DirIndex, 3);
        let mut buf = Vec::new();
        key.encode_into(&mut buf);
        assert_eq!(buf.len(), KEY_SIZE);
        assert_eq!(buf[8], 96);
        assert_eq!(Key::decode(&buf).unwrap(), key);
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut buf = Vec::new();
        Key::new(1, ItemType::InodeItem, 0).encode_into(&mut buf);
        buf[8] = 200;
        assert!(Key::decode(&buf).is_err());
    }

    #[test]
    fn name_hash_differs_for_different_names() {
        assert_ne!(name_hash(b"foo"), name_hash(b"bar"));
        assert_eq!(name_hash(b"foo"), name_hash(b"foo"));
    }
}
