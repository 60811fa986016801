//! Extended attribute changes of the current inode.
//!
//! Xattr items are keyed by name hash, so one item may hold several
//! attributes. Entries are matched by exact name.

use crate::error::SendResult;
use crate::session::SendSession;
use snapsend_stream::Sink;
use snapsend_tree::items::{decode_dir_entries, DirEntry};
use snapsend_tree::{ItemType, Key};

fn find<'e>(entries: &'e [DirEntry], name: &[u8]) -> Option<&'e DirEntry> {
    entries.iter().find(|entry| entry.name == name)
}

impl<S: Sink> SendSession<'_, S> {
    pub(crate) fn process_new_xattrs(&mut self, key: &Key, data: &[u8]) -> SendResult<()> {
        for entry in decode_dir_entries(key, data)? {
            self.send_set_xattr(&entry.name, &entry.data)?;
        }
        Ok(())
    }

    pub(crate) fn process_deleted_xattrs(&mut self, key: &Key, data: &[u8]) -> SendResult<()> {
        for entry in decode_dir_entries(key, data)? {
            self.send_remove_xattr(&entry.name)?;
        }
        Ok(())
    }

    pub(crate) fn process_changed_xattrs(
        &mut self,
        key: &Key,
        left: &[u8],
        right: &[u8],
    ) -> SendResult<()> {
        let left = decode_dir_entries(key, left)?;
        let right = decode_dir_entries(key, right)?;
        for entry in &left {
            match find(&right, &entry.name) {
                Some(old) if old.data == entry.data => {}
                _ => self.send_set_xattr(&entry.name, &entry.data)?,
            }
        }
        for entry in &right {
            if find(&left, &entry.name).is_none() {
                self.send_remove_xattr(&entry.name)?;
            }
        }
        Ok(())
    }

    /// Sets every xattr of the current inode.
    pub(crate) fn process_all_new_xattrs(&mut self) -> SendResult<()> {
        for item in self.send_root.items_of(self.cur.ino, ItemType::XattrItem)? {
            self.process_new_xattrs(&item.key, &item.data)?;
        }
        Ok(())
    }
}
