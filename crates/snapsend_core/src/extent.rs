//! File data: skipping unchanged extents, finding clone sources and
//! sending the rest as writes.

use crate::commands::CloneSource;
use crate::error::{SendError, SendResult};
use crate::session::SendSession;
use snapsend_stream::Sink;
use snapsend_tree::items::{is_regular, is_symlink, DiskExtent, ExtentBody, FileExtentItem};
use snapsend_tree::{ExtentLocation, ItemType, Key, SnapshotId, TreeItem, TreeReader};
use std::collections::BTreeMap;
use tracing::debug;

/// Best reference to one extent found inside a clone root.
#[derive(Debug, Clone, Copy)]
struct CloneCandidate {
    ino: u64,
    offset: u64,
    found_refs: u64,
}

impl Default for CloneCandidate {
    fn default() -> Self {
        Self {
            ino: u64::MAX,
            offset: 0,
            found_refs: 0,
        }
    }
}

/// Returns the disk extent of `item` if it is a regular extent of `ino`.
fn regular_extent_of(item: &TreeItem, ino: u64) -> SendResult<Option<DiskExtent>> {
    if !item.key.is(ino, ItemType::ExtentData) {
        return Ok(None);
    }
    match FileExtentItem::decode(&item.key, &item.data)?.body {
        ExtentBody::Regular(disk) => Ok(Some(disk)),
        _ => Ok(None),
    }
}

/// Returns true if `tree` maps `[offset, offset + len)` of `ino` onto one
/// contiguous run of the disk extent at `location`.
fn maps_contiguously(
    tree: &dyn TreeReader,
    ino: u64,
    offset: u64,
    len: u64,
    location: ExtentLocation,
) -> SendResult<bool> {
    let Some(item) = tree.prev_at_or_before(&Key::new(ino, ItemType::ExtentData, offset))? else {
        return Ok(false);
    };
    let Some(disk) = regular_extent_of(&item, ino)? else {
        return Ok(false);
    };
    let skip = offset - item.key.offset;
    Ok(disk.disk_bytenr == location.disk_bytenr
        && disk.offset + skip == location.offset
        && item.key.offset + disk.num_bytes >= offset + len)
}

impl<'a, S: Sink> SendSession<'a, S> {
    /// Returns true if the parent maps every byte of the extent at `key` to
    /// the same disk location, so the receiver already has the data.
    fn is_extent_unchanged(&self, key: &Key, extent: &FileExtentItem) -> SendResult<bool> {
        let Some(parent) = self.parent_root else {
            return Ok(false);
        };
        let ExtentBody::Regular(left) = extent.body else {
            return Ok(false);
        };
        if left.is_hole() {
            return Ok(false);
        }

        let ino = key.objectid;
        let start = key.offset;
        let end = start + left.num_bytes;
        let mut pos = start;
        let mut next = parent.prev_at_or_before(key)?;
        while pos < end {
            let Some(item) = next else {
                return Ok(false);
            };
            let Some(right) = regular_extent_of(&item, ino)? else {
                return Ok(false);
            };
            let right_end = item.key.offset + right.num_bytes;
            if right_end <= pos {
                // Extent ends before the range starts.
                next = parent.next_after(&item.key)?;
                continue;
            }
            if item.key.offset > pos {
                // Gap in the parent.
                return Ok(false);
            }
            if right.disk_bytenr != left.disk_bytenr
                || right.offset + (pos - item.key.offset) != left.offset + (pos - start)
            {
                return Ok(false);
            }
            pos = right_end;
            next = parent.next_after(&item.key)?;
        }
        Ok(true)
    }

    /// Looks for an already-present copy of the data of the extent at
    /// `data_offset` of the current inode.
    fn find_extent_clone(
        &self,
        data_offset: u64,
        extent: &FileExtentItem,
    ) -> SendResult<Option<CloneSource<'a>>> {
        let ino_size = self.cur.size;
        if data_offset >= ino_size {
            return Ok(None);
        }
        let Some(disk) = extent.disk() else {
            return Ok(None);
        };
        if disk.is_hole() {
            return Ok(None);
        }
        let location = ExtentLocation {
            disk_bytenr: disk.disk_bytenr,
            offset: disk.offset,
        };
        let extent_len = if data_offset + disk.num_bytes >= ino_size {
            ino_size - data_offset
        } else {
            disk.num_bytes
        };

        let send_id = self.send_root.meta().id;
        let mut candidates: BTreeMap<SnapshotId, CloneCandidate> = self
            .clone_roots
            .keys()
            .map(|id| (*id, CloneCandidate::default()))
            .collect();
        let mut found_in_send_root = false;

        for hit in self.backrefs.find_referencing_inodes(location)? {
            let (Some(tree), Some(candidate)) =
                (self.clone_roots.get(&hit.root), candidates.get_mut(&hit.root))
            else {
                continue;
            };
            if hit.root == send_id && hit.ino == self.cur.ino && hit.offset == data_offset {
                found_in_send_root = true;
            }
            let size = self.inode_item(*tree, hit.ino)?.size;
            if hit.offset + extent_len > size {
                continue;
            }
            if !maps_contiguously(*tree, hit.ino, hit.offset, extent_len, location)? {
                continue;
            }
            if hit.root == send_id {
                // Only inodes already complete at the receiver.
                if hit.ino >= self.cur.ino {
                    continue;
                }
                candidate.found_refs += 1;
                candidate.ino = hit.ino;
                candidate.offset = hit.offset;
                continue;
            }
            candidate.found_refs += 1;
            if hit.ino < candidate.ino {
                candidate.ino = hit.ino;
                candidate.offset = hit.offset;
            } else if hit.ino == candidate.ino && candidate.offset > hit.offset + extent_len {
                candidate.offset = hit.offset;
            }
        }

        if !found_in_send_root {
            return Err(SendError::inconsistent(format!(
                "extent at offset {data_offset} of inode {} has no backref to itself",
                self.cur.ino
            )));
        }

        let chosen = candidates
            .get(&send_id)
            .filter(|c| c.found_refs > 0)
            .map(|c| (send_id, *c))
            .or_else(|| {
                candidates
                    .iter()
                    .find(|(_, c)| c.found_refs > 0)
                    .map(|(id, c)| (*id, *c))
            });
        let Some((id, candidate)) = chosen else {
            return Ok(None);
        };
        let Some(root) = self.clone_roots.get(&id).copied() else {
            return Ok(None);
        };
        Ok(Some(CloneSource {
            root,
            ino: candidate.ino,
            offset: candidate.offset,
        }))
    }

    /// Sends the data of one extent of the current inode, unless the
    /// receiver already has it.
    pub(crate) fn process_extent(&mut self, key: &Key, data: &[u8]) -> SendResult<()> {
        if is_symlink(self.cur.mode) {
            return Ok(());
        }
        let extent = FileExtentItem::decode(key, data)?;
        if self.parent_root.is_some() && !self.cur.new && self.is_extent_unchanged(key, &extent)? {
            debug!(ino = self.cur.ino, offset = key.offset, "extent unchanged");
            return Ok(());
        }
        let clone = self.find_extent_clone(key.offset, &extent)?;
        self.send_write_or_clone(key, &extent, clone)
    }

    /// Sends every extent of the current inode.
    pub(crate) fn process_all_extents(&mut self) -> SendResult<()> {
        for item in self.send_root.items_of(self.cur.ino, ItemType::ExtentData)? {
            self.process_extent(&item.key, &item.data)?;
        }
        Ok(())
    }

    fn send_write_or_clone(
        &mut self,
        key: &Key,
        extent: &FileExtentItem,
        clone: Option<CloneSource<'a>>,
    ) -> SendResult<()> {
        let offset = key.offset;
        let len = extent.len().min(self.cur.size.saturating_sub(offset));
        if len == 0 {
            return Ok(());
        }
        if is_regular(self.cur.mode) && !self.cur.truncated {
            self.send_truncate(self.cur.ino, self.cur.gen, self.cur.size)?;
            self.cur.truncated = true;
        }

        if let Some(source) = clone {
            return self.send_clone(offset, len, source);
        }

        let chunk = self.config.read_chunk_size as u64;
        let mut sent = 0u64;
        while sent < len {
            let want = usize::try_from((len - sent).min(chunk)).unwrap_or(usize::MAX);
            let written = self.send_write(offset + sent, want)?;
            if written == 0 {
                break;
            }
            sent += written as u64;
        }
        Ok(())
    }
}
