//! Name changes of the current inode.
//!
//! Ref items are compared entry by entry. Names only in the target are
//! recorded as new refs, names only in the parent as deleted refs, each with
//! the full receiver-side path computed at record time. Once all ref items
//! of the inode have been seen, [`SendSession::process_recorded_refs`] turns
//! them into renames, links, unlinks and rmdirs.

use crate::compare::ChangeKind;
use crate::error::{SendError, SendResult};
use crate::path::PathBuilder;
use crate::session::SendSession;
use crate::state::Lifecycle;
use snapsend_stream::Sink;
use snapsend_tree::items::{decode_dir_entries, decode_inode_refs, is_dir, InodeRefEntry};
use snapsend_tree::{ItemType, Key, TreeReader};
use tracing::debug;

/// A name gained or lost by the current inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedRef {
    pub dir: u64,
    pub dir_gen: u64,
    pub full_path: PathBuilder,
}

impl RecordedRef {
    pub fn name(&self) -> &[u8] {
        self.full_path.split_last().1
    }
}

/// A directory parked under its orphan name because its new parent still
/// sits inside it at the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WaitingMove {
    pub ino: u64,
    pub gen: u64,
    pub parent: u64,
    pub parent_gen: u64,
    pub name: Vec<u8>,
}

fn push_unique(dirs: &mut Vec<(u64, u64)>, dir: (u64, u64)) {
    if !dirs.contains(&dir) {
        dirs.push(dir);
    }
}

impl<S: Sink> SendSession<'_, S> {
    fn record_new_ref(&mut self, dir: u64, name: &[u8]) -> SendResult<()> {
        let dir_gen = self.inode_item(self.send_root, dir)?.generation;
        if !self.is_inode_existent(dir, dir_gen)? {
            // The directory is created later; the name is added when it is.
            if Self::is_first_ref(self.send_root, self.cur.ino, dir, name)? {
                self.cur.first_ref_orphan = true;
            }
            return Ok(());
        }
        let mut full_path = self.cur_path(dir, dir_gen)?;
        full_path.push(name);
        self.new_refs.push(RecordedRef {
            dir,
            dir_gen,
            full_path,
        });
        Ok(())
    }

    fn record_deleted_ref(&mut self, dir: u64, name: &[u8]) -> SendResult<()> {
        let dir_gen = self.inode_item(self.parent_tree()?, dir)?.generation;
        let mut full_path = self.cur_path(dir, dir_gen)?;
        full_path.push(name);
        self.deleted_refs.push(RecordedRef {
            dir,
            dir_gen,
            full_path,
        });
        Ok(())
    }

    pub(crate) fn record_new_refs(&mut self, key: &Key, data: &[u8], dir: u64) -> SendResult<()> {
        for entry in decode_inode_refs(key, data)? {
            self.record_new_ref(dir, &entry.name)?;
        }
        Ok(())
    }

    pub(crate) fn record_deleted_refs(
        &mut self,
        key: &Key,
        data: &[u8],
        dir: u64,
    ) -> SendResult<()> {
        for entry in decode_inode_refs(key, data)? {
            self.record_deleted_ref(dir, &entry.name)?;
        }
        Ok(())
    }

    pub(crate) fn record_changed_refs(
        &mut self,
        key: &Key,
        left: &[u8],
        right: &[u8],
        dir: u64,
    ) -> SendResult<()> {
        let left = decode_inode_refs(key, left)?;
        let right = decode_inode_refs(key, right)?;
        let contains =
            |entries: &[InodeRefEntry], name: &[u8]| entries.iter().any(|e| e.name == name);
        for entry in &left {
            if !contains(&right, &entry.name) {
                self.record_new_ref(dir, &entry.name)?;
            }
        }
        for entry in &right {
            if !contains(&left, &entry.name) {
                self.record_deleted_ref(dir, &entry.name)?;
            }
        }
        Ok(())
    }

    /// Returns true if `dir` names a different directory in each snapshot.
    pub(crate) fn is_reused_dir(&self, dir: u64) -> SendResult<bool> {
        let Some(parent) = self.parent_root else {
            return Ok(false);
        };
        match (self.send_root.inode(dir)?, parent.inode(dir)?) {
            (Some(left), Some(right)) => Ok(left.generation != right.generation),
            _ => Ok(false),
        }
    }

    /// Records the names the current inode holds in directories whose
    /// number was reused. Such ref items can compare equal while naming a
    /// different directory on each side.
    pub(crate) fn record_refs_in_reused_dirs(&mut self) -> SendResult<()> {
        let parent = self.parent_tree()?;
        let old_refs = parent.items_of(self.cur.ino, ItemType::InodeRef)?;
        for item in self.send_root.items_of(self.cur.ino, ItemType::InodeRef)? {
            let dir = item.key.offset;
            if !self.is_reused_dir(dir)? {
                continue;
            }
            let Some(old) = old_refs.iter().find(|old| old.key == item.key) else {
                continue;
            };
            debug!(ino = self.cur.ino, dir, "ref into reused directory");
            self.record_deleted_refs(&old.key, &old.data, dir)?;
            self.record_new_refs(&item.key, &item.data, dir)?;
        }
        Ok(())
    }

    /// Records every name of the current inode from one side and processes
    /// them. Used when an inode number is reused by a new generation.
    pub(crate) fn process_all_refs(&mut self, kind: ChangeKind) -> SendResult<()> {
        let tree: &dyn TreeReader = match kind {
            ChangeKind::New => self.send_root,
            ChangeKind::Deleted => self.parent_tree()?,
            ChangeKind::Changed => {
                return Err(SendError::inconsistent(
                    "changed refs cannot be processed in bulk",
                ))
            }
        };
        for item in tree.items_of(self.cur.ino, ItemType::InodeRef)? {
            let dir = item.key.offset;
            match kind {
                ChangeKind::New => self.record_new_refs(&item.key, &item.data, dir)?,
                _ => self.record_deleted_refs(&item.key, &item.data, dir)?,
            }
        }
        self.process_recorded_refs()
    }

    /// Moves `(ino, gen)` from `path` to its orphan name.
    pub(crate) fn orphanize_inode(
        &mut self,
        ino: u64,
        gen: u64,
        path: &[u8],
    ) -> SendResult<PathBuilder> {
        let orphan = PathBuilder::from_bytes(&self.orphan_name(ino, gen)?);
        debug!(ino, gen, "orphanizing inode");
        self.send_rename(path, orphan.as_bytes())?;
        self.name_cache.remove(ino, gen);
        Ok(orphan)
    }

    /// Returns true if every entry of the parent-side directory `dir` has
    /// been processed by the time the cursor reaches `progress`.
    pub(crate) fn can_rmdir(&self, dir: u64, progress: u64) -> SendResult<bool> {
        let Some(parent) = self.parent_root else {
            return Ok(true);
        };
        for item in parent.items_of(dir, ItemType::DirIndex)? {
            for entry in decode_dir_entries(&item.key, &item.data)? {
                if entry.location.objectid > progress {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Applies the recorded name changes of the current inode and advances
    /// the send cursor past it.
    pub(crate) fn process_recorded_refs(&mut self) -> SendResult<()> {
        let (ino, gen) = (self.cur.ino, self.cur.gen);
        let mut new_refs = std::mem::take(&mut self.new_refs);
        let mut deleted_refs = std::mem::take(&mut self.deleted_refs);
        let is_dir_inode = is_dir(self.cur.mode);
        self.cur.refs_done = true;
        debug!(
            ino,
            new = new_refs.len(),
            deleted = deleted_refs.len(),
            first_ref_orphan = self.cur.first_ref_orphan,
            "processing refs"
        );

        let mut is_orphan = self.cur.new || self.did_overwrite_first_ref(ino, gen)?;
        let mut valid_path = if is_orphan {
            PathBuilder::from_bytes(&self.orphan_name(ino, gen)?)
        } else {
            self.cur_path(ino, gen)?
        };
        let mut consumed = vec![false; deleted_refs.len()];
        let mut check_dirs: Vec<(u64, u64)> = Vec::new();

        for idx in 0..new_refs.len() {
            let new_ref = new_refs[idx].clone();
            if let Some((other, other_gen)) =
                self.will_overwrite_ref(new_ref.dir, new_ref.dir_gen, new_ref.name())?
            {
                if Self::is_first_ref(self.parent_tree()?, other, new_ref.dir, new_ref.name())? {
                    let from = new_ref.full_path.as_bytes();
                    let orphan = self.orphanize_inode(other, other_gen, from)?;
                    // Paths below a moved directory moved with it.
                    valid_path.rebase(from, orphan.as_bytes());
                    for recorded in new_refs.iter_mut().chain(deleted_refs.iter_mut()) {
                        recorded.full_path.rebase(from, orphan.as_bytes());
                    }
                } else {
                    self.send_unlink(new_ref.full_path.as_bytes())?;
                }
            }

            if is_dir_inode && new_ref.full_path.is_below(valid_path.as_bytes()) {
                if !is_orphan {
                    let orphan = self.orphanize_inode(ino, gen, valid_path.as_bytes())?;
                    for recorded in new_refs.iter_mut().chain(deleted_refs.iter_mut()) {
                        recorded.full_path.rebase(valid_path.as_bytes(), orphan.as_bytes());
                    }
                    valid_path = orphan;
                    is_orphan = true;
                }
                debug!(ino, parent = new_ref.dir, "directory waits for its parent to move");
                self.waiting_moves.push(WaitingMove {
                    ino,
                    gen,
                    parent: new_ref.dir,
                    parent_gen: new_ref.dir_gen,
                    name: new_ref.name().to_vec(),
                });
            } else if is_orphan && !self.cur.first_ref_orphan {
                self.send_rename(valid_path.as_bytes(), new_ref.full_path.as_bytes())?;
                is_orphan = false;
                valid_path = new_ref.full_path.clone();
            } else if is_dir_inode {
                self.send_rename(valid_path.as_bytes(), new_ref.full_path.as_bytes())?;
                valid_path = new_ref.full_path.clone();
            } else if let Some(idx) =
                self.renamable_ref(is_orphan, &valid_path, &deleted_refs, &consumed)
            {
                // The old name goes away anyway: move it instead of linking
                // and unlinking.
                self.send_rename(valid_path.as_bytes(), new_ref.full_path.as_bytes())?;
                consumed[idx] = true;
                valid_path = new_ref.full_path.clone();
            } else {
                self.send_link(new_ref.full_path.as_bytes(), valid_path.as_bytes())?;
            }
            push_unique(&mut check_dirs, (new_ref.dir, new_ref.dir_gen));
        }

        if is_dir_inode && self.cur.deleted {
            if self.can_rmdir(ino, ino)? {
                self.send_rmdir(valid_path.as_bytes())?;
            } else if !is_orphan {
                self.orphanize_inode(ino, gen, valid_path.as_bytes())?;
            }
            for deleted in &deleted_refs {
                push_unique(&mut check_dirs, (deleted.dir, deleted.dir_gen));
            }
        } else if is_dir_inode {
            // Moved into a directory that does not exist yet: park it.
            if self.cur.first_ref_orphan && !is_orphan {
                self.orphanize_inode(ino, gen, valid_path.as_bytes())?;
            }
            for deleted in &deleted_refs {
                push_unique(&mut check_dirs, (deleted.dir, deleted.dir_gen));
            }
        } else {
            for (idx, deleted) in deleted_refs.iter().enumerate() {
                let overwritten =
                    self.did_overwrite_ref(deleted.dir, deleted.dir_gen, ino, gen, deleted.name())?;
                if !consumed[idx] && !overwritten {
                    if !is_orphan && self.cur.first_ref_orphan {
                        valid_path =
                            self.orphanize_inode(ino, gen, deleted.full_path.as_bytes())?;
                        is_orphan = true;
                    } else {
                        self.send_unlink(deleted.full_path.as_bytes())?;
                    }
                }
                push_unique(&mut check_dirs, (deleted.dir, deleted.dir_gen));
            }
            if self.cur.first_ref_orphan && !is_orphan {
                // Keep a name under the orphan path for the pending directory
                // to link from.
                let orphan = PathBuilder::from_bytes(&self.orphan_name(ino, gen)?);
                self.send_link(orphan.as_bytes(), valid_path.as_bytes())?;
                self.name_cache.remove(ino, gen);
            } else if is_orphan && !self.cur.first_ref_orphan {
                self.send_unlink(valid_path.as_bytes())?;
            }
        }

        for (dir, dir_gen) in check_dirs {
            if dir > ino {
                continue;
            }
            match self.inode_state(dir, dir_gen)? {
                Lifecycle::DidCreate | Lifecycle::Unchanged => self.send_utimes(dir, dir_gen)?,
                Lifecycle::DidDelete if self.can_rmdir(dir, ino)? => {
                    let path = self.cur_path(dir, dir_gen)?;
                    self.send_rmdir(path.as_bytes())?;
                }
                _ => {}
            }
        }

        self.send_progress = ino + 1;
        if is_dir_inode && self.cur.new {
            self.finish_outoforder_dir(ino, gen)?;
        }
        self.apply_waiting_moves()
    }

    pub(crate) fn is_waiting(&self, ino: u64, gen: u64) -> bool {
        self.waiting_moves
            .iter()
            .any(|waiting| waiting.ino == ino && waiting.gen == gen)
    }

    /// Index of a parked directory whose new parent exists and no longer
    /// lies inside it.
    fn next_ready_move(&mut self) -> SendResult<Option<usize>> {
        for idx in 0..self.waiting_moves.len() {
            let waiting = self.waiting_moves[idx].clone();
            if !self.is_inode_existent(waiting.parent, waiting.parent_gen)? {
                continue;
            }
            let orphan = self.orphan_name(waiting.ino, waiting.gen)?;
            let parent_path = self.cur_path(waiting.parent, waiting.parent_gen)?;
            if parent_path.as_bytes() != orphan.as_slice() && !parent_path.is_below(&orphan) {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }

    /// Moves parked directories into their parents wherever that no longer
    /// creates a loop.
    pub(crate) fn apply_waiting_moves(&mut self) -> SendResult<()> {
        while let Some(idx) = self.next_ready_move()? {
            let waiting = self.waiting_moves.remove(idx);
            let orphan = self.orphan_name(waiting.ino, waiting.gen)?;
            let mut to = self.cur_path(waiting.parent, waiting.parent_gen)?;
            to.push(&waiting.name);
            debug!(ino = waiting.ino, parent = waiting.parent, "applying waiting move");
            self.send_rename(&orphan, to.as_bytes())?;
            self.name_cache.remove(waiting.ino, waiting.gen);
            if waiting.parent < self.send_progress {
                self.send_utimes(waiting.parent, waiting.parent_gen)?;
            }
        }
        Ok(())
    }

    fn renamable_ref(
        &self,
        is_orphan: bool,
        valid_path: &PathBuilder,
        deleted_refs: &[RecordedRef],
        consumed: &[bool],
    ) -> Option<usize> {
        if is_orphan || self.cur.first_ref_orphan {
            return None;
        }
        deleted_refs
            .iter()
            .zip(consumed)
            .position(|(deleted, used)| !used && deleted.full_path == *valid_path)
    }

    /// Adds the names of a just-created directory whose entries point at
    /// inodes that were processed before it.
    fn finish_outoforder_dir(&mut self, dir: u64, dir_gen: u64) -> SendResult<()> {
        let mut files: Vec<(u64, u64, Vec<u8>)> = Vec::new();
        for item in self.send_root.items_of(dir, ItemType::DirIndex)? {
            for entry in decode_dir_entries(&item.key, &item.data)? {
                let child = entry.location.objectid;
                if child >= dir {
                    continue;
                }
                let child_item = self.inode_item(self.send_root, child)?;
                let child_gen = child_item.generation;
                debug!(dir, child, "adding out-of-order entry");
                if !is_dir(child_item.mode) {
                    files.push((child, child_gen, entry.name));
                } else if !self.is_waiting(child, child_gen) {
                    // Parked directories keep resolving to their orphan
                    // names until the move is sent.
                    self.waiting_moves.push(WaitingMove {
                        ino: child,
                        gen: child_gen,
                        parent: dir,
                        parent_gen: dir_gen,
                        name: entry.name,
                    });
                }
            }
        }

        let dir_path = self.cur_path(dir, dir_gen)?;
        let mut orphans: Vec<(u64, PathBuilder)> = Vec::new();
        for (child, child_gen, name) in files {
            let (first_dir, _, _) = Self::first_ref(self.send_root, child)?;
            let parked = first_dir == dir;
            let from = if parked {
                PathBuilder::from_bytes(&self.orphan_name(child, child_gen)?)
            } else {
                self.cur_path(child, child_gen)?
            };
            let mut to = dir_path.clone();
            to.push(&name);
            self.send_link(to.as_bytes(), from.as_bytes())?;
            if parked && !orphans.iter().any(|(ino, _)| *ino == child) {
                orphans.push((child, from));
            }
            self.name_cache.remove(child, child_gen);
        }

        for (_, orphan) in orphans {
            self.send_unlink(orphan.as_bytes())?;
        }
        Ok(())
    }
}
