//! Path resolution at the receiver.
//!
//! An inode's path at the receiver depends on how far the send has got:
//! inodes the cursor has passed live where the target puts them, inodes it
//! has not reached still live where the parent puts them, and inodes that
//! do not exist yet (or were displaced) live under an orphan name in the
//! root directory.

use crate::error::{SendError, SendResult};
use crate::name_cache::NameCacheEntry;
use crate::path::PathBuilder;
use crate::session::SendSession;
use crate::state::Lifecycle;
use snapsend_stream::Sink;
use snapsend_tree::{InodeItem, TreeReader, ROOT_DIR_INO};

/// Name of the `idx`-th orphan name candidate for `(ino, gen)`.
pub(crate) fn orphan_candidate(ino: u64, gen: u64, idx: u64) -> Vec<u8> {
    format!("orphan-{ino}-{gen}-{idx}").into_bytes()
}

impl<'a, S: Sink> SendSession<'a, S> {
    pub(crate) fn inode_item(&self, tree: &dyn TreeReader, ino: u64) -> SendResult<InodeItem> {
        tree.inode(ino)?.ok_or_else(|| {
            SendError::not_found(format!("inode {ino} in {}", tree.meta().name))
        })
    }

    fn generation_in(tree: Option<&dyn TreeReader>, ino: u64) -> SendResult<Option<u64>> {
        match tree {
            Some(tree) => Ok(tree.inode(ino)?.map(|item| item.generation)),
            None => Ok(None),
        }
    }

    /// Lifecycle of `(ino, gen)` at the current cursor position.
    pub(crate) fn inode_state(&self, ino: u64, gen: u64) -> SendResult<Lifecycle> {
        let target = Self::generation_in(Some(self.send_root), ino)?;
        let parent = Self::generation_in(self.parent_root, ino)?;
        Lifecycle::classify(ino, gen, target, parent, self.send_progress).ok_or_else(|| {
            SendError::not_found(format!("inode {ino} generation {gen} in either snapshot"))
        })
    }

    pub(crate) fn is_inode_existent(&self, ino: u64, gen: u64) -> SendResult<bool> {
        Ok(self.inode_state(ino, gen)?.is_existent())
    }

    /// Picks the first orphan name for `(ino, gen)` that collides with no
    /// root entry in either snapshot.
    pub(crate) fn orphan_name(&self, ino: u64, gen: u64) -> SendResult<Vec<u8>> {
        let mut idx = 0;
        loop {
            let name = orphan_candidate(ino, gen, idx);
            let taken = self
                .send_root
                .lookup_dir_entry(ROOT_DIR_INO, &name)?
                .is_some()
                || match self.parent_root {
                    Some(parent) => parent.lookup_dir_entry(ROOT_DIR_INO, &name)?.is_some(),
                    None => false,
                };
            if !taken {
                return Ok(name);
            }
            idx += 1;
        }
    }

    /// First name of `ino` in `tree` as `(dir, dir generation, name)`.
    pub(crate) fn first_ref(tree: &dyn TreeReader, ino: u64) -> SendResult<(u64, u64, Vec<u8>)> {
        let (dir, name) = tree.first_ref(ino)?.ok_or_else(|| {
            SendError::not_found(format!("first ref of inode {ino} in {}", tree.meta().name))
        })?;
        let dir_gen = tree
            .inode(dir)?
            .ok_or_else(|| {
                SendError::not_found(format!("directory {dir} in {}", tree.meta().name))
            })?
            .generation;
        Ok((dir, dir_gen, name))
    }

    pub(crate) fn is_first_ref(
        tree: &dyn TreeReader,
        ino: u64,
        dir: u64,
        name: &[u8],
    ) -> SendResult<bool> {
        let (first_dir, _, first_name) = Self::first_ref(tree, ino)?;
        Ok(first_dir == dir && first_name == name)
    }

    /// Returns the parent-side inode that currently occupies `dir/name`
    /// and has not been processed yet. Creating the name requires moving
    /// that inode away first.
    pub(crate) fn will_overwrite_ref(
        &self,
        dir: u64,
        dir_gen: u64,
        name: &[u8],
    ) -> SendResult<Option<(u64, u64)>> {
        let Some(parent) = self.parent_root else {
            return Ok(None);
        };
        if !self.is_inode_existent(dir, dir_gen)? {
            return Ok(None);
        }
        if Self::generation_in(Some(parent), dir)? != Some(dir_gen) {
            return Ok(None);
        }
        let Some(entry) = parent.lookup_dir_entry(dir, name)? else {
            return Ok(None);
        };
        let other = entry.location.objectid;
        if other <= self.send_progress {
            return Ok(None);
        }
        let other_gen = self.inode_item(parent, other)?.generation;
        Ok(Some((other, other_gen)))
    }

    /// Returns true if `dir/name`, a parent-side name of `(ino, gen)`, has
    /// already been taken over by another inode.
    pub(crate) fn did_overwrite_ref(
        &self,
        dir: u64,
        dir_gen: u64,
        ino: u64,
        gen: u64,
        name: &[u8],
    ) -> SendResult<bool> {
        if self.parent_root.is_none() {
            return Ok(false);
        }
        if !self.is_inode_existent(dir, dir_gen)? {
            return Ok(false);
        }
        if Self::generation_in(Some(self.send_root), dir)? != Some(dir_gen) {
            return Ok(false);
        }
        let Some(entry) = self.send_root.lookup_dir_entry(dir, name)? else {
            return Ok(false);
        };
        let other = entry.location.objectid;
        let other_gen = self.inode_item(self.send_root, other)?.generation;
        if other == ino && other_gen == gen {
            return Ok(false);
        }
        // The current inode may have displaced `ino` while its own refs are
        // still being processed.
        Ok(other < self.send_progress
            || (ino != self.cur.ino && other == self.cur.ino && other_gen == self.cur.gen))
    }

    pub(crate) fn did_overwrite_first_ref(&self, ino: u64, gen: u64) -> SendResult<bool> {
        let Some(parent) = self.parent_root else {
            return Ok(false);
        };
        let (dir, dir_gen, name) = Self::first_ref(parent, ino)?;
        self.did_overwrite_ref(dir, dir_gen, ino, gen, &name)
    }

    /// Resolves one path component of `(ino, gen)` at the receiver.
    fn cur_name_and_parent(&mut self, ino: u64, gen: u64) -> SendResult<NameCacheEntry> {
        if self.is_waiting(ino, gen) {
            return Ok(NameCacheEntry {
                parent_ino: ROOT_DIR_INO,
                parent_gen: 0,
                name: self.orphan_name(ino, gen)?,
                stop: true,
                need_later_update: false,
            });
        }
        if let Some(entry) = self.name_cache.get(ino, gen) {
            if ino < self.send_progress && entry.need_later_update {
                self.name_cache.remove(ino, gen);
            } else {
                return Ok(entry);
            }
        }

        let passed = ino < self.send_progress;
        let mut entry = NameCacheEntry {
            parent_ino: 0,
            parent_gen: 0,
            name: Vec::new(),
            stop: false,
            need_later_update: !passed,
        };
        if self.is_inode_existent(ino, gen)? {
            let tree = if passed {
                self.send_root
            } else {
                self.parent_tree()?
            };
            let (dir, dir_gen, name) = Self::first_ref(tree, ino)?;
            entry.parent_ino = dir;
            entry.parent_gen = dir_gen;
            // An emitted inode whose first directory is still pending stays
            // parked under its orphan name until that directory is created.
            if (passed && !self.is_inode_existent(dir, dir_gen)?)
                || self.did_overwrite_ref(dir, dir_gen, ino, gen, &name)?
            {
                entry.name = self.orphan_name(ino, gen)?;
                entry.stop = true;
            } else {
                entry.name = name;
            }
        } else {
            entry.name = self.orphan_name(ino, gen)?;
            entry.stop = true;
        }

        self.name_cache.insert(ino, gen, entry.clone());
        Ok(entry)
    }

    /// Full path of `(ino, gen)` at the receiver, relative to the subvolume
    /// root. The root directory itself resolves to the empty path.
    pub(crate) fn cur_path(&mut self, ino: u64, gen: u64) -> SendResult<PathBuilder> {
        let start = ino;
        let mut path = PathBuilder::reversed();
        let mut seen: Vec<(u64, u64)> = Vec::new();
        let (mut ino, mut gen) = (ino, gen);
        while ino != ROOT_DIR_INO {
            if seen.contains(&(ino, gen)) {
                return Err(SendError::inconsistent(format!(
                    "path of inode {start} loops through inode {ino}"
                )));
            }
            seen.push((ino, gen));
            let entry = self.cur_name_and_parent(ino, gen)?;
            path.push(&entry.name);
            if entry.stop {
                break;
            }
            ino = entry.parent_ino;
            gen = entry.parent_gen;
        }
        path.unreverse();
        Ok(path)
    }

    /// Path of `ino` inside `tree` following first refs only. Used for clone
    /// sources, which the receiver holds unchanged.
    pub(crate) fn tree_path(tree: &dyn TreeReader, ino: u64) -> SendResult<PathBuilder> {
        let mut path = PathBuilder::reversed();
        let mut ino = ino;
        while ino != ROOT_DIR_INO {
            let (dir, _, name) = Self::first_ref(tree, ino)?;
            path.push(&name);
            ino = dir;
        }
        path.unreverse();
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SendConfig;
    use crate::error::ErrorKind;
    use crate::refs::WaitingMove;
    use crate::session::SendRequest;
    use snapsend_tree::{MemFs, MemTree};
    use std::sync::Arc;

    fn session<'a>(request: SendRequest<'a>) -> SendSession<'a, Vec<u8>> {
        SendSession::new(request, SendConfig::default(), Vec::new()).unwrap()
    }

    #[test]
    fn orphan_names_skip_existing_entries() {
        let fs = MemFs::new();
        let tree = fs.create_subvolume("t");
        let ino = tree.create("x", 0o644).unwrap();
        let gen = tree.inode(ino).unwrap().unwrap().generation;
        let first = String::from_utf8(orphan_candidate(ino, gen, 0)).unwrap();
        tree.rename("x", &first).unwrap();

        let s = session(SendRequest::full(&*tree, &fs, &*tree));
        assert_eq!(s.orphan_name(ino, gen).unwrap(), orphan_candidate(ino, gen, 1));
    }

    #[test]
    fn full_send_paths_follow_cursor() {
        let fs = MemFs::new();
        let tree = fs.create_subvolume("t");
        let dir = tree.mkdir("a", 0o755).unwrap();
        let file = tree.create("a/f", 0o644).unwrap();
        let dir_gen = tree.inode(dir).unwrap().unwrap().generation;
        let file_gen = tree.inode(file).unwrap().unwrap().generation;

        let mut s = session(SendRequest::full(&*tree, &fs, &*tree));
        s.send_progress = dir;
        assert_eq!(
            s.cur_path(file, file_gen).unwrap().as_bytes(),
            orphan_candidate(file, file_gen, 0).as_slice()
        );

        s.send_progress = file + 1;
        assert_eq!(s.cur_path(file, file_gen).unwrap().as_bytes(), b"a/f");
        assert_eq!(s.cur_path(dir, dir_gen).unwrap().as_bytes(), b"a");
        assert!(s.cur_path(ROOT_DIR_INO, 0).unwrap().is_empty());
    }

    #[test]
    fn pending_parent_directory_keeps_orphan_name() {
        let fs = MemFs::new();
        let tree = fs.create_subvolume("t");
        let file = tree.create("f", 0o644).unwrap();
        let dir = tree.mkdir("d", 0o755).unwrap();
        tree.rename("f", "d/f").unwrap();
        let file_gen = tree.inode(file).unwrap().unwrap().generation;
        assert!(file < dir);

        let mut s = session(SendRequest::full(&*tree, &fs, &*tree));
        s.send_progress = file + 1;
        assert_eq!(
            s.cur_path(file, file_gen).unwrap().as_bytes(),
            orphan_candidate(file, file_gen, 0).as_slice()
        );
    }

    #[test]
    fn unprocessed_inodes_resolve_in_parent() {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        let file = base.create("old", 0o644).unwrap();
        let gen = base.inode(file).unwrap().unwrap().generation;
        let next = fs.snapshot(&base, "next");
        next.rename("old", "new").unwrap();

        let mut s = session(SendRequest::full(&*next, &fs, &*next).parent(&*base));
        s.send_progress = file;
        assert_eq!(s.cur_path(file, gen).unwrap().as_bytes(), b"old");

        s.send_progress = file + 1;
        assert_eq!(s.cur_path(file, gen).unwrap().as_bytes(), b"new");
    }

    #[test]
    fn overwrite_checks() {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        let a = base.write_file("a", 0o644, b"a").unwrap();
        let b = base.write_file("b", 0o644, b"b").unwrap();
        let a_gen = base.inode(a).unwrap().unwrap().generation;
        let b_gen = base.inode(b).unwrap().unwrap().generation;
        let root_gen = base.inode(ROOT_DIR_INO).unwrap().unwrap().generation;
        let next = fs.snapshot(&base, "next");
        next.rename("a", "tmp").unwrap();
        next.rename("b", "a").unwrap();
        next.rename("tmp", "b").unwrap();

        let mut s = session(SendRequest::full(&*next, &fs, &*next).parent(&*base));
        s.send_progress = a;
        s.cur.ino = a;
        s.cur.gen = a_gen;
        assert_eq!(
            s.will_overwrite_ref(ROOT_DIR_INO, root_gen, b"b").unwrap(),
            Some((b, b_gen))
        );
        assert!(!s.did_overwrite_first_ref(a, a_gen).unwrap());
        // `b` is displaced by the inode being processed.
        assert!(s.did_overwrite_first_ref(b, b_gen).unwrap());

        s.send_progress = b;
        assert!(s.will_overwrite_ref(ROOT_DIR_INO, root_gen, b"a").unwrap().is_none());
        assert!(
            SendSession::<Vec<u8>>::is_first_ref(&*base, b, ROOT_DIR_INO, b"b").unwrap()
        );
        assert!(
            !SendSession::<Vec<u8>>::is_first_ref(&*base, b, ROOT_DIR_INO, b"a").unwrap()
        );
    }

    #[test]
    fn repeated_resolution_is_stable() {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        base.mkdir("d", 0o755).unwrap();
        let file = base.create("d/f", 0o644).unwrap();
        let gen = base.inode(file).unwrap().unwrap().generation;
        let next = fs.snapshot(&base, "next");
        next.rename("d/f", "g").unwrap();

        let mut s = session(SendRequest::full(&*next, &fs, &*next).parent(&*base));
        for progress in [file, file + 1] {
            s.send_progress = progress;
            let first = s.cur_path(file, gen).unwrap();
            let second = s.cur_path(file, gen).unwrap();
            assert_eq!(first, second);
        }
        assert_eq!(s.cur_path(file, gen).unwrap().as_bytes(), b"g");
    }

    fn nested_swap(fs: &MemFs) -> (Arc<MemTree>, Arc<MemTree>) {
        let base = fs.create_subvolume("base");
        base.mkdir("a", 0o755).unwrap();
        base.mkdir("a/b", 0o755).unwrap();
        let next = fs.snapshot(&base, "next");
        next.rename("a/b", "b").unwrap();
        next.rename("a", "b/a").unwrap();
        (base, next)
    }

    #[test]
    fn looping_paths_are_reported() {
        let fs = MemFs::new();
        let (base, next) = nested_swap(&fs);
        let b = base.lookup_path("a/b").unwrap().unwrap();
        let b_gen = base.inode(b).unwrap().unwrap().generation;

        // `a` is placed under `b` while `b` still sits inside `a`
        let mut s = session(SendRequest::full(&*next, &fs, &*next).parent(&*base));
        s.send_progress = b;
        let err = s.cur_path(b, b_gen).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inconsistent);
    }

    #[test]
    fn waiting_directories_resolve_to_orphan_names() {
        let fs = MemFs::new();
        let (base, next) = nested_swap(&fs);
        let a = base.lookup_path("a").unwrap().unwrap();
        let b = base.lookup_path("a/b").unwrap().unwrap();
        let a_gen = base.inode(a).unwrap().unwrap().generation;
        let b_gen = base.inode(b).unwrap().unwrap().generation;

        let mut s = session(SendRequest::full(&*next, &fs, &*next).parent(&*base));
        s.send_progress = b;
        s.waiting_moves.push(WaitingMove {
            ino: a,
            gen: a_gen,
            parent: b,
            parent_gen: b_gen,
            name: b"a".to_vec(),
        });
        let orphan = orphan_candidate(a, a_gen, 0);
        assert_eq!(s.cur_path(a, a_gen).unwrap().as_bytes(), orphan.as_slice());
        let mut inner = orphan.clone();
        inner.extend_from_slice(b"/b");
        assert_eq!(s.cur_path(b, b_gen).unwrap().as_bytes(), inner.as_slice());
    }

    #[test]
    fn tree_path_walks_first_refs() {
        let fs = MemFs::new();
        let tree = fs.create_subvolume("t");
        tree.mkdir("a", 0o755).unwrap();
        tree.mkdir("a/b", 0o755).unwrap();
        let f = tree.create("a/b/c", 0o644).unwrap();
        assert_eq!(
            SendSession::<Vec<u8>>::tree_path(&*tree, f).unwrap().as_bytes(),
            b"a/b/c"
        );
    }
}
