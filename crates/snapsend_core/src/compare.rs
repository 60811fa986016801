//! Lock-step merge of two snapshot trees.

use crate::error::{SendError, SendResult};
use snapsend_tree::{Key, TreeItem, TreeReader, ROOT_DIR_INO};
use std::cmp::Ordering;
use std::ops::ControlFlow;
use tracing::{debug, warn};

/// How a key differs between the target (left) and parent (right) trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Only in the target.
    New,
    /// Only in the parent.
    Deleted,
    /// In both, with different payloads.
    Changed,
}

/// One differing key with the payloads from each side.
#[derive(Debug, Clone, Copy)]
pub struct Change<'c> {
    /// The key.
    pub key: Key,
    /// Classification.
    pub kind: ChangeKind,
    /// Target payload, absent for [`ChangeKind::Deleted`].
    pub left: Option<&'c [u8]>,
    /// Parent payload, absent for [`ChangeKind::New`].
    pub right: Option<&'c [u8]>,
}

/// Receives differing keys in ascending key order.
pub trait ChangeVisitor {
    /// Handles one change. Returning `Break` ends the walk early.
    ///
    /// # Errors
    ///
    /// Any error aborts the walk and is returned by
    /// [`TreeComparator::walk`].
    fn visit(&mut self, change: Change<'_>) -> SendResult<ControlFlow<()>>;
}

/// Counters for one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareStats {
    /// Keys reported as new.
    pub new: u64,
    /// Keys reported as deleted.
    pub deleted: u64,
    /// Keys reported as changed.
    pub changed: u64,
    /// Keys present in both trees with equal payloads.
    pub unchanged: u64,
    /// Read leases taken, the initial one included.
    pub leases: u64,
}

/// Transaction counters captured when the walk started.
///
/// The walk holds a lease for a bounded number of items, then drops it and
/// takes a new one. Every renewal re-reads the counters; any difference
/// means a tree was modified under the walk.
#[derive(Debug, Clone, Copy)]
pub struct ReadLease {
    left: u64,
    right: Option<u64>,
}

impl ReadLease {
    /// Captures the current counters.
    pub fn acquire(left: &dyn TreeReader, right: Option<&dyn TreeReader>) -> Self {
        Self {
            left: left.ctransid(),
            right: right.map(TreeReader::ctransid),
        }
    }

    /// Re-reads the counters and fails if either tree changed.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Inconsistent`] on any mismatch.
    pub fn validate(&self, left: &dyn TreeReader, right: Option<&dyn TreeReader>) -> SendResult<()> {
        check_counter(left, self.left)?;
        if let (Some(tree), Some(start)) = (right, self.right) {
            check_counter(tree, start)?;
        }
        Ok(())
    }
}

fn check_counter(tree: &dyn TreeReader, start: u64) -> SendResult<()> {
    let now = tree.ctransid();
    if now != start {
        warn!(snapshot = %tree.meta().name, start, now, "snapshot modified during send");
        return Err(SendError::inconsistent(format!(
            "snapshot {} was modified during send (ctransid {start} -> {now})",
            tree.meta().name
        )));
    }
    Ok(())
}

/// Merges the target and optional parent trees by key.
///
/// Without a parent every target key is reported as [`ChangeKind::New`].
/// Keys are visited from the root directory inode upwards, so an inode's
/// item is always reported before its refs, xattrs and extents.
pub struct TreeComparator<'a> {
    left: &'a dyn TreeReader,
    right: Option<&'a dyn TreeReader>,
    lease_batch_items: usize,
    lease: ReadLease,
    stats: CompareStats,
}

impl<'a> TreeComparator<'a> {
    /// Creates a comparator and takes the initial read lease.
    pub fn new(
        left: &'a dyn TreeReader,
        right: Option<&'a dyn TreeReader>,
        lease_batch_items: usize,
    ) -> Self {
        Self {
            left,
            right,
            lease_batch_items: lease_batch_items.max(1),
            lease: ReadLease::acquire(left, right),
            stats: CompareStats {
                leases: 1,
                ..CompareStats::default()
            },
        }
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> CompareStats {
        self.stats
    }

    /// Validates the lease taken at construction without walking.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Inconsistent`] if either tree changed.
    pub fn check_lease(&self) -> SendResult<()> {
        self.lease.validate(self.left, self.right)
    }

    fn renew_lease(&mut self) -> SendResult<()> {
        self.lease.validate(self.left, self.right)?;
        self.stats.leases += 1;
        debug!(leases = self.stats.leases, "read lease renewed");
        Ok(())
    }

    /// Walks both trees, calling `visitor` for every differing key.
    ///
    /// # Errors
    ///
    /// Returns the first visitor error, a tree read error, or
    /// [`SendError::Inconsistent`] if a tree is modified during the walk.
    pub fn walk<V: ChangeVisitor + ?Sized>(&mut self, visitor: &mut V) -> SendResult<CompareStats> {
        let start = Key::inode(ROOT_DIR_INO);
        let mut left = self.left.seek(&start)?;
        let mut right = match self.right {
            Some(tree) => tree.seek(&start)?,
            None => None,
        };
        let mut since_lease = 0usize;

        loop {
            if since_lease == self.lease_batch_items {
                self.renew_lease()?;
                since_lease = 0;
            }
            since_lease += 1;

            let flow = match (&left, &right) {
                (None, None) => break,
                (Some(l), None) => {
                    let flow = self.emit_new(visitor, l)?;
                    left = self.left.next_after(&l.key)?;
                    flow
                }
                (None, Some(r)) => {
                    let flow = self.emit_deleted(visitor, r)?;
                    right = self.next_right(&r.key)?;
                    flow
                }
                (Some(l), Some(r)) => match l.key.cmp(&r.key) {
                    Ordering::Less => {
                        let flow = self.emit_new(visitor, l)?;
                        left = self.left.next_after(&l.key)?;
                        flow
                    }
                    Ordering::Greater => {
                        let flow = self.emit_deleted(visitor, r)?;
                        right = self.next_right(&r.key)?;
                        flow
                    }
                    Ordering::Equal => {
                        let flow = if l.data == r.data {
                            self.stats.unchanged += 1;
                            ControlFlow::Continue(())
                        } else {
                            self.stats.changed += 1;
                            visitor.visit(Change {
                                key: l.key,
                                kind: ChangeKind::Changed,
                                left: Some(&l.data),
                                right: Some(&r.data),
                            })?
                        };
                        let key = l.key;
                        left = self.left.next_after(&key)?;
                        right = self.next_right(&key)?;
                        flow
                    }
                },
            };
            if flow.is_break() {
                break;
            }
        }

        self.lease.validate(self.left, self.right)?;
        Ok(self.stats)
    }

    fn next_right(&self, key: &Key) -> SendResult<Option<TreeItem>> {
        match self.right {
            Some(tree) => Ok(tree.next_after(key)?),
            None => Ok(None),
        }
    }

    fn emit_new<V: ChangeVisitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        item: &TreeItem,
    ) -> SendResult<ControlFlow<()>> {
        self.stats.new += 1;
        visitor.visit(Change {
            key: item.key,
            kind: ChangeKind::New,
            left: Some(&item.data),
            right: None,
        })
    }

    fn emit_deleted<V: ChangeVisitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        item: &TreeItem,
    ) -> SendResult<ControlFlow<()>> {
        self.stats.deleted += 1;
        visitor.visit(Change {
            key: item.key,
            kind: ChangeKind::Deleted,
            left: None,
            right: Some(&item.data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use snapsend_tree::{ItemType, MemFs};

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(Key, ChangeKind)>,
        stop_after: Option<usize>,
    }

    impl ChangeVisitor for Recorder {
        fn visit(&mut self, change: Change<'_>) -> SendResult<ControlFlow<()>> {
            match change.kind {
                ChangeKind::New => assert!(change.left.is_some() && change.right.is_none()),
                ChangeKind::Deleted => assert!(change.left.is_none() && change.right.is_some()),
                ChangeKind::Changed => assert_ne!(change.left, change.right),
            }
            self.seen.push((change.key, change.kind));
            if self.stop_after == Some(self.seen.len()) {
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        }
    }

    #[test]
    fn full_walk_reports_everything_new() {
        let fs = MemFs::new();
        let tree = fs.create_subvolume("t");
        tree.write_file("a", 0o644, b"data").unwrap();

        let mut rec = Recorder::default();
        let stats = TreeComparator::new(&*tree, None, 1024)
            .walk(&mut rec)
            .unwrap();
        assert!(rec.seen.iter().all(|(_, k)| *k == ChangeKind::New));
        assert_eq!(stats.new as usize, tree.item_count());
        assert!(rec.seen.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        base.write_file("a", 0o644, b"data").unwrap();
        let snap = fs.snapshot(&base, "snap");

        let mut rec = Recorder::default();
        let stats = TreeComparator::new(&*snap, Some(&*base), 1024)
            .walk(&mut rec)
            .unwrap();
        assert!(rec.seen.is_empty());
        assert_eq!(stats.unchanged as usize, base.item_count());
    }

    #[test]
    fn classifies_new_deleted_and_changed() {
        let fs = MemFs::new();
        let base = fs.create_subvolume("base");
        let gone = base.write_file("gone", 0o644, b"x").unwrap();
        let kept = base.write_file("kept", 0o644, b"x").unwrap();
        let snap = fs.snapshot(&base, "snap");
        snap.unlink("gone").unwrap();
        snap.chmod("kept", 0o600).unwrap();
        let added = snap.create("added", 0o644).unwrap();

        let mut rec = Recorder::default();
        TreeComparator::new(&*snap, Some(&*base), 1024)
            .walk(&mut rec)
            .unwrap();
        assert!(rec.seen.contains(&(Key::inode(gone), ChangeKind::Deleted)));
        assert!(rec.seen.contains(&(Key::inode(kept), ChangeKind::Changed)));
        assert!(rec.seen.contains(&(Key::inode(added), ChangeKind::New)));
        assert!(rec
            .seen
            .iter()
            .any(|(k, kind)| k.objectid == ROOT_DIR_INO
                && k.item_type == ItemType::DirItem
                && *kind == ChangeKind::New));
    }

    #[test]
    fn visitor_can_stop_early() {
        let fs = MemFs::new();
        let tree = fs.create_subvolume("t");
        for name in ["a", "b", "c"] {
            tree.create(name, 0o644).unwrap();
        }
        let mut rec = Recorder {
            stop_after: Some(2),
            ..Recorder::default()
        };
        TreeComparator::new(&*tree, None, 1024)
            .walk(&mut rec)
            .unwrap();
        assert_eq!(rec.seen.len(), 2);
    }

    struct Mutator<'t> {
        tree: &'t snapsend_tree::MemTree,
        done: bool,
    }

    impl ChangeVisitor for Mutator<'_> {
        fn visit(&mut self, _change: Change<'_>) -> SendResult<ControlFlow<()>> {
            if !self.done {
                self.tree.create("intruder", 0o644)?;
                self.done = true;
            }
            Ok(ControlFlow::Continue(()))
        }
    }

    #[test]
    fn modification_during_walk_is_fatal() {
        let fs = MemFs::new();
        let tree = fs.create_subvolume("t");
        for i in 0..8 {
            tree.create(&format!("f{i}"), 0o644).unwrap();
        }
        let mut visitor = Mutator {
            tree: &*tree,
            done: false,
        };
        let err = TreeComparator::new(&*tree, None, 2)
            .walk(&mut visitor)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inconsistent);
    }

    #[test]
    fn leases_are_renewed_per_batch() {
        let fs = MemFs::new();
        let tree = fs.create_subvolume("t");
        for i in 0..10 {
            tree.create(&format!("f{i}"), 0o644).unwrap();
        }
        let mut rec = Recorder::default();
        let stats = TreeComparator::new(&*tree, None, 4)
            .walk(&mut rec)
            .unwrap();
        let items = tree.item_count() as u64;
        assert_eq!(stats.leases, 1 + items / 4);
    }
}
