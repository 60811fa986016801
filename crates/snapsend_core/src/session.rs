//! Send session: drives the tree comparison and turns each change into
//! stream commands.
//!
//! The session processes one inode at a time, in inode number order. The
//! last inode whose items were visited is the *current* inode; its refs are
//! processed once the walk moves past its ref items, and its metadata is
//! finished once the walk leaves it entirely.

use crate::compare::{Change, ChangeKind, ChangeVisitor, CompareStats, TreeComparator};
use crate::config::SendConfig;
use crate::error::{SendError, SendResult};
use crate::name_cache::{NameCache, NameCacheStats};
use crate::refs::{RecordedRef, WaitingMove};
use snapsend_stream::{CommandEncoder, CommandStats, CommandType, Sink};
use snapsend_tree::items::{is_regular, is_symlink};
use snapsend_tree::{
    BackrefResolver, ContentReader, ItemType, Key, SnapshotId, TreeReader, ROOT_DIR_INO,
};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use tracing::{debug, info};

/// The snapshots and collaborators a send reads from.
///
/// # Example
///
/// ```rust
/// use snapsend_core::{SendConfig, SendRequest, SendSession};
/// use snapsend_tree::MemFs;
///
/// let fs = MemFs::new();
/// let base = fs.create_subvolume("base");
/// base.write_file("hello", 0o644, b"hello world!").unwrap();
///
/// let request = SendRequest::full(&*base, &fs, &*base);
/// let session = SendSession::new(request, SendConfig::default(), Vec::new()).unwrap();
/// let (stream, stats) = session.run().unwrap();
/// assert_eq!(stats.bytes, stream.len() as u64);
/// ```
#[derive(Clone, Copy)]
pub struct SendRequest<'a> {
    /// The snapshot being sent.
    pub target: &'a dyn TreeReader,
    /// The snapshot the receiver already has, for incremental sends.
    pub parent: Option<&'a dyn TreeReader>,
    /// Backreference lookup shared by all snapshots.
    pub backrefs: &'a dyn BackrefResolver,
    /// File content of the target.
    pub content: &'a dyn ContentReader,
}

impl<'a> SendRequest<'a> {
    /// A full send of `target`.
    #[must_use]
    pub fn full(
        target: &'a dyn TreeReader,
        backrefs: &'a dyn BackrefResolver,
        content: &'a dyn ContentReader,
    ) -> Self {
        Self {
            target,
            parent: None,
            backrefs,
            content,
        }
    }

    /// Makes the send incremental against `parent`.
    #[must_use]
    pub fn parent(mut self, parent: &'a dyn TreeReader) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Summary of a finished send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendStats {
    /// Bytes written to the sink, header included.
    pub bytes: u64,
    /// Commands written.
    pub commands: u64,
    /// Per-command counters.
    pub per_command: BTreeMap<CommandType, CommandStats>,
    /// Final position of the send cursor.
    pub send_progress: u64,
    /// Tree comparison counters.
    pub compare: CompareStats,
    /// Name cache counters.
    pub name_cache: NameCacheStats,
}

/// State of the inode being processed.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CurrentInode {
    pub ino: u64,
    pub gen: u64,
    pub size: u64,
    pub mode: u32,
    pub new: bool,
    pub new_gen: bool,
    pub deleted: bool,
    pub first_ref_orphan: bool,
    pub truncated: bool,
    pub refs_done: bool,
    pub finished: bool,
}

/// One send of a target snapshot, optionally relative to a parent.
///
/// A session is single use: [`SendSession::run`] consumes it.
pub struct SendSession<'a, S: Sink> {
    pub(crate) send_root: &'a dyn TreeReader,
    pub(crate) parent_root: Option<&'a dyn TreeReader>,
    pub(crate) clone_roots: BTreeMap<SnapshotId, &'a dyn TreeReader>,
    pub(crate) backrefs: &'a dyn BackrefResolver,
    pub(crate) content: &'a dyn ContentReader,
    pub(crate) config: SendConfig,
    pub(crate) encoder: CommandEncoder<S>,
    pub(crate) name_cache: NameCache,
    pub(crate) send_progress: u64,
    pub(crate) cur: CurrentInode,
    pub(crate) new_refs: Vec<RecordedRef>,
    pub(crate) deleted_refs: Vec<RecordedRef>,
    pub(crate) waiting_moves: Vec<WaitingMove>,
}

impl<'a, S: Sink> SendSession<'a, S> {
    /// Creates a session writing to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::InvalidConfig`] if `config` is rejected by
    /// [`SendConfig::validate`].
    pub fn new(request: SendRequest<'a>, config: SendConfig, sink: S) -> SendResult<Self> {
        config.validate()?;
        let mut clone_roots = BTreeMap::new();
        clone_roots.insert(request.target.meta().id, request.target);
        if let Some(parent) = request.parent {
            if parent.meta().id == request.target.meta().id {
                return Err(SendError::invalid_config(
                    "parent and target are the same snapshot",
                ));
            }
            clone_roots.insert(parent.meta().id, parent);
        }
        Ok(Self {
            send_root: request.target,
            parent_root: request.parent,
            clone_roots,
            backrefs: request.backrefs,
            content: request.content,
            encoder: CommandEncoder::new(sink, config.max_command_size),
            name_cache: NameCache::new(
                config.name_cache_low_water,
                config.name_cache_high_water,
            ),
            config,
            send_progress: 0,
            cur: CurrentInode::default(),
            new_refs: Vec::new(),
            deleted_refs: Vec::new(),
            waiting_moves: Vec::new(),
        })
    }

    /// Allows WRITE data to be replaced by CLONE commands referencing
    /// `source`, which the receiver must already hold.
    #[must_use]
    pub fn clone_source(mut self, source: &'a dyn TreeReader) -> Self {
        self.clone_roots.insert(source.meta().id, source);
        self
    }

    /// Produces the whole stream and returns the sink.
    ///
    /// # Errors
    ///
    /// Any error aborts the send; output written so far is not a valid
    /// stream.
    pub fn run(mut self) -> SendResult<(S, SendStats)> {
        info!(
            snapshot = %self.send_root.meta().name,
            parent = ?self.parent_root.map(|p| p.meta().name.as_str()),
            clone_sources = self.clone_roots.len(),
            "send started"
        );
        self.encoder.write_header()?;
        self.send_subvol_begin()?;

        let mut comparator = TreeComparator::new(
            self.send_root,
            self.parent_root,
            self.config.lease_batch_items,
        );
        let compare = comparator.walk(&mut self)?;
        self.finish_inode_if_needed(None)?;
        if self.cur.ino != 0 {
            self.send_progress = self.send_progress.max(self.cur.ino + 1);
        }
        self.apply_waiting_moves()?;
        if let Some(waiting) = self.waiting_moves.first() {
            return Err(SendError::inconsistent(format!(
                "directory {} never left its orphan name",
                waiting.ino
            )));
        }
        comparator.check_lease()?;
        self.send_end()?;

        let encoder_stats = self.encoder.stats().clone();
        let stats = SendStats {
            bytes: encoder_stats.total_bytes,
            commands: encoder_stats.commands(),
            per_command: encoder_stats.per_command,
            send_progress: self.send_progress,
            compare,
            name_cache: self.name_cache.stats(),
        };
        info!(
            bytes = stats.bytes,
            commands = stats.commands,
            new = compare.new,
            deleted = compare.deleted,
            changed = compare.changed,
            "send finished"
        );
        Ok((self.encoder.into_sink(), stats))
    }

    fn changed_inode(&mut self, change: &Change<'_>) -> SendResult<()> {
        let ino = change.key.objectid;
        self.cur = CurrentInode {
            ino,
            ..CurrentInode::default()
        };
        self.send_progress = ino;

        match change.kind {
            ChangeKind::New => {
                let item = self.inode_item(self.send_root, ino)?;
                self.cur.gen = item.generation;
                self.cur.size = item.size;
                self.cur.mode = item.mode;
                self.cur.new = true;
                if ino != ROOT_DIR_INO {
                    self.send_create_inode(ino, &item)?;
                }
            }
            ChangeKind::Deleted => {
                let item = self.inode_item(self.parent_tree()?, ino)?;
                self.cur.gen = item.generation;
                self.cur.size = item.size;
                self.cur.mode = item.mode;
                self.cur.deleted = true;
            }
            ChangeKind::Changed => {
                let left = self.inode_item(self.send_root, ino)?;
                let right = self.inode_item(self.parent_tree()?, ino)?;
                if left.generation == right.generation {
                    self.cur.gen = left.generation;
                    self.cur.size = left.size;
                    self.cur.mode = left.mode;
                    return self.record_refs_in_reused_dirs();
                }
                // The number was reused: remove the old instance, then build
                // the new one from scratch.
                debug!(
                    ino,
                    old_gen = right.generation,
                    new_gen = left.generation,
                    "inode number reused"
                );
                self.cur.new_gen = true;
                self.cur.gen = right.generation;
                self.cur.size = right.size;
                self.cur.mode = right.mode;
                self.cur.deleted = true;
                self.process_all_refs(ChangeKind::Deleted)?;

                self.cur.gen = left.generation;
                self.cur.size = left.size;
                self.cur.mode = left.mode;
                self.cur.deleted = false;
                self.cur.new = true;
                self.cur.first_ref_orphan = false;
                self.cur.refs_done = false;
                self.send_progress = ino;
                self.send_create_inode(ino, &left)?;
                self.process_all_refs(ChangeKind::New)?;
                self.process_all_new_xattrs()?;
                self.process_all_extents()?;
            }
        }
        Ok(())
    }

    fn changed_ref(&mut self, change: &Change<'_>) -> SendResult<()> {
        self.check_current(&change.key)?;
        if self.cur.new_gen || change.key.objectid == ROOT_DIR_INO {
            return Ok(());
        }
        let dir = change.key.offset;
        match (change.kind, change.left, change.right) {
            (ChangeKind::New, Some(left), _) => self.record_new_refs(&change.key, left, dir),
            (ChangeKind::Deleted, _, Some(right)) => {
                self.record_deleted_refs(&change.key, right, dir)
            }
            // Already recorded in full when the inode item was visited.
            (ChangeKind::Changed, ..) if self.is_reused_dir(dir)? => Ok(()),
            (ChangeKind::Changed, Some(left), Some(right)) => {
                self.record_changed_refs(&change.key, left, right, dir)
            }
            _ => Err(SendError::inconsistent(format!(
                "ref change at {} lacks a payload",
                change.key
            ))),
        }
    }

    fn changed_xattr(&mut self, change: &Change<'_>) -> SendResult<()> {
        self.check_current(&change.key)?;
        if self.cur.new_gen || self.cur.deleted {
            return Ok(());
        }
        match (change.kind, change.left, change.right) {
            (ChangeKind::New, Some(left), _) => self.process_new_xattrs(&change.key, left),
            (ChangeKind::Deleted, _, Some(right)) => {
                self.process_deleted_xattrs(&change.key, right)
            }
            (ChangeKind::Changed, Some(left), Some(right)) => {
                self.process_changed_xattrs(&change.key, left, right)
            }
            _ => Err(SendError::inconsistent(format!(
                "xattr change at {} lacks a payload",
                change.key
            ))),
        }
    }

    fn changed_extent(&mut self, change: &Change<'_>) -> SendResult<()> {
        self.check_current(&change.key)?;
        if self.cur.new_gen || self.cur.deleted || change.kind == ChangeKind::Deleted {
            return Ok(());
        }
        let Some(left) = change.left else {
            return Err(SendError::inconsistent(format!(
                "extent change at {} lacks a payload",
                change.key
            )));
        };
        self.process_extent(&change.key, left)
    }

    fn check_current(&self, key: &Key) -> SendResult<()> {
        if key.objectid == self.cur.ino {
            Ok(())
        } else {
            Err(SendError::inconsistent(format!(
                "item {key} visited while processing inode {}",
                self.cur.ino
            )))
        }
    }

    fn process_recorded_refs_if_needed(&mut self, next: Option<&Key>) -> SendResult<()> {
        if self.cur.ino == 0 || self.cur.refs_done {
            return Ok(());
        }
        if let Some(key) = next {
            if key.objectid == self.cur.ino && key.item_type <= ItemType::InodeRef {
                return Ok(());
            }
        }
        if self.new_refs.is_empty() && self.deleted_refs.is_empty() && !self.cur.first_ref_orphan
        {
            return Ok(());
        }
        self.process_recorded_refs()
    }

    /// Processes pending refs and, once the walk has left the current
    /// inode, emits its truncate, ownership, mode and timestamps.
    pub(crate) fn finish_inode_if_needed(&mut self, next: Option<&Key>) -> SendResult<()> {
        self.process_recorded_refs_if_needed(next)?;
        if self.cur.ino == 0 || self.cur.deleted || self.cur.finished {
            return Ok(());
        }
        if next.is_some_and(|key| key.objectid == self.cur.ino) {
            return Ok(());
        }
        self.cur.finished = true;

        let (ino, gen) = (self.cur.ino, self.cur.gen);
        let left = self.inode_item(self.send_root, ino)?;
        let (mut need_chown, mut need_chmod) = (false, false);
        if !is_symlink(self.cur.mode) {
            match self.parent_root {
                Some(parent) if !self.cur.new => {
                    let right = self.inode_item(parent, ino)?;
                    need_chown = left.uid != right.uid || left.gid != right.gid;
                    need_chmod = left.mode != right.mode;
                }
                _ => {
                    need_chown = true;
                    need_chmod = true;
                }
            }
        }

        if is_regular(self.cur.mode) && !self.cur.truncated {
            self.send_truncate(ino, gen, self.cur.size)?;
            self.cur.truncated = true;
        }
        if need_chown {
            self.send_chown(ino, gen, left.uid, left.gid)?;
        }
        if need_chmod {
            self.send_chmod(ino, gen, left.mode & 0o7777)?;
        }
        self.send_utimes(ino, gen)
    }

    pub(crate) fn parent_tree(&self) -> SendResult<&'a dyn TreeReader> {
        self.parent_root
            .ok_or_else(|| SendError::inconsistent("parent snapshot required for this change"))
    }
}

impl<S: Sink> ChangeVisitor for SendSession<'_, S> {
    fn visit(&mut self, change: Change<'_>) -> SendResult<ControlFlow<()>> {
        self.finish_inode_if_needed(Some(&change.key))?;
        match change.key.item_type {
            ItemType::InodeItem => self.changed_inode(&change)?,
            ItemType::InodeRef => self.changed_ref(&change)?,
            ItemType::XattrItem => self.changed_xattr(&change)?,
            ItemType::ExtentData => self.changed_extent(&change)?,
            ItemType::DirItem | ItemType::DirIndex => {}
        }
        Ok(ControlFlow::Continue(()))
    }
}
