//! Command emitters.
//!
//! Paths are resolved before a command is opened, so at most one command is
//! ever under construction.

use crate::error::{SendError, SendResult};
use crate::session::SendSession;
use snapsend_stream::{AttributeType, CommandEncoder, CommandType, Sink, StreamResult};
use snapsend_tree::items::{ExtentBody, FileExtentItem};
use snapsend_tree::{FileType, InodeItem, ItemType, Key, TreeReader};
use tracing::{debug, warn};

/// Names whose empty value is sent as a minimal ACL header.
const POSIX_ACL_NAMES: [&[u8]; 2] = [b"system.posix_acl_access", b"system.posix_acl_default"];

/// Version field of an empty POSIX ACL.
const POSIX_ACL_VERSION: u32 = 2;

/// Clone source chosen for one extent.
#[derive(Clone, Copy)]
pub(crate) struct CloneSource<'a> {
    pub root: &'a dyn TreeReader,
    pub ino: u64,
    pub offset: u64,
}

impl<S: Sink> SendSession<'_, S> {
    fn emit<F>(&mut self, cmd: CommandType, fill: F) -> SendResult<()>
    where
        F: FnOnce(&mut CommandEncoder<S>) -> StreamResult<()>,
    {
        self.encoder.begin(cmd)?;
        let result = fill(&mut self.encoder).and_then(|()| self.encoder.finish());
        if let Err(err) = result {
            self.encoder.abort();
            return Err(err.into());
        }
        Ok(())
    }

    pub(crate) fn send_subvol_begin(&mut self) -> SendResult<()> {
        let target = self.send_root.meta().clone();
        let ctransid = self.send_root.ctransid();
        let parent = self
            .parent_root
            .map(|parent| (parent.meta().uuid, parent.ctransid()));
        let cmd = if parent.is_some() {
            CommandType::Snapshot
        } else {
            CommandType::Subvol
        };
        debug!(name = %target.name, ?cmd, "subvol begin");
        self.emit(cmd, |enc| {
            enc.put_path(AttributeType::Path, target.name.as_bytes())?;
            enc.put_uuid(AttributeType::Uuid, target.uuid.as_bytes())?;
            enc.put_u64(AttributeType::Ctransid, ctransid)?;
            if let Some((uuid, ctransid)) = parent {
                enc.put_uuid(AttributeType::CloneUuid, uuid.as_bytes())?;
                enc.put_u64(AttributeType::CloneCtransid, ctransid)?;
            }
            Ok(())
        })
    }

    pub(crate) fn send_end(&mut self) -> SendResult<()> {
        self.emit(CommandType::End, |_| Ok(()))
    }

    pub(crate) fn send_rename(&mut self, from: &[u8], to: &[u8]) -> SendResult<()> {
        debug!(
            from = %String::from_utf8_lossy(from),
            to = %String::from_utf8_lossy(to),
            "rename"
        );
        self.emit(CommandType::Rename, |enc| {
            enc.put_path(AttributeType::Path, from)?;
            enc.put_path(AttributeType::PathTo, to)
        })
    }

    /// Creates `path` as a new name of the inode at `existing`.
    pub(crate) fn send_link(&mut self, path: &[u8], existing: &[u8]) -> SendResult<()> {
        debug!(
            path = %String::from_utf8_lossy(path),
            existing = %String::from_utf8_lossy(existing),
            "link"
        );
        self.emit(CommandType::Link, |enc| {
            enc.put_path(AttributeType::Path, path)?;
            enc.put_path(AttributeType::PathLink, existing)
        })
    }

    pub(crate) fn send_unlink(&mut self, path: &[u8]) -> SendResult<()> {
        debug!(path = %String::from_utf8_lossy(path), "unlink");
        self.emit(CommandType::Unlink, |enc| {
            enc.put_path(AttributeType::Path, path)
        })
    }

    pub(crate) fn send_rmdir(&mut self, path: &[u8]) -> SendResult<()> {
        debug!(path = %String::from_utf8_lossy(path), "rmdir");
        self.emit(CommandType::Rmdir, |enc| {
            enc.put_path(AttributeType::Path, path)
        })
    }

    pub(crate) fn send_truncate(&mut self, ino: u64, gen: u64, size: u64) -> SendResult<()> {
        let path = self.cur_path(ino, gen)?;
        debug!(ino, size, "truncate");
        self.emit(CommandType::Truncate, |enc| {
            enc.put_path(AttributeType::Path, path.as_bytes())?;
            enc.put_u64(AttributeType::Size, size)
        })
    }

    pub(crate) fn send_chmod(&mut self, ino: u64, gen: u64, mode: u32) -> SendResult<()> {
        let path = self.cur_path(ino, gen)?;
        debug!(ino, mode = format_args!("{mode:o}"), "chmod");
        self.emit(CommandType::Chmod, |enc| {
            enc.put_path(AttributeType::Path, path.as_bytes())?;
            enc.put_u64(AttributeType::Mode, u64::from(mode))
        })
    }

    pub(crate) fn send_chown(&mut self, ino: u64, gen: u64, uid: u32, gid: u32) -> SendResult<()> {
        let path = self.cur_path(ino, gen)?;
        debug!(ino, uid, gid, "chown");
        self.emit(CommandType::Chown, |enc| {
            enc.put_path(AttributeType::Path, path.as_bytes())?;
            enc.put_u64(AttributeType::Uid, u64::from(uid))?;
            enc.put_u64(AttributeType::Gid, u64::from(gid))
        })
    }

    /// Sends the target-side timestamps of `(ino, gen)`.
    pub(crate) fn send_utimes(&mut self, ino: u64, gen: u64) -> SendResult<()> {
        let item = self.inode_item(self.send_root, ino)?;
        let path = self.cur_path(ino, gen)?;
        debug!(ino, "utimes");
        self.emit(CommandType::Utimes, |enc| {
            enc.put_path(AttributeType::Path, path.as_bytes())?;
            enc.put_timespec(AttributeType::Atime, item.atime.sec, item.atime.nsec)?;
            enc.put_timespec(AttributeType::Mtime, item.mtime.sec, item.mtime.nsec)?;
            enc.put_timespec(AttributeType::Ctime, item.ctime.sec, item.ctime.nsec)
        })
    }

    /// Creates the current inode under its orphan name.
    pub(crate) fn send_create_inode(&mut self, ino: u64, item: &InodeItem) -> SendResult<()> {
        let Some(file_type) = item.file_type() else {
            warn!(ino, mode = format_args!("{:o}", item.mode), "unsupported inode type");
            return Err(SendError::Unsupported {
                ino,
                mode: item.mode,
            });
        };
        let cmd = match file_type {
            FileType::Regular => CommandType::Mkfile,
            FileType::Directory => CommandType::Mkdir,
            FileType::Symlink => CommandType::Symlink,
            FileType::CharDevice | FileType::BlockDevice => CommandType::Mknod,
            FileType::Fifo => CommandType::Mkfifo,
            FileType::Socket => CommandType::Mksock,
        };
        let path = self.orphan_name(ino, item.generation)?;
        let link_target = if cmd == CommandType::Symlink {
            Some(self.symlink_target(ino)?)
        } else {
            None
        };
        let is_node = matches!(
            cmd,
            CommandType::Mknod | CommandType::Mkfifo | CommandType::Mksock
        );
        debug!(ino, ?cmd, "create inode");
        self.emit(cmd, |enc| {
            enc.put_path(AttributeType::Path, &path)?;
            enc.put_u64(AttributeType::Ino, ino)?;
            if let Some(target) = &link_target {
                enc.put_path(AttributeType::PathLink, target)?;
            }
            if is_node {
                enc.put_u64(AttributeType::Mode, u64::from(item.mode))?;
                enc.put_u64(AttributeType::Rdev, item.rdev)?;
            }
            Ok(())
        })
    }

    fn symlink_target(&self, ino: u64) -> SendResult<Vec<u8>> {
        let key = Key::new(ino, ItemType::ExtentData, 0);
        let data = self
            .send_root
            .lookup(&key)?
            .ok_or_else(|| SendError::not_found(format!("symlink target of inode {ino}")))?;
        match FileExtentItem::decode(&key, &data)?.body {
            ExtentBody::Inline(target) => Ok(target),
            _ => Err(SendError::inconsistent(format!(
                "symlink target of inode {ino} is not inline"
            ))),
        }
    }

    pub(crate) fn send_set_xattr(&mut self, name: &[u8], value: &[u8]) -> SendResult<()> {
        let path = self.cur_path(self.cur.ino, self.cur.gen)?;
        let empty_acl;
        let value = if value.is_empty() && POSIX_ACL_NAMES.contains(&name) {
            empty_acl = POSIX_ACL_VERSION.to_le_bytes();
            &empty_acl[..]
        } else {
            value
        };
        debug!(ino = self.cur.ino, name = %String::from_utf8_lossy(name), "set xattr");
        self.emit(CommandType::SetXattr, |enc| {
            enc.put_path(AttributeType::Path, path.as_bytes())?;
            enc.put(AttributeType::XattrName, name)?;
            enc.put(AttributeType::XattrData, value)
        })
    }

    pub(crate) fn send_remove_xattr(&mut self, name: &[u8]) -> SendResult<()> {
        let path = self.cur_path(self.cur.ino, self.cur.gen)?;
        debug!(ino = self.cur.ino, name = %String::from_utf8_lossy(name), "remove xattr");
        self.emit(CommandType::RemoveXattr, |enc| {
            enc.put_path(AttributeType::Path, path.as_bytes())?;
            enc.put(AttributeType::XattrName, name)
        })
    }

    /// Writes up to `len` bytes of the current inode at `offset`. Returns the
    /// number of bytes sent, which is short only at end of file.
    pub(crate) fn send_write(&mut self, offset: u64, len: usize) -> SendResult<usize> {
        let data = self.content.read(self.cur.ino, offset, len)?;
        if data.is_empty() {
            return Ok(0);
        }
        let path = self.cur_path(self.cur.ino, self.cur.gen)?;
        debug!(ino = self.cur.ino, offset, len = data.len(), "write");
        self.emit(CommandType::Write, |enc| {
            enc.put_path(AttributeType::Path, path.as_bytes())?;
            enc.put_u64(AttributeType::FileOffset, offset)?;
            enc.put(AttributeType::Data, &data)
        })?;
        Ok(data.len())
    }

    pub(crate) fn send_clone(
        &mut self,
        offset: u64,
        len: u64,
        source: CloneSource<'_>,
    ) -> SendResult<()> {
        let path = self.cur_path(self.cur.ino, self.cur.gen)?;
        let meta = source.root.meta().clone();
        let clone_path = if meta.id == self.send_root.meta().id {
            let gen = self.inode_item(self.send_root, source.ino)?.generation;
            self.cur_path(source.ino, gen)?
        } else {
            Self::tree_path(source.root, source.ino)?
        };
        let clone_ctransid = source.root.ctransid();
        debug!(
            ino = self.cur.ino,
            offset,
            len,
            source = %meta.name,
            source_ino = source.ino,
            source_offset = source.offset,
            "clone"
        );
        self.emit(CommandType::Clone, |enc| {
            enc.put_u64(AttributeType::FileOffset, offset)?;
            enc.put_u64(AttributeType::CloneLen, len)?;
            enc.put_path(AttributeType::Path, path.as_bytes())?;
            enc.put_uuid(AttributeType::CloneUuid, meta.uuid.as_bytes())?;
            enc.put_u64(AttributeType::CloneCtransid, clone_ctransid)?;
            enc.put_path(AttributeType::ClonePath, clone_path.as_bytes())?;
            enc.put_u64(AttributeType::CloneOffset, source.offset)
        })
    }
}
