//! Reference receiver.
//!
//! Applies send streams to an in-memory model of a receiving filesystem.
//! The receiver is strict where a real one would be: a RENAME or LINK onto
//! an existing name fails, RMDIR of a non-empty directory fails, and no
//! command changes timestamps implicitly. A stream that only works because
//! of lenient replay is a bug in the sender.

use snapsend_stream::{AttributeType, Command, CommandType, StreamError, StreamReader};
use snapsend_tree::items::{S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use std::collections::BTreeMap;
use std::io::Read;
use thiserror::Error;
use tracing::{debug, trace};

/// Result type for receive operations.
pub type ReceiveResult<T> = Result<T, ReceiveError>;

/// Errors raised while replaying a stream.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The stream could not be decoded.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// A path does not resolve.
    #[error("{path}: no such file or directory")]
    NotFound {
        /// The path.
        path: String,
    },

    /// A create, rename or link target already exists.
    #[error("{path}: already exists")]
    AlreadyExists {
        /// The path.
        path: String,
    },

    /// RMDIR of a directory with entries.
    #[error("{path}: directory not empty")]
    NotEmpty {
        /// The path.
        path: String,
    },

    /// A directory was expected.
    #[error("{path}: not a directory")]
    NotADirectory {
        /// The path.
        path: String,
    },

    /// A non-directory was expected.
    #[error("{path}: is a directory")]
    IsADirectory {
        /// The path.
        path: String,
    },

    /// A regular file was expected.
    #[error("{path}: not a regular file")]
    NotAFile {
        /// The path.
        path: String,
    },

    /// SNAPSHOT or CLONE names a subvolume the receiver does not hold.
    #[error("unknown subvolume {uuid}")]
    UnknownSubvolume {
        /// Hex form of the uuid.
        uuid: String,
    },

    /// The command sequence is invalid.
    #[error("invalid stream: {0}")]
    Invalid(String),
}

impl ReceiveError {
    fn not_found(path: &[u8]) -> Self {
        Self::NotFound {
            path: display(path),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

fn display(path: &[u8]) -> String {
    String::from_utf8_lossy(path).into_owned()
}

fn hex(uuid: &[u8; 16]) -> String {
    uuid.iter().map(|b| format!("{b:02x}")).collect()
}

/// Node identifier inside one received tree.
pub type NodeId = u64;

/// Identifier of the root directory of every received tree.
pub const ROOT_NODE: NodeId = 0;

/// Content of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Regular file data.
    File(Vec<u8>),
    /// Directory entries by name.
    Dir(BTreeMap<Vec<u8>, NodeId>),
    /// Symbolic link target.
    Symlink(Vec<u8>),
    /// Device node, fifo or socket.
    Special {
        /// Device number.
        rdev: u64,
    },
}

/// One inode of a received tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Content.
    pub kind: NodeKind,
    /// Full mode bits, type included.
    pub mode: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Number of directory entries naming this node.
    pub nlink: u32,
    /// Extended attributes.
    pub xattrs: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Access time as `(sec, nsec)`.
    pub atime: (u64, u32),
    /// Modification time.
    pub mtime: (u64, u32),
    /// Change time.
    pub ctime: (u64, u32),
}

impl Node {
    fn new(kind: NodeKind, mode: u32) -> Self {
        Self {
            kind,
            mode,
            uid: 0,
            gid: 0,
            nlink: 0,
            xattrs: BTreeMap::new(),
            atime: (0, 0),
            mtime: (0, 0),
            ctime: (0, 0),
        }
    }

    /// Returns true for directories.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir(_))
    }
}

/// One subvolume as rebuilt by the receiver.
#[derive(Debug, Clone)]
pub struct ReceivedTree {
    /// Name from the SUBVOL or SNAPSHOT command.
    pub name: String,
    /// Identity of the sent snapshot.
    pub uuid: [u8; 16],
    /// Change counter of the sent snapshot.
    pub ctransid: u64,
    nodes: BTreeMap<NodeId, Node>,
    next_id: NodeId,
}

impl ReceivedTree {
    fn new(name: String, uuid: [u8; 16], ctransid: u64) -> Self {
        let mut root = Node::new(NodeKind::Dir(BTreeMap::new()), S_IFDIR | 0o755);
        root.nlink = 1;
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_NODE, root);
        Self {
            name,
            uuid,
            ctransid,
            nodes,
            next_id: ROOT_NODE + 1,
        }
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Number of nodes, the root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Resolves a `/`-separated path relative to the root.
    ///
    /// # Errors
    ///
    /// Fails if a component is missing or a non-final component is not a
    /// directory.
    pub fn resolve(&self, path: &[u8]) -> ReceiveResult<NodeId> {
        let mut id = ROOT_NODE;
        for name in components(path) {
            id = match &self.get(id, path)?.kind {
                NodeKind::Dir(entries) => *entries
                    .get(name)
                    .ok_or_else(|| ReceiveError::not_found(path))?,
                _ => {
                    return Err(ReceiveError::NotADirectory {
                        path: display(path),
                    })
                }
            };
        }
        Ok(id)
    }

    /// Lists a directory as `(name, node)` pairs in name order.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not a directory.
    pub fn entries(&self, id: NodeId) -> ReceiveResult<Vec<(Vec<u8>, NodeId)>> {
        match &self.get(id, b"")?.kind {
            NodeKind::Dir(entries) => Ok(entries.iter().map(|(n, c)| (n.clone(), *c)).collect()),
            _ => Err(ReceiveError::NotADirectory {
                path: format!("node {id}"),
            }),
        }
    }

    fn get(&self, id: NodeId, path: &[u8]) -> ReceiveResult<&Node> {
        self.nodes.get(&id).ok_or_else(|| ReceiveError::not_found(path))
    }

    fn get_mut(&mut self, id: NodeId, path: &[u8]) -> ReceiveResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| ReceiveError::not_found(path))
    }

    fn resolve_parent<'p>(&self, path: &'p [u8]) -> ReceiveResult<(NodeId, &'p [u8])> {
        let (dir_path, name) = match path.iter().rposition(|&b| b == b'/') {
            Some(pos) => (&path[..pos], &path[pos + 1..]),
            None => (&path[..0], path),
        };
        if name.is_empty() {
            return Err(ReceiveError::invalid(format!(
                "{}: empty name",
                display(path)
            )));
        }
        let dir = self.resolve(dir_path)?;
        if !self.get(dir, path)?.is_dir() {
            return Err(ReceiveError::NotADirectory {
                path: display(dir_path),
            });
        }
        Ok((dir, name))
    }

    fn child(&self, dir: NodeId, name: &[u8]) -> Option<NodeId> {
        match &self.nodes.get(&dir)?.kind {
            NodeKind::Dir(entries) => entries.get(name).copied(),
            _ => None,
        }
    }

    fn add_entry(&mut self, dir: NodeId, name: &[u8], id: NodeId, path: &[u8]) -> ReceiveResult<()> {
        let NodeKind::Dir(entries) = &mut self.get_mut(dir, path)?.kind else {
            return Err(ReceiveError::NotADirectory {
                path: display(path),
            });
        };
        if entries.contains_key(name) {
            return Err(ReceiveError::AlreadyExists {
                path: display(path),
            });
        }
        entries.insert(name.to_vec(), id);
        self.get_mut(id, path)?.nlink += 1;
        Ok(())
    }

    fn remove_entry(&mut self, dir: NodeId, name: &[u8], path: &[u8]) -> ReceiveResult<NodeId> {
        let NodeKind::Dir(entries) = &mut self.get_mut(dir, path)?.kind else {
            return Err(ReceiveError::NotADirectory {
                path: display(path),
            });
        };
        let id = entries
            .remove(name)
            .ok_or_else(|| ReceiveError::not_found(path))?;
        let node = self.get_mut(id, path)?;
        node.nlink = node.nlink.saturating_sub(1);
        Ok(id)
    }

    fn is_ancestor(&self, ancestor: NodeId, mut dir: NodeId) -> bool {
        // Directories have one name, so walking up by search terminates.
        loop {
            if dir == ancestor {
                return true;
            }
            if dir == ROOT_NODE {
                return false;
            }
            let parent = self.nodes.iter().find_map(|(id, node)| match &node.kind {
                NodeKind::Dir(entries) if entries.values().any(|c| *c == dir) => Some(*id),
                _ => None,
            });
            match parent {
                Some(parent) => dir = parent,
                None => return false,
            }
        }
    }

    fn create(&mut self, path: &[u8], node: Node) -> ReceiveResult<NodeId> {
        let (dir, name) = self.resolve_parent(path)?;
        if self.child(dir, name).is_some() {
            return Err(ReceiveError::AlreadyExists {
                path: display(path),
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, node);
        self.add_entry(dir, name, id, path)?;
        Ok(id)
    }

    fn rename(&mut self, from: &[u8], to: &[u8]) -> ReceiveResult<()> {
        let (src_dir, src_name) = self.resolve_parent(from)?;
        let id = self
            .child(src_dir, src_name)
            .ok_or_else(|| ReceiveError::not_found(from))?;
        let (dst_dir, dst_name) = self.resolve_parent(to)?;
        if self.child(dst_dir, dst_name).is_some() {
            return Err(ReceiveError::AlreadyExists { path: display(to) });
        }
        if self.get(id, from)?.is_dir() && self.is_ancestor(id, dst_dir) {
            return Err(ReceiveError::invalid(format!(
                "cannot move {} inside itself to {}",
                display(from),
                display(to)
            )));
        }
        self.remove_entry(src_dir, src_name, from)?;
        self.add_entry(dst_dir, dst_name, id, to)
    }

    fn link(&mut self, path: &[u8], existing: &[u8]) -> ReceiveResult<()> {
        let id = self.resolve(existing)?;
        if self.get(id, existing)?.is_dir() {
            return Err(ReceiveError::IsADirectory {
                path: display(existing),
            });
        }
        let (dir, name) = self.resolve_parent(path)?;
        self.add_entry(dir, name, id, path)
    }

    fn unlink(&mut self, path: &[u8]) -> ReceiveResult<()> {
        let (dir, name) = self.resolve_parent(path)?;
        let id = self
            .child(dir, name)
            .ok_or_else(|| ReceiveError::not_found(path))?;
        if self.get(id, path)?.is_dir() {
            return Err(ReceiveError::IsADirectory {
                path: display(path),
            });
        }
        self.remove_entry(dir, name, path)?;
        if self.get(id, path)?.nlink == 0 {
            self.nodes.remove(&id);
        }
        Ok(())
    }

    fn rmdir(&mut self, path: &[u8]) -> ReceiveResult<()> {
        let (dir, name) = self.resolve_parent(path)?;
        let id = self
            .child(dir, name)
            .ok_or_else(|| ReceiveError::not_found(path))?;
        match &self.get(id, path)?.kind {
            NodeKind::Dir(entries) if entries.is_empty() => {}
            NodeKind::Dir(_) => {
                return Err(ReceiveError::NotEmpty {
                    path: display(path),
                })
            }
            _ => {
                return Err(ReceiveError::NotADirectory {
                    path: display(path),
                })
            }
        }
        self.remove_entry(dir, name, path)?;
        self.nodes.remove(&id);
        Ok(())
    }

    fn file_mut(&mut self, path: &[u8]) -> ReceiveResult<&mut Vec<u8>> {
        let id = self.resolve(path)?;
        match &mut self.get_mut(id, path)?.kind {
            NodeKind::File(data) => Ok(data),
            _ => Err(ReceiveError::NotAFile {
                path: display(path),
            }),
        }
    }

    fn read_range(&self, path: &[u8], offset: u64, len: u64) -> ReceiveResult<Vec<u8>> {
        let id = self.resolve(path)?;
        let NodeKind::File(data) = &self.get(id, path)?.kind else {
            return Err(ReceiveError::NotAFile {
                path: display(path),
            });
        };
        let start = to_usize(offset)?;
        let end = to_usize(offset + len)?;
        if end > data.len() {
            return Err(ReceiveError::invalid(format!(
                "clone source {} has {} bytes, range ends at {end}",
                display(path),
                data.len()
            )));
        }
        Ok(data[start..end].to_vec())
    }
}

fn components(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    path.split(|&b| b == b'/').filter(|c| !c.is_empty())
}

fn to_usize(value: u64) -> ReceiveResult<usize> {
    usize::try_from(value).map_err(|_| ReceiveError::invalid(format!("offset {value} too large")))
}

fn write_at(data: &mut Vec<u8>, offset: u64, bytes: &[u8]) -> ReceiveResult<()> {
    let start = to_usize(offset)?;
    let end = start + bytes.len();
    if data.len() < end {
        data.resize(end, 0);
    }
    data[start..end].copy_from_slice(bytes);
    Ok(())
}

/// A receiving filesystem holding every subvolume received so far.
///
/// # Example
///
/// ```rust
/// use snapsend_core::{SendConfig, SendRequest, SendSession};
/// use snapsend_testkit::ReceiverFs;
/// use snapsend_tree::MemFs;
///
/// let fs = MemFs::new();
/// let base = fs.create_subvolume("base");
/// base.write_file("hello", 0o644, b"hi").unwrap();
///
/// let request = SendRequest::full(&*base, &fs, &*base);
/// let (stream, _) = SendSession::new(request, SendConfig::default(), Vec::new())
///     .unwrap()
///     .run()
///     .unwrap();
///
/// let mut receiver = ReceiverFs::new();
/// let tree = receiver.receive(stream.as_slice()).unwrap();
/// assert!(tree.resolve(b"hello").is_ok());
/// ```
#[derive(Debug, Default)]
pub struct ReceiverFs {
    subvolumes: Vec<ReceivedTree>,
}

impl ReceiverFs {
    /// Creates a receiver holding no subvolumes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a received subvolume by name.
    #[must_use]
    pub fn subvolume(&self, name: &str) -> Option<&ReceivedTree> {
        self.subvolumes.iter().find(|tree| tree.name == name)
    }

    /// Finds a received subvolume by uuid.
    #[must_use]
    pub fn by_uuid(&self, uuid: &[u8; 16]) -> Option<&ReceivedTree> {
        self.subvolumes.iter().find(|tree| &tree.uuid == uuid)
    }

    /// Number of subvolumes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subvolumes.len()
    }

    /// Returns true if nothing has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subvolumes.is_empty()
    }

    /// Replays one complete stream and returns the subvolume it built.
    ///
    /// Nothing is kept if the stream fails part-way.
    ///
    /// # Errors
    ///
    /// Returns the first decoding or replay error, or
    /// [`ReceiveError::Invalid`] if the stream does not end with END.
    pub fn receive<R: Read>(&mut self, stream: R) -> ReceiveResult<&ReceivedTree> {
        let mut reader = StreamReader::new(stream)?;
        let first = reader
            .next_command()?
            .ok_or_else(|| ReceiveError::invalid("stream has no commands"))?;
        let mut tree = self.begin(&first)?;
        debug!(name = %tree.name, "receiving subvolume");

        let mut ended = false;
        let mut count = 1u64;
        while let Some(cmd) = reader.next_command()? {
            count += 1;
            if ended {
                return Err(ReceiveError::invalid("command after END"));
            }
            if cmd.kind == CommandType::End {
                ended = true;
                continue;
            }
            self.apply(&mut tree, &cmd)?;
        }
        if !ended {
            return Err(ReceiveError::invalid("stream ended without END"));
        }
        debug!(name = %tree.name, commands = count, "subvolume received");

        self.subvolumes.retain(|held| held.uuid != tree.uuid);
        self.subvolumes.push(tree);
        self.subvolumes
            .last()
            .ok_or_else(|| ReceiveError::invalid("subvolume vanished"))
    }

    fn begin(&self, cmd: &Command) -> ReceiveResult<ReceivedTree> {
        let name = display(cmd.get_path(AttributeType::Path)?);
        let uuid = cmd.get_uuid(AttributeType::Uuid)?;
        let ctransid = cmd.get_u64(AttributeType::Ctransid)?;
        match cmd.kind {
            CommandType::Subvol => Ok(ReceivedTree::new(name, uuid, ctransid)),
            CommandType::Snapshot => {
                let parent_uuid = cmd.get_uuid(AttributeType::CloneUuid)?;
                let parent_ctransid = cmd.get_u64(AttributeType::CloneCtransid)?;
                let parent = self.held(&parent_uuid, parent_ctransid)?;
                let mut tree = parent.clone();
                tree.name = name;
                tree.uuid = uuid;
                tree.ctransid = ctransid;
                Ok(tree)
            }
            other => Err(ReceiveError::invalid(format!(
                "stream starts with {}",
                other.name()
            ))),
        }
    }

    fn held(&self, uuid: &[u8; 16], ctransid: u64) -> ReceiveResult<&ReceivedTree> {
        let tree = self
            .by_uuid(uuid)
            .ok_or_else(|| ReceiveError::UnknownSubvolume { uuid: hex(uuid) })?;
        if tree.ctransid != ctransid {
            return Err(ReceiveError::invalid(format!(
                "subvolume {} has ctransid {}, stream expects {ctransid}",
                tree.name, tree.ctransid
            )));
        }
        Ok(tree)
    }

    fn apply(&self, tree: &mut ReceivedTree, cmd: &Command) -> ReceiveResult<()> {
        trace!(command = cmd.kind.name(), "apply");
        match cmd.kind {
            CommandType::Subvol | CommandType::Snapshot => {
                Err(ReceiveError::invalid("subvolume begin inside a stream"))
            }
            CommandType::Mkfile => {
                let path = cmd.get_path(AttributeType::Path)?;
                tree.create(path, Node::new(NodeKind::File(Vec::new()), S_IFREG | 0o600))?;
                Ok(())
            }
            CommandType::Mkdir => {
                let path = cmd.get_path(AttributeType::Path)?;
                tree.create(path, Node::new(NodeKind::Dir(BTreeMap::new()), S_IFDIR | 0o700))?;
                Ok(())
            }
            CommandType::Mknod | CommandType::Mkfifo | CommandType::Mksock => {
                let path = cmd.get_path(AttributeType::Path)?;
                let mode = u32::try_from(cmd.get_u64(AttributeType::Mode)?)
                    .map_err(|_| ReceiveError::invalid("mode out of range"))?;
                let rdev = cmd.get_u64(AttributeType::Rdev)?;
                tree.create(path, Node::new(NodeKind::Special { rdev }, mode))?;
                Ok(())
            }
            CommandType::Symlink => {
                let path = cmd.get_path(AttributeType::Path)?;
                let target = cmd.get_path(AttributeType::PathLink)?.to_vec();
                tree.create(path, Node::new(NodeKind::Symlink(target), S_IFLNK | 0o777))?;
                Ok(())
            }
            CommandType::Rename => tree.rename(
                cmd.get_path(AttributeType::Path)?,
                cmd.get_path(AttributeType::PathTo)?,
            ),
            CommandType::Link => tree.link(
                cmd.get_path(AttributeType::Path)?,
                cmd.get_path(AttributeType::PathLink)?,
            ),
            CommandType::Unlink => tree.unlink(cmd.get_path(AttributeType::Path)?),
            CommandType::Rmdir => tree.rmdir(cmd.get_path(AttributeType::Path)?),
            CommandType::SetXattr => {
                let path = cmd.get_path(AttributeType::Path)?;
                let name = cmd.require(AttributeType::XattrName)?.to_vec();
                let value = cmd.require(AttributeType::XattrData)?.to_vec();
                let id = tree.resolve(path)?;
                tree.get_mut(id, path)?.xattrs.insert(name, value);
                Ok(())
            }
            CommandType::RemoveXattr => {
                let path = cmd.get_path(AttributeType::Path)?;
                let name = cmd.require(AttributeType::XattrName)?;
                let id = tree.resolve(path)?;
                tree.get_mut(id, path)?
                    .xattrs
                    .remove(name)
                    .map(|_| ())
                    .ok_or_else(|| ReceiveError::not_found(name))
            }
            CommandType::Write => {
                let path = cmd.get_path(AttributeType::Path)?;
                let offset = cmd.get_u64(AttributeType::FileOffset)?;
                let data = cmd.require(AttributeType::Data)?;
                write_at(tree.file_mut(path)?, offset, data)
            }
            CommandType::Clone => self.apply_clone(tree, cmd),
            CommandType::Truncate => {
                let path = cmd.get_path(AttributeType::Path)?;
                let size = to_usize(cmd.get_u64(AttributeType::Size)?)?;
                tree.file_mut(path)?.resize(size, 0);
                Ok(())
            }
            CommandType::Chmod => {
                let path = cmd.get_path(AttributeType::Path)?;
                let mode = cmd.get_u64(AttributeType::Mode)?;
                let id = tree.resolve(path)?;
                let node = tree.get_mut(id, path)?;
                node.mode = (node.mode & S_IFMT) | (mode as u32 & 0o7777);
                Ok(())
            }
            CommandType::Chown => {
                let path = cmd.get_path(AttributeType::Path)?;
                let uid = cmd.get_u64(AttributeType::Uid)?;
                let gid = cmd.get_u64(AttributeType::Gid)?;
                let id = tree.resolve(path)?;
                let node = tree.get_mut(id, path)?;
                node.uid = u32::try_from(uid).map_err(|_| ReceiveError::invalid("uid out of range"))?;
                node.gid = u32::try_from(gid).map_err(|_| ReceiveError::invalid("gid out of range"))?;
                Ok(())
            }
            CommandType::Utimes => {
                let path = cmd.get_path(AttributeType::Path)?;
                let atime = cmd.get_timespec(AttributeType::Atime)?;
                let mtime = cmd.get_timespec(AttributeType::Mtime)?;
                let ctime = cmd.get_timespec(AttributeType::Ctime)?;
                let id = tree.resolve(path)?;
                let node = tree.get_mut(id, path)?;
                node.atime = atime;
                node.mtime = mtime;
                node.ctime = ctime;
                Ok(())
            }
            CommandType::End => Ok(()),
        }
    }

    fn apply_clone(&self, tree: &mut ReceivedTree, cmd: &Command) -> ReceiveResult<()> {
        let offset = cmd.get_u64(AttributeType::FileOffset)?;
        let len = cmd.get_u64(AttributeType::CloneLen)?;
        let path = cmd.get_path(AttributeType::Path)?;
        let uuid = cmd.get_uuid(AttributeType::CloneUuid)?;
        let ctransid = cmd.get_u64(AttributeType::CloneCtransid)?;
        let clone_path = cmd.get_path(AttributeType::ClonePath)?;
        let clone_offset = cmd.get_u64(AttributeType::CloneOffset)?;

        let data = if uuid == tree.uuid {
            tree.read_range(clone_path, clone_offset, len)?
        } else {
            self.held(&uuid, ctransid)?
                .read_range(clone_path, clone_offset, len)?
        };
        write_at(tree.file_mut(path)?, offset, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapsend_stream::CommandEncoder;

    fn stream(build: impl FnOnce(&mut CommandEncoder<Vec<u8>>)) -> Vec<u8> {
        let mut enc = CommandEncoder::new(Vec::new(), 64 * 1024);
        enc.write_header().unwrap();
        enc.begin(CommandType::Subvol).unwrap();
        enc.put_path(AttributeType::Path, b"vol").unwrap();
        enc.put_uuid(AttributeType::Uuid, &[7; 16]).unwrap();
        enc.put_u64(AttributeType::Ctransid, 3).unwrap();
        enc.finish().unwrap();
        build(&mut enc);
        enc.begin(CommandType::End).unwrap();
        enc.finish().unwrap();
        enc.into_sink()
    }

    fn path_cmd(enc: &mut CommandEncoder<Vec<u8>>, cmd: CommandType, path: &[u8]) {
        enc.begin(cmd).unwrap();
        enc.put_path(AttributeType::Path, path).unwrap();
        enc.put_u64(AttributeType::Ino, 300).unwrap();
        enc.finish().unwrap();
    }

    fn rename(enc: &mut CommandEncoder<Vec<u8>>, from: &[u8], to: &[u8]) {
        enc.begin(CommandType::Rename).unwrap();
        enc.put_path(AttributeType::Path, from).unwrap();
        enc.put_path(AttributeType::PathTo, to).unwrap();
        enc.finish().unwrap();
    }

    #[test]
    fn builds_files_and_directories() {
        let bytes = stream(|enc| {
            path_cmd(enc, CommandType::Mkdir, b"d");
            path_cmd(enc, CommandType::Mkfile, b"d/f");
            enc.begin(CommandType::Write).unwrap();
            enc.put_path(AttributeType::Path, b"d/f").unwrap();
            enc.put_u64(AttributeType::FileOffset, 2).unwrap();
            enc.put(AttributeType::Data, b"xy").unwrap();
            enc.finish().unwrap();
        });
        let mut fs = ReceiverFs::new();
        let tree = fs.receive(bytes.as_slice()).unwrap();
        let id = tree.resolve(b"d/f").unwrap();
        assert_eq!(tree.node(id).unwrap().kind, NodeKind::File(b"\0\0xy".to_vec()));
        assert_eq!(tree.ctransid, 3);
        assert_eq!(fs.len(), 1);
    }

    #[test]
    fn rename_onto_existing_name_fails() {
        let bytes = stream(|enc| {
            path_cmd(enc, CommandType::Mkfile, b"a");
            path_cmd(enc, CommandType::Mkfile, b"b");
            rename(enc, b"a", b"b");
        });
        let err = ReceiverFs::new().receive(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ReceiveError::AlreadyExists { .. }));
    }

    #[test]
    fn rmdir_of_non_empty_directory_fails() {
        let bytes = stream(|enc| {
            path_cmd(enc, CommandType::Mkdir, b"d");
            path_cmd(enc, CommandType::Mkfile, b"d/f");
            path_cmd(enc, CommandType::Rmdir, b"d");
        });
        let err = ReceiverFs::new().receive(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ReceiveError::NotEmpty { .. }));
    }

    #[test]
    fn directory_cannot_move_inside_itself() {
        let bytes = stream(|enc| {
            path_cmd(enc, CommandType::Mkdir, b"p");
            path_cmd(enc, CommandType::Mkdir, b"p/q");
            rename(enc, b"p", b"p/q/p");
        });
        let err = ReceiverFs::new().receive(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ReceiveError::Invalid(_)));
    }

    #[test]
    fn last_unlink_drops_the_node() {
        let bytes = stream(|enc| {
            path_cmd(enc, CommandType::Mkfile, b"a");
            enc.begin(CommandType::Link).unwrap();
            enc.put_path(AttributeType::Path, b"b").unwrap();
            enc.put_path(AttributeType::PathLink, b"a").unwrap();
            enc.finish().unwrap();
            path_cmd(enc, CommandType::Unlink, b"a");
        });
        let mut fs = ReceiverFs::new();
        let tree = fs.receive(bytes.as_slice()).unwrap();
        let id = tree.resolve(b"b").unwrap();
        assert_eq!(tree.node(id).unwrap().nlink, 1);
        assert_eq!(tree.node_count(), 2);
    }

    #[test]
    fn missing_end_is_rejected() {
        let mut enc = CommandEncoder::new(Vec::new(), 64 * 1024);
        enc.write_header().unwrap();
        enc.begin(CommandType::Subvol).unwrap();
        enc.put_path(AttributeType::Path, b"vol").unwrap();
        enc.put_uuid(AttributeType::Uuid, &[1; 16]).unwrap();
        enc.put_u64(AttributeType::Ctransid, 1).unwrap();
        enc.finish().unwrap();
        let mut fs = ReceiverFs::new();
        assert!(fs.receive(enc.into_sink().as_slice()).is_err());
        assert!(fs.is_empty());
    }

    #[test]
    fn snapshot_of_unknown_parent_is_rejected() {
        let mut enc = CommandEncoder::new(Vec::new(), 64 * 1024);
        enc.write_header().unwrap();
        enc.begin(CommandType::Snapshot).unwrap();
        enc.put_path(AttributeType::Path, b"vol").unwrap();
        enc.put_uuid(AttributeType::Uuid, &[1; 16]).unwrap();
        enc.put_u64(AttributeType::Ctransid, 1).unwrap();
        enc.put_uuid(AttributeType::CloneUuid, &[2; 16]).unwrap();
        enc.put_u64(AttributeType::CloneCtransid, 1).unwrap();
        enc.finish().unwrap();
        let err = ReceiverFs::new()
            .receive(enc.into_sink().as_slice())
            .unwrap_err();
        assert!(matches!(err, ReceiveError::UnknownSubvolume { .. }));
    }
}
