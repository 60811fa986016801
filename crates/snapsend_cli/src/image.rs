//! JSON filesystem images.
//!
//! An image lists snapshots in creation order. Each one is either a fresh
//! subvolume or a snapshot of an earlier entry, followed by the operations
//! that bring it to its final state:
//!
//! ```json
//! {
//!   "snapshots": [
//!     { "name": "base", "ops": [
//!         { "op": "mkdir", "path": "docs" },
//!         { "op": "file", "path": "docs/a.txt", "content": "alpha" }
//!     ] },
//!     { "name": "next", "from": "base", "ops": [
//!         { "op": "rename", "from": "docs/a.txt", "to": "docs/b.txt" }
//!     ] }
//!   ]
//! }
//! ```

use serde::Deserialize;
use snapsend_tree::{FileType, MemFs, MemTree, TreeError};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors raised while building an image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The image file could not be read.
    #[error("cannot read image: {0}")]
    Io(#[from] std::io::Error),

    /// The image is not valid JSON for the expected shape.
    #[error("malformed image: {0}")]
    Parse(#[from] serde_json::Error),

    /// A snapshot derives from a name that was not defined before it.
    #[error("snapshot {name} derives from unknown snapshot {from}")]
    UnknownBase {
        /// Snapshot being created.
        name: String,
        /// Missing base.
        from: String,
    },

    /// Two snapshots share a name.
    #[error("duplicate snapshot name {0}")]
    Duplicate(String),

    /// An operation was rejected by the tree.
    #[error("snapshot {snapshot}, op #{index}: {source}")]
    Op {
        /// Snapshot being built.
        snapshot: String,
        /// Position of the operation in its list.
        index: usize,
        /// Underlying tree error.
        source: TreeError,
    },
}

/// Result type for image building.
pub type ImageResult<T> = Result<T, ImageError>;

/// A whole image description.
#[derive(Debug, Deserialize)]
pub struct Image {
    /// Snapshots in creation order.
    pub snapshots: Vec<SnapshotSpec>,
}

/// One snapshot of an image.
#[derive(Debug, Deserialize)]
pub struct SnapshotSpec {
    /// Snapshot name.
    pub name: String,
    /// Earlier snapshot this one is taken from; a fresh subvolume if absent.
    #[serde(default)]
    pub from: Option<String>,
    /// Operations applied after creation.
    #[serde(default)]
    pub ops: Vec<ImageOp>,
}

/// Kind of special file for [`ImageOp::Mknod`].
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Named pipe.
    Fifo,
    /// Unix socket.
    Socket,
    /// Character device.
    Char,
    /// Block device.
    Block,
}

impl From<NodeKind> for FileType {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Fifo => FileType::Fifo,
            NodeKind::Socket => FileType::Socket,
            NodeKind::Char => FileType::CharDevice,
            NodeKind::Block => FileType::BlockDevice,
        }
    }
}

const fn dir_mode() -> u32 {
    0o755
}

const fn file_mode() -> u32 {
    0o644
}

/// One path operation.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ImageOp {
    /// Create a directory.
    Mkdir {
        /// Path.
        path: String,
        /// Permission bits.
        #[serde(default = "dir_mode")]
        mode: u32,
    },
    /// Create a regular file with content.
    File {
        /// Path.
        path: String,
        /// Permission bits.
        #[serde(default = "file_mode")]
        mode: u32,
        /// Initial content.
        #[serde(default)]
        content: String,
    },
    /// Write into an existing file.
    Write {
        /// Path.
        path: String,
        /// Byte offset.
        offset: u64,
        /// Bytes to write.
        content: String,
    },
    /// Set a file's size.
    Truncate {
        /// Path.
        path: String,
        /// New size.
        size: u64,
    },
    /// Create a symbolic link.
    Symlink {
        /// Path.
        path: String,
        /// Link target.
        target: String,
    },
    /// Create a device node, fifo or socket.
    Mknod {
        /// Path.
        path: String,
        /// Node kind.
        kind: NodeKind,
        /// Permission bits.
        #[serde(default = "file_mode")]
        mode: u32,
        /// Device number.
        #[serde(default)]
        rdev: u64,
    },
    /// Add a hard link.
    Link {
        /// Existing path.
        existing: String,
        /// New name.
        path: String,
    },
    /// Rename, replacing a compatible target.
    Rename {
        /// Source path.
        from: String,
        /// Destination path.
        to: String,
    },
    /// Remove a non-directory.
    Unlink {
        /// Path.
        path: String,
    },
    /// Remove an empty directory.
    Rmdir {
        /// Path.
        path: String,
    },
    /// Change permission bits.
    Chmod {
        /// Path.
        path: String,
        /// Permission bits.
        mode: u32,
    },
    /// Change ownership.
    Chown {
        /// Path.
        path: String,
        /// Owner.
        uid: u32,
        /// Group.
        gid: u32,
    },
    /// Set an extended attribute.
    SetXattr {
        /// Path.
        path: String,
        /// Attribute name.
        name: String,
        /// Attribute value.
        #[serde(default)]
        value: String,
    },
    /// Remove an extended attribute.
    RemoveXattr {
        /// Path.
        path: String,
        /// Attribute name.
        name: String,
    },
    /// Share a byte range of a file into another file.
    Clone {
        /// Destination path.
        dst: String,
        /// Destination offset.
        #[serde(default)]
        dst_offset: u64,
        /// Source path.
        src: String,
        /// Source offset.
        #[serde(default)]
        src_offset: u64,
        /// Length in bytes.
        len: u64,
        /// Snapshot holding `src`; the snapshot being built if absent.
        #[serde(default)]
        source: Option<String>,
    },
}

impl Image {
    /// Parses an image from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Parse`] for malformed input.
    pub fn parse(text: &str) -> ImageResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses an image file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> ImageResult<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Creates every snapshot in order on a new filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or duplicate names and for operations
    /// the tree rejects.
    pub fn build(&self) -> ImageResult<MemFs> {
        let fs = MemFs::new();
        for spec in &self.snapshots {
            if fs.get(&spec.name).is_some() {
                return Err(ImageError::Duplicate(spec.name.clone()));
            }
            let tree = match &spec.from {
                Some(from) => {
                    let base = fs.get(from).ok_or_else(|| ImageError::UnknownBase {
                        name: spec.name.clone(),
                        from: from.clone(),
                    })?;
                    fs.snapshot(&base, &spec.name)
                }
                None => fs.create_subvolume(&spec.name),
            };
            for (index, op) in spec.ops.iter().enumerate() {
                apply(&fs, &tree, op).map_err(|source| ImageError::Op {
                    snapshot: spec.name.clone(),
                    index,
                    source,
                })?;
            }
            debug!(snapshot = %spec.name, ops = spec.ops.len(), "snapshot built");
        }
        Ok(fs)
    }
}

fn apply(fs: &MemFs, tree: &MemTree, op: &ImageOp) -> Result<(), TreeError> {
    match op {
        ImageOp::Mkdir { path, mode } => tree.mkdir(path, *mode).map(drop),
        ImageOp::File {
            path,
            mode,
            content,
        } => tree.write_file(path, *mode, content.as_bytes()).map(drop),
        ImageOp::Write {
            path,
            offset,
            content,
        } => tree.write(path, *offset, content.as_bytes()),
        ImageOp::Truncate { path, size } => tree.truncate(path, *size),
        ImageOp::Symlink { path, target } => tree.symlink(path, target).map(drop),
        ImageOp::Mknod {
            path,
            kind,
            mode,
            rdev,
        } => tree.mknod(path, (*kind).into(), *mode, *rdev).map(drop),
        ImageOp::Link { existing, path } => tree.link(existing, path),
        ImageOp::Rename { from, to } => tree.rename(from, to),
        ImageOp::Unlink { path } => tree.unlink(path),
        ImageOp::Rmdir { path } => tree.rmdir(path),
        ImageOp::Chmod { path, mode } => tree.chmod(path, *mode),
        ImageOp::Chown { path, uid, gid } => tree.chown(path, *uid, *gid),
        ImageOp::SetXattr { path, name, value } => tree.set_xattr(path, name, value.as_bytes()),
        ImageOp::RemoveXattr { path, name } => tree.remove_xattr(path, name),
        ImageOp::Clone {
            dst,
            dst_offset,
            src,
            src_offset,
            len,
            source,
        } => match source {
            Some(name) => {
                let source = fs
                    .get(name)
                    .ok_or_else(|| TreeError::not_found(format!("snapshot {name}")))?;
                tree.clone_range(dst, *dst_offset, &source, src, *src_offset, *len)
            }
            None => tree.clone_range(dst, *dst_offset, tree, src, *src_offset, *len),
        },
    }
}
