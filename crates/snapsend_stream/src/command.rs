//! Command and attribute catalogue and fixed framing constants.

/// Magic bytes opening every stream, including the trailing NUL.
pub const STREAM_MAGIC: &[u8; 13] = b"btrfs-stream\0";

/// Stream format version.
pub const STREAM_VERSION: u32 = 1;

/// Size of the stream header (magic + version).
pub const STREAM_HEADER_SIZE: usize = STREAM_MAGIC.len() + 4;

/// Size of a command header: `len: u32`, `cmd: u16`, `crc: u32`.
pub const CMD_HEADER_SIZE: usize = 10;

/// Size of an attribute header: `type: u16`, `len: u16`.
pub const TLV_HEADER_SIZE: usize = 4;

/// Default maximum size of one framed command.
pub const DEFAULT_MAX_COMMAND_SIZE: usize = 64 * 1024;

/// Size of an encoded timestamp (`sec: u64`, `nsec: u32`).
pub const TIMESPEC_SIZE: usize = 12;

/// Size of an encoded UUID.
pub const UUID_SIZE: usize = 16;

/// Command types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum CommandType {
    /// Start of a full stream: create a new subvolume.
    Subvol = 1,
    /// Start of an incremental stream: snapshot the parent.
    Snapshot = 2,
    /// Create a regular file.
    Mkfile = 3,
    /// Create a directory.
    Mkdir = 4,
    /// Create a device node.
    Mknod = 5,
    /// Create a named pipe.
    Mkfifo = 6,
    /// Create a socket.
    Mksock = 7,
    /// Create a symbolic link.
    Symlink = 8,
    /// Rename a path.
    Rename = 9,
    /// Create a hard link.
    Link = 10,
    /// Remove a non-directory name.
    Unlink = 11,
    /// Remove a directory.
    Rmdir = 12,
    /// Set an extended attribute.
    SetXattr = 13,
    /// Remove an extended attribute.
    RemoveXattr = 14,
    /// Write file data.
    Write = 15,
    /// Share data from an existing file.
    Clone = 16,
    /// Set a file's size.
    Truncate = 17,
    /// Set permission bits.
    Chmod = 18,
    /// Set ownership.
    Chown = 19,
    /// Set timestamps.
    Utimes = 20,
    /// End of stream.
    End = 21,
}

impl CommandType {
    /// Every command type in numeric order.
    pub const ALL: [CommandType; 21] = [
        Self::Subvol,
        Self::Snapshot,
        Self::Mkfile,
        Self::Mkdir,
        Self::Mknod,
        Self::Mkfifo,
        Self::Mksock,
        Self::Symlink,
        Self::Rename,
        Self::Link,
        Self::Unlink,
        Self::Rmdir,
        Self::SetXattr,
        Self::RemoveXattr,
        Self::Write,
        Self::Clone,
        Self::Truncate,
        Self::Chmod,
        Self::Chown,
        Self::Utimes,
        Self::End,
    ];

    /// Converts a wire number to a command type.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_u16() == value)
    }

    /// Returns the wire number.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Lowercase command name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Subvol => "subvol",
            Self::Snapshot => "snapshot",
            Self::Mkfile => "mkfile",
            Self::Mkdir => "mkdir",
            Self::Mknod => "mknod",
            Self::Mkfifo => "mkfifo",
            Self::Mksock => "mksock",
            Self::Symlink => "symlink",
            Self::Rename => "rename",
            Self::Link => "link",
            Self::Unlink => "unlink",
            Self::Rmdir => "rmdir",
            Self::SetXattr => "set_xattr",
            Self::RemoveXattr => "remove_xattr",
            Self::Write => "write",
            Self::Clone => "clone",
            Self::Truncate => "truncate",
            Self::Chmod => "chmod",
            Self::Chown => "chown",
            Self::Utimes => "utimes",
            Self::End => "end",
        }
    }

    /// Returns true for the commands that create an inode.
    #[must_use]
    pub const fn is_create(self) -> bool {
        matches!(
            self,
            Self::Mkfile | Self::Mkdir | Self::Mknod | Self::Mkfifo | Self::Mksock | Self::Symlink
        )
    }
}

/// Attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum AttributeType {
    /// Subvolume UUID.
    Uuid = 1,
    /// Subvolume transaction id.
    Ctransid = 2,
    /// Inode number.
    Ino = 3,
    /// File size.
    Size = 4,
    /// Mode bits.
    Mode = 5,
    /// Owner.
    Uid = 6,
    /// Group.
    Gid = 7,
    /// Device number.
    Rdev = 8,
    /// Status change time.
    Ctime = 9,
    /// Modification time.
    Mtime = 10,
    /// Access time.
    Atime = 11,
    /// Extended attribute name.
    XattrName = 13,
    /// Extended attribute value.
    XattrData = 14,
    /// Path the command applies to.
    Path = 15,
    /// Destination path of a rename.
    PathTo = 16,
    /// Link target (symlink target or hard link source).
    PathLink = 17,
    /// Offset inside the file.
    FileOffset = 18,
    /// File data.
    Data = 19,
    /// UUID of the clone source subvolume.
    CloneUuid = 20,
    /// Transaction id of the clone source subvolume.
    CloneCtransid = 21,
    /// Path of the clone source file.
    ClonePath = 22,
    /// Offset inside the clone source file.
    CloneOffset = 23,
    /// Number of bytes to clone.
    CloneLen = 24,
}

impl AttributeType {
    /// Every attribute type in numeric order.
    pub const ALL: [AttributeType; 23] = [
        Self::Uuid,
        Self::Ctransid,
        Self::Ino,
        Self::Size,
        Self::Mode,
        Self::Uid,
        Self::Gid,
        Self::Rdev,
        Self::Ctime,
        Self::Mtime,
        Self::Atime,
        Self::XattrName,
        Self::XattrData,
        Self::Path,
        Self::PathTo,
        Self::PathLink,
        Self::FileOffset,
        Self::Data,
        Self::CloneUuid,
        Self::CloneCtransid,
        Self::ClonePath,
        Self::CloneOffset,
        Self::CloneLen,
    ];

    /// Converts a wire number to an attribute type.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.as_u16() == value)
    }

    /// Returns the wire number.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Lowercase attribute name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::Ctransid => "ctransid",
            Self::Ino => "ino",
            Self::Size => "size",
            Self::Mode => "mode",
            Self::Uid => "uid",
            Self::Gid => "gid",
            Self::Rdev => "rdev",
            Self::Ctime => "ctime",
            Self::Mtime => "mtime",
            Self::Atime => "atime",
            Self::XattrName => "xattr_name",
            Self::XattrData => "xattr_data",
            Self::Path => "path",
            Self::PathTo => "path_to",
            Self::PathLink => "path_link",
            Self::FileOffset => "file_offset",
            Self::Data => "data",
            Self::CloneUuid => "clone_uuid",
            Self::CloneCtransid => "clone_ctransid",
            Self::ClonePath => "clone_path",
            Self::CloneOffset => "clone_offset",
            Self::CloneLen => "clone_len",
        }
    }
}

/// Checksum of a framed command: CRC-32C seeded with zero, without the
/// final inversion.
#[must_use]
pub fn command_crc(data: &[u8]) -> u32 {
    !crc32c::crc32c_append(u32::MAX, data)
}
