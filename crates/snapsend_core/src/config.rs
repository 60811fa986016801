//! Send session configuration.

use crate::error::{SendError, SendResult};
use snapsend_stream::{CMD_HEADER_SIZE, DEFAULT_MAX_COMMAND_SIZE, TLV_HEADER_SIZE};

/// Longest path a command is expected to carry.
const PATH_MAX: usize = 4096;

/// Room a WRITE command needs besides its data: path, file offset and the
/// three attribute headers.
const WRITE_OVERHEAD: usize = CMD_HEADER_SIZE + 3 * TLV_HEADER_SIZE + PATH_MAX + 8;

/// Configuration for a send session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendConfig {
    /// Maximum framed command size, header included.
    pub max_command_size: usize,

    /// Maximum number of data bytes carried by one WRITE command.
    pub read_chunk_size: usize,

    /// Name cache size that triggers eviction.
    pub name_cache_high_water: usize,

    /// Name cache size eviction trims back to.
    pub name_cache_low_water: usize,

    /// Tree items visited between read-lease revalidations.
    pub lease_batch_items: usize,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_command_size: DEFAULT_MAX_COMMAND_SIZE,
            read_chunk_size: 48 * 1024,
            name_cache_high_water: 256,
            name_cache_low_water: 128,
            lease_batch_items: 1024,
        }
    }
}

impl SendConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum framed command size.
    #[must_use]
    pub const fn max_command_size(mut self, size: usize) -> Self {
        self.max_command_size = size;
        self
    }

    /// Sets the maximum data bytes per WRITE command.
    #[must_use]
    pub const fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Sets the name cache eviction marks.
    #[must_use]
    pub const fn name_cache_water_marks(mut self, low: usize, high: usize) -> Self {
        self.name_cache_low_water = low;
        self.name_cache_high_water = high;
        self
    }

    /// Sets the number of items between read-lease revalidations.
    #[must_use]
    pub const fn lease_batch_items(mut self, items: usize) -> Self {
        self.lease_batch_items = items;
        self
    }

    /// Checks that the values can drive a session.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::InvalidConfig`] if a WRITE chunk cannot fit in a
    /// command, a count is zero, or the low-water mark exceeds the
    /// high-water mark.
    pub fn validate(&self) -> SendResult<()> {
        if self.read_chunk_size == 0 {
            return Err(SendError::invalid_config("read_chunk_size must be positive"));
        }
        if self.read_chunk_size > usize::from(u16::MAX) {
            return Err(SendError::invalid_config(format!(
                "read_chunk_size {} exceeds the attribute limit of {} bytes",
                self.read_chunk_size,
                u16::MAX
            )));
        }
        if self.read_chunk_size + WRITE_OVERHEAD > self.max_command_size {
            return Err(SendError::invalid_config(format!(
                "read_chunk_size {} leaves no room for a path in {}-byte commands",
                self.read_chunk_size, self.max_command_size
            )));
        }
        if self.lease_batch_items == 0 {
            return Err(SendError::invalid_config("lease_batch_items must be positive"));
        }
        if self.name_cache_high_water == 0 {
            return Err(SendError::invalid_config(
                "name_cache_high_water must be positive",
            ));
        }
        if self.name_cache_low_water > self.name_cache_high_water {
            return Err(SendError::invalid_config(format!(
                "name cache low water {} is above high water {}",
                self.name_cache_low_water, self.name_cache_high_water
            )));
        }
        Ok(())
    }
}
