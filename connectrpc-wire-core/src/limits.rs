//! Message size limits.
//!
//! The read limit bounds what we accept from a peer, both the declared
//! envelope length and the size after decompression. The write limit bounds
//! what we send.

use crate::error::{Code, ConnectError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageLimits {
    read_max_bytes: Option<usize>,
    write_max_bytes: Option<usize>,
}

impl MessageLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_max_bytes(mut self, max: usize) -> Self {
        self.read_max_bytes = Some(max);
        self
    }

    pub fn write_max_bytes(mut self, max: usize) -> Self {
        self.write_max_bytes = Some(max);
        self
    }

    pub fn get_read_max_bytes(&self) -> Option<usize> {
        self.read_max_bytes
    }

    pub fn get_write_max_bytes(&self) -> Option<usize> {
        self.write_max_bytes
    }

    /// The read limit, or `usize::MAX` when unlimited.
    pub fn read_max_bytes_or_max(&self) -> usize {
        self.read_max_bytes.unwrap_or(usize::MAX)
    }

    pub fn check_read_size(&self, size: usize) -> Result<(), ConnectError> {
        match self.read_max_bytes {
            Some(max) if size > max => Err(ConnectError::new(
                Code::ResourceExhausted,
                format!("message size {size} bytes exceeds maximum allowed size of {max} bytes"),
            )),
            _ => Ok(()),
        }
    }

    pub fn check_write_size(&self, size: usize) -> Result<(), ConnectError> {
        match self.write_max_bytes {
            Some(max) if size > max => Err(ConnectError::new(
                Code::ResourceExhausted,
                format!("message size {size} exceeds sendMaxBytes {max}"),
            )),
            _ => Ok(()),
        }
    }
}
