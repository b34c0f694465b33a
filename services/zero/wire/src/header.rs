//! First-byte packet header for TCP frames.
//!
//! Every TCP frame starts with one header byte whose bits describe how the
//! rest of the frame is laid out:
//!
//! ```text
//!  bit 7      6           5          4     3          2..0
//! +----------+-----------+----------+-----+----------+--------+
//! | COUNTING | COMPRESSED| ENCRYPTED| rsv | BIG_SIZED| rsv    |
//! +----------+-----------+----------+-----+----------+--------+
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Largest payload that fits the 2-byte length prefix
pub const MAX_NORMAL_SIZE: usize = u16::MAX as usize;

bitflags! {
    /// Packet header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PacketHeader: u8 {
        /// A length prefix follows the header byte
        const COUNTING = 0x80;
        /// Payload was compressed
        const COMPRESSED = 0x40;
        /// Payload was encrypted
        const ENCRYPTED = 0x20;
        /// Length prefix is 4 bytes instead of 2
        const BIG_SIZED = 0x08;
    }
}

impl PacketHeader {
    /// Header for a payload of `len` bytes with the given transforms
    pub fn for_payload(len: usize, compressed: bool, encrypted: bool) -> Self {
        let mut header = PacketHeader::COUNTING;
        header.set(PacketHeader::COMPRESSED, compressed);
        header.set(PacketHeader::ENCRYPTED, encrypted);
        header.set(PacketHeader::BIG_SIZED, len > MAX_NORMAL_SIZE);
        header
    }

    /// Width of the length prefix in bytes
    pub fn size_width(self) -> usize {
        if self.contains(PacketHeader::BIG_SIZED) {
            4
        } else {
            2
        }
    }
}

/// Compression hook applied to payloads above the encoder threshold
pub trait PacketCompressor: Send + Sync {
    /// Compress a payload
    fn compress(&self, data: &[u8]) -> Option<Vec<u8>>;
    /// Reverse [`PacketCompressor::compress`]
    fn uncompress(&self, data: &[u8]) -> Option<Vec<u8>>;
}

/// Encryption hook applied to packets flagged encrypted
pub trait PacketEncryptor: Send + Sync {
    /// Encrypt a payload
    fn encrypt(&self, data: &[u8]) -> Option<Vec<u8>>;
    /// Reverse [`PacketEncryptor::encrypt`]
    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>>;
}
