//! Zero binary element codec, packet header flags, and TCP framing.
//!
//! This crate provides the low-level wire protocol for the Zero network
//! engine: the typed, self-describing element format used for every
//! message, and the length-prefixed frame that carries those messages over
//! TCP. Nothing here performs I/O.
//!
//! ## Element Format
//!
//! ```text
//! scalar        [1B type][fixed-width big-endian value]
//! string        [1B type][2B len][utf-8 bytes]
//! byte array    [1B type][4B len][raw bytes]
//! prim. array   [1B type][2B count][count x value]
//! ZeroArray     [1B type][2B count][count x (1B type + body)]
//! ZeroMap       [1B type][2B count][count x ([2B keyLen][key][1B type + body])]
//! ```
//!
//! A complete message is exactly one top-level ZeroMap or ZeroArray.
//!
//! ## TCP Frame
//!
//! ```text
//! +-------------+----------------------------+-----------+
//! | 1B header   | 2B len (4B when BIG_SIZED) | payload   |
//! +-------------+----------------------------+-----------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod compression;
pub mod element;
pub mod error;
pub mod frame;
pub mod header;

// Re-export main types
pub use codec::{
    decode, decode_array, decode_element, decode_map, decode_message, encode, encode_array,
    encode_map, GrowableBuffer, ZeroDecoder, BUFFER_CHUNK_SIZE, MAX_DEPTH, MIN_MESSAGE_SIZE,
};
pub use compression::Lz4Compressor;
pub use element::{ZeroArray, ZeroElement, ZeroMap, ZeroType};
pub use error::ZeroError;
pub use frame::{
    FrameDecoder, FrameEncoder, ReadState, DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_MAX_FRAME_SIZE,
};
pub use header::{PacketCompressor, PacketEncryptor, PacketHeader, MAX_NORMAL_SIZE};
