//! LZ4 implementation of the frame compression hook.

use crate::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::header::PacketCompressor;
use tracing::debug;

/// Block-mode LZ4 with the uncompressed size prepended (little-endian u32).
///
/// `uncompress` checks the claimed size against `max_size` before
/// allocating, so a forged frame cannot request an oversized buffer.
#[derive(Debug, Clone, Copy)]
pub struct Lz4Compressor {
    max_size: usize,
}

impl Lz4Compressor {
    /// Compressor that refuses to inflate past `max_size` bytes
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Largest payload `uncompress` will produce
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl PacketCompressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Option<Vec<u8>> {
        let packed = lz4_flex::compress_prepend_size(data);
        // incompressible payloads go out as they are
        (packed.len() < data.len()).then_some(packed)
    }

    fn uncompress(&self, data: &[u8]) -> Option<Vec<u8>> {
        let claimed = u32::from_le_bytes(data.get(..4)?.try_into().ok()?) as usize;
        if claimed > self.max_size {
            debug!(claimed, limit = self.max_size, "Compressed frame claims oversized payload");
            return None;
        }
        let unpacked = lz4_flex::decompress_size_prepended(data).ok()?;
        (unpacked.len() <= self.max_size).then_some(unpacked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameDecoder, FrameEncoder};
    use crate::header::PacketHeader;
    use crate::{decode_message, encode, ZeroArray, ZeroElement, ZeroMap};
    use std::sync::Arc;

    #[test]
    fn test_repetitive_payload_shrinks() {
        let compressor = Lz4Compressor::default();
        let payload = b"position-update;".repeat(256);
        let packed = compressor.compress(&payload).unwrap();
        assert!(packed.len() < payload.len());
        assert_eq!(compressor.uncompress(&packed).unwrap(), payload);
    }

    #[test]
    fn test_incompressible_payload_skipped() {
        let compressor = Lz4Compressor::default();
        let payload: Vec<u8> = (0..64u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        assert!(compressor.compress(&payload).is_none());
    }

    #[test]
    fn test_oversized_claim_rejected() {
        let compressor = Lz4Compressor::new(1024);
        let packed = lz4_flex::compress_prepend_size(&vec![0u8; 4096]);
        assert!(compressor.uncompress(&packed).is_none());
        assert!(compressor.uncompress(&[1, 2]).is_none());
    }

    #[test]
    fn test_compressed_frame_roundtrip() {
        let compressor = Arc::new(Lz4Compressor::default());
        let encoder = FrameEncoder::new()
            .with_compressor(compressor.clone())
            .with_compression_threshold(64);

        let players: ZeroArray = (0..200)
            .map(|i| ZeroElement::from(ZeroMap::new().with("x", i).with("y", 0)))
            .collect();
        let message: ZeroElement = ZeroMap::new().with("players", players).into();
        let payload = encode(&message).unwrap();

        let frame = encoder.encode(&payload, false).unwrap();
        assert!(PacketHeader::from_bits_retain(frame[0]).contains(PacketHeader::COMPRESSED));
        assert!(frame.len() < payload.len());

        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE).with_hooks(Some(compressor), None);
        let mut out = Vec::new();
        decoder.decode(&frame, &mut out).unwrap();
        assert_eq!(decode_message(&out[0]).unwrap(), message);
    }
}
