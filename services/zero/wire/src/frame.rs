//! TCP framing for Zero messages.
//!
//! A frame is `[header byte][2- or 4-byte length][payload]`. The decoder is
//! resumable: it keeps its state between reads, so a frame may arrive split
//! across any number of socket reads and several frames may arrive in one.

use crate::header::{PacketCompressor, PacketEncryptor, PacketHeader};
use crate::ZeroError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Maximum frame payload size (16 MiB default)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Payloads larger than this are compressed when a compressor is set
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 3000;

/// Upper bound on the buffer reserved up front for one frame
const INITIAL_DATA_CAPACITY: usize = 64 * 1024;

/// Builds frames from encoded payloads
#[derive(Clone)]
pub struct FrameEncoder {
    compressor: Option<Arc<dyn PacketCompressor>>,
    encryptor: Option<Arc<dyn PacketEncryptor>>,
    compression_threshold: usize,
}

impl fmt::Debug for FrameEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameEncoder")
            .field("compressor", &self.compressor.is_some())
            .field("encryptor", &self.encryptor.is_some())
            .field("compression_threshold", &self.compression_threshold)
            .finish()
    }
}

impl FrameEncoder {
    /// Create an encoder with no hooks
    pub fn new() -> Self {
        Self {
            compressor: None,
            encryptor: None,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }

    /// Set the compression hook
    pub fn with_compressor(mut self, compressor: Arc<dyn PacketCompressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Set the encryption hook
    pub fn with_encryptor(mut self, encryptor: Arc<dyn PacketEncryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Set the payload size above which compression applies
    pub fn with_compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold = bytes;
        self
    }

    /// Wrap `payload` into a frame.
    ///
    /// A failing or missing hook leaves the payload untransformed and the
    /// matching header bit clear.
    pub fn encode(&self, payload: &[u8], encrypt: bool) -> Result<Bytes, ZeroError> {
        let mut body: std::borrow::Cow<'_, [u8]> = payload.into();

        let mut encrypted = false;
        if encrypt {
            match self.encryptor.as_ref().and_then(|e| e.encrypt(&body)) {
                Some(cipher) => {
                    body = cipher.into();
                    encrypted = true;
                }
                None => debug!("packet sent unencrypted, no usable encryptor"),
            }
        }

        let mut compressed = false;
        if body.len() > self.compression_threshold {
            if let Some(packed) = self.compressor.as_ref().and_then(|c| c.compress(&body)) {
                body = packed.into();
                compressed = true;
            }
        }

        if body.len() > i32::MAX as usize {
            return Err(ZeroError::Oversized(body.len()));
        }

        let header = PacketHeader::for_payload(body.len(), compressed, encrypted);
        let mut buf = BytesMut::with_capacity(1 + header.size_width() + body.len());
        buf.put_u8(header.bits());
        if header.contains(PacketHeader::BIG_SIZED) {
            buf.put_i32(body.len() as i32);
        } else {
            buf.put_u16(body.len() as u16);
        }
        buf.put_slice(&body);
        Ok(buf.freeze())
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the decoder is within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Expecting a header byte
    WaitNewPacket,
    /// Header read, expecting the length prefix
    WaitDataSize,
    /// Part of the length prefix read
    WaitDataSizeFragment,
    /// Length known, collecting payload bytes
    WaitData,
}

/// Resumable frame decoder, one per TCP session
pub struct FrameDecoder {
    state: ReadState,
    header: PacketHeader,
    size_buf: [u8; 4],
    size_filled: usize,
    expected: usize,
    data: BytesMut,
    max_frame_size: usize,
    compressor: Option<Arc<dyn PacketCompressor>>,
    encryptor: Option<Arc<dyn PacketEncryptor>>,
}

impl fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("state", &self.state)
            .field("header", &self.header)
            .field("expected", &self.expected)
            .field("collected", &self.data.len())
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

impl FrameDecoder {
    /// Create a decoder that rejects payloads above `max_frame_size`
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: ReadState::WaitNewPacket,
            header: PacketHeader::empty(),
            size_buf: [0; 4],
            size_filled: 0,
            expected: 0,
            data: BytesMut::new(),
            max_frame_size,
            compressor: None,
            encryptor: None,
        }
    }

    /// Set the hooks used to reverse compressed or encrypted frames
    pub fn with_hooks(
        mut self,
        compressor: Option<Arc<dyn PacketCompressor>>,
        encryptor: Option<Arc<dyn PacketEncryptor>>,
    ) -> Self {
        self.compressor = compressor;
        self.encryptor = encryptor;
        self
    }

    /// Current state
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.state = ReadState::WaitNewPacket;
        self.size_filled = 0;
        self.expected = 0;
        self.data = BytesMut::new();
    }

    /// Feed bytes from the socket, pushing every completed payload to `out`.
    ///
    /// On error the partial frame is discarded and the decoder is reset.
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<Bytes>) -> Result<(), ZeroError> {
        let result = self.feed(input, out);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn feed(&mut self, mut input: &[u8], out: &mut Vec<Bytes>) -> Result<(), ZeroError> {
        while !input.is_empty() {
            match self.state {
                ReadState::WaitNewPacket => {
                    let header = PacketHeader::from_bits_retain(input[0]);
                    if !header.contains(PacketHeader::COUNTING) {
                        return Err(ZeroError::Uncounted(input[0]));
                    }
                    self.header = header;
                    self.size_filled = 0;
                    self.state = ReadState::WaitDataSize;
                    input = &input[1..];
                }
                ReadState::WaitDataSize | ReadState::WaitDataSizeFragment => {
                    let width = self.header.size_width();
                    let n = (width - self.size_filled).min(input.len());
                    self.size_buf[self.size_filled..self.size_filled + n].copy_from_slice(&input[..n]);
                    self.size_filled += n;
                    input = &input[n..];

                    if self.size_filled < width {
                        self.state = ReadState::WaitDataSizeFragment;
                        continue;
                    }

                    let size = self.parse_size()?;
                    self.expected = size;
                    self.data = BytesMut::with_capacity(size.min(INITIAL_DATA_CAPACITY));
                    self.state = ReadState::WaitData;
                    if size == 0 {
                        self.complete(out)?;
                    }
                }
                ReadState::WaitData => {
                    let n = (self.expected - self.data.len()).min(input.len());
                    self.data.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    if self.data.len() == self.expected {
                        self.complete(out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_size(&self) -> Result<usize, ZeroError> {
        let size = if self.header.contains(PacketHeader::BIG_SIZED) {
            let raw = i32::from_be_bytes(self.size_buf);
            if raw < 0 {
                return Err(ZeroError::NegativeLength(raw));
            }
            raw as usize
        } else {
            u16::from_be_bytes([self.size_buf[0], self.size_buf[1]]) as usize
        };
        if size > self.max_frame_size {
            return Err(ZeroError::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }
        Ok(size)
    }

    fn complete(&mut self, out: &mut Vec<Bytes>) -> Result<(), ZeroError> {
        let mut payload = self.data.split().freeze();

        if self.header.contains(PacketHeader::COMPRESSED) {
            let compressor = self
                .compressor
                .as_ref()
                .ok_or(ZeroError::MissingHook("compression"))?;
            payload = compressor
                .uncompress(&payload)
                .map(Bytes::from)
                .ok_or(ZeroError::Hook("compression"))?;
        }
        if self.header.contains(PacketHeader::ENCRYPTED) {
            let encryptor = self
                .encryptor
                .as_ref()
                .ok_or(ZeroError::MissingHook("encryption"))?;
            payload = encryptor
                .decrypt(&payload)
                .map(Bytes::from)
                .ok_or(ZeroError::Hook("encryption"))?;
        }

        out.push(payload);
        self.state = ReadState::WaitNewPacket;
        self.expected = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MAX_NORMAL_SIZE;

    /// Run-length style stand-in: stores the byte once with a count when all bytes match.
    struct UniformCompressor;

    impl PacketCompressor for UniformCompressor {
        fn compress(&self, data: &[u8]) -> Option<Vec<u8>> {
            let first = *data.first()?;
            if data.iter().any(|b| *b != first) {
                return None;
            }
            let mut out = (data.len() as u32).to_be_bytes().to_vec();
            out.push(first);
            Some(out)
        }

        fn uncompress(&self, data: &[u8]) -> Option<Vec<u8>> {
            let len = u32::from_be_bytes(data.get(..4)?.try_into().ok()?) as usize;
            Some(vec![*data.get(4)?; len])
        }
    }

    struct XorEncryptor;

    impl PacketEncryptor for XorEncryptor {
        fn encrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
            Some(data.iter().map(|b| b ^ 0x5A).collect())
        }

        fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
            self.encrypt(data)
        }
    }

    #[test]
    fn test_frame_layout() {
        let frame = FrameEncoder::new().encode(&[17, 0, 0], false).unwrap();
        assert_eq!(&frame[..], &[0x80, 0, 3, 17, 0, 0]);
    }

    #[test]
    fn test_decode_split_at_every_boundary() {
        let encoder = FrameEncoder::new();
        let mut wire = encoder.encode(b"first", false).unwrap().to_vec();
        wire.extend_from_slice(&encoder.encode(b"second!", false).unwrap());

        for split in 0..=wire.len() {
            let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE);
            let mut out = Vec::new();
            decoder.decode(&wire[..split], &mut out).unwrap();
            decoder.decode(&wire[split..], &mut out).unwrap();
            assert_eq!(out, vec![Bytes::from_static(b"first"), Bytes::from_static(b"second!")]);
            assert_eq!(decoder.state(), ReadState::WaitNewPacket);
        }
    }

    #[test]
    fn test_size_fragment_state() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE);
        let mut out = Vec::new();
        decoder.decode(&[0x80, 0], &mut out).unwrap();
        assert_eq!(decoder.state(), ReadState::WaitDataSizeFragment);
        decoder.decode(&[2, b'o'], &mut out).unwrap();
        assert_eq!(decoder.state(), ReadState::WaitData);
        decoder.decode(&[b'k'], &mut out).unwrap();
        assert_eq!(out, vec![Bytes::from_static(b"ok")]);
    }

    #[test]
    fn test_big_sized_frame() {
        let payload = vec![7u8; MAX_NORMAL_SIZE + 10];
        let frame = FrameEncoder::new().encode(&payload, false).unwrap();
        assert_eq!(frame[0], 0x80 | 0x08);
        assert_eq!(frame.len(), 1 + 4 + payload.len());

        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE);
        let mut out = Vec::new();
        for chunk in frame.chunks(4096) {
            decoder.decode(chunk, &mut out).unwrap();
        }
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &payload[..]);
    }

    #[test]
    fn test_uncounted_header_rejected() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE);
        let err = decoder.decode(&[0x00, 0, 1, 5], &mut Vec::new()).unwrap_err();
        assert_eq!(err, ZeroError::Uncounted(0));
        assert_eq!(decoder.state(), ReadState::WaitNewPacket);
    }

    #[test]
    fn test_frame_limits() {
        let mut decoder = FrameDecoder::new(16);
        let err = decoder.decode(&[0x80, 0, 17], &mut Vec::new()).unwrap_err();
        assert_eq!(err, ZeroError::FrameTooLarge { size: 17, limit: 16 });

        let err = decoder
            .decode(&[0x88, 0xFF, 0xFF, 0xFF, 0xFF], &mut Vec::new())
            .unwrap_err();
        assert_eq!(err, ZeroError::NegativeLength(-1));
    }

    #[test]
    fn test_hooks_roundtrip() {
        let encoder = FrameEncoder::new()
            .with_compressor(Arc::new(UniformCompressor))
            .with_encryptor(Arc::new(XorEncryptor))
            .with_compression_threshold(8);
        let payload = vec![3u8; 100];
        let frame = encoder.encode(&payload, true).unwrap();
        let header = PacketHeader::from_bits_retain(frame[0]);
        assert!(header.contains(PacketHeader::COMPRESSED | PacketHeader::ENCRYPTED));
        assert_eq!(frame.len(), 1 + 2 + 5);

        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE).with_hooks(
            Some(Arc::new(UniformCompressor)),
            Some(Arc::new(XorEncryptor)),
        );
        let mut out = Vec::new();
        decoder.decode(&frame, &mut out).unwrap();
        assert_eq!(&out[0][..], &payload[..]);
    }

    #[test]
    fn test_missing_hook_rejected() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_SIZE);
        let err = decoder.decode(&[0xC0, 0, 1, 9], &mut Vec::new()).unwrap_err();
        assert_eq!(err, ZeroError::MissingHook("compression"));
    }

    #[test]
    fn test_encrypt_without_encryptor_falls_back() {
        let frame = FrameEncoder::new().encode(b"abc", true).unwrap();
        assert_eq!(frame[0], 0x80);
    }
}
