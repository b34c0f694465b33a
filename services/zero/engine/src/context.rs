//! State shared by the acceptor, reader, writer and housekeeping threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zero_session::SessionManager;
use zero_wire::{FrameDecoder, PacketCompressor, PacketEncryptor};

use crate::stats::NetworkStats;

/// State shared by every engine thread
pub(crate) struct EngineContext {
    pub(crate) manager: Arc<SessionManager>,
    pub(crate) stats: Arc<NetworkStats>,
    pub(crate) poll_timeout: Duration,
    pub(crate) read_buffer_size: usize,
    max_frame_size: usize,
    compressor: Option<Arc<dyn PacketCompressor>>,
    encryptor: Option<Arc<dyn PacketEncryptor>>,
    halted: AtomicBool,
}

impl EngineContext {
    pub(crate) fn new(
        manager: Arc<SessionManager>,
        stats: Arc<NetworkStats>,
        poll_timeout: Duration,
        read_buffer_size: usize,
        max_frame_size: usize,
        compressor: Option<Arc<dyn PacketCompressor>>,
        encryptor: Option<Arc<dyn PacketEncryptor>>,
    ) -> Self {
        Self {
            manager,
            stats,
            poll_timeout,
            read_buffer_size,
            max_frame_size,
            compressor,
            encryptor,
            halted: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    /// Whether a new session needs a decoder with hooks installed
    pub(crate) fn has_frame_hooks(&self) -> bool {
        self.compressor.is_some() || self.encryptor.is_some()
    }

    pub(crate) fn frame_decoder(&self) -> FrameDecoder {
        FrameDecoder::new(self.max_frame_size)
            .with_hooks(self.compressor.clone(), self.encryptor.clone())
    }
}
