//! A tracked peer connection.
//!
//! A `Session` is shared between the reader worker that owns its socket, the
//! writer worker its tickets are sharded to, the registry, and any producer
//! thread calling `enqueue_packet`. All mutable state is therefore atomic or
//! behind a short-lived lock.

use crate::error::SessionError;
use crate::queue::{OverflowPolicy, PacketQueue, PacketQueuePolicy, PriorityQueuePolicy};
use crate::transport::{DatagramChannel, SocketChannel};
use mio::Token;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;
use zero_wire::{FrameDecoder, DEFAULT_MAX_FRAME_SIZE};

static SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Sessions that have not associated within this window are orphans
pub const ORPHAN_THRESHOLD: Duration = Duration::from_millis(3000);

/// Configuration for sessions created by a manager
#[derive(Clone)]
pub struct SessionConfig {
    /// Packet queue capacity per session
    pub queue_capacity: usize,
    /// What to do when the packet queue is full
    pub overflow_policy: OverflowPolicy,
    /// Largest inbound frame accepted
    pub max_frame_size: usize,
    /// Close sessions idle for longer than this; zero disables
    pub max_idle: Duration,
    /// Admission policy applied before the capacity check
    pub queue_policy: Option<Arc<dyn PacketQueuePolicy>>,
    /// Close sessions that never associate
    pub close_orphans: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            overflow_policy: OverflowPolicy::RejectNew,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_idle: Duration::ZERO,
            queue_policy: Some(Arc::new(PriorityQueuePolicy)),
            close_orphans: true,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("queue_capacity", &self.queue_capacity)
            .field("overflow_policy", &self.overflow_policy)
            .field("max_frame_size", &self.max_frame_size)
            .field("max_idle", &self.max_idle)
            .field("queue_policy", &self.queue_policy.is_some())
            .field("close_orphans", &self.close_orphans)
            .finish()
    }
}

/// Transport a session (or packet) travels over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    /// Stream socket
    Tcp,
    /// Datagram socket
    Udp,
}

/// Binding of a session to an upper-layer identity
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationState {
    /// Unbound
    None = 0,
    /// Claimed, handshake in progress
    Doing = 1,
    /// Bound to an identity
    Done = 2,
}

impl AssociationState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => AssociationState::Doing,
            2 => AssociationState::Done,
            _ => AssociationState::None,
        }
    }
}

/// Why a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectMode {
    /// Unspecified
    Default,
    /// Peer went away
    Lost,
    /// Read failed
    LostInRead,
    /// Write failed
    LostInWritten,
    /// No traffic for longer than the idle limit
    Idle,
    /// Never associated
    Orphan,
    /// Server asked for it, usually after a marked-last packet
    ClientRequest,
    /// Replaced by a newer session for the same identity
    Reconnection,
    /// Connection limit hit
    ReachedMaxConnection,
    /// Undecodable or rejected input
    BadRequest,
    /// Engine is shutting down
    Shutdown,
}

impl fmt::Display for DisconnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisconnectMode::Default => "default",
            DisconnectMode::Lost => "lost",
            DisconnectMode::LostInRead => "lost_in_read",
            DisconnectMode::LostInWritten => "lost_in_written",
            DisconnectMode::Idle => "idle",
            DisconnectMode::Orphan => "orphan",
            DisconnectMode::ClientRequest => "client_request",
            DisconnectMode::Reconnection => "reconnection",
            DisconnectMode::ReachedMaxConnection => "reached_max_connection",
            DisconnectMode::BadRequest => "bad_request",
            DisconnectMode::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Point-in-time statistics for a session
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Total bytes received
    pub read_bytes: u64,
    /// Total bytes sent
    pub written_bytes: u64,
    /// Messages decoded
    pub read_messages: u64,
    /// Packets refused by the queue
    pub dropped_packets: u64,
    /// Packets waiting in the queue
    pub queued_packets: usize,
}

/// One TCP connection or logical UDP peer
pub struct Session {
    id: u64,
    name: RwLock<Option<String>>,
    transport: TransportType,
    association: AtomicU8,
    activated: AtomicBool,
    socket: Option<SocketChannel>,
    datagram: RwLock<Option<(Arc<DatagramChannel>, SocketAddr)>>,
    decoder: Mutex<FrameDecoder>,
    queue: PacketQueue,
    created_at: Instant,
    // Milliseconds since `created_at`
    last_read: AtomicU64,
    last_write: AtomicU64,
    inactivated_at: AtomicU64,
    read_bytes: AtomicU64,
    written_bytes: AtomicU64,
    read_messages: AtomicU64,
    dropped_packets: AtomicU64,
    max_idle: Duration,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("transport", &self.transport)
            .field("association", &self.association())
            .field("active", &self.is_active())
            .field("remote", &self.remote_address())
            .finish()
    }
}

impl Session {
    fn build(
        transport: TransportType,
        socket: Option<SocketChannel>,
        datagram: Option<(Arc<DatagramChannel>, SocketAddr)>,
        config: &SessionConfig,
    ) -> Self {
        let mut queue = PacketQueue::new(config.queue_capacity, config.overflow_policy);
        if let Some(policy) = &config.queue_policy {
            queue = queue.with_policy(policy.clone());
        }
        Self {
            id: SESSION_ID.fetch_add(1, Ordering::Relaxed),
            name: RwLock::new(None),
            transport,
            association: AtomicU8::new(AssociationState::None as u8),
            activated: AtomicBool::new(false),
            socket,
            datagram: RwLock::new(datagram),
            decoder: Mutex::new(FrameDecoder::new(config.max_frame_size)),
            queue,
            created_at: Instant::now(),
            last_read: AtomicU64::new(0),
            last_write: AtomicU64::new(0),
            inactivated_at: AtomicU64::new(0),
            read_bytes: AtomicU64::new(0),
            written_bytes: AtomicU64::new(0),
            read_messages: AtomicU64::new(0),
            dropped_packets: AtomicU64::new(0),
            max_idle: config.max_idle,
        }
    }

    /// Session over an accepted TCP stream
    pub fn with_socket(socket: SocketChannel, config: &SessionConfig) -> Self {
        Self::build(TransportType::Tcp, Some(socket), None, config)
    }

    /// Session for a UDP peer
    pub fn with_datagram(
        channel: Arc<DatagramChannel>,
        remote: SocketAddr,
        config: &SessionConfig,
    ) -> Self {
        Self::build(TransportType::Udp, None, Some((channel, remote)), config)
    }

    /// Session with no channel; packets are queued but never written
    pub fn detached(transport: TransportType, config: &SessionConfig) -> Self {
        Self::build(transport, None, None, config)
    }

    /// Replace the frame decoder, e.g. to install compression or encryption hooks
    pub fn set_frame_decoder(&self, decoder: FrameDecoder) {
        *self.decoder.lock().unwrap_or_else(|e| e.into_inner()) = decoder;
    }

    /// Unique id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Identity name, once associated
    pub fn name(&self) -> Option<String> {
        self.name.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Set or clear the identity name
    pub fn set_name(&self, name: Option<String>) {
        *self.name.write().unwrap_or_else(|e| e.into_inner()) = name;
    }

    /// Transport the session was created over
    pub fn transport(&self) -> TransportType {
        self.transport
    }

    /// Whether the session owns a TCP stream
    pub fn is_tcp(&self) -> bool {
        self.socket.is_some()
    }

    /// Current association state
    pub fn association(&self) -> AssociationState {
        AssociationState::from_u8(self.association.load(Ordering::Acquire))
    }

    /// Unconditionally set the association state
    pub fn set_association(&self, state: AssociationState) {
        self.association.store(state as u8, Ordering::Release);
    }

    /// Move from `expected` to `new` only if the state is still `expected`
    pub fn compare_and_set_association(
        &self,
        expected: AssociationState,
        new: AssociationState,
    ) -> bool {
        self.association
            .compare_exchange(expected as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the session is registered and open
    pub fn is_active(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    /// Mark the session open
    pub fn activate(&self) {
        self.activated.store(true, Ordering::Release);
    }

    /// Mark the session closed; returns whether it was open before
    pub fn deactivate(&self) -> bool {
        let was_active = self.activated.swap(false, Ordering::AcqRel);
        if was_active {
            self.inactivated_at.store(self.elapsed_ms(Instant::now()), Ordering::Relaxed);
        }
        was_active
    }

    /// When the session was closed, if it has been
    pub fn inactivated_at(&self) -> Option<Instant> {
        if self.is_active() {
            return None;
        }
        let ms = self.inactivated_at.load(Ordering::Relaxed);
        (ms > 0).then(|| self.created_at + Duration::from_millis(ms))
    }

    /// TCP channel, if any
    pub fn socket(&self) -> Option<&SocketChannel> {
        self.socket.as_ref()
    }

    /// Poll token of the TCP channel
    pub fn token(&self) -> Option<Token> {
        self.socket.as_ref().map(SocketChannel::token)
    }

    /// Bound UDP channel and remote address
    pub fn datagram(&self) -> Option<(Arc<DatagramChannel>, SocketAddr)> {
        self.datagram.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Send one datagram to the bound remote address
    pub fn send_datagram(&self, data: &[u8]) -> Result<(usize, SocketAddr), SessionError> {
        let (channel, remote) = self
            .datagram()
            .ok_or(SessionError::NoDatagramChannel(self.id))?;
        let written = channel.send_to(data, remote)?;
        Ok((written, remote))
    }

    /// Bind (or rebind) the UDP channel; returns the previous remote address
    pub fn set_datagram(&self, channel: Arc<DatagramChannel>, remote: SocketAddr) -> Option<SocketAddr> {
        let mut slot = self.datagram.write().unwrap_or_else(|e| e.into_inner());
        slot.replace((channel, remote)).map(|(_, addr)| addr)
    }

    /// Refresh the UDP remote address after a NAT rebinding
    pub fn refresh_datagram_address(&self, remote: SocketAddr) {
        let mut slot = self.datagram.write().unwrap_or_else(|e| e.into_inner());
        if let Some((_, addr)) = slot.as_mut() {
            *addr = remote;
        }
    }

    /// Remote address: the TCP peer, or else the UDP peer
    pub fn remote_address(&self) -> Option<SocketAddr> {
        match &self.socket {
            Some(socket) => Some(socket.peer_addr()),
            None => self.datagram().map(|(_, addr)| addr),
        }
    }

    /// UDP remote address, if bound
    pub fn datagram_address(&self) -> Option<SocketAddr> {
        self.datagram().map(|(_, addr)| addr)
    }

    /// Local address the peer connected to
    pub fn server_address(&self) -> Option<SocketAddr> {
        match &self.socket {
            Some(socket) => Some(socket.local_addr()),
            None => self.datagram().and_then(|(channel, _)| channel.local_addr().ok()),
        }
    }

    /// Frame decoder state for this session's TCP stream
    pub fn frame_decoder(&self) -> MutexGuard<'_, FrameDecoder> {
        self.decoder.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Outbound packet queue
    pub fn packet_queue(&self) -> &PacketQueue {
        &self.queue
    }

    /// Creation time
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn elapsed_ms(&self, now: Instant) -> u64 {
        // +1 so a stored zero always means "never"
        now.saturating_duration_since(self.created_at).as_millis() as u64 + 1
    }

    fn stored_instant(&self, ms: u64) -> Instant {
        self.created_at + Duration::from_millis(ms.saturating_sub(1))
    }

    /// Count bytes read and refresh the read timestamp
    pub fn add_read_bytes(&self, bytes: usize) {
        self.read_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_read.store(self.elapsed_ms(Instant::now()), Ordering::Relaxed);
    }

    /// Count one decoded message
    pub fn add_read_message(&self) {
        self.read_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Count bytes written and refresh the write timestamp
    pub fn add_written_bytes(&self, bytes: usize) {
        self.written_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_write.store(self.elapsed_ms(Instant::now()), Ordering::Relaxed);
    }

    /// Count one refused packet
    pub fn add_dropped_packet(&self) {
        self.dropped_packets.fetch_add(1, Ordering::Relaxed);
    }

    /// Last time bytes were read
    pub fn last_read_time(&self) -> Option<Instant> {
        match self.last_read.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(self.stored_instant(ms)),
        }
    }

    /// Last time bytes were written
    pub fn last_write_time(&self) -> Option<Instant> {
        match self.last_write.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(self.stored_instant(ms)),
        }
    }

    /// Most recent read, write, or creation
    pub fn last_activity(&self) -> Instant {
        let ms = self
            .last_read
            .load(Ordering::Relaxed)
            .max(self.last_write.load(Ordering::Relaxed));
        if ms == 0 {
            self.created_at
        } else {
            self.stored_instant(ms)
        }
    }

    /// Dropped packet count
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets.load(Ordering::Relaxed)
    }

    /// Idle limit; zero means never idle
    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    /// Whether the idle limit has been exceeded at `now`
    pub fn is_idle_at(&self, now: Instant) -> bool {
        !self.max_idle.is_zero() && now.saturating_duration_since(self.last_activity()) > self.max_idle
    }

    /// Whether the idle limit has been exceeded
    pub fn is_idle(&self) -> bool {
        self.is_idle_at(Instant::now())
    }

    /// Whether the session has failed to associate within [`ORPHAN_THRESHOLD`] at `now`
    pub fn is_orphan_at(&self, now: Instant) -> bool {
        self.association() != AssociationState::Done
            && now.saturating_duration_since(self.created_at) >= ORPHAN_THRESHOLD
    }

    /// Whether the session has failed to associate within [`ORPHAN_THRESHOLD`]
    pub fn is_orphan(&self) -> bool {
        self.is_orphan_at(Instant::now())
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            written_bytes: self.written_bytes.load(Ordering::Relaxed),
            read_messages: self.read_messages.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
            queued_packets: self.queue.size(),
        }
    }

    /// Drop pending packets and close the underlying channel.
    ///
    /// A bound UDP socket is shared with other peers and is left open.
    pub fn close_channel(&self) {
        let discarded = self.queue.clear();
        if let Some(socket) = &self.socket {
            socket.close();
        }
        debug!(session_id = self.id, discarded, "Session channel closed");
    }
}
