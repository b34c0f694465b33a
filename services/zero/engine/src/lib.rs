//! Acceptor, reader and writer worker pools for the Zero network engine.
//!
//! The engine runs on plain threads around `mio` polls:
//!
//! ```text
//!  Acceptor ──stream──▶ Reader[i] ──message──▶ EventContext ──▶ business logic
//!                          │  ▲                                      │
//!                 writable │  │ WRITABLE interest                    │ enqueue_packet
//!                          ▼  │                                      ▼
//!                       Writer[session_id % M] ◀──ticket── Session packet queue
//! ```
//!
//! - one acceptor thread binds listeners, filters addresses and hands
//!   streams to readers round-robin;
//! - N reader threads each own a poll, decode frames and raise events;
//! - M writer threads block on their ticket channels and drain session
//!   queues without ever spinning on a full socket;
//! - one housekeeping thread closes idle and orphan sessions.
//!
//! ## Example
//!
//! ```rust,no_run
//! use zero_engine::{EngineConfig, ZeroEngine};
//! use zero_session::Packet;
//!
//! # fn example() -> Result<(), zero_engine::EngineError> {
//! let mut engine = ZeroEngine::builder(EngineConfig::default()).build()?;
//! engine.start()?;
//!
//! for session in engine.manager().sessions() {
//!     engine.enqueue_packet(Packet::new(vec![18, 0, 0]).with_recipient(session));
//! }
//!
//! engine.shutdown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod acceptor;
pub mod config;
mod context;
pub mod error;
pub mod reader;
pub mod stats;
pub mod writer;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use reader::ReaderEngine;
pub use stats::{NetworkStats, NetworkStatsSnapshot};
pub use writer::WriterEngine;

use acceptor::{Acceptor, Listeners};
use context::EngineContext;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use zero_session::{
    ConnectionFilter, DefaultConnectionFilter, DisconnectMode, EventContext, Packet,
    SessionEventHandler, SessionManager,
};
use zero_wire::{FrameEncoder, PacketCompressor, PacketEncryptor, ZeroElement, ZeroError};

/// Explicit composition of an engine
pub struct ZeroEngineBuilder {
    config: EngineConfig,
    filter: Option<Arc<dyn ConnectionFilter>>,
    events: Option<Arc<EventContext>>,
    handlers: Vec<Arc<dyn SessionEventHandler>>,
    compressor: Option<Arc<dyn PacketCompressor>>,
    encryptor: Option<Arc<dyn PacketEncryptor>>,
}

impl ZeroEngineBuilder {
    /// Use a custom connection filter instead of [`DefaultConnectionFilter`]
    pub fn connection_filter(mut self, filter: Arc<dyn ConnectionFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Share an existing event context
    pub fn event_context(mut self, events: Arc<EventContext>) -> Self {
        self.events = Some(events);
        self
    }

    /// Subscribe a handler before the engine starts
    pub fn event_handler(mut self, handler: Arc<dyn SessionEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Install a compression hook
    pub fn compressor(mut self, compressor: Arc<dyn PacketCompressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Install an encryption hook
    pub fn encryptor(mut self, encryptor: Arc<dyn PacketEncryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Validate the configuration and wire the engine together
    pub fn build(self) -> Result<ZeroEngine> {
        self.config.validate()?;

        let events = self.events.unwrap_or_default();
        for handler in self.handlers {
            events.subscribe(handler);
        }
        let filter = self.filter.unwrap_or_else(|| {
            Arc::new(DefaultConnectionFilter::new(
                self.config.max_connections_per_ip,
            ))
        });
        let manager = Arc::new(SessionManager::new(
            self.config.session_config(),
            filter,
            events,
        ));

        let mut encoder =
            FrameEncoder::new().with_compression_threshold(self.config.compression_threshold);
        if let Some(compressor) = &self.compressor {
            encoder = encoder.with_compressor(compressor.clone());
        }
        if let Some(encryptor) = &self.encryptor {
            encoder = encoder.with_encryptor(encryptor.clone());
        }

        let context = Arc::new(EngineContext::new(
            manager,
            Arc::new(NetworkStats::new()),
            self.config.poll_timeout(),
            self.config.read_buffer_size,
            self.config.max_frame_size,
            self.compressor,
            self.encryptor,
        ));
        let writer = Arc::new(WriterEngine::new(context.clone(), encoder));

        Ok(ZeroEngine {
            config: self.config,
            context,
            writer,
            readers: None,
            acceptor: None,
            threads: Vec::new(),
            housekeeper: None,
            tcp_addresses: Vec::new(),
            udp_addresses: Vec::new(),
        })
    }
}

/// A running (or ready to run) network engine
pub struct ZeroEngine {
    config: EngineConfig,
    context: Arc<EngineContext>,
    writer: Arc<WriterEngine>,
    readers: Option<Arc<ReaderEngine>>,
    acceptor: Option<Acceptor>,
    threads: Vec<JoinHandle<()>>,
    housekeeper: Option<JoinHandle<()>>,
    tcp_addresses: Vec<SocketAddr>,
    udp_addresses: Vec<SocketAddr>,
}

impl std::fmt::Debug for ZeroEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroEngine")
            .field("running", &self.is_running())
            .field("tcp", &self.tcp_addresses)
            .field("udp", &self.udp_addresses)
            .field("sessions", &self.context.manager.count())
            .finish()
    }
}

impl ZeroEngine {
    /// Start composing an engine
    pub fn builder(config: EngineConfig) -> ZeroEngineBuilder {
        ZeroEngineBuilder {
            config,
            filter: None,
            events: None,
            handlers: Vec::new(),
            compressor: None,
            encryptor: None,
        }
    }

    /// Configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Session registry
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.context.manager
    }

    /// Event context
    pub fn events(&self) -> &Arc<EventContext> {
        self.context.manager.events()
    }

    /// Outbound handle, cloneable into business logic
    pub fn writer(&self) -> Arc<WriterEngine> {
        self.writer.clone()
    }

    /// Counters
    pub fn stats(&self) -> &Arc<NetworkStats> {
        &self.context.stats
    }

    /// Whether [`ZeroEngine::start`] has run and shutdown has not
    pub fn is_running(&self) -> bool {
        self.readers.is_some() && !self.context.is_halted()
    }

    /// Bound TCP addresses, available once started
    pub fn tcp_addresses(&self) -> &[SocketAddr] {
        &self.tcp_addresses
    }

    /// Bound UDP addresses, available once started
    pub fn udp_addresses(&self) -> &[SocketAddr] {
        &self.udp_addresses
    }

    /// Bind every port and spawn the worker threads.
    ///
    /// A port that cannot be bound aborts startup with [`EngineError::Bind`].
    pub fn start(&mut self) -> Result<()> {
        if self.readers.is_some() {
            return Err(EngineError::AlreadyStarted);
        }
        if self.context.is_halted() {
            return Err(EngineError::NotRunning);
        }

        let tcp: Vec<_> = self.config.tcp_ports.iter().map(|&p| self.config.socket_addr(p)).collect();
        let udp: Vec<_> = self.config.udp_ports.iter().map(|&p| self.config.socket_addr(p)).collect();
        let listeners = Listeners::bind(&tcp, &udp)?;
        self.tcp_addresses = listeners.tcp_addresses();
        self.udp_addresses = listeners.udp_addresses();

        self.threads
            .extend(self.writer.start(self.config.writer_workers)?);

        let (readers, reader_threads) = ReaderEngine::start(
            self.context.clone(),
            self.writer.clone(),
            self.config.reader_workers,
        )?;
        let readers = Arc::new(readers);
        self.threads.extend(reader_threads);
        self.readers = Some(readers.clone());

        let (acceptor, acceptor_thread) =
            Acceptor::start(listeners, self.context.clone(), readers)?;
        self.acceptor = Some(acceptor);
        self.threads.push(acceptor_thread);

        self.housekeeper = Some(spawn_housekeeper(
            self.context.clone(),
            self.config.housekeeping_interval(),
        )?);

        info!(
            tcp = ?self.tcp_addresses,
            udp = ?self.udp_addresses,
            readers = self.config.reader_workers,
            writers = self.config.writer_workers,
            "Zero engine started"
        );
        Ok(())
    }

    /// Queue `packet` for each of its recipients.
    ///
    /// Packets refused by a full queue or a queue policy are counted in
    /// [`NetworkStats`] and the recipient's dropped-packet counter.
    pub fn enqueue_packet(&self, packet: Packet) {
        self.writer.enqueue_packet(packet);
    }

    /// Encode `message` and queue it for `recipients`
    pub fn send(
        &self,
        message: &ZeroElement,
        recipients: Vec<Arc<zero_session::Session>>,
    ) -> std::result::Result<(), ZeroError> {
        let payload = zero_wire::encode(message)?;
        self.writer
            .enqueue_packet(Packet::new(payload).with_recipients(recipients));
        Ok(())
    }

    /// Stop every thread, close every session and drop undelivered packets.
    ///
    /// Threads that do not stop within the configured timeout are detached.
    pub fn shutdown(&mut self) {
        if self.context.is_halted() {
            return;
        }
        info!("Zero engine shutting down");
        self.context.halt();

        if let Some(acceptor) = &self.acceptor {
            acceptor.wake();
        }
        if let Some(readers) = &self.readers {
            readers.wake_all();
        }
        self.writer.stop();
        if let Some(housekeeper) = &self.housekeeper {
            housekeeper.thread().unpark();
        }

        if let Some(readers) = &self.readers {
            readers.discard_pending();
        }
        self.context.manager.close_all(DisconnectMode::Shutdown);

        let deadline = Instant::now() + self.config.shutdown_timeout();
        let mut threads: Vec<_> = self.threads.drain(..).collect();
        threads.extend(self.housekeeper.take());
        join_until(threads, deadline);

        self.acceptor = None;
        self.readers = None;
        // handlers may hold the manager; dropping them breaks the cycle
        self.context.manager.events().clear();
        info!("Zero engine stopped");
    }
}

impl Drop for ZeroEngine {
    fn drop(&mut self) {
        if self.readers.is_some() {
            self.shutdown();
        }
    }
}

fn spawn_housekeeper(context: Arc<EngineContext>, interval: Duration) -> Result<JoinHandle<()>> {
    let name = "zero-housekeeper".to_string();
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            debug!(?interval, "Housekeeper running");
            loop {
                thread::park_timeout(interval);
                if context.is_halted() {
                    break;
                }
                context.manager.sweep(Instant::now());
            }
        })
        .map_err(|source| EngineError::Spawn { name, source })
}

fn join_until(threads: Vec<JoinHandle<()>>, deadline: Instant) {
    for handle in threads {
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let name = handle.thread().name().unwrap_or("unnamed").to_string();
        if handle.is_finished() {
            if handle.join().is_err() {
                error!(thread = %name, "Worker panicked");
            }
        } else {
            warn!(thread = %name, "Worker did not stop in time, detaching");
        }
    }
}
