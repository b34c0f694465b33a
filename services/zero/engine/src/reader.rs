//! Reader worker pool.
//!
//! Every worker owns one `mio::Poll` and a reusable read buffer. New TCP
//! streams and UDP sockets are handed over through a per-worker inbox and a
//! `Waker`, so only the owning thread ever registers sources with its poll.
//! Streams are edge-triggered: a readable event is drained until
//! `WouldBlock`.

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::writer::WriterEngine;
use bytes::Bytes;
use mio::event::Event;
use mio::net::{TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Waker};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};
use zero_session::{DatagramChannel, DisconnectMode, Session, SocketChannel, WAKER_TOKEN};
use zero_wire::decode_message;

const EVENTS_CAPACITY: usize = 1024;

/// Source waiting to be registered by a reader worker
enum Registration {
    Stream(TcpStream),
    Datagram { index: usize, socket: UdpSocket },
}

struct ReaderHandle {
    waker: Arc<Waker>,
    inbox: Arc<Mutex<Vec<Registration>>>,
}

/// Inbound side of the engine
pub struct ReaderEngine {
    context: Arc<EngineContext>,
    workers: Vec<ReaderHandle>,
    next: AtomicUsize,
}

impl std::fmt::Debug for ReaderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderEngine")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl ReaderEngine {
    /// Spawn `workers` reader threads
    pub(crate) fn start(
        context: Arc<EngineContext>,
        writer: Arc<WriterEngine>,
        workers: usize,
    ) -> Result<(Self, Vec<JoinHandle<()>>)> {
        let mut handles = Vec::with_capacity(workers);
        let mut threads = Vec::with_capacity(workers);

        for index in 0..workers {
            let poll = Poll::new()?;
            let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
            let inbox = Arc::new(Mutex::new(Vec::new()));

            let worker = ReaderWorker {
                index,
                poll,
                inbox: inbox.clone(),
                datagrams: HashMap::new(),
                buffer: vec![0; context.read_buffer_size],
                context: context.clone(),
                writer: writer.clone(),
            };
            let name = format!("zero-reader-{index}");
            let thread = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker.run())
                .map_err(|source| EngineError::Spawn { name, source })?;

            handles.push(ReaderHandle { waker, inbox });
            threads.push(thread);
        }

        info!(workers, "Reader engine started");
        Ok((
            Self {
                context,
                workers: handles,
                next: AtomicUsize::new(0),
            },
            threads,
        ))
    }

    fn dispatch(&self, registration: Registration) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let worker = &self.workers[index];
        worker
            .inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(registration);
        if let Err(e) = worker.waker.wake() {
            warn!(worker = index, error = %e, "Failed to wake reader");
        }
    }

    /// Hand an accepted stream to the next worker
    pub(crate) fn register_stream(&self, stream: TcpStream) {
        self.dispatch(Registration::Stream(stream));
    }

    /// Hand a bound UDP socket to the next worker
    pub(crate) fn register_datagram(&self, index: usize, socket: UdpSocket) {
        self.dispatch(Registration::Datagram { index, socket });
    }

    /// Wake every worker so it notices the halt flag
    pub(crate) fn wake_all(&self) {
        for worker in &self.workers {
            let _ = worker.waker.wake();
        }
    }

    /// Release streams that were accepted but never registered
    pub(crate) fn discard_pending(&self) {
        for worker in &self.workers {
            let pending =
                std::mem::take(&mut *worker.inbox.lock().unwrap_or_else(|e| e.into_inner()));
            for registration in pending {
                if let Registration::Stream(stream) = registration {
                    release_stream(&self.context, &stream);
                }
            }
        }
    }
}

fn release_stream(context: &EngineContext, stream: &TcpStream) {
    if let Ok(peer) = stream.peer_addr() {
        context.manager.filter().remove_address(peer.ip());
    }
    let _ = stream.shutdown(std::net::Shutdown::Both);
}

struct ReaderWorker {
    index: usize,
    poll: Poll,
    inbox: Arc<Mutex<Vec<Registration>>>,
    datagrams: HashMap<mio::Token, Arc<DatagramChannel>>,
    buffer: Vec<u8>,
    context: Arc<EngineContext>,
    writer: Arc<WriterEngine>,
}

impl ReaderWorker {
    fn run(mut self) {
        debug!(worker = self.index, "Reader worker running");
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.context.is_halted() {
            if let Err(e) = self.poll.poll(&mut events, Some(self.context.poll_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(worker = self.index, error = %e, "Reader poll failed");
                break;
            }

            self.drain_inbox();

            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                self.handle_event(event);
            }
        }

        debug!(worker = self.index, datagrams = self.datagrams.len(), "Reader worker stopped");
    }

    fn drain_inbox(&mut self) {
        let pending = std::mem::take(&mut *self.inbox.lock().unwrap_or_else(|e| e.into_inner()));
        for registration in pending {
            match registration {
                Registration::Stream(stream) => self.register_stream(stream),
                Registration::Datagram { index, socket } => self.register_datagram(index, socket),
            }
        }
    }

    fn register_stream(&mut self, mut stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        let token = self.context.manager.next_token();
        let channel = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
            .and_then(|_| self.poll.registry().try_clone())
            .and_then(|registry| SocketChannel::new(stream, registry, token));

        match channel {
            Ok(channel) => {
                let session = self.context.manager.create_socket_session(channel);
                if self.context.has_frame_hooks() {
                    session.set_frame_decoder(self.context.frame_decoder());
                }
                trace!(worker = self.index, session_id = session.id(), ?token, "Stream registered");
            }
            Err(e) => {
                warn!(worker = self.index, ?peer, error = %e, "Failed to register stream");
                if let Some(peer) = peer {
                    self.context.manager.filter().remove_address(peer.ip());
                }
            }
        }
    }

    fn register_datagram(&mut self, index: usize, mut socket: UdpSocket) {
        let token = self.context.manager.next_token();
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut socket, token, Interest::READABLE)
        {
            error!(worker = self.index, error = %e, "Failed to register datagram socket");
            return;
        }
        let channel = Arc::new(DatagramChannel::new(index, Arc::new(socket)));
        debug!(worker = self.index, local = ?channel.local_addr().ok(), "Datagram channel registered");
        self.datagrams.insert(token, channel);
    }

    fn handle_event(&mut self, event: &Event) {
        let token = event.token();
        if let Some(channel) = self.datagrams.get(&token).cloned() {
            self.read_datagrams(&channel);
            return;
        }

        let Some(session) = self.context.manager.get_by_token(token) else {
            return;
        };

        if event.is_readable() || event.is_read_closed() || event.is_error() {
            self.read_stream(&session);
        }

        if event.is_writable() && session.is_active() {
            if let Some(socket) = session.socket() {
                // drop write interest before re-ticketing so a fresh partial
                // write can re-arm it
                if let Err(e) = socket.interest_read() {
                    debug!(session_id = session.id(), error = %e, "Failed to reset interest");
                }
            }
            self.writer.ticket(session);
        }
    }

    fn read_stream(&mut self, session: &Arc<Session>) {
        let Some(socket) = session.socket() else {
            return;
        };
        loop {
            if !session.is_active() {
                return;
            }
            match socket.read(&mut self.buffer) {
                Ok(0) => {
                    self.context.manager.close_session(session, DisconnectMode::Lost);
                    return;
                }
                Ok(n) => {
                    session.add_read_bytes(n);
                    self.context.stats.add_read_bytes(n);
                    if !self.process_stream_bytes(session, n) {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(session_id = session.id(), error = %e, "Read failed");
                    self.context
                        .manager
                        .close_session(session, DisconnectMode::LostInRead);
                    return;
                }
            }
        }
    }

    /// Returns whether the session is still open
    fn process_stream_bytes(&self, session: &Arc<Session>, n: usize) -> bool {
        let mut frames: Vec<Bytes> = Vec::new();
        let framed = session.frame_decoder().decode(&self.buffer[..n], &mut frames);
        if let Err(e) = framed {
            warn!(session_id = session.id(), error = %e, "Invalid frame");
            self.context
                .manager
                .close_session(session, DisconnectMode::BadRequest);
            return false;
        }

        for frame in frames {
            match decode_message(&frame) {
                Ok(message) => {
                    session.add_read_message();
                    self.context.stats.add_read_packets(1);
                    self.context
                        .manager
                        .events()
                        .emit_session_read_message(session, &message);
                }
                Err(e) => {
                    warn!(session_id = session.id(), error = %e, "Undecodable message");
                    self.context
                        .manager
                        .close_session(session, DisconnectMode::BadRequest);
                    return false;
                }
            }
            if !session.is_active() {
                return false;
            }
        }
        true
    }

    fn read_datagrams(&mut self, channel: &Arc<DatagramChannel>) {
        loop {
            match channel.recv_from(&mut self.buffer) {
                Ok((n, remote)) => {
                    self.context.stats.add_read_bytes(n);
                    self.process_datagram(channel, remote, n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(channel = channel.index(), error = %e, "Datagram receive failed");
                    return;
                }
            }
        }
    }

    fn process_datagram(&self, channel: &Arc<DatagramChannel>, remote: SocketAddr, n: usize) {
        let session = self.context.manager.get_by_remote_address(&remote);
        let message = match decode_message(&self.buffer[..n]) {
            Ok(message) => message,
            Err(e) => {
                debug!(%remote, error = %e, "Undecodable datagram");
                if let Some(session) = session {
                    self.context
                        .manager
                        .close_session(&session, DisconnectMode::BadRequest);
                }
                return;
            }
        };
        self.context.stats.add_read_packets(1);

        match session {
            Some(session) if session.is_active() => {
                session.refresh_datagram_address(remote);
                session.add_read_bytes(n);
                session.add_read_message();
                self.context
                    .manager
                    .events()
                    .emit_session_read_message(&session, &message);
            }
            _ => self
                .context
                .manager
                .events()
                .emit_datagram_first_packet(channel, remote, &message),
        }
    }
}
