//! Writer worker pool.
//!
//! Each worker blocks on its own ticket channel. A ticket names a session
//! with pending outbound packets; tickets are sharded by session id so one
//! session is always drained by the same worker, which keeps its packets in
//! order. A worker writes at most the head packet per ticket and never
//! spins on a full socket: a partial write parks the remaining bytes in the
//! queue head and asks the session's reader for WRITABLE readiness instead.

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};
use zero_session::{DisconnectMode, Packet, PacketQueueError, Session};
use zero_wire::FrameEncoder;

/// Outbound side of the engine: admission into session queues and the
/// writer threads that drain them
pub struct WriterEngine {
    context: Arc<EngineContext>,
    encoder: FrameEncoder,
    senders: RwLock<Vec<Sender<Arc<Session>>>>,
}

impl std::fmt::Debug for WriterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterEngine")
            .field("workers", &self.worker_count())
            .field("encoder", &self.encoder)
            .finish()
    }
}

impl WriterEngine {
    pub(crate) fn new(context: Arc<EngineContext>, encoder: FrameEncoder) -> Self {
        Self {
            context,
            encoder,
            senders: RwLock::new(Vec::new()),
        }
    }

    /// Number of running workers
    pub fn worker_count(&self) -> usize {
        self.senders.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn start(self: &Arc<Self>, workers: usize) -> Result<Vec<JoinHandle<()>>> {
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, rx) = mpsc::channel();
            let engine = Arc::clone(self);
            let name = format!("zero-writer-{index}");
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || engine.run(index, rx))
                .map_err(|source| EngineError::Spawn { name, source })?;
            senders.push(tx);
            handles.push(handle);
        }
        *self.senders.write().unwrap_or_else(|e| e.into_inner()) = senders;
        info!(workers, "Writer engine started");
        Ok(handles)
    }

    /// Drop every ticket sender so blocked workers wake up and exit
    pub(crate) fn stop(&self) {
        self.senders.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Signal that `session` has pending packets
    pub fn ticket(&self, session: Arc<Session>) {
        let senders = self.senders.read().unwrap_or_else(|e| e.into_inner());
        if senders.is_empty() {
            return;
        }
        let shard = (session.id() % senders.len() as u64) as usize;
        // a closed channel means the worker is shutting down
        let _ = senders[shard].send(session);
    }

    /// Admit `packet` into the queue of each of its recipients.
    ///
    /// Admission failures are counted, never returned.
    pub fn enqueue_packet(&self, packet: Packet) {
        let payload = if packet.is_tcp() {
            match self.encoder.encode(packet.data(), packet.is_encrypted()) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(packet_id = packet.id(), error = %e, "Failed to frame packet");
                    return;
                }
            }
        } else {
            packet.data().clone()
        };

        let stats = &self.context.stats;
        for session in packet.recipients() {
            if !session.is_active() {
                continue;
            }
            let mut copy = packet.for_recipient();
            copy.set_data(payload.clone());

            match session.packet_queue().put(copy) {
                Ok(evicted) => {
                    if let Some(evicted) = evicted {
                        trace!(session_id = session.id(), packet_id = evicted.id(), "Evicted oldest packet");
                        session.add_dropped_packet();
                        stats.add_dropped_by_full();
                    }
                    self.ticket(session.clone());
                }
                Err(e) => {
                    session.add_dropped_packet();
                    match e {
                        PacketQueueError::PolicyViolation { .. } => stats.add_dropped_by_policy(),
                        PacketQueueError::Full(_) => stats.add_dropped_by_full(),
                    }
                    trace!(session_id = session.id(), error = %e, "Packet dropped");
                }
            }
        }
    }

    fn run(&self, index: usize, tickets: Receiver<Arc<Session>>) {
        debug!(worker = index, "Writer worker running");
        while let Ok(session) = tickets.recv() {
            if self.context.is_halted() {
                break;
            }
            self.process(&session);
        }
        let discarded = tickets.try_iter().count();
        debug!(worker = index, discarded, "Writer worker stopped");
    }

    fn process(&self, session: &Arc<Session>) {
        let queue = session.packet_queue();
        let Some(packet) = queue.peek_for_write() else {
            return;
        };

        if !session.is_active() {
            queue.take_if(packet.id());
            return;
        }

        if packet.is_tcp() {
            self.write_tcp(session, packet);
        } else {
            self.write_udp(session, packet);
        }
    }

    fn write_tcp(&self, session: &Arc<Session>, packet: Packet) {
        let queue = session.packet_queue();
        let Some(socket) = session.socket() else {
            debug!(session_id = session.id(), "TCP packet for session without socket dropped");
            queue.take_if(packet.id());
            session.add_dropped_packet();
            return;
        };

        let pending = packet.pending_bytes().clone();
        let mut written = 0;
        let mut failure = None;
        while written < pending.len() {
            match socket.write(&pending[written..]) {
                Ok(0) => {
                    failure = Some(io::Error::from(io::ErrorKind::WriteZero));
                    break;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if written > 0 {
            session.add_written_bytes(written);
            self.context.stats.add_written_bytes(written);
        }

        if let Some(e) = failure {
            debug!(session_id = session.id(), error = %e, "Write failed");
            self.context
                .manager
                .close_session(session, DisconnectMode::LostInWritten);
            return;
        }

        if written < pending.len() {
            queue.set_fragment(packet.id(), pending.slice(written..));
            trace!(
                session_id = session.id(),
                remaining = pending.len() - written,
                "Partial write, waiting for writable"
            );
            if let Err(e) = socket.interest_write() {
                debug!(session_id = session.id(), error = %e, "Failed to register write interest");
                self.context
                    .manager
                    .close_session(session, DisconnectMode::LostInWritten);
            }
            return;
        }

        self.complete(session, &packet);
    }

    fn write_udp(&self, session: &Arc<Session>, packet: Packet) {
        let queue = session.packet_queue();
        match session.send_datagram(packet.data()) {
            Ok((n, _)) => {
                session.add_written_bytes(n);
                self.context.stats.add_written_bytes(n);
                self.complete(session, &packet);
            }
            Err(e) => {
                // the socket is shared, so a failed datagram only costs the packet
                debug!(session_id = session.id(), error = %e, "Datagram send failed, packet dropped");
                queue.take_if(packet.id());
                session.add_dropped_packet();
                if !queue.is_empty() {
                    self.ticket(session.clone());
                }
            }
        }
    }

    fn complete(&self, session: &Arc<Session>, packet: &Packet) {
        let queue = session.packet_queue();
        queue.take_if(packet.id());
        self.context.stats.add_written_packets(1);

        if packet.is_marked_as_last() {
            queue.clear();
            self.context
                .manager
                .close_session(session, DisconnectMode::ClientRequest);
            return;
        }

        if !queue.is_empty() {
            self.ticket(session.clone());
        }
    }
}
