//! Boundary events raised by the engine towards business logic.

use crate::session::{DisconnectMode, Session};
use crate::transport::DatagramChannel;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use zero_wire::ZeroElement;

/// Receives session lifecycle and message events.
///
/// Handlers run on engine worker threads and must not block for long.
pub trait SessionEventHandler: Send + Sync {
    /// A TCP session was accepted and registered
    fn notify_connection_established(&self, _session: &Arc<Session>) {}

    /// A complete message was decoded for a session
    fn notify_session_read_message(&self, _session: &Arc<Session>, _message: &ZeroElement) {}

    /// A datagram arrived from an address not yet bound to any session
    fn notify_datagram_first_packet(
        &self,
        _channel: &Arc<DatagramChannel>,
        _remote: SocketAddr,
        _message: &ZeroElement,
    ) {
    }

    /// A session is about to be closed
    fn notify_session_will_be_closed(&self, _session: &Arc<Session>, _mode: DisconnectMode) {}

    /// A session was closed and unregistered
    fn notify_session_closed(&self, _session: &Arc<Session>, _mode: DisconnectMode) {}
}

/// Explicitly constructed event hub shared by the engines
#[derive(Default)]
pub struct EventContext {
    handlers: RwLock<Vec<Arc<dyn SessionEventHandler>>>,
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("handlers", &self.snapshot().len())
            .finish()
    }
}

impl EventContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler
    pub fn subscribe(&self, handler: Arc<dyn SessionEventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    /// Drop every handler
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    // Handlers are invoked outside the lock so they may subscribe or close sessions
    fn snapshot(&self) -> Vec<Arc<dyn SessionEventHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Raise connection established
    pub fn emit_connection_established(&self, session: &Arc<Session>) {
        for handler in self.snapshot() {
            handler.notify_connection_established(session);
        }
    }

    /// Raise session read message
    pub fn emit_session_read_message(&self, session: &Arc<Session>, message: &ZeroElement) {
        for handler in self.snapshot() {
            handler.notify_session_read_message(session, message);
        }
    }

    /// Raise datagram first packet
    pub fn emit_datagram_first_packet(
        &self,
        channel: &Arc<DatagramChannel>,
        remote: SocketAddr,
        message: &ZeroElement,
    ) {
        for handler in self.snapshot() {
            handler.notify_datagram_first_packet(channel, remote, message);
        }
    }

    /// Raise session will be closed
    pub fn emit_session_will_be_closed(&self, session: &Arc<Session>, mode: DisconnectMode) {
        for handler in self.snapshot() {
            handler.notify_session_will_be_closed(session, mode);
        }
    }

    /// Raise session closed
    pub fn emit_session_closed(&self, session: &Arc<Session>, mode: DisconnectMode) {
        for handler in self.snapshot() {
            handler.notify_session_closed(session, mode);
        }
    }
}
