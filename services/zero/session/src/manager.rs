//! Session registry.
//!
//! This module provides the SessionManager that tracks live sessions by id,
//! by poll token, and by UDP remote address, and that owns the one close path
//! every engine goes through.

use crate::event::EventContext;
use crate::filter::ConnectionFilter;
use crate::session::{DisconnectMode, Session, SessionConfig};
use crate::transport::{DatagramChannel, SocketChannel};
use dashmap::DashMap;
use mio::Token;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Token reserved for each poll's waker
pub const WAKER_TOKEN: Token = Token(0);

/// Registry of live sessions shared by every engine
pub struct SessionManager {
    config: SessionConfig,
    by_id: DashMap<u64, Arc<Session>>,
    by_token: DashMap<Token, Arc<Session>>,
    by_address: DashMap<SocketAddr, Arc<Session>>,
    filter: Arc<dyn ConnectionFilter>,
    events: Arc<EventContext>,
    next_token: AtomicUsize,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.by_id.len())
            .field("datagram_bindings", &self.by_address.len())
            .field("config", &self.config)
            .finish()
    }
}

impl SessionManager {
    /// Create a session manager
    pub fn new(
        config: SessionConfig,
        filter: Arc<dyn ConnectionFilter>,
        events: Arc<EventContext>,
    ) -> Self {
        Self {
            config,
            by_id: DashMap::new(),
            by_token: DashMap::new(),
            by_address: DashMap::new(),
            filter,
            events,
            next_token: AtomicUsize::new(WAKER_TOKEN.0 + 1),
        }
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connection filter
    pub fn filter(&self) -> &Arc<dyn ConnectionFilter> {
        &self.filter
    }

    /// Event context
    pub fn events(&self) -> &Arc<EventContext> {
        &self.events
    }

    /// Allocate a poll token unique across every worker
    pub fn next_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Activate and index a session
    pub fn register(&self, session: Arc<Session>) {
        session.activate();
        if let Some(token) = session.token() {
            self.by_token.insert(token, session.clone());
        }
        if let Some(addr) = session.datagram_address() {
            self.by_address.insert(addr, session.clone());
        }
        self.by_id.insert(session.id(), session);
    }

    /// Create, register and announce a session for an accepted stream
    pub fn create_socket_session(&self, channel: SocketChannel) -> Arc<Session> {
        let session = Arc::new(Session::with_socket(channel, &self.config));
        self.register(session.clone());
        debug!(
            session_id = session.id(),
            remote = ?session.remote_address(),
            "TCP session registered"
        );
        self.events.emit_connection_established(&session);
        session
    }

    /// Create and register a session for a UDP peer
    pub fn create_datagram_session(
        &self,
        channel: Arc<DatagramChannel>,
        remote: SocketAddr,
    ) -> Arc<Session> {
        let session = Arc::new(Session::with_datagram(channel, remote, &self.config));
        self.register(session.clone());
        debug!(session_id = session.id(), %remote, "UDP session registered");
        session
    }

    /// Look up by id
    pub fn get(&self, id: u64) -> Option<Arc<Session>> {
        self.by_id.get(&id).map(|s| s.clone())
    }

    /// Look up by poll token
    pub fn get_by_token(&self, token: Token) -> Option<Arc<Session>> {
        self.by_token.get(&token).map(|s| s.clone())
    }

    /// Look up by UDP remote address
    pub fn get_by_remote_address(&self, addr: &SocketAddr) -> Option<Arc<Session>> {
        self.by_address.get(addr).map(|s| s.clone())
    }

    /// Bind a UDP channel and remote address to an existing session.
    ///
    /// A previous binding for the same session is replaced, so a client whose
    /// NAT mapping changed keeps receiving datagrams on its new address.
    pub fn bind_datagram(
        &self,
        session: &Arc<Session>,
        channel: Arc<DatagramChannel>,
        remote: SocketAddr,
    ) {
        if let Some(previous) = session.set_datagram(channel, remote) {
            if previous != remote {
                self.by_address
                    .remove_if(&previous, |_, bound| bound.id() == session.id());
            }
        }
        self.by_address.insert(remote, session.clone());
        debug!(session_id = session.id(), %remote, "Datagram address bound");
    }

    /// Remove a session from every index
    pub fn remove(&self, session: &Session) -> Option<Arc<Session>> {
        let id = session.id();
        if let Some(token) = session.token() {
            self.by_token.remove_if(&token, |_, s| s.id() == id);
        }
        if let Some(addr) = session.datagram_address() {
            self.by_address.remove_if(&addr, |_, s| s.id() == id);
        }
        self.by_id.remove(&id).map(|(_, s)| s)
    }

    /// Number of registered sessions
    pub fn count(&self) -> usize {
        self.by_id.len()
    }

    /// Snapshot of every registered session
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.by_id.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Close a session exactly once.
    ///
    /// Returns `false` if the session had already been closed.
    pub fn close_session(&self, session: &Arc<Session>, mode: DisconnectMode) -> bool {
        if !session.deactivate() {
            return false;
        }

        self.events.emit_session_will_be_closed(session, mode);

        if let Some(socket) = session.socket() {
            self.filter.remove_address(socket.peer_addr().ip());
        }
        session.close_channel();
        self.remove(session);

        debug!(
            session_id = session.id(),
            name = ?session.name(),
            %mode,
            "Session closed"
        );
        self.events.emit_session_closed(session, mode);
        true
    }

    /// Close sessions that are idle, or orphaned when orphan closing is enabled.
    ///
    /// Returns how many sessions were closed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut closed = 0;
        for session in self.sessions() {
            let mode = if session.is_idle_at(now) {
                DisconnectMode::Idle
            } else if self.config.close_orphans && session.is_orphan_at(now) {
                DisconnectMode::Orphan
            } else {
                continue;
            };
            if self.close_session(&session, mode) {
                closed += 1;
            }
        }
        if closed > 0 {
            debug!(closed, remaining = self.count(), "Housekeeping closed sessions");
        }
        closed
    }

    /// Close every session
    pub fn close_all(&self, mode: DisconnectMode) -> usize {
        let sessions = self.sessions();
        let closed = sessions
            .iter()
            .filter(|session| self.close_session(session, mode))
            .count();
        info!(closed, %mode, "Closed all sessions");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SessionEventHandler;
    use crate::filter::DefaultConnectionFilter;
    use crate::session::{AssociationState, TransportType};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(&'static str, u64, DisconnectMode)>>,
    }

    impl SessionEventHandler for Recorder {
        fn notify_session_will_be_closed(&self, session: &Arc<Session>, mode: DisconnectMode) {
            self.events.lock().unwrap().push(("will_close", session.id(), mode));
        }

        fn notify_session_closed(&self, session: &Arc<Session>, mode: DisconnectMode) {
            self.events.lock().unwrap().push(("closed", session.id(), mode));
        }
    }

    fn manager_with(config: SessionConfig) -> (SessionManager, Arc<Recorder>) {
        let events = Arc::new(EventContext::new());
        let recorder = Arc::new(Recorder::default());
        events.subscribe(recorder.clone());
        let manager = SessionManager::new(
            config,
            Arc::new(DefaultConnectionFilter::default()),
            events,
        );
        (manager, recorder)
    }

    fn detached(manager: &SessionManager) -> Arc<Session> {
        let session = Arc::new(Session::detached(TransportType::Tcp, manager.config()));
        manager.register(session.clone());
        session
    }

    #[test]
    fn test_register_and_close_once() {
        let (manager, recorder) = manager_with(SessionConfig::default());
        let session = detached(&manager);
        assert!(session.is_active());
        assert_eq!(manager.count(), 1);
        assert!(manager.get(session.id()).is_some());

        assert!(manager.close_session(&session, DisconnectMode::Lost));
        assert!(!manager.close_session(&session, DisconnectMode::Lost));

        assert_eq!(manager.count(), 0);
        let events = recorder.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                ("will_close", session.id(), DisconnectMode::Lost),
                ("closed", session.id(), DisconnectMode::Lost),
            ]
        );
    }

    #[test]
    fn test_sweep_closes_orphans_only_when_enabled() {
        let (manager, recorder) = manager_with(SessionConfig::default());
        let orphan = detached(&manager);
        let bound = detached(&manager);
        bound.set_association(AssociationState::Done);

        let later = Instant::now() + Duration::from_secs(5);
        assert_eq!(manager.sweep(later), 1);
        assert!(!orphan.is_active());
        assert!(bound.is_active());
        assert!(recorder
            .events
            .lock()
            .unwrap()
            .contains(&("closed", orphan.id(), DisconnectMode::Orphan)));

        let (manager, _) = manager_with(SessionConfig {
            close_orphans: false,
            ..SessionConfig::default()
        });
        detached(&manager);
        assert_eq!(manager.sweep(later), 0);
    }

    #[test]
    fn test_sweep_closes_idle() {
        let (manager, recorder) = manager_with(SessionConfig {
            max_idle: Duration::from_millis(50),
            close_orphans: false,
            ..SessionConfig::default()
        });
        let session = detached(&manager);

        assert_eq!(manager.sweep(Instant::now() + Duration::from_secs(1)), 1);
        assert!(recorder
            .events
            .lock()
            .unwrap()
            .contains(&("closed", session.id(), DisconnectMode::Idle)));
    }

    #[test]
    fn test_close_all() {
        let (manager, _) = manager_with(SessionConfig::default());
        for _ in 0..3 {
            detached(&manager);
        }
        assert_eq!(manager.close_all(DisconnectMode::Shutdown), 3);
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_tokens_skip_waker() {
        let (manager, _) = manager_with(SessionConfig::default());
        let first = manager.next_token();
        assert_ne!(first, WAKER_TOKEN);
        assert_ne!(manager.next_token(), first);
    }
}
