//! Association state machine driving sessions from NONE to DONE.
//!
//! The processor subscribes to the [`EventContext`](crate::EventContext) and
//! turns raw boundary events into identity-level callbacks on a
//! [`Collaborator`]:
//!
//! - first message on a NONE session: connection request, resolved to an
//!   identity or rejected;
//! - messages on a DONE session: forwarded with their identity;
//! - close of a DONE session: identity detached.
//!
//! An identity is bound to at most one session. A newer session for the same
//! identity replaces the older one, which is closed with
//! [`DisconnectMode::Reconnection`].

use crate::convey::{DatagramConveyPolicy, DefaultConveyPolicy};
use crate::event::SessionEventHandler;
use crate::manager::SessionManager;
use crate::session::{AssociationState, DisconnectMode, Session};
use crate::transport::DatagramChannel;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zero_wire::ZeroElement;

/// Prefix given to the name of a session replaced by a reconnection
pub const STALE_PREFIX: &str = "STALE-";

/// Business logic the processor hands identities and messages to
pub trait Collaborator: Send + Sync {
    /// Validate a connection request; `None` rejects it
    fn resolve_identity(&self, session: &Arc<Session>, message: &ZeroElement) -> Option<String>;

    /// `session` now carries `identity`; `reconnected` when it replaced another session
    fn on_identity_bound(&self, _identity: &str, _session: &Arc<Session>, _reconnected: bool) {}

    /// Application message from an associated session
    fn on_message(&self, identity: &str, session: &Arc<Session>, message: &ZeroElement);

    /// The session carrying `identity` was closed
    fn on_identity_detached(&self, _identity: &str, _session: &Arc<Session>, _mode: DisconnectMode) {}
}

/// Drives the NONE/DOING/DONE association of every session
pub struct AssociationProcessor<C: Collaborator> {
    manager: Arc<SessionManager>,
    collaborator: Arc<C>,
    convey: Box<dyn DatagramConveyPolicy>,
    identities: DashMap<String, Arc<Session>>,
}

impl<C: Collaborator> AssociationProcessor<C> {
    /// Create a processor using the default convey policy
    pub fn new(manager: Arc<SessionManager>, collaborator: Arc<C>) -> Self {
        Self {
            manager,
            collaborator,
            convey: Box::new(DefaultConveyPolicy),
            identities: DashMap::new(),
        }
    }

    /// Replace the convey policy
    pub fn with_convey_policy(mut self, policy: impl DatagramConveyPolicy + 'static) -> Self {
        self.convey = Box::new(policy);
        self
    }

    /// Collaborator
    pub fn collaborator(&self) -> &Arc<C> {
        &self.collaborator
    }

    /// Session currently bound to `identity`
    pub fn session_of(&self, identity: &str) -> Option<Arc<Session>> {
        self.identities.get(identity).map(|s| s.clone())
    }

    /// Number of bound identities
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    fn handle_connection_request(&self, session: &Arc<Session>, message: &ZeroElement) {
        if !session.compare_and_set_association(AssociationState::None, AssociationState::Doing) {
            debug!(session_id = session.id(), "Session is already associating");
            return;
        }

        let Some(identity) = self.collaborator.resolve_identity(session, message) else {
            debug!(session_id = session.id(), "Connection request rejected");
            session.set_association(AssociationState::None);
            self.manager.close_session(session, DisconnectMode::BadRequest);
            return;
        };

        session.set_name(Some(identity.clone()));
        if !session.compare_and_set_association(AssociationState::Doing, AssociationState::Done) {
            warn!(session_id = session.id(), %identity, "Association changed during handshake");
            return;
        }

        // checked under the identity's shard lock so a session closed by now
        // never displaces a live binding
        let displaced = {
            let entry = self.identities.entry(identity.clone());
            if !session.is_active() {
                drop(entry);
                debug!(session_id = session.id(), %identity, "Session closed before binding");
                session.set_name(None);
                session.set_association(AssociationState::None);
                return;
            }
            match entry {
                Entry::Occupied(mut bound) => Some(bound.insert(session.clone())),
                Entry::Vacant(slot) => {
                    slot.insert(session.clone());
                    None
                }
            }
        };

        let reconnected = match displaced {
            Some(previous) if previous.id() != session.id() && previous.is_active() => {
                info!(
                    old_session = previous.id(),
                    new_session = session.id(),
                    %identity,
                    "Identity reconnected, closing previous session"
                );
                previous.set_name(Some(format!("{STALE_PREFIX}{identity}")));
                previous.set_association(AssociationState::None);
                self.manager.close_session(&previous, DisconnectMode::Reconnection);
                true
            }
            _ => false,
        };

        if !session.is_active() {
            // closed while binding; the close event saw DONE only if it ran after us
            self.identities
                .remove_if(&identity, |_, bound| bound.id() == session.id());
            return;
        }

        debug!(session_id = session.id(), %identity, reconnected, "Session associated");
        self.collaborator
            .on_identity_bound(&identity, session, reconnected);
    }

    fn handle_detach(&self, session: &Arc<Session>, mode: DisconnectMode) {
        if session.association() != AssociationState::Done {
            return;
        }
        if let Some(identity) = session.name() {
            let removed = self
                .identities
                .remove_if(&identity, |_, bound| bound.id() == session.id());
            if removed.is_some() {
                self.collaborator
                    .on_identity_detached(&identity, session, mode);
            }
        }
        session.set_name(None);
        session.set_association(AssociationState::None);
    }
}

impl<C: Collaborator> SessionEventHandler for AssociationProcessor<C> {
    fn notify_session_read_message(&self, session: &Arc<Session>, message: &ZeroElement) {
        match session.association() {
            AssociationState::None => self.handle_connection_request(session, message),
            AssociationState::Doing => {
                debug!(session_id = session.id(), "Message ignored during handshake");
            }
            AssociationState::Done => {
                if let Some(identity) = session.name() {
                    self.collaborator.on_message(&identity, session, message);
                }
            }
        }
    }

    fn notify_datagram_first_packet(
        &self,
        channel: &Arc<DatagramChannel>,
        remote: SocketAddr,
        message: &ZeroElement,
    ) {
        match self.convey.convey_id(message) {
            Some(id) => match self.manager.get(id) {
                Some(session)
                    if session.is_active()
                        && session.association() == AssociationState::Done =>
                {
                    self.manager.bind_datagram(&session, channel.clone(), remote);
                }
                _ => debug!(convey_id = id, %remote, "Datagram convey refused"),
            },
            None => {
                let session = self.manager.create_datagram_session(channel.clone(), remote);
                session.add_read_message();
                self.handle_connection_request(&session, message);
            }
        }
    }

    fn notify_session_closed(&self, session: &Arc<Session>, mode: DisconnectMode) {
        self.handle_detach(session, mode);
    }
}
