//! Demo business logic: a login lobby that echoes messages.
//!
//! A connection request is a map carrying the player name under `"u"`.
//! Bound players get `{"ok": name, "id": session_id, "r": reconnected}`
//! and every later message is echoed back on the same transport.

use crate::{component_debug, component_info, component_warn};
use std::sync::Arc;
use zero_engine::WriterEngine;
use zero_session::{Collaborator, DisconnectMode, Packet, Session, TransportType};
use zero_wire::{encode, ZeroElement, ZeroMap};

/// Login-and-echo collaborator plugged into the association processor
pub struct Lobby {
    writer: Arc<WriterEngine>,
}

impl Lobby {
    /// Lobby replying through `writer`
    pub fn new(writer: Arc<WriterEngine>) -> Self {
        Self { writer }
    }

    fn reply(&self, session: &Arc<Session>, message: &ZeroElement) {
        let payload = match encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                component_warn!("lobby", session_id = session.id(), error = %e, "Failed to encode reply");
                return;
            }
        };
        let packet = if session.transport() == TransportType::Tcp {
            Packet::new(payload)
        } else {
            Packet::new(payload).udp()
        };
        self.writer
            .enqueue_packet(packet.with_recipient(session.clone()));
    }
}

impl Collaborator for Lobby {
    fn resolve_identity(&self, _session: &Arc<Session>, message: &ZeroElement) -> Option<String> {
        message
            .as_map()?
            .get_str("u")
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    fn on_identity_bound(&self, identity: &str, session: &Arc<Session>, reconnected: bool) {
        component_info!(
            "lobby",
            session_id = session.id(),
            reconnected,
            "Player {} joined",
            identity
        );
        let ack = ZeroMap::new()
            .with("ok", identity)
            .with("id", session.id() as i64)
            .with("r", reconnected);
        self.reply(session, &ack.into());
    }

    fn on_message(&self, identity: &str, session: &Arc<Session>, message: &ZeroElement) {
        component_debug!("lobby", session_id = session.id(), "Echo for {}", identity);
        self.reply(session, message);
    }

    fn on_identity_detached(&self, identity: &str, session: &Arc<Session>, mode: DisconnectMode) {
        component_info!(
            "lobby",
            session_id = session.id(),
            mode = %mode,
            "Player {} left",
            identity
        );
    }
}
