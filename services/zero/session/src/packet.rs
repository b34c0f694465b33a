//! Outbound packets.

use crate::session::{Session, TransportType};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static PACKET_ID: AtomicU64 = AtomicU64::new(1);

/// Delivery priority, consulted by the queue policy when a queue fills up
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResponsePriority {
    /// First to be refused under pressure
    NonGuaranteed = 1,
    /// Default priority
    Normal = 2,
    /// Refused only when the queue is nearly full
    Guaranteed = 3,
    /// Never refused by the default policy
    GuaranteedQuickest = 4,
}

impl Default for ResponsePriority {
    fn default() -> Self {
        ResponsePriority::Normal
    }
}

/// One outbound payload and the sessions it is addressed to.
///
/// The payload is an immutable shared buffer: every recipient copy made by
/// [`Packet::for_recipient`] shares it, and only the per-copy header state
/// (id, fragment) is independent.
#[derive(Clone)]
pub struct Packet {
    id: u64,
    created_at: Instant,
    data: Bytes,
    transport: TransportType,
    priority: ResponsePriority,
    encrypted: bool,
    marked_as_last: bool,
    recipients: Vec<Arc<Session>>,
    fragment: Option<Bytes>,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("transport", &self.transport)
            .field("priority", &self.priority)
            .field("encrypted", &self.encrypted)
            .field("marked_as_last", &self.marked_as_last)
            .field("recipients", &self.recipients.iter().map(|s| s.id()).collect::<Vec<_>>())
            .field("fragment", &self.fragment.as_ref().map(Bytes::len))
            .finish()
    }
}

impl Packet {
    /// Create a TCP packet with normal priority and no recipients
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            id: PACKET_ID.fetch_add(1, Ordering::Relaxed),
            created_at: Instant::now(),
            data: data.into(),
            transport: TransportType::Tcp,
            priority: ResponsePriority::default(),
            encrypted: false,
            marked_as_last: false,
            recipients: Vec::new(),
            fragment: None,
        }
    }

    /// Send over the session's bound UDP channel instead
    pub fn udp(mut self) -> Self {
        self.transport = TransportType::Udp;
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: ResponsePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Ask the frame encoder to encrypt this packet
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Close the recipient once this packet has been written
    pub fn mark_as_last(mut self) -> Self {
        self.marked_as_last = true;
        self
    }

    /// Add a recipient
    pub fn with_recipient(mut self, session: Arc<Session>) -> Self {
        self.recipients.push(session);
        self
    }

    /// Replace the recipients
    pub fn with_recipients(mut self, sessions: Vec<Arc<Session>>) -> Self {
        self.recipients = sessions;
        self
    }

    /// Unique id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Creation time
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Replace the payload, e.g. with its framed form
    pub fn set_data(&mut self, data: Bytes) {
        self.data = data;
    }

    /// Transport
    pub fn transport(&self) -> TransportType {
        self.transport
    }

    /// Whether this goes over TCP
    pub fn is_tcp(&self) -> bool {
        self.transport == TransportType::Tcp
    }

    /// Priority
    pub fn priority(&self) -> ResponsePriority {
        self.priority
    }

    /// Whether encryption was requested
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Whether the recipient closes after this packet
    pub fn is_marked_as_last(&self) -> bool {
        self.marked_as_last
    }

    /// Recipients
    pub fn recipients(&self) -> &[Arc<Session>] {
        &self.recipients
    }

    /// Bytes still to be written after a partial write
    pub fn fragment(&self) -> Option<&Bytes> {
        self.fragment.as_ref()
    }

    /// Record the unwritten tail of a partial write
    pub fn set_fragment(&mut self, fragment: Bytes) {
        self.fragment = Some(fragment);
    }

    /// The bytes the next write should start from
    pub fn pending_bytes(&self) -> &Bytes {
        self.fragment.as_ref().unwrap_or(&self.data)
    }

    /// Independent copy for one recipient: fresh id, no recipients, no fragment
    pub fn for_recipient(&self) -> Packet {
        Packet {
            id: PACKET_ID.fetch_add(1, Ordering::Relaxed),
            created_at: self.created_at,
            data: self.data.clone(),
            transport: self.transport,
            priority: self.priority,
            encrypted: self.encrypted,
            marked_as_last: self.marked_as_last,
            recipients: Vec::new(),
            fragment: None,
        }
    }
}
