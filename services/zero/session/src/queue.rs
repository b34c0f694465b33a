//! Bounded per-session outbound packet queue.
//!
//! Many producers, one consumer (the session's writer worker). Admission,
//! eviction and removal all happen under one lock, so the capacity and
//! policy checks are atomic with respect to concurrent producers.

use crate::error::PacketQueueError;
use crate::packet::{Packet, ResponsePriority};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Behaviour when a packet arrives at a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the incoming packet
    #[default]
    RejectNew,
    /// Evict the oldest packet that is not being written.
    ///
    /// The queue never rejects on fill level under this policy, so any
    /// installed [`PacketQueuePolicy`] is not consulted.
    DropOldest,
}

/// Admission check run before the capacity check
pub trait PacketQueuePolicy: Send + Sync {
    /// Decide whether `packet` may enter a queue that is `used_percent` full
    fn admit(&self, packet: &Packet, used_percent: f32) -> bool;
}

/// Sheds low-priority packets as the queue fills:
/// from 75% only Normal and above are admitted, from 90% only Guaranteed and above.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityQueuePolicy;

impl PacketQueuePolicy for PriorityQueuePolicy {
    fn admit(&self, packet: &Packet, used_percent: f32) -> bool {
        let priority = packet.priority();
        if used_percent >= 90.0 {
            priority >= ResponsePriority::Guaranteed
        } else if used_percent >= 75.0 {
            priority >= ResponsePriority::Normal
        } else {
            true
        }
    }
}

#[derive(Default)]
struct Inner {
    packets: VecDeque<Packet>,
    // Id of the head packet while the writer holds a partial write of it
    in_flight: Option<u64>,
}

/// Thread-safe bounded FIFO of outbound packets
pub struct PacketQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    overflow: OverflowPolicy,
    policy: Option<Arc<dyn PacketQueuePolicy>>,
}

impl fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketQueue")
            .field("size", &self.size())
            .field("capacity", &self.capacity)
            .field("overflow", &self.overflow)
            .finish()
    }
}

impl PacketQueue {
    /// Create a queue holding at most `capacity` packets
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            overflow,
            policy: None,
        }
    }

    /// Install an admission policy.
    ///
    /// Only consulted under [`OverflowPolicy::RejectNew`]; a
    /// [`OverflowPolicy::DropOldest`] queue makes room by eviction instead.
    pub fn with_policy(mut self, policy: Arc<dyn PacketQueuePolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clone of the head packet
    pub fn peek(&self) -> Option<Packet> {
        self.lock().packets.front().cloned()
    }

    /// Clone of the head packet, marking it as being written so that
    /// [`OverflowPolicy::DropOldest`] never evicts it
    pub fn peek_for_write(&self) -> Option<Packet> {
        let mut inner = self.lock();
        let head = inner.packets.front().cloned();
        inner.in_flight = head.as_ref().map(Packet::id);
        head
    }

    /// Remove and return the head packet
    pub fn take(&self) -> Option<Packet> {
        let mut inner = self.lock();
        inner.in_flight = None;
        inner.packets.pop_front()
    }

    /// Remove the head packet only if it is still packet `id`
    pub fn take_if(&self, id: u64) -> Option<Packet> {
        let mut inner = self.lock();
        if inner.packets.front().map(Packet::id) != Some(id) {
            return None;
        }
        inner.in_flight = None;
        inner.packets.pop_front()
    }

    /// Record the unwritten tail of head packet `id`
    pub fn set_fragment(&self, id: u64, fragment: Bytes) -> bool {
        let mut inner = self.lock();
        match inner.packets.front_mut() {
            Some(head) if head.id() == id => {
                head.set_fragment(fragment);
                inner.in_flight = Some(id);
                true
            }
            _ => false,
        }
    }

    /// Whether the queue holds no packets
    pub fn is_empty(&self) -> bool {
        self.lock().packets.is_empty()
    }

    /// Whether the queue is at capacity
    pub fn is_full(&self) -> bool {
        self.lock().packets.len() >= self.capacity
    }

    /// Number of queued packets
    pub fn size(&self) -> usize {
        self.lock().packets.len()
    }

    /// Maximum number of packets
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill level in percent
    pub fn percentage_used(&self) -> f32 {
        percentage(self.lock().packets.len(), self.capacity)
    }

    /// Admit a packet.
    ///
    /// Returns the packet evicted to make room under
    /// [`OverflowPolicy::DropOldest`], if any.
    pub fn put(&self, packet: Packet) -> Result<Option<Packet>, PacketQueueError> {
        let mut inner = self.lock();
        let used = percentage(inner.packets.len(), self.capacity);

        let shedding = match self.overflow {
            OverflowPolicy::RejectNew => self.policy.as_ref(),
            OverflowPolicy::DropOldest => None,
        };
        if let Some(policy) = shedding {
            if !policy.admit(&packet, used) {
                return Err(PacketQueueError::PolicyViolation {
                    priority: packet.priority(),
                    used_percent: used as u32,
                });
            }
        }

        let mut evicted = None;
        if inner.packets.len() >= self.capacity {
            match self.overflow {
                OverflowPolicy::RejectNew => return Err(PacketQueueError::Full(self.capacity)),
                OverflowPolicy::DropOldest => {
                    let skip = usize::from(inner.in_flight.is_some());
                    if inner.packets.len() <= skip {
                        return Err(PacketQueueError::Full(self.capacity));
                    }
                    evicted = inner.packets.remove(skip);
                }
            }
        }

        inner.packets.push_back(packet);
        Ok(evicted)
    }

    /// Discard every queued packet; returns how many were discarded
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        inner.in_flight = None;
        let count = inner.packets.len();
        inner.packets.clear();
        count
    }
}

fn percentage(len: usize, capacity: usize) -> f32 {
    len as f32 * 100.0 / capacity as f32
}
