//! Error types for queues, connection filters and session I/O.

use crate::packet::ResponsePriority;
use std::net::IpAddr;
use thiserror::Error;

/// Reasons a packet queue refused a packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketQueueError {
    /// The queue is at capacity and rejects new packets
    #[error("packet queue full (capacity {0})")]
    Full(usize),

    /// The admission policy shed the packet
    #[error("queue policy refused {priority:?} packet at {used_percent}% usage")]
    PolicyViolation {
        /// Priority of the refused packet
        priority: ResponsePriority,
        /// Fill level when it was refused
        used_percent: u32,
    },
}

/// Reasons a connection filter refused an address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The address is on the ban list
    #[error("address {0} is banned")]
    Banned(IpAddr),

    /// The per-address connection limit is reached
    #[error("address {addr} already holds {count} connections")]
    TooManyConnections {
        /// Remote address
        addr: IpAddr,
        /// Connections it already holds
        count: usize,
    },
}

/// Session level I/O failures
#[derive(Error, Debug)]
pub enum SessionError {
    /// A datagram send was attempted before a UDP address was bound
    #[error("session {0} has no datagram channel bound")]
    NoDatagramChannel(u64),

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
