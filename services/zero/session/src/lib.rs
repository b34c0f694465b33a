//! Session registry, packet queues, and connection association for Zero.
//!
//! This crate holds everything the engine's reader and writer workers share
//! about a peer: the [`Session`] itself, its bounded outbound
//! [`PacketQueue`], the [`SessionManager`] registry that indexes sessions by
//! id, poll token and UDP address, the [`ConnectionFilter`] consulted on
//! accept, and the [`EventContext`] through which business logic is told
//! about connections and messages.
//!
//! ## Association
//!
//! ```text
//!   NONE --CAS--> DOING --resolved--> DONE --close--> NONE
//!                   |
//!                   +--rejected--> NONE (closed, BadRequest)
//! ```
//!
//! [`AssociationProcessor`] drives these transitions on top of the event
//! context and guarantees an identity is bound to at most one live session.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zero_session::{
//!     AssociationProcessor, Collaborator, DefaultConnectionFilter, EventContext, Session,
//!     SessionConfig, SessionManager,
//! };
//! use zero_wire::ZeroElement;
//!
//! struct Echo;
//!
//! impl Collaborator for Echo {
//!     fn resolve_identity(&self, _: &Arc<Session>, msg: &ZeroElement) -> Option<String> {
//!         msg.as_map()?.get_str("u").map(str::to_string)
//!     }
//!
//!     fn on_message(&self, identity: &str, _: &Arc<Session>, msg: &ZeroElement) {
//!         println!("{identity}: {msg:?}");
//!     }
//! }
//!
//! let events = Arc::new(EventContext::new());
//! let manager = Arc::new(SessionManager::new(
//!     SessionConfig::default(),
//!     Arc::new(DefaultConnectionFilter::default()),
//!     events.clone(),
//! ));
//! events.subscribe(Arc::new(AssociationProcessor::new(manager, Arc::new(Echo))));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod convey;
pub mod error;
pub mod event;
pub mod filter;
pub mod manager;
pub mod packet;
pub mod processor;
pub mod queue;
pub mod session;
pub mod transport;

// Re-export main types
pub use convey::{DatagramConveyPolicy, DefaultConveyPolicy};
pub use error::{FilterError, PacketQueueError, SessionError};
pub use event::{EventContext, SessionEventHandler};
pub use filter::{ConnectionFilter, DefaultConnectionFilter, DEFAULT_MAX_CONNECTIONS_PER_IP};
pub use manager::{SessionManager, WAKER_TOKEN};
pub use packet::{Packet, ResponsePriority};
pub use processor::{AssociationProcessor, Collaborator, STALE_PREFIX};
pub use queue::{OverflowPolicy, PacketQueue, PacketQueuePolicy, PriorityQueuePolicy};
pub use session::{
    AssociationState, DisconnectMode, Session, SessionConfig, SessionStats, TransportType,
    ORPHAN_THRESHOLD,
};
pub use transport::{DatagramChannel, SocketChannel};
