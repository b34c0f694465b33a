//! Extracting the session id a first UDP datagram claims to belong to.

use zero_wire::ZeroElement;

/// Map key carrying the convey id
pub const CONVEY_ID_KEY: &str = "c";
/// Map key carrying the payload
pub const CONVEY_DATA_KEY: &str = "d";

/// Finds the session id carried by a datagram from an unbound address
pub trait DatagramConveyPolicy: Send + Sync {
    /// Session id claimed by `message`, if it carries one
    fn convey_id(&self, message: &ZeroElement) -> Option<u64>;
}

/// Accepts `{"c": <int|long>, "d": {...}}` maps, or arrays whose last
/// element is the id
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConveyPolicy;

impl DatagramConveyPolicy for DefaultConveyPolicy {
    fn convey_id(&self, message: &ZeroElement) -> Option<u64> {
        let id = match message {
            ZeroElement::Map(map) => {
                map.get_map(CONVEY_DATA_KEY)?;
                map.get(CONVEY_ID_KEY)?.as_i64()?
            }
            ZeroElement::Array(array) => array.last()?.as_i64()?,
            _ => return None,
        };
        u64::try_from(id).ok()
    }
}
