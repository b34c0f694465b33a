//! Admission control for incoming TCP connections.

use crate::error::FilterError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Default cap on simultaneous connections from one address
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: usize = 10;

/// Decides which remote addresses may connect
pub trait ConnectionFilter: Send + Sync {
    /// Check `addr` and, if accepted, count it as a live connection
    fn validate_and_add(&self, addr: IpAddr) -> Result<(), FilterError>;

    /// Release a connection previously counted by `validate_and_add`
    fn remove_address(&self, addr: IpAddr);

    /// Refuse all future connections from `addr`
    fn ban(&self, addr: IpAddr);

    /// Lift a ban
    fn unban(&self, addr: IpAddr);

    /// Currently banned addresses
    fn banned_addresses(&self) -> Vec<IpAddr>;
}

/// Ban list plus a per-address connection cap
#[derive(Debug)]
pub struct DefaultConnectionFilter {
    banned: RwLock<HashSet<IpAddr>>,
    counts: DashMap<IpAddr, usize>,
    max_connections_per_ip: usize,
}

impl Default for DefaultConnectionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS_PER_IP)
    }
}

impl DefaultConnectionFilter {
    /// Create a filter allowing `max_connections_per_ip` connections per address
    pub fn new(max_connections_per_ip: usize) -> Self {
        Self {
            banned: RwLock::new(HashSet::new()),
            counts: DashMap::new(),
            max_connections_per_ip,
        }
    }

    /// Live connections counted for `addr`
    pub fn connection_count(&self, addr: IpAddr) -> usize {
        self.counts.get(&addr).map(|c| *c).unwrap_or(0)
    }

    fn is_banned(&self, addr: &IpAddr) -> bool {
        self.banned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(addr)
    }
}

impl ConnectionFilter for DefaultConnectionFilter {
    fn validate_and_add(&self, addr: IpAddr) -> Result<(), FilterError> {
        if self.is_banned(&addr) {
            debug!(%addr, "Refused banned address");
            return Err(FilterError::Banned(addr));
        }

        let mut count = self.counts.entry(addr).or_insert(0);
        if *count >= self.max_connections_per_ip {
            warn!(%addr, count = *count, "Too many connections from address");
            return Err(FilterError::TooManyConnections { addr, count: *count });
        }
        *count += 1;
        Ok(())
    }

    fn remove_address(&self, addr: IpAddr) {
        if let Entry::Occupied(mut entry) = self.counts.entry(addr) {
            if *entry.get() <= 1 {
                entry.remove();
            } else {
                *entry.get_mut() -= 1;
            }
        }
    }

    fn ban(&self, addr: IpAddr) {
        self.banned
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(addr);
    }

    fn unban(&self, addr: IpAddr) {
        self.banned
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&addr);
    }

    fn banned_addresses(&self) -> Vec<IpAddr> {
        self.banned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_per_address_cap() {
        let filter = DefaultConnectionFilter::new(2);
        filter.validate_and_add(LOCAL).unwrap();
        filter.validate_and_add(LOCAL).unwrap();

        assert_eq!(
            filter.validate_and_add(LOCAL),
            Err(FilterError::TooManyConnections { addr: LOCAL, count: 2 })
        );

        filter.remove_address(LOCAL);
        assert_eq!(filter.connection_count(LOCAL), 1);
        filter.validate_and_add(LOCAL).unwrap();
    }

    #[test]
    fn test_count_entry_removed_at_zero() {
        let filter = DefaultConnectionFilter::default();
        filter.validate_and_add(LOCAL).unwrap();
        filter.remove_address(LOCAL);
        filter.remove_address(LOCAL);
        assert_eq!(filter.connection_count(LOCAL), 0);
        assert!(filter.counts.is_empty());
    }

    #[test]
    fn test_ban_and_unban() {
        let filter = DefaultConnectionFilter::default();
        filter.ban(LOCAL);
        assert_eq!(filter.validate_and_add(LOCAL), Err(FilterError::Banned(LOCAL)));
        assert_eq!(filter.banned_addresses(), vec![LOCAL]);

        filter.unban(LOCAL);
        assert!(filter.validate_and_add(LOCAL).is_ok());
        assert!(filter.banned_addresses().is_empty());
    }
}
