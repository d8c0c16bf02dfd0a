//! Tracking of subnets learned from DHCP traffic.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use log::{debug, warn};

/// The set of subnets observed so far, keyed by their canonical CIDR text.
///
/// Prefix lengths are kept sorted descending so lookups try the most
/// specific mask first.
#[derive(Debug, Default)]
pub struct KnownSubnets {
    subnets: HashMap<String, Ipv4Network>,
    sizes: Vec<u8>,
}

impl KnownSubnets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subnet. A subnet that is less specific than one already
    /// known is dropped: it is probably a default-mask guess and would
    /// blur the results. The reverse nesting is kept but logged, since it
    /// may mean earlier answers used the wrong mask.
    pub fn add(&mut self, subnet: Ipv4Network) {
        // Canonicalize so the key and containment checks use the network
        // address, not whatever host bits the caller left set.
        let Ok(subnet) = Ipv4Network::new(subnet.network(), subnet.prefix()) else {
            return;
        };
        let key = subnet.to_string();

        if self.subnets.contains_key(&key) {
            return;
        }

        debug!("adding subnet: {key}");

        for other in self.subnets.values() {
            if subnet.contains(other.network()) {
                debug!("subnets are nested: {subnet} >> {other}");
                return;
            }
            if other.contains(subnet.network()) {
                warn!("subnets are nested: {subnet} << {other}");
            }
        }

        let prefix = subnet.prefix();
        self.subnets.insert(key, subnet);

        match self.sizes.iter().position(|&v| v <= prefix) {
            Some(i) if self.sizes[i] == prefix => {}
            Some(i) => self.sizes.insert(i, prefix),
            None => self.sizes.push(prefix),
        }
    }

    /// Find the known subnet containing `ip`, trying the most specific
    /// known prefix length first.
    pub fn subnet_of(&self, ip: Ipv4Addr) -> Option<Ipv4Network> {
        for &prefix in &self.sizes {
            let Ok(masked) = Ipv4Network::new(ip, prefix) else {
                continue;
            };
            let Ok(candidate) = Ipv4Network::new(masked.network(), prefix) else {
                continue;
            };
            if self.subnets.contains_key(&candidate.to_string()) {
                return Some(candidate);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.subnets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subnets.is_empty()
    }
}
