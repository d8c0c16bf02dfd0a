//! Observation events produced by packet extraction.
//!
//! Each event carries a weight assigned by the dedup stage and a content
//! hash over its identifying fields. Two events with the same hash are
//! treated as the same observation, so the hash deliberately skips fields
//! that do not identify the observation (a service's transport layer, for
//! example).

use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::Ipv4Network;
use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};

use crate::decode::{DhcpMessageType, DnsRecordType};

/// Internet layer a service was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InternetLayer {
    Ipv4,
    Ipv6,
}

/// Transport layer a service was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportLayer {
    Tcp,
    Udp,
}

/// What was observed. One variant per kind of evidence the inference
/// engine knows how to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A MAC/IP pairing seen on the link, from ARP or DHCP.
    Neighbor {
        mac: MacAddr,
        ip: IpAddr,
        router: bool,
    },
    /// A host acting as a gateway for the given prefixes.
    Router {
        mac: Option<MacAddr>,
        ip: IpAddr,
        prefixes: Vec<Ipv4Network>,
    },
    /// A host using the given nameserver.
    Nameserver { ip: IpAddr, nameserver: IpAddr },
    /// A name associated with an address, from a DNS answer.
    Hostname {
        ip: IpAddr,
        name: String,
        record_type: DnsRecordType,
    },
    /// A service advertised over mDNS/DNS-SD SRV records.
    AdvertisedService {
        service: String,
        hostname: String,
        port: u16,
    },
    /// A listening port confirmed by a SYN/ACK.
    Service {
        ip: IpAddr,
        internet: InternetLayer,
        transport: TransportLayer,
        port: u16,
    },
    /// An operating system guess from a matched TCP signature.
    Os {
        ip: IpAddr,
        label: String,
        fuzzy: bool,
    },
    /// A DHCP exchange message with its interpreted options.
    Dhcp {
        msg_type: DhcpMessageType,
        mac: MacAddr,
        client_ip: IpAddr,
        requested_ip: Option<IpAddr>,
        subnet: Option<Ipv4Network>,
        hostname: Option<String>,
        domain: Option<String>,
        nameservers: Vec<Ipv4Addr>,
        routers: Vec<Ipv4Network>,
    },
}

/// A weighted observation. The weight starts at 1 and is raised by the
/// dedup stage to the number of identical observations it absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub weight: u64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Event { weight: 1, kind }
    }

    /// Content hash over the event's identifying fields.
    pub fn content_hash(&self) -> u64 {
        let mut h = Fnv64::new();
        match &self.kind {
            EventKind::Neighbor { mac, ip, router } => {
                h.write_mac(*mac);
                h.write_ip(*ip);
                h.write_bool(*router);
            }
            EventKind::Router { mac, ip, prefixes } => {
                h.write_ip(*ip);
                if let Some(mac) = mac {
                    h.write_mac(*mac);
                }
                for prefix in prefixes {
                    h.write_network(*prefix);
                }
            }
            EventKind::Nameserver { ip, nameserver } => {
                h.write_ip(*ip);
                h.write_ip(*nameserver);
            }
            EventKind::Hostname {
                ip,
                name,
                record_type,
            } => {
                h.write_ip(*ip);
                h.write(name.as_bytes());
                h.write(&record_type.code().to_le_bytes());
            }
            EventKind::AdvertisedService {
                service,
                hostname,
                port,
            } => {
                h.write(service.as_bytes());
                h.write(hostname.as_bytes());
                h.write(&port.to_le_bytes());
            }
            // The internet and transport layers ride along but do not
            // identify the observation.
            EventKind::Service { ip, port, .. } => {
                h.write_ip(*ip);
                h.write(&port.to_le_bytes());
            }
            EventKind::Os { ip, label, fuzzy } => {
                h.write_ip(*ip);
                h.write(label.as_bytes());
                h.write_bool(*fuzzy);
            }
            EventKind::Dhcp {
                msg_type,
                mac,
                client_ip,
                requested_ip,
                subnet,
                hostname,
                domain,
                nameservers,
                routers,
            } => {
                h.write(&[msg_type.code()]);
                h.write_mac(*mac);
                h.write_ip(*client_ip);
                if let Some(ip) = requested_ip {
                    h.write_ip(*ip);
                }
                if let Some(subnet) = subnet {
                    h.write_network(*subnet);
                }
                if let Some(hostname) = hostname {
                    h.write(hostname.as_bytes());
                }
                if let Some(domain) = domain {
                    h.write(domain.as_bytes());
                }
                for ns in nameservers {
                    h.write(&ns.octets());
                }
                for router in routers {
                    h.write_network(*router);
                }
            }
        }
        h.finish()
    }
}

/// FNV-1a 64-bit hasher for event content.
struct Fnv64(u64);

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

impl Fnv64 {
    fn new() -> Self {
        Fnv64(FNV_OFFSET)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_ip(&mut self, ip: IpAddr) {
        match ip {
            IpAddr::V4(v4) => self.write(&v4.octets()),
            IpAddr::V6(v6) => self.write(&v6.octets()),
        }
    }

    fn write_mac(&mut self, mac: MacAddr) {
        self.write(&mac.octets());
    }

    fn write_network(&mut self, net: Ipv4Network) {
        self.write(&net.network().octets());
        self.write(&net.mask().octets());
    }

    fn write_bool(&mut self, val: bool) {
        self.write(&[val as u8]);
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
