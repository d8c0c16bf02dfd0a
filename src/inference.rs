//! The inference engine: folds the weighted event stream into per-host
//! evidence records.
//!
//! Hosts live in an arena indexed by two maps, `by_ip` and `by_mac`, so
//! several keys can point at the same record. Identity promotion (an IP
//! turning out to belong to a MAC-tracked host) repoints the IP entry; the
//! superseded external record stays allocated but unreachable.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use log::debug;
use pnet::util::MacAddr;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::decode::DhcpMessageType;
use crate::event::{Event, EventKind};
use crate::host::{Host, HostProjection, HostnameRecord, OsGuess, ServiceEndpoint};
use crate::subnets::KnownSubnets;

#[derive(Debug, Default)]
pub struct InferenceEngine {
    hosts: Vec<Host>,
    by_ip: HashMap<String, usize>,
    by_mac: HashMap<String, usize>,

    pub subnets: KnownSubnets,

    // Advertised services arrive before the SRV target resolves to an
    // address, so they park here keyed by hostname until a matching
    // hostname event claims them.
    pending_services: HashMap<String, Vec<String>>,
}

impl InferenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find or create the host tracked under `ip`. A host created here is
    /// external until MAC evidence arrives.
    fn host_by_ip(&mut self, ip: IpAddr) -> usize {
        let key = ip.to_string();
        if let Some(&idx) = self.by_ip.get(&key) {
            return idx;
        }

        let mut host = Host::new();
        host.external = true;
        host.ips.insert(ip);

        let idx = self.hosts.len();
        self.hosts.push(host);
        self.by_ip.insert(key, idx);
        idx
    }

    /// Find or create the host tracked under `mac`.
    fn host_by_mac(&mut self, mac: MacAddr) -> usize {
        let key = mac.to_string();
        if let Some(&idx) = self.by_mac.get(&key) {
            return idx;
        }

        let mut host = Host::new();
        host.macs.insert(mac);

        let idx = self.hosts.len();
        self.hosts.push(host);
        self.by_mac.insert(key, idx);
        idx
    }

    /// Apply one weighted event to the host state.
    pub fn apply(&mut self, event: Event) {
        let weight = event.weight;

        match event.kind {
            EventKind::Service {
                ip,
                internet,
                transport,
                port,
            } => {
                let idx = self.host_by_ip(ip);
                self.hosts[idx].services.insert(ServiceEndpoint {
                    internet,
                    transport,
                    port,
                });
            }
            EventKind::AdvertisedService {
                service, hostname, ..
            } => {
                self.pending_services.entry(hostname).or_default().push(service);
            }
            EventKind::Hostname {
                ip,
                name,
                record_type,
            } => {
                let idx = self.host_by_ip(ip);
                self.hosts[idx].hostnames.insert(HostnameRecord {
                    name: name.clone(),
                    record_type,
                });

                // Claim any advertised services parked under this name.
                if let Some(services) = self.pending_services.remove(&name) {
                    self.hosts[idx].advertised_services.extend(services);
                }
            }
            EventKind::Nameserver { ip, nameserver } => {
                let idx = self.host_by_ip(ip);
                self.hosts[idx].nameservers.insert(nameserver.to_string());
            }
            EventKind::Os { ip, label, fuzzy } => {
                let idx = self.host_by_ip(ip);
                *self.hosts[idx]
                    .os
                    .entry(OsGuess { label, fuzzy })
                    .or_default() += weight;
            }
            EventKind::Dhcp {
                msg_type,
                mac,
                client_ip,
                subnet,
                hostname,
                nameservers,
                routers,
                ..
            } => match msg_type {
                DhcpMessageType::Discover => {
                    // A new machine announcing itself; start tracking it.
                    self.host_by_mac(mac);
                }
                DhcpMessageType::Ack | DhcpMessageType::Inform => {
                    let idx = self.host_by_mac(mac);

                    if let Some(name) = hostname.filter(|n| !n.is_empty()) {
                        self.hosts[idx].hostnames.insert(HostnameRecord {
                            name,
                            record_type: crate::decode::DnsRecordType::A,
                        });
                    }
                    for ns in nameservers {
                        self.hosts[idx].nameservers.insert(ns.to_string());
                    }
                    for router in &routers {
                        self.hosts[idx].routers.insert(router.to_string());
                    }
                    // The offered gateways are hosts in their own right.
                    for router in routers {
                        let r_idx = self.host_by_ip(IpAddr::V4(router.ip()));
                        self.hosts[r_idx].router = true;
                    }

                    if let Some(subnet) = subnet {
                        self.subnets.add(subnet);
                    }

                    if !client_ip.is_unspecified() {
                        self.hosts[idx].ips.insert(client_ip);
                        // Identity promotion: the IP now resolves to this
                        // MAC-tracked host.
                        self.by_ip.insert(client_ip.to_string(), idx);
                    }
                }
                _ => {}
            },
            EventKind::Neighbor { mac, ip, .. } => {
                let idx = self.host_by_mac(mac);
                self.hosts[idx].ips.insert(ip);
                self.by_ip.insert(ip.to_string(), idx);
            }
            EventKind::Router { mac, ip, prefixes } => {
                if let Some(mac) = mac {
                    let idx = self.host_by_mac(mac);
                    self.hosts[idx].ips.insert(ip);
                    self.hosts[idx].router = true;
                }
                for prefix in prefixes {
                    self.subnets.add(prefix);
                }
            }
        }
    }

    /// Drain the event channel, applying each event until the senders
    /// hang up.
    pub async fn run(&mut self, mut rx: UnboundedReceiver<Event>) {
        while let Some(event) = rx.recv().await {
            self.apply(event);
        }
        debug!(
            "inference finished: {} hosts, {} subnets",
            self.host_count(),
            self.subnets.len()
        );
    }

    pub fn host_count(&self) -> usize {
        let mut seen: HashSet<usize> = self.by_mac.values().copied().collect();
        seen.extend(
            self.by_ip
                .values()
                .copied()
                .filter(|&idx| self.hosts[idx].external),
        );
        seen.len()
    }

    /// Enumerate the final host projections: MAC-tracked hosts first (each
    /// once, even when several keys alias it), then the still-external
    /// IP-tracked hosts. Keys are visited in sorted order so the output is
    /// deterministic.
    pub fn projections(&self) -> Vec<HostProjection> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        let mut mac_keys: Vec<&String> = self.by_mac.keys().collect();
        mac_keys.sort();
        for key in mac_keys {
            let idx = self.by_mac[key];
            if seen.insert(idx) {
                out.push(self.hosts[idx].projection());
            }
        }

        let mut ip_keys: Vec<&String> = self.by_ip.keys().collect();
        ip_keys.sort();
        for key in ip_keys {
            let idx = self.by_ip[key];
            if self.hosts[idx].external && seen.insert(idx) {
                out.push(self.hosts[idx].projection());
            }
        }

        out
    }
}
