//! Turning decoded packets into observation events.
//!
//! Extraction is a pure function of the decoded packet and the signature
//! database; correlation across packets happens later in the inference
//! engine.

use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::Ipv4Network;
use log::debug;
use pnet::util::MacAddr;

use crate::decode::{
    dhcp_opt, ArpOp, DecodedPacket, DhcpMessageType, DhcpMeta, DnsMeta, DnsRecordType, IpMeta,
    TcpMeta,
};
use crate::event::{Event, EventKind, InternetLayer, TransportLayer};
use crate::fingerprint::SignatureDb;

/// Extract the observation events a single packet supports, in a fixed
/// order per packet.
pub fn extract(packet: &DecodedPacket, sigs: &SignatureDb) -> Vec<Event> {
    let mut events = Vec::new();

    if let Some(arp) = &packet.arp {
        extract_arp(arp, &mut events);
    }
    if let (Some(ip), Some(tcp)) = (&packet.ip, &packet.tcp) {
        extract_tcp(ip, tcp, sigs, &mut events);
    }
    if let (Some(ip), Some(dns)) = (&packet.ip, &packet.dns) {
        extract_dns(ip, dns, &mut events);
    }
    if let Some(dhcp) = &packet.dhcp {
        events.push(extract_dhcp(dhcp));
    }

    events
}

fn extract_arp(arp: &crate::decode::ArpMeta, events: &mut Vec<Event>) {
    // Only IPv4 over ethernet carries addresses worth pairing.
    if !arp.ipv4_protocol {
        return;
    }

    if arp.op == ArpOp::Reply
        && !arp.target_ip.is_unspecified()
        && arp.target_mac != MacAddr::zero()
    {
        events.push(Event::new(EventKind::Neighbor {
            mac: arp.target_mac,
            ip: IpAddr::V4(arp.target_ip),
            router: false,
        }));
    }

    if !arp.sender_ip.is_unspecified() && arp.sender_mac != MacAddr::zero() {
        events.push(Event::new(EventKind::Neighbor {
            mac: arp.sender_mac,
            ip: IpAddr::V4(arp.sender_ip),
            router: false,
        }));
    }
}

fn extract_tcp(ip: &IpMeta, tcp: &TcpMeta, sigs: &SignatureDb, events: &mut Vec<Event>) {
    // OS detection on SYN packets using the fingerprint database.
    if tcp.flags.syn {
        if let Some((sig, fuzzy)) = sigs.best_match(ip, tcp) {
            events.push(Event::new(EventKind::Os {
                ip: ip.src(),
                label: sig.label.clone(),
                fuzzy,
            }));
        }
    }

    // A SYN+ACK names a listening service on the sender, assuming no one
    // is hand-crafting packets.
    if tcp.flags.syn && tcp.flags.ack {
        let internet = match ip.version() {
            4 => InternetLayer::Ipv4,
            _ => InternetLayer::Ipv6,
        };
        events.push(Event::new(EventKind::Service {
            ip: ip.src(),
            internet,
            transport: TransportLayer::Tcp,
            port: tcp.src_port,
        }));
    }
}

fn extract_dns(ip: &IpMeta, dns: &DnsMeta, events: &mut Vec<Event>) {
    if !dns.response {
        let nameserver = ip.dst();
        // mDNS queries go to multicast, which names no server.
        if !is_link_local_multicast(nameserver) {
            events.push(Event::new(EventKind::Nameserver {
                ip: ip.src(),
                nameserver,
            }));
        }
        return;
    }

    for answer in &dns.answers {
        match answer.record_type {
            DnsRecordType::A | DnsRecordType::Aaaa | DnsRecordType::Mx | DnsRecordType::Ns => {
                let Some(addr) = answer.ip else {
                    // MX and NS answers carry no address of their own.
                    debug!("skipping {} answer for {} without an address",
                        answer.record_type, answer.name);
                    continue;
                };
                events.push(Event::new(EventKind::Hostname {
                    ip: addr,
                    // Hostnames are case insensitive (RFC 4343)
                    name: answer.name.to_lowercase(),
                    record_type: answer.record_type,
                }));
            }
            DnsRecordType::Srv => {
                if let Some(srv) = &answer.srv {
                    events.push(Event::new(EventKind::AdvertisedService {
                        service: answer.name.clone(),
                        hostname: srv.name.clone(),
                        port: srv.port,
                    }));
                }
            }
            DnsRecordType::Other(_) => {}
        }
    }
}

fn extract_dhcp(dhcp: &DhcpMeta) -> Event {
    let mut msg_type = DhcpMessageType::Unspecified;
    let mut client_ip = dhcp.client_ip;
    let mut requested_ip = None;
    let mut subnet: Option<Ipv4Network> = None;
    let mut hostname: Option<String> = None;
    let mut domain: Option<String> = None;
    let mut nameservers = Vec::new();
    let mut router_ips: Vec<Ipv4Addr> = Vec::new();

    // Options are interpreted in wire order; a later subnet mask option
    // overrides the default-mask guess made at the message type option.
    for option in &dhcp.options {
        match option.code {
            dhcp_opt::MESSAGE_TYPE => {
                if option.data.len() != 1 {
                    continue;
                }
                msg_type = DhcpMessageType::from_code(option.data[0]);

                if matches!(msg_type, DhcpMessageType::Offer | DhcpMessageType::Ack) {
                    if client_ip.is_unspecified() {
                        client_ip = dhcp.your_ip;
                    }

                    // Servers have been seen setting neither address, so
                    // check again before guessing a subnet. The classful
                    // default mask is what dhcp clients fall back to when
                    // no subnet option arrives.
                    if !client_ip.is_unspecified() {
                        subnet = default_class_prefix(client_ip)
                            .and_then(|prefix| Ipv4Network::new(client_ip, prefix).ok())
                            .and_then(canonical);
                    }
                }
            }
            dhcp_opt::SUBNET_MASK => {
                if let Ok(data) = <[u8; 4]>::try_from(option.data.as_slice()) {
                    subnet = Ipv4Network::with_netmask(client_ip, Ipv4Addr::from(data))
                        .ok()
                        .and_then(canonical);
                }
            }
            dhcp_opt::ROUTER => {
                for chunk in option.data.chunks_exact(4) {
                    router_ips.push(Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]));
                }
            }
            dhcp_opt::DNS => {
                for chunk in option.data.chunks_exact(4) {
                    nameservers.push(Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]));
                }
            }
            dhcp_opt::HOSTNAME => {
                // Hostnames are case insensitive (RFC 4343)
                hostname = Some(String::from_utf8_lossy(&option.data).to_lowercase());
            }
            dhcp_opt::DOMAIN_NAME => {
                domain = Some(String::from_utf8_lossy(&option.data).into_owned());
            }
            dhcp_opt::REQUESTED_IP => {
                if let Ok(data) = <[u8; 4]>::try_from(option.data.as_slice()) {
                    requested_ip = Some(IpAddr::V4(Ipv4Addr::from(data)));
                }
            }
            _ => {}
        }
    }

    // Patch the routers with the resolved subnet mask.
    let prefix = subnet.map_or(32, |s| s.prefix());
    let routers = router_ips
        .into_iter()
        .filter_map(|ip| Ipv4Network::new(ip, prefix).ok())
        .collect();

    // Join hostname and domain into a FQDN when the hostname is bare.
    if let (Some(h), Some(d)) = (&mut hostname, &domain) {
        if !h.is_empty() && !d.is_empty() && !h.contains('.') {
            h.push('.');
            h.push_str(d);
        }
    }

    Event::new(EventKind::Dhcp {
        msg_type,
        mac: dhcp.client_mac,
        client_ip: IpAddr::V4(client_ip),
        requested_ip,
        subnet,
        hostname,
        domain,
        nameservers,
        routers,
    })
}

/// Rebuild a network from its network address so host bits never leak
/// into keys or hashes.
fn canonical(net: Ipv4Network) -> Option<Ipv4Network> {
    Ipv4Network::new(net.network(), net.prefix()).ok()
}

/// Classful default prefix length, as dhcp clients use when no subnet
/// mask is offered. Class D and E addresses have none.
fn default_class_prefix(ip: Ipv4Addr) -> Option<u8> {
    match ip.octets()[0] {
        0..=127 => Some(8),
        128..=191 => Some(16),
        192..=223 => Some(24),
        _ => None,
    }
}

fn is_link_local_multicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 224 && o[1] == 0 && o[2] == 0
        }
        IpAddr::V6(v6) => {
            let o = v6.octets();
            o[0] == 0xff && o[1] & 0x0f == 0x02
        }
    }
}
