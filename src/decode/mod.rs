//! Decoded-packet model and the Ethernet frame decoder.
//!
//! [`DecodedPacket`] is the boundary between packet acquisition and the
//! reconnaissance engine: one struct per captured frame, holding structured
//! metadata for every protocol layer that decoded successfully. Extraction
//! and the fingerprint matcher consume these; they never touch raw bytes.

pub mod dhcp;
pub mod dns;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use pnet::packet::arp::{ArpOperations, ArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::{Ipv4Flags, Ipv4Packet};
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::{TcpFlags, TcpPacket};
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;
use pnet::packet::Packet;
use pnet::util::MacAddr;

pub use dhcp::{dhcp_opt, DhcpMessageType, DhcpMeta, DhcpOptionMeta};
pub use dns::{DnsAnswer, DnsMeta, DnsRecordType, SrvTarget};

/// TCP option kinds referenced by the fingerprint grammar.
pub mod tcp_opt {
    pub const EOL: u8 = 0;
    pub const NOP: u8 = 1;
    pub const MSS: u8 = 2;
    pub const WSCALE: u8 = 3;
    pub const SACK_PERMITTED: u8 = 4;
    pub const SACK: u8 = 5;
    pub const TIMESTAMPS: u8 = 8;
}

/// Which optional analyzers the decoder should spend time on.
///
/// IPv4/IPv6/TCP/UDP are always decoded; everything here is opt-in,
/// mirroring the per-protocol flags of the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    pub dot1q: bool,
    pub icmp4: bool,
    pub dns: bool,
    pub arp: bool,
    pub dhcp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetMeta {
    pub src: MacAddr,
    pub dst: MacAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanMeta {
    pub identifier: u16,
}

/// IPv4 header fields the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Meta {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ttl: u8,
    pub id: u16,
    pub ecn: u8,
    pub dont_fragment: bool,
    pub more_fragments: bool,
    /// Total header size in bytes, options included.
    pub header_bytes: u16,
    /// Size of the options area alone.
    pub options_len: u8,
}

/// IPv6 header fields the engine cares about. Extension headers are not
/// walked; the fixed header is all the matcher inspects for v6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Meta {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub hop_limit: u8,
    pub traffic_class: u8,
    pub flow_label: u32,
    pub header_bytes: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpMeta {
    V4(Ipv4Meta),
    V6(Ipv6Meta),
}

impl IpMeta {
    pub fn version(&self) -> u8 {
        match self {
            IpMeta::V4(_) => 4,
            IpMeta::V6(_) => 6,
        }
    }

    pub fn src(&self) -> IpAddr {
        match self {
            IpMeta::V4(v4) => IpAddr::V4(v4.src),
            IpMeta::V6(v6) => IpAddr::V6(v6.src),
        }
    }

    pub fn dst(&self) -> IpAddr {
        match self {
            IpMeta::V4(v4) => IpAddr::V4(v4.dst),
            IpMeta::V6(v6) => IpAddr::V6(v6.dst),
        }
    }

    pub fn header_bytes(&self) -> u16 {
        match self {
            IpMeta::V4(v4) => v4.header_bytes,
            IpMeta::V6(v6) => v6.header_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlagsMeta {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
    pub ns: bool,
}

/// One TCP option as it appeared on the wire. `length` is the declared
/// length byte (1 for NOP), which the fingerprint quirks check against the
/// kind's expected size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpOptionMeta {
    pub kind: u8,
    pub length: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TcpMeta {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub data_offset: u8,
    pub window: u16,
    pub urgent: u16,
    pub flags: TcpFlagsMeta,
    pub options: Vec<TcpOptionMeta>,
    /// Bytes following an explicit EOL option, up to the end of the header.
    pub padding: Vec<u8>,
    /// Set when the option list could not be walked to the end.
    pub options_malformed: bool,
    pub payload_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpMeta {
    pub src_port: u16,
    pub dst_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Icmp4Meta {
    pub icmp_type: u8,
    pub icmp_code: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOp {
    Request,
    Reply,
    Other(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpMeta {
    pub op: ArpOp,
    /// True when the protocol address space is IPv4; nothing else is
    /// interpreted.
    pub ipv4_protocol: bool,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

/// Structured view of one captured frame. Layers that were absent or not
/// decoded stay `None`.
#[derive(Debug, Clone, Default)]
pub struct DecodedPacket {
    pub ethernet: Option<EthernetMeta>,
    pub vlan: Option<VlanMeta>,
    pub ip: Option<IpMeta>,
    pub tcp: Option<TcpMeta>,
    pub udp: Option<UdpMeta>,
    pub icmp4: Option<Icmp4Meta>,
    pub arp: Option<ArpMeta>,
    pub dns: Option<DnsMeta>,
    pub dhcp: Option<DhcpMeta>,
}

impl DecodedPacket {
    pub fn src_ip(&self) -> Option<IpAddr> {
        self.ip.as_ref().map(IpMeta::src)
    }

    pub fn dst_ip(&self) -> Option<IpAddr> {
        self.ip.as_ref().map(IpMeta::dst)
    }
}

/// Result of decoding one frame. `issue` names the layer that failed to
/// decode, if any; the layers before it are still usable.
#[derive(Debug, Clone, Default)]
pub struct DecodeOutcome {
    pub packet: DecodedPacket,
    pub issue: Option<&'static str>,
}

/// Decode a raw Ethernet frame into per-layer metadata.
pub fn decode_frame(frame: &[u8], opts: &DecodeOptions) -> DecodeOutcome {
    let mut out = DecodeOutcome::default();

    let Some(eth) = EthernetPacket::new(frame) else {
        out.issue = Some("ethernet");
        return out;
    };
    out.packet.ethernet = Some(EthernetMeta {
        src: eth.get_source(),
        dst: eth.get_destination(),
    });

    let mut ethertype = eth.get_ethertype();
    let mut payload: &[u8] = &frame[EthernetPacket::minimum_packet_size()..];

    if ethertype == EtherTypes::Vlan {
        if !opts.dot1q {
            return out;
        }
        let Some(vlan) = VlanPacket::new(payload) else {
            out.issue = Some("802.1q");
            return out;
        };
        out.packet.vlan = Some(VlanMeta {
            identifier: vlan.get_vlan_identifier(),
        });
        ethertype = vlan.get_ethertype();
        payload = &payload[VlanPacket::minimum_packet_size()..];
    }

    match ethertype {
        EtherTypes::Ipv4 => decode_ipv4(payload, opts, &mut out),
        EtherTypes::Ipv6 => decode_ipv6(payload, opts, &mut out),
        EtherTypes::Arp if opts.arp => decode_arp(payload, &mut out),
        _ => {}
    }

    out
}

fn decode_ipv4(data: &[u8], opts: &DecodeOptions, out: &mut DecodeOutcome) {
    let Some(ip) = Ipv4Packet::new(data) else {
        out.issue = Some("ipv4");
        return;
    };

    let header_bytes = u16::from(ip.get_header_length()) * 4;
    let total_len = ip.get_total_length() as usize;
    if header_bytes < 20 || (header_bytes as usize) > data.len() || total_len < header_bytes as usize
    {
        out.issue = Some("ipv4");
        return;
    }

    let flags = ip.get_flags();
    out.packet.ip = Some(IpMeta::V4(Ipv4Meta {
        src: ip.get_source(),
        dst: ip.get_destination(),
        ttl: ip.get_ttl(),
        id: ip.get_identification(),
        ecn: ip.get_ecn(),
        dont_fragment: flags & Ipv4Flags::DontFragment != 0,
        more_fragments: flags & Ipv4Flags::MoreFragments != 0,
        header_bytes,
        options_len: (header_bytes - 20) as u8,
    }));

    // Trim to the IP total length; frames may carry link-layer padding.
    let end = total_len.min(data.len());
    let payload = &data[header_bytes as usize..end];
    decode_transport(ip.get_next_level_protocol(), payload, opts, out);
}

fn decode_ipv6(data: &[u8], opts: &DecodeOptions, out: &mut DecodeOutcome) {
    let Some(ip) = Ipv6Packet::new(data) else {
        out.issue = Some("ipv6");
        return;
    };

    out.packet.ip = Some(IpMeta::V6(Ipv6Meta {
        src: ip.get_source(),
        dst: ip.get_destination(),
        hop_limit: ip.get_hop_limit(),
        traffic_class: ip.get_traffic_class(),
        flow_label: ip.get_flow_label(),
        header_bytes: 40,
    }));

    let payload_len = ip.get_payload_length() as usize;
    let payload = ip.payload();
    let payload = &payload[..payload_len.min(payload.len())];
    decode_transport(ip.get_next_header(), payload, opts, out);
}

fn decode_transport(
    proto: IpNextHeaderProtocol,
    data: &[u8],
    opts: &DecodeOptions,
    out: &mut DecodeOutcome,
) {
    match proto {
        IpNextHeaderProtocols::Tcp => decode_tcp(data, out),
        IpNextHeaderProtocols::Udp => decode_udp(data, opts, out),
        IpNextHeaderProtocols::Icmp if opts.icmp4 => {
            let Some(icmp) = IcmpPacket::new(data) else {
                out.issue = Some("icmpv4");
                return;
            };
            out.packet.icmp4 = Some(Icmp4Meta {
                icmp_type: icmp.get_icmp_type().0,
                icmp_code: icmp.get_icmp_code().0,
            });
        }
        _ => {}
    }
}

fn decode_tcp(data: &[u8], out: &mut DecodeOutcome) {
    let Some(tcp) = TcpPacket::new(data) else {
        out.issue = Some("tcp");
        return;
    };

    let data_offset = tcp.get_data_offset();
    let header_len = usize::from(data_offset) * 4;
    if header_len < 20 || header_len > data.len() {
        out.issue = Some("tcp");
        return;
    }

    let flags = tcp.get_flags();
    let mut meta = TcpMeta {
        src_port: tcp.get_source(),
        dst_port: tcp.get_destination(),
        seq: tcp.get_sequence(),
        ack: tcp.get_acknowledgement(),
        data_offset,
        window: tcp.get_window(),
        urgent: tcp.get_urgent_ptr(),
        flags: TcpFlagsMeta {
            fin: flags & TcpFlags::FIN != 0,
            syn: flags & TcpFlags::SYN != 0,
            rst: flags & TcpFlags::RST != 0,
            psh: flags & TcpFlags::PSH != 0,
            ack: flags & TcpFlags::ACK != 0,
            urg: flags & TcpFlags::URG != 0,
            ece: flags & TcpFlags::ECE != 0,
            cwr: flags & TcpFlags::CWR != 0,
            ns: flags & TcpFlags::NS != 0,
        },
        payload_len: data.len() - header_len,
        ..TcpMeta::default()
    };

    walk_tcp_options(&data[20..header_len], &mut meta);
    out.packet.tcp = Some(meta);
}

/// Walk the raw TCP options area, recording each option's declared length
/// and data, the padding bytes after an explicit EOL, and whether the walk
/// hit a length that doesn't fit the header.
fn walk_tcp_options(region: &[u8], meta: &mut TcpMeta) {
    let mut i = 0;
    while i < region.len() {
        match region[i] {
            tcp_opt::EOL => {
                meta.padding = region[i + 1..].to_vec();
                return;
            }
            tcp_opt::NOP => {
                meta.options.push(TcpOptionMeta {
                    kind: tcp_opt::NOP,
                    length: 1,
                    data: Vec::new(),
                });
                i += 1;
            }
            kind => {
                if i + 1 >= region.len() {
                    meta.options_malformed = true;
                    return;
                }
                let len = region[i + 1] as usize;
                if len < 2 || i + len > region.len() {
                    meta.options_malformed = true;
                    return;
                }
                meta.options.push(TcpOptionMeta {
                    kind,
                    length: len as u8,
                    data: region[i + 2..i + len].to_vec(),
                });
                i += len;
            }
        }
    }
}

fn decode_udp(data: &[u8], opts: &DecodeOptions, out: &mut DecodeOutcome) {
    let Some(udp) = UdpPacket::new(data) else {
        out.issue = Some("udp");
        return;
    };

    let src_port = udp.get_source();
    let dst_port = udp.get_destination();
    out.packet.udp = Some(UdpMeta { src_port, dst_port });

    let payload = udp.payload();

    // DNS on 53, mDNS on 5353; DHCPv4 on 67/68.
    if opts.dns && (src_port == 53 || dst_port == 53 || src_port == 5353 || dst_port == 5353) {
        match dns::parse(payload) {
            Some(meta) => out.packet.dns = Some(meta),
            None => out.issue = Some("dns"),
        }
    } else if opts.dhcp && (dst_port == 67 || dst_port == 68 || src_port == 67 || src_port == 68) {
        match dhcp::parse(payload) {
            Some(meta) => out.packet.dhcp = Some(meta),
            None => out.issue = Some("dhcp"),
        }
    }
}

fn decode_arp(data: &[u8], out: &mut DecodeOutcome) {
    let Some(arp) = ArpPacket::new(data) else {
        out.issue = Some("arp");
        return;
    };

    let op = match arp.get_operation() {
        ArpOperations::Request => ArpOp::Request,
        ArpOperations::Reply => ArpOp::Reply,
        other => ArpOp::Other(other.0),
    };

    out.packet.arp = Some(ArpMeta {
        op,
        ipv4_protocol: arp.get_protocol_type() == EtherTypes::Ipv4,
        sender_mac: arp.get_sender_hw_addr(),
        sender_ip: arp.get_sender_proto_addr(),
        target_mac: arp.get_target_hw_addr(),
        target_ip: arp.get_target_proto_addr(),
    });
}
