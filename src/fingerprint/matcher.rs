//! Matching decoded SYN packets against TCP signatures.

use crate::decode::{tcp_opt, IpMeta, TcpMeta};
use crate::fingerprint::quirk;
use crate::fingerprint::signature::{TcpSignature, WindowSpec};

/// Minimum size of IPv4 header + TCP header.
pub const MIN_TCP4: u16 = 40;
/// Minimum size of IPv6 header + TCP header.
pub const MIN_TCP6: u16 = 60;

/// Summary of a SYN or SYN+ACK packet in signature terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpSyn {
    /// Combined internet and TCP header length.
    pub header_len: u16,
    pub quirks: u32,
    pub mss: u16,
    pub wscale: u8,
    pub ts1: u32,
    pub ts2: u32,
    /// 0 for an empty payload, 1 otherwise.
    pub payload_class: u8,
}

impl TcpSyn {
    pub fn from_packet(ip: &IpMeta, tcp: &TcpMeta) -> Self {
        let mut syn = TcpSyn {
            header_len: ip.header_bytes() + u16::from(tcp.data_offset) * 4,
            ..TcpSyn::default()
        };

        for opt in &tcp.options {
            match opt.kind {
                tcp_opt::MSS => {
                    if opt.length != 4 {
                        syn.quirks |= quirk::BAD;
                    } else {
                        syn.mss = u16::from_be_bytes([opt.data[0], opt.data[1]]);
                    }
                }
                tcp_opt::WSCALE => {
                    if opt.length != 3 {
                        syn.quirks |= quirk::BAD;
                    } else {
                        syn.wscale = opt.data[0];
                        // RFC 1323 caps the scale factor at 14
                        if syn.wscale > 14 {
                            syn.quirks |= quirk::EXWS;
                        }
                    }
                }
                tcp_opt::SACK_PERMITTED => {
                    if opt.length != 2 {
                        syn.quirks |= quirk::BAD;
                    }
                }
                tcp_opt::TIMESTAMPS => {
                    if opt.length != 10 {
                        syn.quirks |= quirk::BAD;
                    } else {
                        syn.ts1 = u32::from_be_bytes([
                            opt.data[0], opt.data[1], opt.data[2], opt.data[3],
                        ]);
                        if syn.ts1 == 0 {
                            syn.quirks |= quirk::ZERO_TS1;
                        }

                        // Odd for a client to echo a peer timestamp before
                        // it has connected.
                        syn.ts2 = u32::from_be_bytes([
                            opt.data[4], opt.data[5], opt.data[6], opt.data[7],
                        ]);
                        if !tcp.flags.ack && syn.ts2 != 0 {
                            syn.quirks |= quirk::NZ_TS2;
                        }
                    }
                }
                _ => {}
            }
        }

        if tcp.options_malformed {
            syn.quirks |= quirk::BAD;
        }
        if tcp.padding.iter().any(|&b| b != 0) {
            syn.quirks |= quirk::EOL_NZ;
        }

        match ip {
            IpMeta::V4(ip4) => {
                // Lower two TOS bits set => congestion control
                if ip4.ecn != 0 {
                    syn.quirks |= quirk::ECN;
                }
                if ip4.more_fragments {
                    syn.quirks |= quirk::NZ_MBZ;
                }
                if ip4.dont_fragment {
                    syn.quirks |= quirk::DF;
                    if ip4.id != 0 {
                        syn.quirks |= quirk::NZ_ID;
                    }
                } else if ip4.id == 0 {
                    syn.quirks |= quirk::ZERO_ID;
                }
            }
            IpMeta::V6(ip6) => {
                if ip6.flow_label != 0 {
                    syn.quirks |= quirk::FLOW;
                }
                if ip6.traffic_class & 0x3 != 0 {
                    syn.quirks |= quirk::ECN;
                }
            }
        }

        if tcp.flags.ece || tcp.flags.cwr || tcp.flags.ns {
            syn.quirks |= quirk::ECN;
        }
        if tcp.seq == 0 {
            syn.quirks |= quirk::ZERO_SEQ;
        }
        if tcp.flags.ack {
            if tcp.ack == 0 {
                syn.quirks |= quirk::ZERO_ACK;
            }
        } else if tcp.ack != 0 && !tcp.flags.rst {
            syn.quirks |= quirk::NZ_ACK;
        }
        if tcp.flags.urg {
            syn.quirks |= quirk::URG;
        } else if tcp.urgent != 0 {
            syn.quirks |= quirk::NZ_URG;
        }
        if tcp.flags.psh {
            syn.quirks |= quirk::PUSH;
        }

        if tcp.payload_len > 0 {
            syn.payload_class = 1;
        }

        syn
    }

    /// Find a divisor for the window size among plausible segment sizes.
    /// Returns the quotient, or 0 when nothing divides cleanly.
    fn detect_win_mult_mss(&self, win: u16, ipv6: bool) -> u16 {
        if self.mss < 100 {
            return 0;
        }

        let mut divisors = vec![self.mss];
        if self.ts1 != 0 {
            divisors.push(self.mss - 12);
        }
        divisors.push(1500 - MIN_TCP4);
        divisors.push(1500 - MIN_TCP4 - 12);
        if ipv6 {
            divisors.push(1500 - MIN_TCP6);
            divisors.push(1500 - MIN_TCP6 - 12);
        }

        for d in divisors {
            if win % d == 0 {
                return win / d;
            }
        }
        0
    }

    /// Find a divisor for the window size among plausible MTUs.
    fn detect_win_mult_mtu(&self, win: u16) -> u16 {
        if self.mss < 100 {
            return 0;
        }

        for d in [
            self.mss.wrapping_add(MIN_TCP4),
            self.mss.wrapping_add(self.header_len),
            1500,
        ] {
            if d != 0 && win % d == 0 {
                return win / d;
            }
        }
        0
    }
}

impl TcpSignature {
    /// Match a decoded packet against this signature. Returns `None` when
    /// the packet does not match, otherwise whether the match was fuzzy
    /// (the quirks differed within the allowed slack).
    pub fn matches(&self, ip: &IpMeta, tcp: &TcpMeta) -> Option<bool> {
        let ipv6 = match ip {
            IpMeta::V4(ip4) => {
                if self.version.is_some_and(|v| v != 4) {
                    return None;
                }
                if ip4.ttl > self.initial_ttl {
                    return None;
                }
                if ip4.options_len != self.option_length {
                    return None;
                }
                false
            }
            IpMeta::V6(ip6) => {
                if self.version.is_some_and(|v| v != 6) {
                    return None;
                }
                if ip6.hop_limit > self.initial_ttl {
                    return None;
                }
                true
            }
        };

        if tcp.padding.len() != usize::from(self.eol_pad) {
            return None;
        }
        // Layout comparison is by option count only.
        if tcp.options.len() != self.option_layout.len() {
            return None;
        }

        let syn = TcpSyn::from_packet(ip, tcp);

        if self.mss.is_some_and(|mss| syn.mss != mss) {
            return None;
        }
        if self.wscale.is_some_and(|ws| syn.wscale != ws) {
            return None;
        }
        if self.payload_class.is_some_and(|pc| syn.payload_class != pc) {
            return None;
        }

        match self.window {
            WindowSpec::Any => {}
            WindowSpec::Literal(w) => {
                if tcp.window != w {
                    return None;
                }
            }
            WindowSpec::Mod(n) => {
                if tcp.window % n != 0 {
                    return None;
                }
            }
            WindowSpec::Mss(n) => {
                if syn.detect_win_mult_mss(tcp.window, ipv6) != n {
                    return None;
                }
            }
            WindowSpec::Mtu(n) => {
                if syn.detect_win_mult_mtu(tcp.window) != n {
                    return None;
                }
            }
        }

        // A version-agnostic signature cannot expect quirks the packet's
        // internet layer cannot express.
        let mut want = self.quirks;
        if self.version.is_none() {
            if ipv6 {
                want &= !(quirk::DF | quirk::NZ_ID | quirk::ZERO_ID | quirk::NZ_MBZ);
            } else {
                want &= !quirk::FLOW;
            }
        }

        let mut fuzzy = false;
        if syn.quirks != want {
            let deleted = (want ^ syn.quirks) & want;
            let added = (want ^ syn.quirks) & syn.quirks;

            if deleted & !(quirk::DF | quirk::NZ_ID) != 0 {
                return None;
            }
            if added & !(quirk::ZERO_ID | quirk::ECN) != 0 {
                return None;
            }

            fuzzy = true;
        }

        Some(fuzzy)
    }
}
