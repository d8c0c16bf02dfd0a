//! Passive TCP/IP fingerprinting in the p0f style.
//!
//! A [`SignatureDb`] is loaded from a p0f fingerprint file and matched
//! against decoded SYN packets to guess the sender's operating system.

pub mod matcher;
pub mod signature;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::debug;

use crate::decode::{IpMeta, TcpMeta};
use crate::error::{ReconError, ReconResult};

pub use matcher::{TcpSyn, MIN_TCP4, MIN_TCP6};
pub use signature::{TcpSignature, WindowSpec};

/// Quirk bits shared by signatures and derived SYN summaries.
pub mod quirk {
    /// ECN supported.
    pub const ECN: u32 = 1 << 0;
    /// DF used (probably PMTUD); ignored for IPv6.
    pub const DF: u32 = 1 << 1;
    /// Non-zero IDs when DF set; ignored for IPv6.
    pub const NZ_ID: u32 = 1 << 2;
    /// Zero IDs when DF not set; ignored for IPv6.
    pub const ZERO_ID: u32 = 1 << 3;
    /// IP "must be zero" field isn't; ignored for IPv6.
    pub const NZ_MBZ: u32 = 1 << 4;
    /// IPv6 flows used; ignored for IPv4.
    pub const FLOW: u32 = 1 << 5;
    /// SEQ is zero.
    pub const ZERO_SEQ: u32 = 1 << 6;
    /// ACK non-zero when ACK flag not set.
    pub const NZ_ACK: u32 = 1 << 7;
    /// ACK is zero when ACK flag set.
    pub const ZERO_ACK: u32 = 1 << 8;
    /// URG pointer non-zero when URG flag not set.
    pub const NZ_URG: u32 = 1 << 9;
    /// URG flag set.
    pub const URG: u32 = 1 << 10;
    /// PUSH flag on a control packet.
    pub const PUSH: u32 = 1 << 11;
    /// Own timestamp set to zero.
    pub const ZERO_TS1: u32 = 1 << 12;
    /// Peer timestamp non-zero on SYN.
    pub const NZ_TS2: u32 = 1 << 13;
    /// Non-zero padding past EOL.
    pub const EOL_NZ: u32 = 1 << 14;
    /// Excessive window scaling.
    pub const EXWS: u32 = 1 << 15;
    /// Problem parsing TCP options.
    pub const BAD: u32 = 1 << 16;

    /// Look up a quirk by its fingerprint-file name.
    pub fn from_name(name: &str) -> Option<u32> {
        Some(match name {
            "df" => DF,
            "id+" => NZ_ID,
            "id-" => ZERO_ID,
            "ecn" => ECN,
            "0+" => NZ_MBZ,
            "flow" => FLOW,
            "seq-" => ZERO_SEQ,
            "ack+" => NZ_ACK,
            "ack-" => ZERO_ACK,
            "uptr+" => NZ_URG,
            "urgf+" => URG,
            "pushf+" => PUSH,
            "ts1-" => ZERO_TS1,
            "ts2+" => NZ_TS2,
            "opt+" => EOL_NZ,
            "exws" => EXWS,
            "bad" => BAD,
            _ => return None,
        })
    }
}

/// A set of TCP signatures loaded from a p0f fingerprint file.
#[derive(Debug, Default)]
pub struct SignatureDb {
    signatures: Vec<TcpSignature>,
}

impl SignatureDb {
    /// Load signatures from a p0f fingerprint file. Only the
    /// `[tcp:request]` and `[tcp:response]` sections are read; the first
    /// malformed signature aborts the load.
    pub fn load<P: AsRef<Path>>(path: P) -> ReconResult<Self> {
        let path = path.as_ref();
        debug!("parsing p0f fingerprints from {}", path.display());
        let file = File::open(path)?;
        let db = Self::parse_reader(BufReader::new(file), &path.to_string_lossy())?;
        debug!("parsed {} TCP fingerprints", db.len());
        Ok(db)
    }

    /// Parse fingerprint lines from `reader`; `source` names the input in
    /// error messages.
    pub fn parse_reader<R: BufRead>(reader: R, source: &str) -> ReconResult<Self> {
        let mut db = SignatureDb::default();
        let mut label = String::new();
        let mut interested = false;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') {
                interested = line == "[tcp:request]" || line == "[tcp:response]";
                continue;
            }
            if !interested {
                continue;
            }

            if let Some(rest) = line.strip_prefix("label") {
                label = rest.trim_start_matches([' ', '=']).trim().to_string();
            } else if let Some(rest) = line.strip_prefix("sig") {
                let raw = rest.trim_start_matches([' ', '=']).trim();
                let sig = TcpSignature::parse(&label, raw).map_err(|e| {
                    ReconError::Fingerprint(format!("{}:{}: {}", source, idx + 1, e))
                })?;
                db.signatures.push(sig);
            }
        }

        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Match a decoded SYN against the database. The first exact match
    /// wins immediately; otherwise the last fuzzy match is returned.
    pub fn best_match(&self, ip: &IpMeta, tcp: &TcpMeta) -> Option<(&TcpSignature, bool)> {
        let mut fuzzy_match = None;

        for sig in &self.signatures {
            match sig.matches(ip, tcp) {
                Some(false) => return Some((sig, false)),
                Some(true) => fuzzy_match = Some(sig),
                None => {}
            }
        }

        fuzzy_match.map(|sig| (sig, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{tcp_opt, Ipv4Meta, TcpFlagsMeta, TcpOptionMeta};
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    const SAMPLE: &str = "\
; sample fingerprint database

[tcp:request]

label = s:unix:Linux:3.x
sig   = *:64:0:*:65535,7:mss,sok,ts,nop,ws:df,id+:0

label = s:win:Windows:XP
sig   = *:128:0:*:65535,2:mss,nop,ws,nop,nop:df,id+:0

[mtu]

label = Ethernet
sig   = 1500

[tcp:response]

label = s:unix:Linux:3.x
sig   = *:64:0:*:mss*10,0:mss,sok,ts,nop,ws:df:0
";

    fn db() -> SignatureDb {
        SignatureDb::parse_reader(Cursor::new(SAMPLE), "sample").expect("parse")
    }

    fn packet(ttl: u8, wscale: u8) -> (IpMeta, TcpMeta) {
        let ip = IpMeta::V4(Ipv4Meta {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            ttl,
            id: 77,
            ecn: 0,
            dont_fragment: true,
            more_fragments: false,
            header_bytes: 20,
            options_len: 0,
        });
        let tcp = TcpMeta {
            seq: 1000,
            data_offset: 10,
            window: 65535,
            flags: TcpFlagsMeta {
                syn: true,
                ..TcpFlagsMeta::default()
            },
            options: vec![
                TcpOptionMeta {
                    kind: tcp_opt::MSS,
                    length: 4,
                    data: vec![5, 180],
                },
                TcpOptionMeta {
                    kind: tcp_opt::SACK_PERMITTED,
                    length: 2,
                    data: vec![],
                },
                TcpOptionMeta {
                    kind: tcp_opt::TIMESTAMPS,
                    length: 10,
                    data: vec![0, 0, 0, 1, 0, 0, 0, 0],
                },
                TcpOptionMeta {
                    kind: tcp_opt::NOP,
                    length: 1,
                    data: vec![],
                },
                TcpOptionMeta {
                    kind: tcp_opt::WSCALE,
                    length: 3,
                    data: vec![wscale],
                },
            ],
            ..TcpMeta::default()
        };
        (ip, tcp)
    }

    #[test]
    fn loads_only_tcp_sections() {
        assert_eq!(db().len(), 3);
    }

    #[test]
    fn reports_bad_signature_with_location() {
        let text = "[tcp:request]\nlabel = l\nsig = 4:64:0:*:bogus,0:mss::0\n";
        let err = SignatureDb::parse_reader(Cursor::new(text), "fp.txt").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("fp.txt:3"), "{msg}");
    }

    #[test]
    fn exact_match_wins_immediately() {
        let (ip, tcp) = packet(60, 7);
        let db = db();
        let (sig, fuzzy) = db.best_match(&ip, &tcp).expect("match");
        assert_eq!(sig.label, "s:unix:Linux:3.x");
        assert!(!fuzzy);
    }

    #[test]
    fn last_fuzzy_match_wins() {
        // wscale 0 misses both exact signatures; ttl 60 with no DF makes
        // the response-section signature a fuzzy candidate.
        let (mut ip, mut tcp) = packet(60, 0);
        if let IpMeta::V4(ip4) = &mut ip {
            ip4.dont_fragment = false;
        }
        tcp.window = 14600;
        let db = db();
        let (sig, fuzzy) = db.best_match(&ip, &tcp).expect("match");
        assert_eq!(sig.raw, "*:64:0:*:mss*10,0:mss,sok,ts,nop,ws:df:0");
        assert!(fuzzy);
    }

    #[test]
    fn no_match_returns_none() {
        let (ip, tcp) = packet(250, 7);
        assert!(db().best_match(&ip, &tcp).is_none());
    }
}
