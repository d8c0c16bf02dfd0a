//! Minimal DNS message parsing: the QR bit and the answer section.
//!
//! Only the record types the engine reacts to are decoded into addresses or
//! SRV targets; everything else keeps its numeric type so events can still
//! carry it.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serializer;

/// DNS resource record types the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DnsRecordType {
    A,
    Ns,
    Mx,
    Aaaa,
    Srv,
    Other(u16),
}

impl DnsRecordType {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => DnsRecordType::A,
            2 => DnsRecordType::Ns,
            15 => DnsRecordType::Mx,
            28 => DnsRecordType::Aaaa,
            33 => DnsRecordType::Srv,
            other => DnsRecordType::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            DnsRecordType::A => 1,
            DnsRecordType::Ns => 2,
            DnsRecordType::Mx => 15,
            DnsRecordType::Aaaa => 28,
            DnsRecordType::Srv => 33,
            DnsRecordType::Other(code) => *code,
        }
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsRecordType::A => write!(f, "A"),
            DnsRecordType::Ns => write!(f, "NS"),
            DnsRecordType::Mx => write!(f, "MX"),
            DnsRecordType::Aaaa => write!(f, "AAAA"),
            DnsRecordType::Srv => write!(f, "SRV"),
            DnsRecordType::Other(code) => write!(f, "TYPE{}", code),
        }
    }
}

impl serde::Serialize for DnsRecordType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// SRV record data: the advertised target host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub name: String,
    pub port: u16,
}

/// One answer record. `ip` is populated for A/AAAA, `srv` for SRV records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub name: String,
    pub record_type: DnsRecordType,
    pub ip: Option<IpAddr>,
    pub srv: Option<SrvTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DnsMeta {
    /// QR bit: true for responses.
    pub response: bool,
    pub answers: Vec<DnsAnswer>,
}

/// Parse a DNS message from a UDP payload. Returns `None` when the message
/// is too short or an answer record is structurally broken.
pub fn parse(data: &[u8]) -> Option<DnsMeta> {
    if data.len() < 12 {
        return None;
    }

    let response = data[2] & 0x80 != 0;
    let qdcount = u16::from_be_bytes([data[4], data[5]]);
    let ancount = u16::from_be_bytes([data[6], data[7]]);

    let mut meta = DnsMeta {
        response,
        answers: Vec::new(),
    };
    if !response {
        return Some(meta);
    }

    let mut pos = 12;
    for _ in 0..qdcount {
        let (_, next) = read_name(data, pos)?;
        pos = next.checked_add(4)?; // qtype + qclass
        if pos > data.len() {
            return None;
        }
    }

    for _ in 0..ancount {
        let (name, next) = read_name(data, pos)?;
        pos = next;
        if pos + 10 > data.len() {
            return None;
        }
        let rtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let rdlen = u16::from_be_bytes([data[pos + 8], data[pos + 9]]) as usize;
        pos += 10;
        if pos + rdlen > data.len() {
            return None;
        }
        let rdata = &data[pos..pos + rdlen];

        let record_type = DnsRecordType::from_code(rtype);
        let mut answer = DnsAnswer {
            name,
            record_type,
            ip: None,
            srv: None,
        };
        match record_type {
            DnsRecordType::A if rdlen == 4 => {
                answer.ip = Some(IpAddr::V4(Ipv4Addr::new(
                    rdata[0], rdata[1], rdata[2], rdata[3],
                )));
            }
            DnsRecordType::Aaaa if rdlen == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(rdata);
                answer.ip = Some(IpAddr::V6(Ipv6Addr::from(octets)));
            }
            DnsRecordType::Srv if rdlen >= 6 => {
                let port = u16::from_be_bytes([rdata[4], rdata[5]]);
                // The target name may use compression into the full message.
                let (target, _) = read_name(data, pos + 6)?;
                answer.srv = Some(SrvTarget { name: target, port });
            }
            _ => {}
        }

        meta.answers.push(answer);
        pos += rdlen;
    }

    Some(meta)
}

/// Decode a possibly-compressed domain name starting at `pos`. Returns the
/// dotted name and the offset just past the name's wire representation at
/// its original position.
fn read_name(data: &[u8], mut pos: usize) -> Option<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut end = None;
    let mut jumps = 0;

    loop {
        let len = *data.get(pos)? as usize;
        if len == 0 {
            let end = end.unwrap_or(pos + 1);
            return Some((labels.join("."), end));
        }
        if len & 0xc0 == 0xc0 {
            // Compression pointer; remember where the name ended the first
            // time we leave the linear read.
            let lo = *data.get(pos + 1)? as usize;
            if end.is_none() {
                end = Some(pos + 2);
            }
            pos = ((len & 0x3f) << 8) | lo;
            jumps += 1;
            if jumps > 32 {
                return None;
            }
            continue;
        }
        if len & 0xc0 != 0 {
            return None;
        }
        let label = data.get(pos + 1..pos + 1 + len)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += 1 + len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_bytes(name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
        out
    }

    fn header(response: bool, qdcount: u16, ancount: u16) -> Vec<u8> {
        let mut h = vec![0x12, 0x34];
        h.push(if response { 0x80 } else { 0x00 });
        h.push(0x00);
        h.extend_from_slice(&qdcount.to_be_bytes());
        h.extend_from_slice(&ancount.to_be_bytes());
        h.extend_from_slice(&[0, 0, 0, 0]); // ns, ar counts
        h
    }

    #[test]
    fn parses_query() {
        let mut msg = header(false, 1, 0);
        msg.extend(name_bytes("example.com"));
        msg.extend_from_slice(&[0, 1, 0, 1]);
        let meta = parse(&msg).expect("parse");
        assert!(!meta.response);
        assert!(meta.answers.is_empty());
    }

    #[test]
    fn parses_a_answer_with_compression() {
        let mut msg = header(true, 1, 1);
        let name_at = msg.len() as u8;
        msg.extend(name_bytes("Example.COM"));
        msg.extend_from_slice(&[0, 1, 0, 1]); // question qtype/qclass
        // answer: pointer to the question name
        msg.extend_from_slice(&[0xc0, name_at]);
        msg.extend_from_slice(&[0, 1, 0, 1]); // type A, class IN
        msg.extend_from_slice(&[0, 0, 0, 60]); // ttl
        msg.extend_from_slice(&[0, 4, 93, 184, 216, 34]);

        let meta = parse(&msg).expect("parse");
        assert!(meta.response);
        assert_eq!(meta.answers.len(), 1);
        let answer = &meta.answers[0];
        // Case preserved here; extraction lowercases.
        assert_eq!(answer.name, "Example.COM");
        assert_eq!(answer.record_type, DnsRecordType::A);
        assert_eq!(answer.ip, Some(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))));
    }

    #[test]
    fn parses_srv_answer() {
        let mut msg = header(true, 0, 1);
        msg.extend(name_bytes("_ipp._tcp.local"));
        msg.extend_from_slice(&[0, 33, 0, 1]);
        msg.extend_from_slice(&[0, 0, 0, 60]);
        let target = name_bytes("printer.local");
        let rdlen = (6 + target.len()) as u16;
        msg.extend_from_slice(&rdlen.to_be_bytes());
        msg.extend_from_slice(&[0, 0, 0, 0]); // priority, weight
        msg.extend_from_slice(&631u16.to_be_bytes());
        msg.extend(target);

        let meta = parse(&msg).expect("parse");
        let answer = &meta.answers[0];
        assert_eq!(answer.record_type, DnsRecordType::Srv);
        let srv = answer.srv.as_ref().expect("srv data");
        assert_eq!(srv.name, "printer.local");
        assert_eq!(srv.port, 631);
    }

    #[test]
    fn rejects_truncated_answer() {
        let mut msg = header(true, 0, 1);
        msg.extend(name_bytes("example.com"));
        msg.extend_from_slice(&[0, 1]); // cut off mid-record
        assert!(parse(&msg).is_none());
    }
}
