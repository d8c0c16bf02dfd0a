//! DHCPv4 message parsing: the fixed header fields the engine uses plus the
//! raw option list. Option interpretation happens in event extraction.

use std::net::Ipv4Addr;

use pnet::util::MacAddr;

/// DHCP option codes the extractor interprets.
pub mod dhcp_opt {
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS: u8 = 6;
    pub const HOSTNAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const REQUESTED_IP: u8 = 50;
    pub const MESSAGE_TYPE: u8 = 53;
}

/// DHCP message types (option 53).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DhcpMessageType {
    Unspecified,
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
    Other(u8),
}

impl DhcpMessageType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => DhcpMessageType::Unspecified,
            1 => DhcpMessageType::Discover,
            2 => DhcpMessageType::Offer,
            3 => DhcpMessageType::Request,
            4 => DhcpMessageType::Decline,
            5 => DhcpMessageType::Ack,
            6 => DhcpMessageType::Nak,
            7 => DhcpMessageType::Release,
            8 => DhcpMessageType::Inform,
            other => DhcpMessageType::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            DhcpMessageType::Unspecified => 0,
            DhcpMessageType::Discover => 1,
            DhcpMessageType::Offer => 2,
            DhcpMessageType::Request => 3,
            DhcpMessageType::Decline => 4,
            DhcpMessageType::Ack => 5,
            DhcpMessageType::Nak => 6,
            DhcpMessageType::Release => 7,
            DhcpMessageType::Inform => 8,
            DhcpMessageType::Other(code) => *code,
        }
    }
}

/// One raw DHCP option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOptionMeta {
    pub code: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMeta {
    /// ciaddr: the client's current address, if it has one.
    pub client_ip: Ipv4Addr,
    /// yiaddr: the address the server is handing out.
    pub your_ip: Ipv4Addr,
    /// chaddr, first six bytes.
    pub client_mac: MacAddr,
    /// Options in wire order, pad and end stripped.
    pub options: Vec<DhcpOptionMeta>,
}

const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const OPTIONS_START: usize = 240;

/// Parse a DHCPv4 message from a UDP payload. Returns `None` if the fixed
/// header or magic cookie is missing.
pub fn parse(data: &[u8]) -> Option<DhcpMeta> {
    if data.len() < OPTIONS_START || data[236..240] != MAGIC_COOKIE {
        return None;
    }

    let client_ip = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let your_ip = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    let client_mac = MacAddr::new(data[28], data[29], data[30], data[31], data[32], data[33]);

    let mut options = Vec::new();
    let mut pos = OPTIONS_START;
    while pos < data.len() {
        let code = data[pos];
        match code {
            0 => {
                pos += 1; // pad
            }
            255 => break, // end
            _ => {
                let len = *data.get(pos + 1)? as usize;
                let option_data = data.get(pos + 2..pos + 2 + len)?;
                options.push(DhcpOptionMeta {
                    code,
                    data: option_data.to_vec(),
                });
                pos += 2 + len;
            }
        }
    }

    Some(DhcpMeta {
        client_ip,
        your_ip,
        client_mac,
        options,
    })
}
