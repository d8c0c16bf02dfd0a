//! The p0f TCP signature format.
//!
//! A signature line reads `ver:ittl:olen:mss:wsize,wscale:olayout:quirks:pclass`.
//! `*` wildcards a field where the grammar allows it; those land as `None`
//! here so matching can skip them.

use crate::decode::tcp_opt;
use crate::error::SignatureError;
use crate::fingerprint::quirk;

/// How the window size field of a signature is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSpec {
    /// `*`: any window size.
    Any,
    /// A literal value the packet's window must equal.
    Literal(u16),
    /// `%N`: the window must be a multiple of N.
    Mod(u16),
    /// `mss*N`: the window must be N times a plausible segment size.
    Mss(u16),
    /// `mtu*N`: the window must be N times a plausible MTU.
    Mtu(u16),
}

/// A parsed TCP fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSignature {
    /// `type:class:name:flavor` from the database's label line.
    pub label: String,
    /// The raw signature text this was parsed from.
    pub raw: String,

    /// IP version, `None` for either.
    pub version: Option<u8>,
    /// Initial TTL; packets with a larger TTL cannot match.
    pub initial_ttl: u8,
    /// The ittl carried a `-` suffix, meaning the initial TTL is a guess.
    pub ttl_guess: bool,
    /// Expected length of IPv4 options.
    pub option_length: u8,
    /// Maximum segment size, `None` for any.
    pub mss: Option<u16>,
    pub window: WindowSpec,
    /// Window scale factor, `None` for any.
    pub wscale: Option<u8>,
    /// Expected TCP option kinds, in order. EOL is not listed; an `eol+N`
    /// token instead sets `eol_pad`.
    pub option_layout: Vec<u8>,
    /// Expected number of padding bytes after an explicit EOL.
    pub eol_pad: u8,
    /// Expected quirk bits, see [`quirk`].
    pub quirks: u32,
    /// Expected payload class: 0 empty, 1 non-empty, `None` for any.
    pub payload_class: Option<u8>,
}

impl TcpSignature {
    /// Parse a signature line from the fingerprint database.
    pub fn parse(label: &str, raw: &str) -> Result<Self, SignatureError> {
        let parts: Vec<&str> = raw.split(':').collect();
        let [ver, ittl, olen, mss, win, olayout, quirks, pclass] = parts[..] else {
            return Err(SignatureError::FieldCount);
        };

        let mut sig = TcpSignature {
            label: label.to_string(),
            raw: raw.to_string(),
            version: None,
            initial_ttl: 0,
            ttl_guess: false,
            option_length: 0,
            mss: None,
            window: WindowSpec::Any,
            wscale: None,
            option_layout: Vec::new(),
            eol_pad: 0,
            quirks: 0,
            payload_class: None,
        };

        sig.version = match ver {
            "4" => Some(4),
            "6" => Some(6),
            "*" => None,
            other => return Err(SignatureError::Version(other.to_string())),
        };

        let ittl = match ittl.strip_suffix('-') {
            Some(rest) => {
                sig.ttl_guess = true;
                rest
            }
            None => ittl,
        };
        sig.initial_ttl = match ittl.parse::<u16>() {
            Ok(v @ 1..=255) => v as u8,
            _ => return Err(SignatureError::InitialTtl(ittl.to_string())),
        };

        sig.option_length = olen
            .parse::<u8>()
            .map_err(|_| SignatureError::OptionLength(olen.to_string()))?;

        sig.mss = match mss {
            "*" => None,
            s => Some(
                s.parse::<u16>()
                    .map_err(|_| SignatureError::Mss(s.to_string()))?,
            ),
        };

        let (wsize, wscale) = win
            .split_once(',')
            .ok_or(SignatureError::WindowFormat)?;
        sig.window = parse_window(wsize)?;
        sig.wscale = match wscale {
            "*" => None,
            s => Some(
                s.parse::<u8>()
                    .map_err(|_| SignatureError::WindowScale(s.to_string()))?,
            ),
        };

        for token in olayout.split(',') {
            match token {
                "nop" => sig.option_layout.push(tcp_opt::NOP),
                "mss" => sig.option_layout.push(tcp_opt::MSS),
                "ws" => sig.option_layout.push(tcp_opt::WSCALE),
                "sok" => sig.option_layout.push(tcp_opt::SACK_PERMITTED),
                "sack" => sig.option_layout.push(tcp_opt::SACK),
                "ts" => sig.option_layout.push(tcp_opt::TIMESTAMPS),
                _ => {
                    if let Some(pad) = token.strip_prefix("eol+") {
                        sig.eol_pad = pad
                            .parse::<u8>()
                            .map_err(|_| SignatureError::OptionLayout(token.to_string()))?;
                        // eol must be the last option
                        break;
                    } else if let Some(kind) = token.strip_prefix('?') {
                        sig.option_layout.push(
                            kind.parse::<u8>()
                                .map_err(|_| SignatureError::OptionLayout(token.to_string()))?,
                        );
                    } else {
                        return Err(SignatureError::OptionLayout(token.to_string()));
                    }
                }
            }
        }

        if !quirks.is_empty() {
            for name in quirks.split(',') {
                sig.quirks |= quirk::from_name(name)
                    .ok_or_else(|| SignatureError::Quirk(name.to_string()))?;
            }
        }

        sig.payload_class = match pclass {
            "*" => None,
            "0" => Some(0),
            "+" => Some(1),
            other => return Err(SignatureError::PayloadClass(other.to_string())),
        };

        Ok(sig)
    }
}

fn parse_window(s: &str) -> Result<WindowSpec, SignatureError> {
    let err = || SignatureError::WindowSize(s.to_string());

    if s.is_empty() || s == "*" {
        return Ok(WindowSpec::Any);
    }
    if let Some(rest) = s.strip_prefix('%') {
        let n = rest.parse::<u16>().map_err(|_| err())?;
        if n < 2 {
            return Err(err());
        }
        return Ok(WindowSpec::Mod(n));
    }
    if let Some(rest) = s.strip_prefix("mss*") {
        let n = rest.parse::<u16>().map_err(|_| err())?;
        if !(1..=1000).contains(&n) {
            return Err(err());
        }
        return Ok(WindowSpec::Mss(n));
    }
    if let Some(rest) = s.strip_prefix("mtu*") {
        let n = rest.parse::<u16>().map_err(|_| err())?;
        if !(1..=1000).contains(&n) {
            return Err(err());
        }
        return Ok(WindowSpec::Mtu(n));
    }
    s.parse::<u16>().map(WindowSpec::Literal).map_err(|_| err())
}
