//! Reader for the classic libpcap savefile format.
//!
//! Handles both byte orders and both the microsecond and nanosecond
//! timestamp magics. Only the frame bytes matter downstream; timestamps
//! are carried through for completeness.

use std::io::Read;

use crate::error::{ReconError, ReconResult};

const MAGIC_USEC: u32 = 0xa1b2_c3d4;
const MAGIC_NSEC: u32 = 0xa1b2_3c4d;

/// Ethernet link type in the savefile header.
pub const LINKTYPE_ETHERNET: u32 = 1;

// Guard against corrupt record headers.
const MAX_RECORD_LEN: u32 = 256 * 1024;

/// One captured record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcapRecord {
    pub ts_sec: u32,
    /// Microseconds or nanoseconds, per the file's magic.
    pub ts_subsec: u32,
    pub data: Vec<u8>,
}

/// Streaming reader over a pcap savefile.
pub struct PcapReader<R> {
    reader: R,
    swapped: bool,
    nanos: bool,
    link_type: u32,
    snaplen: u32,
}

impl<R: Read> PcapReader<R> {
    /// Read and validate the 24-byte global header.
    pub fn new(mut reader: R) -> ReconResult<Self> {
        let mut header = [0u8; 24];
        reader
            .read_exact(&mut header)
            .map_err(|_| ReconError::Capture("truncated pcap header".to_string()))?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let (swapped, nanos) = match magic {
            MAGIC_USEC => (false, false),
            MAGIC_NSEC => (false, true),
            m if m.swap_bytes() == MAGIC_USEC => (true, false),
            m if m.swap_bytes() == MAGIC_NSEC => (true, true),
            m => {
                return Err(ReconError::Capture(format!(
                    "not a pcap file (magic {m:#010x})"
                )))
            }
        };

        let field = |offset: usize| {
            let raw = u32::from_le_bytes([
                header[offset],
                header[offset + 1],
                header[offset + 2],
                header[offset + 3],
            ]);
            if swapped {
                raw.swap_bytes()
            } else {
                raw
            }
        };

        Ok(PcapReader {
            reader,
            swapped,
            nanos,
            snaplen: field(16),
            link_type: field(20),
        })
    }

    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    pub fn snaplen(&self) -> u32 {
        self.snaplen
    }

    /// Whether timestamps carry nanoseconds instead of microseconds.
    pub fn nanosecond_timestamps(&self) -> bool {
        self.nanos
    }

    /// Read the next record. `Ok(None)` marks a clean end of file; an EOF
    /// in the middle of a record is an error.
    pub fn next_packet(&mut self) -> ReconResult<Option<PcapRecord>> {
        let mut header = [0u8; 16];
        match read_fully(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            16 => {}
            _ => return Err(ReconError::Capture("truncated pcap record".to_string())),
        }

        let field = |offset: usize| {
            let raw = u32::from_le_bytes([
                header[offset],
                header[offset + 1],
                header[offset + 2],
                header[offset + 3],
            ]);
            if self.swapped {
                raw.swap_bytes()
            } else {
                raw
            }
        };

        let incl_len = field(8);
        if incl_len > MAX_RECORD_LEN {
            return Err(ReconError::Capture(format!(
                "pcap record of {incl_len} bytes exceeds the sanity limit"
            )));
        }

        let mut data = vec![0u8; incl_len as usize];
        self.reader
            .read_exact(&mut data)
            .map_err(|_| ReconError::Capture("truncated pcap record".to_string()))?;

        Ok(Some(PcapRecord {
            ts_sec: field(0),
            ts_subsec: field(4),
            data,
        }))
    }
}

/// Read into `buf` until it is full or EOF; returns the byte count.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> ReconResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn file_header(magic: u32, big_endian: bool, link_type: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let push = |out: &mut Vec<u8>, v: u32| {
            if big_endian {
                out.extend_from_slice(&v.to_be_bytes());
            } else {
                out.extend_from_slice(&v.to_le_bytes());
            }
        };
        push(&mut out, magic);
        if big_endian {
            out.extend_from_slice(&2u16.to_be_bytes());
            out.extend_from_slice(&4u16.to_be_bytes());
        } else {
            out.extend_from_slice(&2u16.to_le_bytes());
            out.extend_from_slice(&4u16.to_le_bytes());
        }
        push(&mut out, 0); // thiszone
        push(&mut out, 0); // sigfigs
        push(&mut out, 65535); // snaplen
        push(&mut out, link_type);
        out
    }

    fn record(big_endian: bool, ts_sec: u32, ts_subsec: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for v in [ts_sec, ts_subsec, data.len() as u32, data.len() as u32] {
            if big_endian {
                out.extend_from_slice(&v.to_be_bytes());
            } else {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn reads_little_endian_file() {
        let mut bytes = file_header(MAGIC_USEC, false, LINKTYPE_ETHERNET);
        bytes.extend(record(false, 100, 7, &[1, 2, 3]));
        bytes.extend(record(false, 101, 8, &[4, 5]));

        let mut reader = PcapReader::new(Cursor::new(bytes)).expect("header");
        assert_eq!(reader.link_type(), LINKTYPE_ETHERNET);
        assert_eq!(reader.snaplen(), 65535);
        assert!(!reader.nanosecond_timestamps());

        let first = reader.next_packet().expect("read").expect("record");
        assert_eq!(first.ts_sec, 100);
        assert_eq!(first.ts_subsec, 7);
        assert_eq!(first.data, vec![1, 2, 3]);

        let second = reader.next_packet().expect("read").expect("record");
        assert_eq!(second.data, vec![4, 5]);

        assert!(reader.next_packet().expect("read").is_none());
    }

    #[test]
    fn reads_big_endian_nanosecond_file() {
        let mut bytes = file_header(MAGIC_NSEC, true, LINKTYPE_ETHERNET);
        bytes.extend(record(true, 100, 999_999_999, &[9]));

        let mut reader = PcapReader::new(Cursor::new(bytes)).expect("header");
        assert!(reader.nanosecond_timestamps());
        let rec = reader.next_packet().expect("read").expect("record");
        assert_eq!(rec.ts_subsec, 999_999_999);
    }

    #[test]
    fn rejects_unknown_magic() {
        let bytes = file_header(0xdeadbeef, false, LINKTYPE_ETHERNET);
        assert!(PcapReader::new(Cursor::new(bytes)).is_err());
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut bytes = file_header(MAGIC_USEC, false, LINKTYPE_ETHERNET);
        bytes.extend(record(false, 100, 7, &[1, 2, 3]));
        bytes.truncate(bytes.len() - 2);

        let mut reader = PcapReader::new(Cursor::new(bytes)).expect("header");
        assert!(reader.next_packet().is_err());
    }
}
