//! Turning capture inputs into event streams.
//!
//! Each input is tried as a pcap savefile first and falls back to a live
//! interface of that name. Decoding problems never abort a capture; they
//! are tallied per layer and reported at the end of the run.

pub mod pcap;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, trace};
use pnet::datalink::{self, Channel, Config};
use tokio::sync::mpsc::UnboundedSender;

use crate::decode::{decode_frame, DecodeOptions};
use crate::error::{ReconError, ReconResult};
use crate::event::Event;
use crate::extract::extract;
use crate::fingerprint::SignatureDb;

use pcap::{PcapReader, LINKTYPE_ETHERNET};

/// Read timeout for live capture, so the cancel flag is polled regularly.
const LIVE_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-input capture statistics.
#[derive(Debug, Default)]
pub struct CaptureStats {
    /// Frames pulled from the source.
    pub packets: u64,
    /// Decode failure tallies, keyed by the layer that failed.
    pub decode_issues: HashMap<&'static str, u64>,
}

impl CaptureStats {
    pub fn decode_failures(&self) -> u64 {
        self.decode_issues.values().sum()
    }

    fn absorb(&mut self, other: CaptureStats) {
        self.packets += other.packets;
        for (layer, count) in other.decode_issues {
            *self.decode_issues.entry(layer).or_default() += count;
        }
    }
}

/// Process one input to completion, emitting events into `tx`. An input
/// naming an existing file is read as a pcap savefile; anything else is
/// opened as a live interface.
pub fn process_input(
    input: &str,
    opts: &DecodeOptions,
    sigs: &SignatureDb,
    tx: &UnboundedSender<Event>,
    cancel: &AtomicBool,
) -> ReconResult<CaptureStats> {
    if Path::new(input).is_file() {
        info!("reading capture file {input}");
        process_file(input, opts, sigs, tx, cancel)
    } else {
        info!("capturing live from {input}");
        process_live(input, opts, sigs, tx, cancel)
    }
}

/// Process every input in order, stopping early on cancellation.
pub fn process_inputs(
    inputs: &[String],
    opts: &DecodeOptions,
    sigs: &SignatureDb,
    tx: UnboundedSender<Event>,
    cancel: &AtomicBool,
) -> ReconResult<CaptureStats> {
    let mut total = CaptureStats::default();
    for input in inputs {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        total.absorb(process_input(input, opts, sigs, &tx, cancel)?);
    }
    Ok(total)
}

fn process_file(
    path: &str,
    opts: &DecodeOptions,
    sigs: &SignatureDb,
    tx: &UnboundedSender<Event>,
    cancel: &AtomicBool,
) -> ReconResult<CaptureStats> {
    let file = File::open(path)?;
    let mut reader = PcapReader::new(BufReader::new(file))?;
    if reader.link_type() != LINKTYPE_ETHERNET {
        return Err(ReconError::LinkType(reader.link_type()));
    }

    let mut stats = CaptureStats::default();
    while !cancel.load(Ordering::Relaxed) {
        let Some(record) = reader.next_packet()? else {
            break;
        };
        if !handle_frame(&record.data, opts, sigs, tx, &mut stats) {
            break;
        }
    }

    debug!(
        "{path}: {} packets, {} decode failures",
        stats.packets,
        stats.decode_failures()
    );
    Ok(stats)
}

fn process_live(
    name: &str,
    opts: &DecodeOptions,
    sigs: &SignatureDb,
    tx: &UnboundedSender<Event>,
    cancel: &AtomicBool,
) -> ReconResult<CaptureStats> {
    let interface = datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| ReconError::Capture(format!("no such file or interface: {name}")))?;

    let config = Config {
        read_timeout: Some(LIVE_READ_TIMEOUT),
        ..Config::default()
    };
    let mut rx = match datalink::channel(&interface, config) {
        Ok(Channel::Ethernet(_, rx)) => rx,
        Ok(_) => {
            return Err(ReconError::Capture(format!(
                "{name}: unsupported channel type"
            )))
        }
        Err(e) => return Err(ReconError::Capture(format!("{name}: {e}"))),
    };

    let mut stats = CaptureStats::default();
    while !cancel.load(Ordering::Relaxed) {
        match rx.next() {
            Ok(frame) => {
                if !handle_frame(frame, opts, sigs, tx, &mut stats) {
                    break;
                }
            }
            // Timeouts just give the cancel flag a chance.
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(ReconError::Capture(format!("{name}: {e}"))),
        }
    }

    debug!(
        "{name}: {} packets, {} decode failures",
        stats.packets,
        stats.decode_failures()
    );
    Ok(stats)
}

/// Decode one frame and emit its events. Returns false once the receiving
/// side of the pipeline has gone away.
fn handle_frame(
    frame: &[u8],
    opts: &DecodeOptions,
    sigs: &SignatureDb,
    tx: &UnboundedSender<Event>,
    stats: &mut CaptureStats,
) -> bool {
    stats.packets += 1;

    let outcome = decode_frame(frame, opts);
    if let Some(layer) = outcome.issue {
        trace!("decode failure at {layer} layer");
        *stats.decode_issues.entry(layer).or_default() += 1;
    }

    for event in extract(&outcome.packet, sigs) {
        if tx.send(event).is_err() {
            return false;
        }
    }
    true
}
