//! netrecon - passive network reconnaissance
//!
//! Watches packet captures (files or live interfaces) and infers hosts,
//! their operating systems, services, names, and the subnets they live in,
//! without sending a single packet.

pub mod capture;
pub mod config;
pub mod decode;
pub mod dedup;
pub mod error;
pub mod event;
pub mod extract;
pub mod fingerprint;
pub mod host;
pub mod inference;
pub mod subnets;

// Re-export commonly used types
pub use capture::{process_input, process_inputs, CaptureStats};
pub use config::ReconConfig;
pub use dedup::{dedup_stage, Deduper, DEDUP_SLOTS};
pub use error::{ReconError, ReconResult, SignatureError};
pub use event::{Event, EventKind};
pub use extract::extract;
pub use fingerprint::{SignatureDb, TcpSignature};
pub use host::{Host, HostProjection};
pub use inference::InferenceEngine;
pub use subnets::KnownSubnets;

pub type Result<T> = std::result::Result<T, ReconError>;
