//! Configuration for a reconnaissance run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::decode::DecodeOptions;
use crate::dedup::DEDUP_SLOTS;

/// Main configuration structure for a capture-and-infer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconConfig {
    /// Capture inputs, processed in order: pcap files or live interface
    /// names.
    pub inputs: Vec<String>,

    /// p0f fingerprint database for OS detection. Without one, no OS
    /// events are produced.
    pub fingerprints: Option<PathBuf>,

    /// Decode 802.1Q VLAN-tagged frames.
    pub dot1q: bool,

    /// Decode ICMPv4.
    pub icmp4: bool,

    /// Decode DNS on ports 53 and 5353.
    pub dns: bool,

    /// Decode ARP.
    pub arp: bool,

    /// Decode DHCPv4.
    pub dhcp: bool,

    /// Where to write the host report; stdout when unset.
    pub hosts_out: Option<PathBuf>,

    /// Emit the host report as JSON instead of key=value text.
    pub json: bool,

    /// Slot count for the dedup table.
    pub dedup_slots: usize,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            fingerprints: None,
            dot1q: false,
            icmp4: false,
            dns: false,
            arp: false,
            dhcp: false,
            hosts_out: None,
            json: false,
            dedup_slots: DEDUP_SLOTS,
        }
    }
}

impl ReconConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn with_fingerprints(mut self, path: impl Into<PathBuf>) -> Self {
        self.fingerprints = Some(path.into());
        self
    }

    /// Enable every optional protocol analyzer.
    pub fn with_all_analyzers(mut self) -> Self {
        self.dot1q = true;
        self.icmp4 = true;
        self.dns = true;
        self.arp = true;
        self.dhcp = true;
        self
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            dot1q: self.dot1q,
            icmp4: self.icmp4,
            dns: self.dns,
            arp: self.arp,
            dhcp: self.dhcp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_analyzers_are_off() {
        let opts = ReconConfig::new().decode_options();
        assert!(!opts.dot1q && !opts.icmp4 && !opts.dns && !opts.arp && !opts.dhcp);
    }

    #[test]
    fn builders_compose() {
        let config = ReconConfig::new()
            .with_input("eth0")
            .with_fingerprints("/etc/p0f/p0f.fp")
            .with_all_analyzers();
        assert_eq!(config.inputs, vec!["eth0".to_string()]);
        assert!(config.fingerprints.is_some());
        assert!(config.decode_options().dhcp);
        assert_eq!(config.dedup_slots, DEDUP_SLOTS);
    }

    #[test]
    fn round_trips_through_json() {
        let config = ReconConfig::new().with_input("capture.pcap");
        let json = serde_json::to_string(&config).expect("serialize");
        let back: ReconConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.inputs, config.inputs);
        assert_eq!(back.dedup_slots, config.dedup_slots);
    }
}
