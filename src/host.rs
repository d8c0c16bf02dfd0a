//! The evidence record kept per host and its output projection.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Write};
use std::net::IpAddr;

use pnet::util::MacAddr;
use serde::Serialize;

use crate::decode::DnsRecordType;
use crate::event::{InternetLayer, TransportLayer};

/// One OS detection result. Hosts accumulate weight per guess since
/// different SYNs may match different signatures.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OsGuess {
    pub label: String,
    pub fuzzy: bool,
}

/// A name learned for a host, with the record type that carried it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HostnameRecord {
    pub name: String,
    pub record_type: DnsRecordType,
}

/// A confirmed listening endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ServiceEndpoint {
    pub internet: InternetLayer,
    pub transport: TransportLayer,
    pub port: u16,
}

/// Everything inferred about a single host so far.
///
/// A host tracked only by IP is `external`: no direct MAC evidence exists
/// yet. If DHCP traffic later ties the IP to a MAC, the index repoints to
/// the MAC-keyed host and the external record is forgotten.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Host {
    pub os: HashMap<OsGuess, u64>,

    pub nameservers: BTreeSet<String>,
    pub routers: BTreeSet<String>,
    pub hostnames: BTreeSet<HostnameRecord>,
    pub services: BTreeSet<ServiceEndpoint>,
    pub advertised_services: BTreeSet<String>,

    pub ips: BTreeSet<IpAddr>,
    pub macs: BTreeSet<MacAddr>,

    pub external: bool,
    pub router: bool,
}

impl Host {
    pub fn new() -> Self {
        Host::default()
    }

    /// Fold another host's evidence into this one. The other host should
    /// be forgotten afterwards.
    pub fn merge(&mut self, other: &Host) {
        for (guess, weight) in &other.os {
            *self.os.entry(guess.clone()).or_default() += weight;
        }
        self.nameservers.extend(other.nameservers.iter().cloned());
        self.routers.extend(other.routers.iter().cloned());
        self.hostnames.extend(other.hostnames.iter().cloned());
        self.services.extend(other.services.iter().copied());
        self.advertised_services
            .extend(other.advertised_services.iter().cloned());
        self.ips.extend(other.ips.iter().copied());
        self.macs.extend(other.macs.iter().copied());
    }

    /// Normalized OS probabilities. Fuzzy matches count at half weight;
    /// guesses sharing a label are pooled before normalizing.
    pub fn os_probabilities(&self) -> BTreeMap<String, f64> {
        let mut probs: BTreeMap<String, f64> = BTreeMap::new();
        let mut sum = 0.0;

        for (guess, weight) in &self.os {
            let mut val = *weight as f64;
            if guess.fuzzy {
                val /= 2.0;
            }
            *probs.entry(guess.label.clone()).or_default() += val;
            sum += val;
        }

        for val in probs.values_mut() {
            *val /= sum;
        }

        probs
    }

    pub fn projection(&self) -> HostProjection {
        HostProjection {
            os: self.os_probabilities(),
            nameservers: self.nameservers.iter().cloned().collect(),
            routers: self.routers.iter().cloned().collect(),
            hostnames: self.hostnames.iter().cloned().collect(),
            services: self.services.iter().copied().collect(),
            advertised_services: self.advertised_services.iter().cloned().collect(),
            ips: self.ips.iter().map(|ip| ip.to_string()).collect(),
            macs: self.macs.iter().map(|mac| mac.to_string()).collect(),
            external: self.external,
            router: self.router,
        }
    }
}

/// The output shape of a host, shared by the JSON and text renderers.
#[derive(Debug, Clone, Serialize)]
pub struct HostProjection {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub os: BTreeMap<String, f64>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<HostnameRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceEndpoint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advertised_services: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub macs: Vec<String>,

    pub external: bool,
    pub router: bool,
}

impl HostProjection {
    /// Render the host as a key=value block.
    pub fn write_text(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "external={}", self.external)?;
        writeln!(out, "router={}", self.router)?;

        for ip in &self.ips {
            writeln!(out, "ip={ip}")?;
        }
        for mac in &self.macs {
            writeln!(out, "mac={mac}")?;
        }

        if !self.os.is_empty() {
            let parts: Vec<String> = self
                .os
                .iter()
                .map(|(label, p)| format!("{label}:{p:.3}"))
                .collect();
            writeln!(out, "os={}", parts.join(","))?;
        }
        if !self.services.is_empty() {
            let parts: Vec<String> = self
                .services
                .iter()
                .map(|s| {
                    format!(
                        "{}/{}",
                        match s.transport {
                            TransportLayer::Tcp => "tcp",
                            TransportLayer::Udp => "udp",
                        },
                        s.port
                    )
                })
                .collect();
            writeln!(out, "services={}", parts.join(","))?;
        }
        if !self.advertised_services.is_empty() {
            let parts: Vec<String> = self
                .advertised_services
                .iter()
                .map(|s| format!("{s:?}"))
                .collect();
            writeln!(out, "advertised-services={}", parts.join(","))?;
        }
        if !self.hostnames.is_empty() {
            let parts: Vec<String> = self
                .hostnames
                .iter()
                .map(|h| format!("{:?} ({})", h.name, h.record_type))
                .collect();
            writeln!(out, "hostnames={}", parts.join(","))?;
        }
        if !self.nameservers.is_empty() {
            let parts: Vec<String> = self.nameservers.iter().map(|s| format!("{s:?}")).collect();
            writeln!(out, "nameservers={}", parts.join(","))?;
        }
        if !self.routers.is_empty() {
            let parts: Vec<String> = self.routers.iter().map(|s| format!("{s:?}")).collect();
            writeln!(out, "routers={}", parts.join(","))?;
        }

        writeln!(out)
    }
}
