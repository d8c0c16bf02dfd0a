use clap::{Arg, ArgAction, Command};
use colored::*;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use netrecon::{
    capture,
    config::ReconConfig,
    dedup::dedup_stage,
    error::ReconError,
    fingerprint::SignatureDb,
    inference::InferenceEngine,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let matches = Command::new("netrecon")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Passive network reconnaissance: infer hosts, OSes, services, and subnets from captured traffic")
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Capture files or live interface names, processed in order")
                .required(true)
                .num_args(1..),
        )
        .arg(
            Arg::new("fingerprints")
                .short('p')
                .long("fingerprints")
                .value_name("FILE")
                .help("p0f fingerprint database for OS detection"),
        )
        .arg(
            Arg::new("dot1q")
                .long("dot1q")
                .help("Decode 802.1Q VLAN-tagged frames")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("icmp4")
                .long("icmp4")
                .help("Decode ICMPv4")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dns")
                .long("dns")
                .help("Decode DNS/mDNS for nameservers, hostnames, and advertised services")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("arp")
                .long("arp")
                .help("Decode ARP for MAC/IP neighbor pairs")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dhcp")
                .long("dhcp")
                .help("Decode DHCPv4 for host identity, subnets, and routers")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the host report to a file instead of stdout"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Emit the host report as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dedup-slots")
                .long("dedup-slots")
                .value_name("N")
                .help("Size of the event dedup table")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .get_matches();

    let mut config = ReconConfig::new();
    config.inputs = matches
        .get_many::<String>("input")
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    config.fingerprints = matches.get_one::<String>("fingerprints").map(Into::into);
    config.dot1q = matches.get_flag("dot1q");
    config.icmp4 = matches.get_flag("icmp4");
    config.dns = matches.get_flag("dns");
    config.arp = matches.get_flag("arp");
    config.dhcp = matches.get_flag("dhcp");
    config.hosts_out = matches.get_one::<String>("output").map(Into::into);
    config.json = matches.get_flag("json");
    if let Some(&slots) = matches.get_one::<u64>("dedup-slots") {
        config.dedup_slots = slots as usize;
    }

    run(config).await?;
    Ok(())
}

async fn run(config: ReconConfig) -> anyhow::Result<()> {
    let sigs = match &config.fingerprints {
        Some(path) => SignatureDb::load(path)
            .map_err(|e| anyhow::anyhow!("failed to load fingerprints: {e}"))?,
        None => SignatureDb::default(),
    };
    if sigs.is_empty() {
        log::warn!("no TCP fingerprints loaded, OS detection is disabled");
    }
    let sigs = Arc::new(sigs);

    // Ctrl-C sets the cancel flag; capture stops at the next packet or
    // timeout and the pipeline drains normally.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupt received, draining");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let dedup = tokio::spawn(dedup_stage(raw_rx, event_tx, config.dedup_slots));

    let opts = config.decode_options();
    let inputs = config.inputs.clone();
    let capture_sigs = sigs.clone();
    let capture_cancel = cancel.clone();
    let capture_task = tokio::task::spawn_blocking(move || {
        capture::process_inputs(&inputs, &opts, &capture_sigs, raw_tx, &capture_cancel)
    });

    let mut engine = InferenceEngine::new();
    engine.run(event_rx).await;

    let stats = capture_task.await??;
    dedup.await?;

    write_hosts(&engine, &config)?;

    println!(
        "{} {} packets processed, {} decode failures",
        "[✓]".bright_green(),
        stats.packets,
        stats.decode_failures()
    );
    println!(
        "{} {} hosts inferred, {} subnets learned",
        "[✓]".bright_green(),
        engine.host_count(),
        engine.subnets.len()
    );

    Ok(())
}

fn write_hosts(engine: &InferenceEngine, config: &ReconConfig) -> netrecon::Result<()> {
    let projections = engine.projections();

    let mut out: Box<dyn Write> = match &config.hosts_out {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout().lock()),
    };

    if config.json {
        serde_json::to_writer_pretty(&mut out, &projections)
            .map_err(|e| ReconError::Output(e.to_string()))?;
        writeln!(out)?;
    } else {
        for (index, host) in projections.iter().enumerate() {
            writeln!(out, "[{index}]")?;
            host.write_text(&mut out)?;
        }
    }

    Ok(())
}
