//! End-to-end pipeline tests: a synthetic pcap savefile is captured,
//! deduplicated, and folded into host records.

use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;

use netrecon::capture::process_input;
use netrecon::config::ReconConfig;
use netrecon::dedup::dedup_stage;
use netrecon::fingerprint::SignatureDb;
use netrecon::inference::InferenceEngine;

const FINGERPRINTS: &str = "\
; test database
[tcp:request]
label = s:unix:Linux:test
sig   = *:64:0:*:64240,7:mss,nop,ws,sok,eol+1:df,id+:0
";

fn eth(ethertype: u16) -> Vec<u8> {
    let mut f = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // dst
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src
    ];
    f.extend_from_slice(&ethertype.to_be_bytes());
    f
}

fn ipv4(src: [u8; 4], dst: [u8; 4], proto: u8, payload: &[u8]) -> Vec<u8> {
    let total = 20 + payload.len() as u16;
    let mut h = vec![0x45, 0x00];
    h.extend_from_slice(&total.to_be_bytes());
    h.extend_from_slice(&[0x12, 0x34]); // id
    h.extend_from_slice(&[0x40, 0x00]); // DF
    h.push(64); // ttl
    h.push(proto);
    h.extend_from_slice(&[0x00, 0x00]); // checksum (unvalidated)
    h.extend_from_slice(&src);
    h.extend_from_slice(&dst);
    h.extend_from_slice(payload);
    h
}

fn udp(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut u = Vec::new();
    u.extend_from_slice(&src_port.to_be_bytes());
    u.extend_from_slice(&dst_port.to_be_bytes());
    u.extend_from_slice(&(8 + payload.len() as u16).to_be_bytes());
    u.extend_from_slice(&[0, 0]); // checksum
    u.extend_from_slice(payload);
    u
}

fn arp_reply(sender_mac: [u8; 6], sender_ip: [u8; 4], target_mac: [u8; 6], target_ip: [u8; 4]) -> Vec<u8> {
    let mut frame = eth(0x0806);
    frame.extend_from_slice(&[0, 1]); // ethernet
    frame.extend_from_slice(&[0x08, 0x00]); // ipv4
    frame.extend_from_slice(&[6, 4]);
    frame.extend_from_slice(&[0, 2]); // reply
    frame.extend_from_slice(&sender_mac);
    frame.extend_from_slice(&sender_ip);
    frame.extend_from_slice(&target_mac);
    frame.extend_from_slice(&target_ip);
    frame
}

// SYN with mss/nop/ws/sok options and an explicit EOL with one padding
// byte, shaped to match the test fingerprint.
fn tcp_syn(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
    let mut tcp = Vec::new();
    tcp.extend_from_slice(&40000u16.to_be_bytes());
    tcp.extend_from_slice(&80u16.to_be_bytes());
    tcp.extend_from_slice(&1u32.to_be_bytes()); // seq
    tcp.extend_from_slice(&0u32.to_be_bytes()); // ack
    tcp.push(8 << 4);
    tcp.push(0x02); // SYN
    tcp.extend_from_slice(&64240u16.to_be_bytes());
    tcp.extend_from_slice(&[0, 0, 0, 0]); // checksum, urgent
    tcp.extend_from_slice(&[2, 4, 0x05, 0xb4, 1, 3, 3, 7, 4, 2, 0, 0]);

    let mut frame = eth(0x0800);
    frame.extend(ipv4(src, dst, 6, &tcp));
    frame
}

fn tcp_syn_ack(src: [u8; 4], src_port: u16, dst: [u8; 4]) -> Vec<u8> {
    let mut tcp = Vec::new();
    tcp.extend_from_slice(&src_port.to_be_bytes());
    tcp.extend_from_slice(&40000u16.to_be_bytes());
    tcp.extend_from_slice(&77u32.to_be_bytes()); // seq
    tcp.extend_from_slice(&2u32.to_be_bytes()); // ack
    tcp.push(5 << 4);
    tcp.push(0x12); // SYN+ACK
    tcp.extend_from_slice(&64240u16.to_be_bytes());
    tcp.extend_from_slice(&[0, 0, 0, 0]);

    let mut frame = eth(0x0800);
    frame.extend(ipv4(src, dst, 6, &tcp));
    frame
}

fn dhcp_ack(client_mac: [u8; 6], your_ip: [u8; 4]) -> Vec<u8> {
    let mut msg = vec![0u8; 236];
    msg[0] = 2; // BOOTREPLY
    msg[1] = 1;
    msg[2] = 6;
    msg[16..20].copy_from_slice(&your_ip);
    msg[28..34].copy_from_slice(&client_mac);
    msg.extend_from_slice(&[99, 130, 83, 99]);
    for (code, data) in [
        (53u8, &[5u8][..]),                    // ack
        (1, &[255, 255, 255, 0][..]),          // subnet mask
        (3, &[10, 0, 0, 1][..]),               // router
        (6, &[8, 8, 8, 8][..]),                // dns
        (12, b"Workstation".as_slice()),       // hostname
        (15, b"lab.example".as_slice()),       // domain
    ] {
        msg.push(code);
        msg.push(data.len() as u8);
        msg.extend_from_slice(data);
    }
    msg.push(255);

    let mut frame = eth(0x0800);
    frame.extend(ipv4([10, 0, 0, 9], [255, 255, 255, 255], 17, &udp(67, 68, &msg)));
    frame
}

fn dns_query(src: [u8; 4], server: [u8; 4]) -> Vec<u8> {
    let mut q = vec![0x12, 0x34, 0x00, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
    for label in ["example", "com"] {
        q.push(label.len() as u8);
        q.extend_from_slice(label.as_bytes());
    }
    q.push(0);
    q.extend_from_slice(&[0, 1, 0, 1]);

    let mut frame = eth(0x0800);
    frame.extend(ipv4(src, server, 17, &udp(5555, 53, &q)));
    frame
}

fn savefile(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&65535u32.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes()); // ethernet
    for frame in frames {
        for v in [0u32, 0, frame.len() as u32, frame.len() as u32] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(frame);
    }
    bytes
}

const MAC1: [u8; 6] = [0x00, 0x01, 0x02, 0x03, 0x04, 0x01];
const MAC2: [u8; 6] = [0x00, 0x01, 0x02, 0x03, 0x04, 0x02];

#[tokio::test]
async fn pcap_to_host_report() {
    let frames = vec![
        arp_reply(MAC1, [10, 0, 0, 1], MAC2, [10, 0, 0, 2]),
        tcp_syn([10, 0, 0, 2], [10, 0, 0, 3]),
        tcp_syn([10, 0, 0, 2], [10, 0, 0, 3]),
        tcp_syn_ack([10, 0, 0, 3], 443, [10, 0, 0, 2]),
        dhcp_ack(MAC2, [10, 0, 0, 2]),
        dns_query([10, 0, 0, 2], [8, 8, 8, 8]),
    ];

    let mut capture_file = tempfile::NamedTempFile::new().expect("tempfile");
    capture_file.write_all(&savefile(&frames)).expect("write");

    let mut fp_file = tempfile::NamedTempFile::new().expect("tempfile");
    fp_file.write_all(FINGERPRINTS.as_bytes()).expect("write");

    let config = ReconConfig::new()
        .with_input(capture_file.path().to_string_lossy())
        .with_fingerprints(fp_file.path())
        .with_all_analyzers();

    let sigs = Arc::new(
        SignatureDb::load(config.fingerprints.as_ref().expect("path")).expect("fingerprints"),
    );
    assert_eq!(sigs.len(), 1);

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let dedup = tokio::spawn(dedup_stage(raw_rx, event_tx, 1024));

    let opts = config.decode_options();
    let input = config.inputs[0].clone();
    let capture_sigs = sigs.clone();
    let capture = tokio::task::spawn_blocking(move || {
        let cancel = AtomicBool::new(false);
        process_input(&input, &opts, &capture_sigs, &raw_tx, &cancel)
    });

    let mut engine = InferenceEngine::new();
    engine.run(event_rx).await;

    let stats = capture.await.expect("join").expect("capture");
    dedup.await.expect("dedup");
    assert_eq!(stats.packets, 6);
    assert_eq!(stats.decode_failures(), 0);

    let hosts = engine.projections();
    // MAC1, MAC2, and the external server 10.0.0.3.
    assert_eq!(hosts.len(), 3);

    let router = &hosts[0];
    assert_eq!(router.macs, vec!["00:01:02:03:04:01".to_string()]);
    assert_eq!(router.ips, vec!["10.0.0.1".to_string()]);
    assert!(router.router, "dhcp router option must flag the gateway host");
    assert!(!router.external);

    let workstation = &hosts[1];
    assert_eq!(workstation.macs, vec!["00:01:02:03:04:02".to_string()]);
    assert_eq!(workstation.ips, vec!["10.0.0.2".to_string()]);
    assert!(!workstation.external);
    // SYN matched the fingerprint (twice, deduplicated to weight 2).
    assert!((workstation.os["s:unix:Linux:test"] - 1.0).abs() < 1e-9);
    // DHCP: lowercased hostname joined with the domain.
    assert_eq!(workstation.hostnames[0].name, "workstation.lab.example");
    // Nameserver learned both from DHCP options and the DNS query.
    assert_eq!(workstation.nameservers, vec!["8.8.8.8".to_string()]);
    assert_eq!(workstation.routers, vec!["10.0.0.1/24".to_string()]);

    let server = &hosts[2];
    assert!(server.external);
    assert_eq!(server.ips, vec!["10.0.0.3".to_string()]);
    assert_eq!(server.services.len(), 1);
    assert_eq!(server.services[0].port, 443);

    // The DHCP subnet landed in the tracker.
    assert_eq!(
        engine.subnets.subnet_of(std::net::Ipv4Addr::new(10, 0, 0, 200)),
        Some("10.0.0.0/24".parse().expect("network"))
    );
}

#[tokio::test]
async fn report_renders_identically_in_text_and_json() {
    let frames = vec![arp_reply(MAC1, [10, 0, 0, 1], MAC2, [10, 0, 0, 2])];

    let mut capture_file = tempfile::NamedTempFile::new().expect("tempfile");
    capture_file.write_all(&savefile(&frames)).expect("write");

    let config = ReconConfig::new()
        .with_input(capture_file.path().to_string_lossy())
        .with_all_analyzers();

    let sigs = Arc::new(SignatureDb::default());
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let dedup = tokio::spawn(dedup_stage(raw_rx, event_tx, 1024));

    let opts = config.decode_options();
    let input = config.inputs[0].clone();
    let capture_sigs = sigs.clone();
    let capture = tokio::task::spawn_blocking(move || {
        let cancel = AtomicBool::new(false);
        process_input(&input, &opts, &capture_sigs, &raw_tx, &cancel)
    });

    let mut engine = InferenceEngine::new();
    engine.run(event_rx).await;
    capture.await.expect("join").expect("capture");
    dedup.await.expect("dedup");

    let projections = engine.projections();
    assert_eq!(projections.len(), 2);

    let json = serde_json::to_value(&projections).expect("json");
    let mut text = Vec::new();
    for host in &projections {
        host.write_text(&mut text).expect("text");
    }
    let text = String::from_utf8(text).expect("utf8");

    for host in json.as_array().expect("array") {
        for ip in host["ips"].as_array().expect("ips") {
            assert!(text.contains(&format!("ip={}", ip.as_str().expect("str"))));
        }
        for mac in host["macs"].as_array().expect("macs") {
            assert!(text.contains(&format!("mac={}", mac.as_str().expect("str"))));
        }
    }
}
