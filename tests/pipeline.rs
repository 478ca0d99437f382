use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use redis_hotkey::sink::CommandRecord;
use redis_hotkey::{
    AnalyzerConfig, CancelToken, HotKeySummary, Kv, RawPacket, ReplaySource, TcpFlags,
    show_hot_keys,
};

const SERVER: &str = "10.0.0.1:6379";

fn resp(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len());
    for arg in args {
        out.push_str(&format!("${}\r\n{}\r\n", arg.len(), arg));
    }
    out.into_bytes()
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn request(ts: i64, client: &str, ack: u32, args: &[&str]) -> RawPacket {
    RawPacket::tcp_segment(
        ts,
        addr(client),
        addr(SERVER),
        TcpFlags::PSH | TcpFlags::ACK,
        100,
        ack,
        &resp(args),
    )
}

fn response(ts: i64, client: &str, seq: u32) -> RawPacket {
    RawPacket::tcp_segment(
        ts,
        addr(SERVER),
        addr(client),
        TcpFlags::PSH | TcpFlags::ACK,
        seq,
        200,
        b"$3\r\nbar\r\n",
    )
}

fn config(shards: usize) -> AnalyzerConfig {
    let mut config = AnalyzerConfig::new(6379, "10.0.0.1".parse().unwrap());
    config.capture_duration = Duration::from_secs(30);
    config.shard_count = shards;
    config.top_n = 10;
    config
}

fn run(config: &AnalyzerConfig, packets: Vec<RawPacket>) -> HotKeySummary {
    show_hot_keys(config, ReplaySource::new(packets), &CancelToken::new()).unwrap()
}

/// Three clients exchanging request/response pairs, interleaved by time
fn traffic() -> Vec<RawPacket> {
    let clients = ["10.0.0.7:50000", "10.0.0.8:50001", "10.0.0.9:50002"];
    let mut packets = Vec::new();

    for (i, client) in clients.iter().enumerate() {
        let syn = RawPacket::tcp_segment(0, addr(client), addr(SERVER), TcpFlags::SYN, 0, 0, b"");
        packets.push(syn);

        let base = 1_000_000 + i as i64 * 10;
        packets.push(request(base, client, 1, &["GET", "user:1001"]));
        packets.push(response(base + 100 * (i as i64 + 1), client, 1));
        packets.push(request(base + 1_000_000, client, 2, &["SET", "session:abc", "v"]));
        packets.push(response(base + 1_000_050, client, 2));
    }

    packets.sort_by_key(|p| p.timestamp_us);
    packets
}

#[test]
fn test_summary_over_replayed_traffic() {
    let summary = run(&config(4), traffic());

    assert_eq!(summary.total_requests, 6);
    assert_eq!(summary.active_connections, 3);
    assert_eq!(summary.counters.new_connections, 3);
    assert_eq!(summary.counters.packet_sum, 15);
    assert_eq!(summary.counters.discarded_packets, 0);

    assert_eq!(summary.top_commands, vec![Kv::new("GET", 3), Kv::new("SET", 3)]);
    assert_eq!(
        summary.top_keys,
        vec![Kv::new("GET user:1001", 3), Kv::new("SET session:abc", 3)]
    );
    assert_eq!(summary.heaviest_commands, vec![Kv::new("GET", 600), Kv::new("SET", 150)]);
    assert_eq!(summary.total_latency_us, 750);

    let peers: Vec<&str> = summary.peers.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(peers, vec!["10.0.0.7", "10.0.0.8", "10.0.0.9"]);

    assert!(summary.top_prefixes.contains(&Kv::new("user", 3)));
    assert!(summary.top_prefixes.contains(&Kv::new("session:", 3)));

    let slow: Vec<i64> = summary.slow_calls.iter().map(|kv| kv.value).collect();
    assert_eq!(slow, vec![300, 200, 100, 50, 50, 50]);
    assert_eq!(summary.latency.median, 100);
    assert_eq!(summary.latency.p_999, 300);

    // Offline window spans the first and last routed packets
    assert_eq!(summary.counters.monitor_start_us, 0);
    assert_eq!(summary.counters.monitor_end_us, 2_000_070);
    assert!(!summary.interrupted);
}

#[test]
fn test_result_does_not_depend_on_shard_count() {
    let one = run(&config(1), traffic());
    let many = run(&config(7), traffic());

    assert_eq!(one.top_commands, many.top_commands);
    assert_eq!(one.top_keys, many.top_keys);
    assert_eq!(one.heaviest_commands, many.heaviest_commands);
    assert_eq!(one.slow_calls, many.slow_calls);
    assert_eq!(one.latency, many.latency);
    assert_eq!(one.counters, many.counters);
}

#[test]
fn test_foreign_and_unroutable_packets_are_counted() {
    let mut packets = traffic();
    packets.push(RawPacket::new(5, None, None, Vec::new()));
    packets.push(RawPacket::tcp_segment(
        6,
        addr("192.168.0.2:1234"),
        addr("192.168.0.3:6379"),
        TcpFlags::SYN,
        0,
        0,
        b"",
    ));
    packets.sort_by_key(|p| p.timestamp_us);

    let summary = run(&config(3), packets);
    assert_eq!(summary.counters.unroutable_packets, 1);
    assert_eq!(summary.counters.unrelated_packets, 1);
    assert_eq!(summary.counters.packet_sum, 15);
    assert_eq!(summary.total_requests, 6);
}

#[test]
fn test_command_log_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("commands.txt");
    let mut config = config(2);
    config.command_log = Some(path.clone());

    let summary = run(&config, traffic());
    assert_eq!(summary.total_requests, 6);

    let records: Vec<CommandRecord> = fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r.dst == SERVER));
    assert!(records.iter().any(|r| r.full_cmd == "SET session:abc v"));
    assert!(records.iter().any(|r| r.full_cmd == "GET user:1001" && r.src == "10.0.0.8:50001"));
}

#[test]
fn test_unwritable_command_log_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(2);
    config.command_log = Some(dir.path().join("missing").join("commands.txt"));

    let result = show_hot_keys(&config, ReplaySource::new(traffic()), &CancelToken::new());
    assert!(matches!(result, Err(redis_hotkey::AnalyzerError::CommandLog { .. })));
}

#[test]
fn test_snapshot_export() {
    let summary = run(&config(2), traffic());
    let snapshot = summary.to_snapshot();

    assert_eq!(snapshot["total_sum"], 6);
    assert_eq!(snapshot["top_commands"][0]["key"], "GET");
    assert_eq!(snapshot["slowest_calls"][0]["value"], 300);
    assert_eq!(snapshot["unrelated_packet_sum"], 0);
    assert!(snapshot.contains_key("p_999"));
    assert!(snapshot.contains_key("ipv4_call"));
}
