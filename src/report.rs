use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::ranking::Kv;

/// Latency distribution over the sampled slow calls, in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyPercentiles {
    pub median: i64,
    pub p_999: i64,
    pub p_99: i64,
    pub p_95: i64,
    pub p_90: i64,
    pub p_85: i64,
    pub p_80: i64,
    pub p_75: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficCounters {
    pub packet_sum: u64,
    #[serde(rename = "new_connect_num")]
    pub new_connections: u64,
    #[serde(rename = "close_connect_num")]
    pub closed_connections: u64,
    #[serde(rename = "discard_packet_sum")]
    pub discarded_packets: u64,
    #[serde(rename = "unroutable_packet_sum")]
    pub unroutable_packets: u64,
    #[serde(rename = "unrelated_packet_sum")]
    pub unrelated_packets: u64,
    #[serde(rename = "malformed_command_sum")]
    pub malformed_commands: u64,
    #[serde(rename = "pending_evicted_sum")]
    pub pending_evicted: u64,
    #[serde(rename = "monitor_start_time")]
    pub monitor_start_us: i64,
    #[serde(rename = "monitor_end_time")]
    pub monitor_end_us: i64,
}

/// Final result of one analysis run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HotKeySummary {
    #[serde(rename = "active_processed")]
    pub active_connections: u64,
    #[serde(rename = "total_sum")]
    pub total_requests: u64,
    #[serde(rename = "total_access_time")]
    pub total_latency_us: i64,
    #[serde(rename = "commands_sec")]
    pub commands_per_sec: f64,
    pub top_prefixes: Vec<Kv>,
    pub top_keys: Vec<Kv>,
    pub top_commands: Vec<Kv>,
    pub heaviest_commands: Vec<Kv>,
    #[serde(rename = "slowest_calls")]
    pub slow_calls: Vec<Kv>,
    #[serde(rename = "ipv4_call")]
    pub peers: Vec<Kv>,
    #[serde(flatten)]
    pub latency: LatencyPercentiles,
    #[serde(flatten)]
    pub counters: TrafficCounters,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

impl HotKeySummary {
    /// Flat key/value view handed to callers for display or serialization
    pub fn to_snapshot(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

fn write_ranked(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    column: &str,
    entries: &[Kv],
) -> fmt::Result {
    writeln!(f, "\n{} ({})", title, entries.len())?;
    if entries.is_empty() {
        return writeln!(f, "  (none)");
    }
    writeln!(f, "{:<6} {:<60} {:>14}", "Rank", "Key", column)?;
    writeln!(f, "{}", "─".repeat(82))?;
    for (rank, kv) in entries.iter().enumerate() {
        writeln!(f, "{:<6} {:<60} {:>14}", rank + 1, kv.key, kv.value)?;
    }
    Ok(())
}

impl fmt::Display for HotKeySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        let l = &self.latency;

        writeln!(f, "=== Redis Hot Key Statistics ===")?;
        if self.interrupted {
            writeln!(f, "(interrupted, partial results)")?;
        }
        writeln!(f, "Window: {} - {} (us)", c.monitor_start_us, c.monitor_end_us)?;
        writeln!(f, "Requests: {} ({:.3}/sec)", self.total_requests, self.commands_per_sec)?;
        writeln!(f, "Total Access Time: {} us", self.total_latency_us)?;
        writeln!(
            f,
            "Packets: {} processed, {} discarded, {} unroutable, {} unrelated",
            c.packet_sum, c.discarded_packets, c.unroutable_packets, c.unrelated_packets
        )?;
        writeln!(
            f,
            "Connections: {} active, {} new, {} closed",
            self.active_connections, c.new_connections, c.closed_connections
        )?;
        writeln!(
            f,
            "Malformed commands: {}, Pending requests evicted: {}",
            c.malformed_commands, c.pending_evicted
        )?;
        writeln!(
            f,
            "Latency (μs): p50={} p75={} p80={} p85={} p90={} p95={} p99={} p999={}",
            l.median, l.p_75, l.p_80, l.p_85, l.p_90, l.p_95, l.p_99, l.p_999
        )?;

        write_ranked(f, "Top Keys", "Hits", &self.top_keys)?;
        write_ranked(f, "Top Prefixes", "Hits", &self.top_prefixes)?;
        write_ranked(f, "Top Commands", "Calls", &self.top_commands)?;
        write_ranked(f, "Heaviest Commands", "Total μs", &self.heaviest_commands)?;
        write_ranked(f, "Slowest Calls", "μs", &self.slow_calls)?;
        write_ranked(f, "Busiest Clients", "Requests", &self.peers)
    }
}
