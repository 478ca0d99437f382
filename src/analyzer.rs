use tracing::debug;

use crate::ranking::{Kv, rank_ascending, rank_descending};
use crate::report::{HotKeySummary, LatencyPercentiles, TrafficCounters};
use crate::stats::GlobalStats;

/// Nearest-rank index: `floor(fraction * len)`, valid for any non-empty sample
fn rank_index(fraction: f64, len: usize) -> usize {
    ((fraction * len as f64) as usize).min(len.saturating_sub(1))
}

/// Percentiles over a sample already sorted ascending by latency
pub fn percentiles(ascending: &[Kv]) -> LatencyPercentiles {
    if ascending.is_empty() {
        return LatencyPercentiles::default();
    }
    let at = |fraction: f64| ascending[rank_index(fraction, ascending.len())].value;

    LatencyPercentiles {
        median: at(0.5),
        p_999: at(0.999),
        p_99: at(0.99),
        p_95: at(0.95),
        p_90: at(0.90),
        p_85: at(0.85),
        p_80: at(0.80),
        p_75: at(0.75),
    }
}

/// Requests per second over the monitor window, rounded to 3 decimals
pub fn throughput(total_requests: u64, start_us: i64, end_us: i64) -> f64 {
    let elapsed_secs = (end_us - start_us) as f64 / 1_000_000.0;
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    round3(total_requests as f64 / elapsed_secs)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Rank, cut and annotate merged statistics
pub fn analyze(stats: GlobalStats, top_n: usize) -> HotKeySummary {
    // Top keys keep one entry beyond N
    let top_keys = stats.key_hits.into_bounded(top_n.saturating_add(1));

    let mut slow_calls = stats.slow_calls;
    rank_ascending(&mut slow_calls);
    let latency = percentiles(&slow_calls);
    rank_descending(&mut slow_calls);
    slow_calls.truncate(top_n);

    let commands_per_sec = throughput(
        stats.total_requests,
        stats.monitor_start_us,
        stats.monitor_end_us,
    );
    debug!(
        "Analyzed {} requests: {:.3}/sec, median latency {}us",
        stats.total_requests, commands_per_sec, latency.median
    );

    HotKeySummary {
        active_connections: stats.active_connections,
        total_requests: stats.total_requests,
        total_latency_us: stats.total_latency_us,
        commands_per_sec,
        top_prefixes: stats.prefixes.into_ranked(top_n),
        top_keys,
        top_commands: stats.commands.into_ranked(top_n),
        heaviest_commands: stats.heaviest_commands.into_ranked(top_n),
        slow_calls,
        peers: stats.peers.into_ranked(top_n),
        latency,
        counters: TrafficCounters {
            packet_sum: stats.packet_sum,
            new_connections: stats.new_connections,
            closed_connections: stats.closed_connections,
            discarded_packets: stats.discarded_packets,
            unroutable_packets: stats.unroutable_packets,
            unrelated_packets: stats.unrelated_packets,
            malformed_commands: stats.malformed_commands,
            pending_evicted: stats.pending_evicted,
            monitor_start_us: stats.monitor_start_us,
            monitor_end_us: stats.monitor_end_us,
        },
        interrupted: false,
    }
}
