use tracing::info;

use crate::config::SLOW_CALL_CAPACITY;
use crate::ranking::{BoundedTopK, Kv, KvCounter};

/// Statistics owned and mutated by a single shard worker
#[derive(Debug, Clone)]
pub struct ShardStats {
    pub packet_sum: u64,
    pub active_connections: u64,
    pub new_connections: u64,
    pub closed_connections: u64,
    pub discarded_packets: u64,
    pub malformed_commands: u64,
    pub pending_evicted: u64,
    pub total_requests: u64,
    pub total_latency_us: i64,

    pub prefixes: KvCounter,
    pub commands: KvCounter,
    pub heaviest_commands: KvCounter,
    pub peers: KvCounter,
    pub key_hits: KvCounter, // "command key" composites, ranked only at analysis time

    pub slow_calls: BoundedTopK<Kv>,
}

impl Default for ShardStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardStats {
    pub fn new() -> Self {
        Self {
            packet_sum: 0,
            active_connections: 0,
            new_connections: 0,
            closed_connections: 0,
            discarded_packets: 0,
            malformed_commands: 0,
            pending_evicted: 0,
            total_requests: 0,
            total_latency_us: 0,
            prefixes: KvCounter::new(),
            commands: KvCounter::new(),
            heaviest_commands: KvCounter::new(),
            peers: KvCounter::new(),
            key_hits: KvCounter::new(),
            slow_calls: BoundedTopK::new(SLOW_CALL_CAPACITY),
        }
    }

    pub fn record_slow_call(&mut self, label: &str, latency_us: i64) {
        self.slow_calls.push(Kv::new(label, latency_us));
    }
}

/// Merge target for all shards; derived fields are filled in by the analyzer
#[derive(Debug, Clone, Default)]
pub struct GlobalStats {
    pub packet_sum: u64,
    pub unroutable_packets: u64,
    pub unrelated_packets: u64,
    pub active_connections: u64,
    pub new_connections: u64,
    pub closed_connections: u64,
    pub discarded_packets: u64,
    pub malformed_commands: u64,
    pub pending_evicted: u64,
    pub total_requests: u64,
    pub total_latency_us: i64,

    pub prefixes: KvCounter,
    pub commands: KvCounter,
    pub heaviest_commands: KvCounter,
    pub peers: KvCounter,
    pub key_hits: KvCounter,

    pub slow_calls: Vec<Kv>,

    pub monitor_start_us: i64,
    pub monitor_end_us: i64,
}

impl GlobalStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one shard in. Counters sum, label maps merge by label, slow-call
    /// samples concatenate; the result does not depend on merge order.
    pub fn merge_shard(&mut self, shard: ShardStats) {
        self.packet_sum += shard.packet_sum;
        self.active_connections += shard.active_connections;
        self.new_connections += shard.new_connections;
        self.closed_connections += shard.closed_connections;
        self.discarded_packets += shard.discarded_packets;
        self.malformed_commands += shard.malformed_commands;
        self.pending_evicted += shard.pending_evicted;
        self.total_requests += shard.total_requests;
        self.total_latency_us += shard.total_latency_us;

        self.prefixes.merge(shard.prefixes);
        self.commands.merge(shard.commands);
        self.heaviest_commands.merge(shard.heaviest_commands);
        self.peers.merge(shard.peers);
        self.key_hits.merge(shard.key_hits);

        self.slow_calls.extend(shard.slow_calls.into_vec());
    }
}

/// Join-barrier side of the pipeline: merge every finished shard into one view
pub fn aggregate(shards: Vec<ShardStats>) -> GlobalStats {
    let mut global = GlobalStats::new();
    for (shard_id, shard) in shards.into_iter().enumerate() {
        info!(
            "Merging shard {}: {} packets, {} requests, {} distinct keys",
            shard_id,
            shard.packet_sum,
            shard.total_requests,
            shard.key_hits.len()
        );
        global.merge_shard(shard);
    }
    global
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::rank_ascending;

    fn shard(commands: &[(&str, i64)], latencies: &[i64]) -> ShardStats {
        let mut stats = ShardStats::new();
        for (command, count) in commands {
            stats.commands.add(command, *count);
            stats.total_requests += *count as u64;
            stats.packet_sum += *count as u64;
        }
        for latency in latencies {
            stats.record_slow_call("GET k", *latency);
            stats.total_latency_us += latency;
        }
        stats
    }

    #[test]
    fn test_disjoint_merge_is_union() {
        let global = aggregate(vec![shard(&[("GET", 2)], &[10]), shard(&[("SET", 3)], &[20])]);

        assert_eq!(global.commands.get("GET"), Some(2));
        assert_eq!(global.commands.get("SET"), Some(3));
        assert_eq!(global.total_requests, 5);
        assert_eq!(global.total_latency_us, 30);
        assert_eq!(global.slow_calls.len(), 2);
    }

    #[test]
    fn test_overlapping_merge_sums_in_any_order() {
        let a = || shard(&[("GET", 2), ("DEL", 1)], &[5, 15]);
        let b = || shard(&[("GET", 4)], &[7]);
        let c = || shard(&[("DEL", 9)], &[]);

        let forward = aggregate(vec![a(), b(), c()]);
        let backward = aggregate(vec![c(), b(), a()]);

        assert_eq!(forward.commands, backward.commands);
        assert_eq!(forward.commands.get("GET"), Some(6));
        assert_eq!(forward.commands.get("DEL"), Some(10));
        assert_eq!(forward.packet_sum, backward.packet_sum);

        let mut f = forward.slow_calls.clone();
        let mut b = backward.slow_calls.clone();
        rank_ascending(&mut f);
        rank_ascending(&mut b);
        assert_eq!(f, b);
    }

    #[test]
    fn test_shard_slow_calls_are_bounded() {
        let mut stats = ShardStats::new();
        for latency in 0..(SLOW_CALL_CAPACITY as i64 + 250) {
            stats.record_slow_call("GET k", latency);
        }
        assert_eq!(stats.slow_calls.len(), SLOW_CALL_CAPACITY);
        assert_eq!(stats.slow_calls.min().map(|kv| kv.value), Some(250));
    }
}
