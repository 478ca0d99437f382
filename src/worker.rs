use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crossbeam::channel::{Receiver, select};
use dashmap::DashSet;
use tracing::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::config::{AnalyzerConfig, KEY_SEPARATORS};
use crate::correlator::{ConnectionIdentity, Correlator};
use crate::extract::{SkipReason, extract_request, is_auth, key_prefixes};
use crate::packet::{Conversation, RawPacket};
use crate::sink::{CommandRecord, CommandRecorder};
use crate::stats::ShardStats;

/// Packets between expiry sweeps of the correlation table
const SWEEP_INTERVAL_PACKETS: u64 = 4096;

/// Connections seen opening towards the monitored port, shared by all shards
pub type ActiveConnections = Arc<DashSet<Conversation>>;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub monitored_port: u16,
    pub host_ip: IpAddr,
    pub max_key_length: usize,
    pub pending_ttl_us: i64,
}

impl From<&AnalyzerConfig> for WorkerSettings {
    fn from(config: &AnalyzerConfig) -> Self {
        Self {
            monitored_port: config.monitored_port,
            host_ip: config.host_ip,
            max_key_length: config.max_key_length,
            pending_ttl_us: config.pending_ttl_us(),
        }
    }
}

#[derive(Debug)]
pub struct ShardOutcome {
    pub shard_id: usize,
    pub stats: ShardStats,
    pub cancelled: bool,
}

/// One shard: exclusive owner of its statistics and correlation table
pub struct ShardWorker {
    id: usize,
    settings: WorkerSettings,
    stats: ShardStats,
    correlator: Correlator,
    active: ActiveConnections,
    recorder: Option<CommandRecorder>,
}

impl ShardWorker {
    pub fn new(
        id: usize,
        settings: WorkerSettings,
        active: ActiveConnections,
        recorder: Option<CommandRecorder>,
    ) -> Self {
        let correlator = Correlator::new(settings.pending_ttl_us);
        Self {
            id,
            settings,
            stats: ShardStats::new(),
            correlator,
            active,
            recorder,
        }
    }

    /// Consume the shard queue until it is closed (drain) or the run is cancelled (abandon)
    pub fn run(mut self, queue: Receiver<RawPacket>, cancel: &CancelToken) -> ShardOutcome {
        info!("Shard {} started", self.id);

        let cancelled = loop {
            select! {
                recv(queue) -> msg => match msg {
                    Ok(packet) => self.process(&packet),
                    Err(_) => break false,
                },
                recv(cancel.signal()) -> _ => break true,
            }
        };

        if cancelled {
            info!("Shard {} cancelled, {} packets left unprocessed", self.id, queue.len());
        } else {
            info!("Shard {} finished", self.id);
        }

        ShardOutcome {
            shard_id: self.id,
            cancelled,
            stats: self.into_stats(),
        }
    }

    pub fn stats(&self) -> &ShardStats {
        &self.stats
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.len()
    }

    pub fn into_stats(mut self) -> ShardStats {
        self.stats.pending_evicted = self.correlator.evicted();
        debug!(
            "Shard {}: {} requests still pending at shutdown",
            self.id,
            self.correlator.len()
        );
        self.stats
    }

    /// Classify one packet and update shard statistics
    pub fn process(&mut self, packet: &RawPacket) {
        self.stats.packet_sum += 1;

        let (Some(network), Some(tcp)) = (packet.network, packet.tcp) else {
            return;
        };
        let port = self.settings.monitored_port;
        if tcp.source_port != port && tcp.destination_port != port {
            return;
        }

        let source = SocketAddr::new(network.source, tcp.source_port);
        let destination = SocketAddr::new(network.destination, tcp.destination_port);
        let from_server = tcp.source_port == port;
        let conversation = if from_server {
            Conversation::new(destination, source)
        } else {
            Conversation::new(source, destination)
        };
        let flags = tcp.flags;

        if flags.fin() {
            self.stats.closed_connections += 1;
            if from_server {
                self.correlator.evict_conversation(&conversation);
            }
        } else if flags.syn() {
            self.stats.new_connections += 1;
            if tcp.destination_port == port && self.active.insert(conversation) {
                self.stats.active_connections += 1;
            }
        } else if flags.rst() {
            debug!("RST Src: {} Dst: {}", source, destination);
            let evicted = self.correlator.evict_conversation(&conversation);
            if evicted > 0 {
                debug!("Dropped {} pending requests of reset connection {}", evicted, conversation);
            }
        } else if flags.psh() && flags.ack() {
            trace!("PSH+ACK Src: {} Dst: {}", source, destination);
            if from_server {
                self.correlate_response(conversation, tcp.sequence, packet.timestamp_us);
            }
        } else {
            trace!("{} Src: {} Dst: {}", flags, source, destination);
        }

        if !packet.payload.is_empty()
            && tcp.destination_port == port
            && network.destination == self.settings.host_ip
        {
            self.account_request(packet, conversation, tcp.acknowledgement);
        }

        if self.stats.packet_sum % SWEEP_INTERVAL_PACKETS == 0 {
            let expired = self.correlator.sweep_expired(packet.timestamp_us);
            if expired > 0 {
                debug!("Shard {} expired {} pending requests", self.id, expired);
            }
        }
    }

    fn correlate_response(&mut self, conversation: Conversation, sequence: u32, received_us: i64) {
        let identity = ConnectionIdentity::new(conversation, sequence);
        let Some(request) = self.correlator.resolve(&identity) else {
            self.stats.discarded_packets += 1;
            trace!("No pending request for response {}", identity);
            return;
        };

        let command = request.label.split(' ').next().unwrap_or("");
        if is_auth(command) {
            return;
        }

        let latency = received_us - request.sent_at_us;
        if latency < 0 {
            debug!(
                "Response {} precedes its request by {}us, discarding",
                identity, -latency
            );
            self.stats.discarded_packets += 1;
            return;
        }

        self.stats.total_latency_us += latency;
        self.stats.heaviest_commands.add(command, latency);
        self.stats.record_slow_call(&request.label, latency);
    }

    fn account_request(
        &mut self,
        packet: &RawPacket,
        conversation: Conversation,
        acknowledgement: u32,
    ) {
        let text = String::from_utf8_lossy(&packet.payload);
        let request = match extract_request(&text, self.settings.max_key_length) {
            Ok(request) => request,
            Err(reason @ SkipReason::Truncated { .. }) => {
                warn!("skip command from {}: {}", conversation.client, reason);
                self.stats.malformed_commands += 1;
                return;
            }
            Err(reason) => {
                trace!("skip command from {}: {}", conversation.client, reason);
                return;
            }
        };

        if let Some(recorder) = &self.recorder {
            recorder.record(CommandRecord {
                full_cmd: request.full_command.clone(),
                receive_time: packet.timestamp_us,
                src: conversation.client.to_string(),
                dst: conversation.server.to_string(),
            });
        }

        self.stats.total_requests += 1;

        let label = request.label();
        let identity = ConnectionIdentity::new(conversation, acknowledgement);
        self.correlator.record(identity, label.clone(), packet.timestamp_us);

        self.stats.commands.increment(&request.command);
        self.stats.peers.increment(&conversation.client.ip().to_string());
        for prefix in key_prefixes(&request.full_key, KEY_SEPARATORS) {
            self.stats.prefixes.increment(prefix);
        }
        self.stats.key_hits.increment(&label);
    }
}
