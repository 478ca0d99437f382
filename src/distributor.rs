use std::net::IpAddr;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, after, select};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{AnalyzerError, Result};
use crate::packet::{NetworkHeader, RawPacket};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Shard owning every packet exchanged with `peer`
pub fn shard_for(peer: &IpAddr, shard_count: usize) -> usize {
    fnv1a_32(peer.to_string().as_bytes()) as usize % shard_count
}

/// The endpoint that is not the monitored host, if the host is involved at all
pub fn peer_address(network: &NetworkHeader, host_ip: &IpAddr) -> Option<IpAddr> {
    if network.destination == *host_ip {
        Some(network.source)
    } else if network.source == *host_ip {
        Some(network.destination)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Capture window elapsed; shard queues were closed for draining
    Expired,
    /// Source ran dry before the window elapsed; treated like expiry
    Exhausted,
    /// Cancelled; buffered packets may have been abandoned
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct DistributorReport {
    pub outcome: WindowOutcome,
    pub routed: u64,
    pub unroutable: u64,
    pub unrelated: u64,
    pub per_shard: Vec<u64>,
    pub first_packet_us: Option<i64>,
    pub last_packet_us: Option<i64>,
}

impl DistributorReport {
    fn new(shard_count: usize) -> Self {
        Self {
            outcome: WindowOutcome::Expired,
            routed: 0,
            unroutable: 0,
            unrelated: 0,
            per_shard: vec![0; shard_count],
            first_packet_us: None,
            last_packet_us: None,
        }
    }
}

/// Routes packets to shard queues by peer address for the length of one capture window
pub struct Distributor {
    host_ip: IpAddr,
    shards: Vec<Sender<RawPacket>>,
    window: Duration,
}

impl Distributor {
    pub fn new(host_ip: IpAddr, shards: Vec<Sender<RawPacket>>, window: Duration) -> Result<Self> {
        if shards.is_empty() {
            return Err(AnalyzerError::InvalidConfig(
                "distributor needs at least one shard queue".to_string(),
            ));
        }
        Ok(Self {
            host_ip,
            shards,
            window,
        })
    }

    pub fn run(self, packets: &Receiver<RawPacket>, cancel: &CancelToken) -> DistributorReport {
        let mut report = DistributorReport::new(self.shards.len());
        let deadline = after(self.window);

        info!(
            "Distributing packets to {} shards for {:.1}s",
            self.shards.len(),
            self.window.as_secs_f64()
        );

        loop {
            select! {
                recv(packets) -> msg => match msg {
                    Ok(packet) => {
                        if !self.dispatch(packet, cancel, &mut report) {
                            info!("Distributor cancelled while forwarding");
                            report.outcome = WindowOutcome::Cancelled;
                            return report;
                        }
                    }
                    Err(_) => {
                        info!("Packet source exhausted before the capture window elapsed");
                        report.outcome = WindowOutcome::Exhausted;
                        break;
                    }
                },
                recv(deadline) -> _ => {
                    info!("Capture window elapsed");
                    report.outcome = WindowOutcome::Expired;
                    break;
                },
                recv(cancel.signal()) -> _ => {
                    info!("Distributor cancelled");
                    report.outcome = WindowOutcome::Cancelled;
                    return report;
                },
            }
        }

        // Dropping the senders closes every shard queue; workers drain and exit
        info!(
            "Closing {} shard queues after routing {} packets",
            self.shards.len(),
            report.routed
        );
        drop(self.shards);
        report
    }

    /// Returns false only when cancellation interrupted the hand-off
    fn dispatch(
        &self,
        packet: RawPacket,
        cancel: &CancelToken,
        report: &mut DistributorReport,
    ) -> bool {
        let Some(network) = packet.network else {
            report.unroutable += 1;
            return true;
        };
        let Some(peer) = peer_address(&network, &self.host_ip) else {
            report.unrelated += 1;
            return true;
        };

        let shard = shard_for(&peer, self.shards.len());
        let timestamp = packet.timestamp_us;

        select! {
            send(self.shards[shard], packet) -> res => {
                if res.is_err() {
                    warn!("Shard {} queue is closed, dropping packet from {}", shard, peer);
                    return true;
                }
            },
            recv(cancel.signal()) -> _ => return false,
        }

        debug!("Routed packet for peer {} to shard {}", peer, shard);
        report.routed += 1;
        report.per_shard[shard] += 1;
        report.first_packet_us.get_or_insert(timestamp);
        report.last_packet_us = Some(timestamp);
        true
    }
}
