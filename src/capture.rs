use std::collections::VecDeque;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam::channel::{Sender, select};
use pcap::{Active, Capture, Error as PcapError, Offline};
use pnet::packet::Packet;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::vlan::VlanPacket;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{AnalyzerError, Result};
use crate::packet::{NetworkHeader, RawPacket, TcpFlags, TcpHeader};

const SNAPLEN: i32 = 65535;
const READ_TIMEOUT_MS: i32 = 100;

const SLL_HEADER_LEN: usize = 16;
const SLL2_HEADER_LEN: usize = 20;
const NULL_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Live,
    Offline,
}

#[derive(Debug)]
pub enum SourceEvent {
    Packet(RawPacket),
    /// Nothing available right now (live read timeout)
    Idle,
    /// No packet will ever arrive again
    Exhausted,
}

/// Anything that yields decoded packets, one at a time
pub trait PacketSource: Send {
    fn poll_packet(&mut self) -> Result<SourceEvent>;
    fn kind(&self) -> SourceKind;
}

/// Link-layer framing in front of the IP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    LinuxSll,
    LinuxSll2,
    Null,
    Raw,
    Unsupported(i32),
}

impl LinkLayer {
    pub fn from_linktype(linktype: i32) -> Self {
        match linktype {
            0 | 108 => LinkLayer::Null,
            1 => LinkLayer::Ethernet,
            12 | 14 | 101 | 228 | 229 => LinkLayer::Raw,
            113 => LinkLayer::LinuxSll,
            276 => LinkLayer::LinuxSll2,
            other => LinkLayer::Unsupported(other),
        }
    }
}

enum Handle {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

/// libpcap-backed source: a network device or a capture file
pub struct PcapSource {
    handle: Handle,
    link: LinkLayer,
    target: String,
    packets_read: u64,
}

impl PcapSource {
    pub fn live(device: &str, filter: Option<&str>) -> Result<Self> {
        debug!("Opening live capture on {}", device);
        let open_err = |source| AnalyzerError::CaptureOpen {
            target: device.to_string(),
            source,
        };

        let mut capture = Capture::from_device(device)
            .map_err(open_err)?
            .snaplen(SNAPLEN)
            .promisc(false)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .map_err(open_err)?;

        if let Some(filter) = filter {
            capture.filter(filter, true).map_err(open_err)?;
        }

        let link = LinkLayer::from_linktype(capture.get_datalink().0);
        info!("Live capture on {} opened (link {:?})", device, link);
        Ok(Self {
            handle: Handle::Live(capture),
            link,
            target: device.to_string(),
            packets_read: 0,
        })
    }

    pub fn offline(path: &Path, filter: Option<&str>) -> Result<Self> {
        debug!("Opening capture file with libpcap: {}", path.display());
        let open_err = |source| AnalyzerError::CaptureOpen {
            target: path.display().to_string(),
            source,
        };

        let mut capture = Capture::from_file(path).map_err(open_err)?;
        if let Some(filter) = filter {
            capture.filter(filter, true).map_err(open_err)?;
        }

        let link = LinkLayer::from_linktype(capture.get_datalink().0);
        info!("Capture file {} opened (link {:?})", path.display(), link);
        Ok(Self {
            handle: Handle::Offline(capture),
            link,
            target: path.display().to_string(),
            packets_read: 0,
        })
    }
}

impl PacketSource for PcapSource {
    fn poll_packet(&mut self) -> Result<SourceEvent> {
        let live = matches!(self.handle, Handle::Live(_));
        let next = match &mut self.handle {
            Handle::Live(capture) => capture.next_packet(),
            Handle::Offline(capture) => capture.next_packet(),
        };

        match next {
            Ok(packet) => {
                self.packets_read += 1;
                let timestamp_us =
                    packet.header.ts.tv_sec as i64 * 1_000_000 + packet.header.ts.tv_usec as i64;
                Ok(SourceEvent::Packet(decode_frame(self.link, timestamp_us, packet.data)))
            }
            Err(PcapError::TimeoutExpired) => Ok(SourceEvent::Idle),
            Err(PcapError::NoMorePackets) => Ok(SourceEvent::Exhausted),
            Err(e) if live => Err(e.into()),
            Err(e) => {
                // A damaged file keeps failing at the same offset
                warn!(
                    "Error reading packet #{} from {}: {}",
                    self.packets_read + 1,
                    self.target,
                    e
                );
                Ok(SourceEvent::Exhausted)
            }
        }
    }

    fn kind(&self) -> SourceKind {
        match self.handle {
            Handle::Live(_) => SourceKind::Live,
            Handle::Offline(_) => SourceKind::Offline,
        }
    }
}

/// Replays already decoded packets, in order
#[derive(Debug, Default)]
pub struct ReplaySource {
    packets: VecDeque<RawPacket>,
}

impl ReplaySource {
    pub fn new(packets: impl IntoIterator<Item = RawPacket>) -> Self {
        Self {
            packets: packets.into_iter().collect(),
        }
    }
}

impl PacketSource for ReplaySource {
    fn poll_packet(&mut self) -> Result<SourceEvent> {
        Ok(match self.packets.pop_front() {
            Some(packet) => SourceEvent::Packet(packet),
            None => SourceEvent::Exhausted,
        })
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Offline
    }
}

/// Decode one captured frame. Frames without an IP layer come back with no network header.
pub fn decode_frame(link: LinkLayer, timestamp_us: i64, data: &[u8]) -> RawPacket {
    match link {
        LinkLayer::Ethernet => {
            let Some(ethernet) = EthernetPacket::new(data) else {
                return unroutable(timestamp_us);
            };
            if ethernet.get_ethertype() == EtherTypes::Vlan {
                match VlanPacket::new(ethernet.payload()) {
                    Some(vlan) => {
                        decode_ethertype(timestamp_us, vlan.get_ethertype(), vlan.payload())
                    }
                    None => unroutable(timestamp_us),
                }
            } else {
                decode_ethertype(timestamp_us, ethernet.get_ethertype(), ethernet.payload())
            }
        }
        LinkLayer::LinuxSll => match data.get(14..16) {
            Some(proto) if data.len() >= SLL_HEADER_LEN => {
                let ethertype = EtherType::new(u16::from_be_bytes([proto[0], proto[1]]));
                decode_ethertype(timestamp_us, ethertype, &data[SLL_HEADER_LEN..])
            }
            _ => unroutable(timestamp_us),
        },
        LinkLayer::LinuxSll2 => match data.get(0..2) {
            Some(proto) if data.len() >= SLL2_HEADER_LEN => {
                let ethertype = EtherType::new(u16::from_be_bytes([proto[0], proto[1]]));
                decode_ethertype(timestamp_us, ethertype, &data[SLL2_HEADER_LEN..])
            }
            _ => unroutable(timestamp_us),
        },
        LinkLayer::Null => match data.get(NULL_HEADER_LEN..) {
            Some(ip) => decode_ip(timestamp_us, ip),
            None => unroutable(timestamp_us),
        },
        LinkLayer::Raw => decode_ip(timestamp_us, data),
        LinkLayer::Unsupported(_) => unroutable(timestamp_us),
    }
}

fn unroutable(timestamp_us: i64) -> RawPacket {
    RawPacket::new(timestamp_us, None, None, Vec::new())
}

fn decode_ethertype(timestamp_us: i64, ethertype: EtherType, bytes: &[u8]) -> RawPacket {
    if ethertype == EtherTypes::Ipv4 {
        decode_ipv4(timestamp_us, bytes)
    } else if ethertype == EtherTypes::Ipv6 {
        decode_ipv6(timestamp_us, bytes)
    } else {
        unroutable(timestamp_us)
    }
}

// Framings without an ethertype: the version nibble decides
fn decode_ip(timestamp_us: i64, bytes: &[u8]) -> RawPacket {
    match bytes.first().map(|b| b >> 4) {
        Some(4) => decode_ipv4(timestamp_us, bytes),
        Some(6) => decode_ipv6(timestamp_us, bytes),
        _ => unroutable(timestamp_us),
    }
}

fn decode_ipv4(timestamp_us: i64, bytes: &[u8]) -> RawPacket {
    let Some(ipv4) = Ipv4Packet::new(bytes) else {
        return unroutable(timestamp_us);
    };
    if ipv4.get_header_length() < 5 {
        return unroutable(timestamp_us);
    }

    let network = NetworkHeader {
        source: IpAddr::V4(ipv4.get_source()),
        destination: IpAddr::V4(ipv4.get_destination()),
    };
    // Only the first fragment carries the TCP header
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Tcp
        || ipv4.get_fragment_offset() != 0
    {
        return RawPacket::new(timestamp_us, Some(network), None, Vec::new());
    }
    decode_tcp(timestamp_us, network, ipv4.payload())
}

fn decode_ipv6(timestamp_us: i64, bytes: &[u8]) -> RawPacket {
    let Some(ipv6) = Ipv6Packet::new(bytes) else {
        return unroutable(timestamp_us);
    };

    let network = NetworkHeader {
        source: IpAddr::V6(ipv6.get_source()),
        destination: IpAddr::V6(ipv6.get_destination()),
    };
    if ipv6.get_next_header() != IpNextHeaderProtocols::Tcp {
        return RawPacket::new(timestamp_us, Some(network), None, Vec::new());
    }
    decode_tcp(timestamp_us, network, ipv6.payload())
}

fn decode_tcp(timestamp_us: i64, network: NetworkHeader, bytes: &[u8]) -> RawPacket {
    let tcp = match TcpPacket::new(bytes) {
        Some(tcp) if tcp.get_data_offset() >= 5 => tcp,
        _ => return RawPacket::new(timestamp_us, Some(network), None, Vec::new()),
    };

    let header = TcpHeader {
        source_port: tcp.get_source(),
        destination_port: tcp.get_destination(),
        sequence: tcp.get_sequence(),
        acknowledgement: tcp.get_acknowledgement(),
        flags: TcpFlags::from_bits(u16::from(tcp.get_flags())),
    };
    RawPacket::new(timestamp_us, Some(network), Some(header), tcp.payload().to_vec())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PumpReport {
    pub forwarded: u64,
    pub exhausted: bool,
}

/// Move packets from `source` into `packets` until the source runs dry,
/// `running` is cleared, the receiving side hangs up, or the run is cancelled.
pub fn spawn_pump<S>(
    mut source: S,
    packets: Sender<RawPacket>,
    running: Arc<AtomicBool>,
    cancel: CancelToken,
) -> std::io::Result<thread::JoinHandle<PumpReport>>
where
    S: PacketSource + 'static,
{
    thread::Builder::new()
        .name("capture-pump".to_string())
        .spawn(move || {
            let mut report = PumpReport::default();

            while running.load(Ordering::Relaxed) {
                match source.poll_packet() {
                    Ok(SourceEvent::Packet(packet)) => {
                        select! {
                            send(packets, packet) -> res => {
                                if res.is_err() {
                                    debug!("Packet channel closed, stopping capture pump");
                                    break;
                                }
                                report.forwarded += 1;
                            },
                            recv(cancel.signal()) -> _ => break,
                        }
                    }
                    Ok(SourceEvent::Idle) => continue,
                    Ok(SourceEvent::Exhausted) => {
                        report.exhausted = true;
                        break;
                    }
                    Err(e) => {
                        warn!("Packet source failed: {}", e);
                        break;
                    }
                }
            }

            info!(
                "Capture pump stopped after {} packets (exhausted: {})",
                report.forwarded, report.exhausted
            );
            report
        })
}
