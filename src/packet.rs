use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// TCP control bits as carried in the 9-bit flags field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(u16);

impl TcpFlags {
    pub const FIN: u16 = 0x001;
    pub const SYN: u16 = 0x002;
    pub const RST: u16 = 0x004;
    pub const PSH: u16 = 0x008;
    pub const ACK: u16 = 0x010;
    pub const URG: u16 = 0x020;
    pub const ECE: u16 = 0x040;
    pub const CWR: u16 = 0x080;
    pub const NS: u16 = 0x100;

    pub fn from_bits(bits: u16) -> Self {
        Self(bits & 0x1ff)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn contains(&self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    pub fn fin(&self) -> bool {
        self.contains(Self::FIN)
    }

    pub fn syn(&self) -> bool {
        self.contains(Self::SYN)
    }

    pub fn rst(&self) -> bool {
        self.contains(Self::RST)
    }

    pub fn psh(&self) -> bool {
        self.contains(Self::PSH)
    }

    pub fn ack(&self) -> bool {
        self.contains(Self::ACK)
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u16, &str); 9] = [
            (TcpFlags::FIN, "FIN"),
            (TcpFlags::SYN, "SYN"),
            (TcpFlags::RST, "RST"),
            (TcpFlags::PSH, "PSH"),
            (TcpFlags::ACK, "ACK"),
            (TcpFlags::URG, "URG"),
            (TcpFlags::ECE, "ECE"),
            (TcpFlags::CWR, "CWR"),
            (TcpFlags::NS, "NS"),
        ];

        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkHeader {
    pub source: IpAddr,
    pub destination: IpAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgement: u32,
    pub flags: TcpFlags,
}

/// Decoded packet handed from the capture source to exactly one shard worker
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub timestamp_us: i64, // Capture timestamp, microseconds since epoch
    pub network: Option<NetworkHeader>,
    pub tcp: Option<TcpHeader>,
    pub payload: Vec<u8>, // TCP payload, empty when there is none
}

impl RawPacket {
    pub fn new(
        timestamp_us: i64,
        network: Option<NetworkHeader>,
        tcp: Option<TcpHeader>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            timestamp_us,
            network,
            tcp,
            payload,
        }
    }

    /// Build a TCP segment between two endpoints
    pub fn tcp_segment(
        timestamp_us: i64,
        source: SocketAddr,
        destination: SocketAddr,
        flags: u16,
        sequence: u32,
        acknowledgement: u32,
        payload: &[u8],
    ) -> Self {
        Self {
            timestamp_us,
            network: Some(NetworkHeader {
                source: source.ip(),
                destination: destination.ip(),
            }),
            tcp: Some(TcpHeader {
                source_port: source.port(),
                destination_port: destination.port(),
                sequence,
                acknowledgement,
                flags: TcpFlags::from_bits(flags),
            }),
            payload: payload.to_vec(),
        }
    }

    pub fn source_endpoint(&self) -> Option<SocketAddr> {
        let network = self.network?;
        let tcp = self.tcp?;
        Some(SocketAddr::new(network.source, tcp.source_port))
    }

    pub fn destination_endpoint(&self) -> Option<SocketAddr> {
        let network = self.network?;
        let tcp = self.tcp?;
        Some(SocketAddr::new(network.destination, tcp.destination_port))
    }
}

/// Client and server endpoints of one TCP connection, oriented client → server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conversation {
    pub client: SocketAddr,
    pub server: SocketAddr,
}

impl Conversation {
    pub fn new(client: SocketAddr, server: SocketAddr) -> Self {
        Self { client, server }
    }
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.client, self.server)
    }
}
