//! Hot key and hot command analysis for Redis.
//!
//! Packets from a live interface or a capture file are routed by client
//! address to a fixed set of shard workers. Each shard recovers commands and
//! keys from request payloads, pairs responses with requests to measure
//! latency, and keeps its own counters. When the capture window closes the
//! shards are merged and ranked into a [`HotKeySummary`].

pub mod analyzer;
pub mod cancel;
pub mod capture;
pub mod config;
pub mod correlator;
pub mod distributor;
pub mod error;
pub mod extract;
pub mod files;
pub mod packet;
pub mod pipeline;
pub mod ranking;
pub mod report;
pub mod sink;
pub mod stats;
pub mod worker;

pub use cancel::CancelToken;
pub use capture::{PacketSource, PcapSource, ReplaySource, SourceEvent, SourceKind};
pub use config::AnalyzerConfig;
pub use error::{AnalyzerError, Result};
pub use packet::{RawPacket, TcpFlags};
pub use pipeline::show_hot_keys;
pub use ranking::Kv;
pub use report::HotKeySummary;
