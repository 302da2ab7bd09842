//! Telemetry packets and the collaborator interfaces that produce and
//! consume them.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

/// A telemetry packet on its way to the downstream pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmPacket {
    /// Raw packet bytes
    pub data: Vec<u8>,
    /// When the payload was received from the broker
    pub reception_time: DateTime<Utc>,
    /// Set by the preprocessor
    pub generation_time: Option<DateTime<Utc>>,
    /// Set by the preprocessor
    pub seq_count: Option<u32>,
    /// Name of the sub-link that received the packet
    pub link: String,
}

impl TmPacket {
    pub fn new(data: Vec<u8>, link: impl Into<String>) -> Self {
        Self {
            data,
            reception_time: Utc::now(),
            generation_time: None,
            seq_count: None,
            link: link.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Splits a raw transport payload into packets.
pub trait TelemetryConverter: Send + Sync {
    fn convert(&self, payload: &[u8], link: &str) -> Vec<TmPacket>;
}

/// Inspects a packet before it is forwarded; `None` rejects it.
pub trait PacketPreprocessor: Send + Sync {
    fn process(&self, packet: TmPacket) -> Option<TmPacket>;
}

/// The downstream packet-processing pipeline.
pub trait PacketSink: Send + Sync {
    fn accept(&self, packet: TmPacket);
}

/// Forwards packets into a tokio channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TmPacket>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TmPacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PacketSink for ChannelSink {
    fn accept(&self, packet: TmPacket) {
        if self.tx.send(packet).is_err() {
            debug!("Packet receiver dropped, discarding packet");
        }
    }
}
