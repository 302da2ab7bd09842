//! Per-device telemetry handlers.
//!
//! A handler is the sub-link of one device: it receives that device's raw
//! telemetry payloads, turns them into packets and forwards them downstream.
//! Concrete device types implement [`TelemetryHandler::handle`] and delegate
//! the shared status and statistics bookkeeping to a [`HandlerCore`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use telelink_core::{LinkStatus, PacketPreprocessor, PacketSink, Result, TmPacket};

/// Detailed status of a handler that has not been started.
pub const STATUS_NOT_STARTED: &str = "Not started.";
/// Detailed status of a running handler.
pub const STATUS_LISTENING: &str = "Listening for telemetry.";
/// Detailed status of a stopped handler.
pub const STATUS_STOPPED: &str = "Device disconnected or stopped.";

/// Everything a handler constructor gets from the aggregate link.
#[derive(Clone)]
pub struct HandlerContext {
    /// Identifier announced on `<device id>/metadata`
    pub device_id: String,
    /// Type tag derived from the identifier
    pub device_type: String,
    /// Name of the aggregate link owning the handler
    pub link_name: String,
    pub preprocessor: Arc<dyn PacketPreprocessor>,
    pub sink: Arc<dyn PacketSink>,
}

impl HandlerContext {
    /// Sub-link name: `<aggregate link>/<device id>`.
    pub fn handler_name(&self) -> String {
        format!("{}/{}", self.link_name, self.device_id)
    }
}

/// Cumulative handler statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStats {
    /// Telemetry payloads received
    pub messages_in: u64,
    /// Telemetry bytes received
    pub bytes_in: u64,
    /// Packets forwarded downstream
    pub packets_out: u64,
    /// Packets rejected by the preprocessor
    pub packets_dropped: u64,
    pub last_received: Option<DateTime<Utc>>,
}

/// Status, counters and collaborators shared by every handler type.
pub struct HandlerCore {
    name: String,
    device_id: String,
    device_type: String,
    preprocessor: Arc<dyn PacketPreprocessor>,
    sink: Arc<dyn PacketSink>,
    running: AtomicBool,
    status: RwLock<LinkStatus>,
    detailed_status: RwLock<String>,
    messages_in: AtomicU64,
    bytes_in: AtomicU64,
    packets_out: AtomicU64,
    packets_dropped: AtomicU64,
    last_received: RwLock<Option<DateTime<Utc>>>,
}

impl HandlerCore {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            name: ctx.handler_name(),
            device_id: ctx.device_id,
            device_type: ctx.device_type,
            preprocessor: ctx.preprocessor,
            sink: ctx.sink,
            running: AtomicBool::new(false),
            status: RwLock::new(LinkStatus::Unavailable),
            detailed_status: RwLock::new(STATUS_NOT_STARTED.to_string()),
            messages_in: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            packets_out: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            last_received: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Count one received payload of `bytes` bytes.
    pub fn data_in(&self, bytes: usize) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
        *self.last_received.write() = Some(Utc::now());
    }

    /// Preprocess each packet and forward the accepted ones to the sink.
    pub fn forward(&self, packets: impl IntoIterator<Item = TmPacket>) {
        for packet in packets {
            match self.preprocessor.process(packet) {
                Some(packet) => {
                    self.sink.accept(packet);
                    self.packets_out.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    self.packets_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn mark_started(&self) {
        self.running.store(true, Ordering::Release);
        *self.status.write() = LinkStatus::Ok;
        *self.detailed_status.write() = STATUS_LISTENING.to_string();
    }

    fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
        *self.status.write() = LinkStatus::Disabled;
        *self.detailed_status.write() = STATUS_STOPPED.to_string();
    }
}

/// A per-device telemetry handler.
///
/// Only [`core`](Self::core) and [`handle`](Self::handle) are required; the
/// remaining methods are provided on top of the [`HandlerCore`].
#[async_trait]
pub trait TelemetryHandler: Send + Sync {
    /// Shared state of this handler.
    fn core(&self) -> &HandlerCore;

    /// Convert one raw telemetry payload and forward the resulting packets.
    ///
    /// Called concurrently with status updates; must not block.
    fn handle(&self, payload: &[u8]);

    /// Sub-link name, `<aggregate link>/<device id>`.
    fn name(&self) -> &str {
        &self.core().name
    }

    fn device_id(&self) -> &str {
        &self.core().device_id
    }

    fn device_type(&self) -> &str {
        &self.core().device_type
    }

    fn status(&self) -> LinkStatus {
        *self.core().status.read()
    }

    fn set_status(&self, status: LinkStatus) {
        *self.core().status.write() = status;
    }

    fn detailed_status(&self) -> String {
        self.core().detailed_status.read().clone()
    }

    fn set_detailed_status(&self, detailed_status: &str) {
        *self.core().detailed_status.write() = detailed_status.to_string();
    }

    fn stats(&self) -> HandlerStats {
        let core = self.core();
        HandlerStats {
            messages_in: core.messages_in.load(Ordering::Relaxed),
            bytes_in: core.bytes_in.load(Ordering::Relaxed),
            packets_out: core.packets_out.load(Ordering::Relaxed),
            packets_dropped: core.packets_dropped.load(Ordering::Relaxed),
            last_received: *core.last_received.read(),
        }
    }

    /// Begin accepting telemetry.
    async fn start(&self) -> Result<()> {
        self.core().mark_started();
        Ok(())
    }

    /// Stop accepting telemetry. Idempotent.
    async fn stop(&self) -> Result<()> {
        self.core().mark_stopped();
        Ok(())
    }
}

impl std::fmt::Debug for dyn TelemetryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryHandler")
            .field("name", &self.name())
            .field("device_type", &self.device_type())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::GenericPreprocessor;
    use telelink_core::{ChannelSink, PreprocessorConfig};

    struct EchoHandler {
        core: HandlerCore,
    }

    impl TelemetryHandler for EchoHandler {
        fn core(&self) -> &HandlerCore {
            &self.core
        }

        fn handle(&self, payload: &[u8]) {
            self.core.data_in(payload.len());
            self.core
                .forward([TmPacket::new(payload.to_vec(), self.name())]);
        }
    }

    fn context(sink: ChannelSink, seq_count_offset: i32) -> HandlerContext {
        HandlerContext {
            device_id: "echo-1".to_string(),
            device_type: "echo".to_string(),
            link_name: "devices".to_string(),
            preprocessor: Arc::new(GenericPreprocessor::new(PreprocessorConfig {
                timestamp_offset: -1,
                seq_count_offset,
            })),
            sink: Arc::new(sink),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_status() {
        let (sink, _rx) = ChannelSink::new();
        let handler = EchoHandler {
            core: HandlerCore::new(context(sink, -1)),
        };

        assert_eq!(handler.name(), "devices/echo-1");
        assert_eq!(handler.status(), LinkStatus::Unavailable);
        assert_eq!(handler.detailed_status(), STATUS_NOT_STARTED);

        handler.start().await.unwrap();
        assert!(handler.core().is_running());
        assert_eq!(handler.status(), LinkStatus::Ok);

        handler.set_status(LinkStatus::Failed);
        handler.set_detailed_status("antenna fault");
        assert_eq!(handler.status(), LinkStatus::Failed);
        assert_eq!(handler.detailed_status(), "antenna fault");

        handler.stop().await.unwrap();
        assert!(!handler.core().is_running());
        assert_eq!(handler.status(), LinkStatus::Disabled);
        assert_eq!(handler.detailed_status(), STATUS_STOPPED);
    }

    #[test]
    fn test_stats_count_dropped_packets() {
        let (sink, mut rx) = ChannelSink::new();
        // Sequence count at offset 0 needs four bytes
        let handler = EchoHandler {
            core: HandlerCore::new(context(sink, 0)),
        };

        handler.handle(&[0, 0, 0, 7, 9]);
        handler.handle(&[1, 2]);

        let stats = handler.stats();
        assert_eq!(stats.messages_in, 2);
        assert_eq!(stats.bytes_in, 7);
        assert_eq!(stats.packets_out, 1);
        assert_eq!(stats.packets_dropped, 1);
        assert!(stats.last_received.is_some());

        let packet = rx.try_recv().unwrap();
        assert_eq!(packet.seq_count, Some(7));
        assert!(rx.try_recv().is_err());
    }
}
