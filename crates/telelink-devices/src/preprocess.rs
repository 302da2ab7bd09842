//! Default packet conversion and preprocessing.

use chrono::{DateTime, TimeZone, Utc};
use telelink_core::{PacketPreprocessor, PreprocessorConfig, TelemetryConverter, TmPacket};
use tracing::debug;

/// Treats every non-empty payload as exactly one packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughConverter;

impl TelemetryConverter for PassthroughConverter {
    fn convert(&self, payload: &[u8], link: &str) -> Vec<TmPacket> {
        if payload.is_empty() {
            return Vec::new();
        }
        vec![TmPacket::new(payload.to_vec(), link)]
    }
}

/// Extracts generation time and sequence count at fixed offsets.
///
/// Without a timestamp offset the generation time is the reception time.
/// Packets too short to hold a configured field are rejected.
#[derive(Debug, Clone, Copy)]
pub struct GenericPreprocessor {
    timestamp_offset: Option<usize>,
    seq_count_offset: Option<usize>,
}

impl GenericPreprocessor {
    pub fn new(config: PreprocessorConfig) -> Self {
        Self {
            timestamp_offset: usize::try_from(config.timestamp_offset).ok(),
            seq_count_offset: usize::try_from(config.seq_count_offset).ok(),
        }
    }

    fn read_timestamp(&self, data: &[u8]) -> Result<Option<DateTime<Utc>>, String> {
        let Some(offset) = self.timestamp_offset else {
            return Ok(None);
        };
        let bytes = read_array::<8>(data, offset)
            .ok_or_else(|| format!("too short for timestamp at offset {}", offset))?;
        let millis = i64::try_from(u64::from_be_bytes(bytes))
            .map_err(|_| "timestamp out of range".to_string())?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Some)
            .ok_or_else(|| format!("invalid timestamp {}", millis))
    }

    fn read_seq_count(&self, data: &[u8]) -> Result<Option<u32>, String> {
        let Some(offset) = self.seq_count_offset else {
            return Ok(None);
        };
        read_array::<4>(data, offset)
            .map(|bytes| Some(u32::from_be_bytes(bytes)))
            .ok_or_else(|| format!("too short for sequence count at offset {}", offset))
    }
}

impl Default for GenericPreprocessor {
    fn default() -> Self {
        Self::new(PreprocessorConfig::default())
    }
}

impl PacketPreprocessor for GenericPreprocessor {
    fn process(&self, mut packet: TmPacket) -> Option<TmPacket> {
        let fields = self
            .read_timestamp(&packet.data)
            .and_then(|ts| Ok((ts, self.read_seq_count(&packet.data)?)));

        match fields {
            Ok((generation_time, seq_count)) => {
                packet.generation_time = Some(generation_time.unwrap_or(packet.reception_time));
                packet.seq_count = seq_count;
                Some(packet)
            }
            Err(reason) => {
                debug!(
                    "Rejecting {}-byte packet from {}: {}",
                    packet.len(),
                    packet.link,
                    reason
                );
                None
            }
        }
    }
}

fn read_array<const N: usize>(data: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    data.get(offset..end)?.try_into().ok()
}
