/// DSP detection event decoding
///
/// The DSP reports a detection as `{status u16, payload_size u16}` followed by
/// `{key, payload_size}` records. Single-model (GMM) engines report confidence
/// levels and keyword position directly; multi-model (PDK) engines report one
/// stats record per detected model.

use crate::types::StreamAttributes;
use crate::error::{VuiError, VuiResult};
use crate::wire::{join_u64, ParamRecords, WireReader};
use serde::Serialize;
use tracing::{debug, error, info, trace};

/// Single-model record keys
pub const KEY_ID_CONFIDENCE_LEVELS_INFO: u32 = 0;
pub const KEY_ID_KWD_POSITION_INFO: u32 = 1;
pub const KEY_ID_TIMESTAMP_INFO: u32 = 2;
pub const KEY_ID_FTRT_DATA_INFO: u32 = 3;

/// Multi-model record key
pub const KEY_ID_VOICE_UI_MULTI_MODEL_RESULT_INFO: u32 = 4;

/// Size of the generic detection header
pub const GENERIC_INFO_SIZE: usize = 4;

/// Size of one `model_stats` record
pub const MODEL_STATS_SIZE: usize = 40;

/// Maximum confidence values in a single-model event
pub const MAX_DETECTION_CONF_LEVELS: usize = 20;

/// Per-model result of a multi-model detection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelStats {
    pub model_id: u32,
    pub keyword_id: u32,
    pub best_channel: u32,
    pub best_confidence: i32,
    pub kw_start_timestamp: u64,
    pub kw_end_timestamp: u64,
    pub detection_timestamp: u64,
}

impl ModelStats {
    fn decode(reader: &mut WireReader<'_>) -> VuiResult<Self> {
        let model_id = reader.u32()?;
        let keyword_id = reader.u32()?;
        let best_channel = reader.u32()?;
        let best_confidence = reader.i32()?;
        let start_lsw = reader.u32()?;
        let start_msw = reader.u32()?;
        let end_lsw = reader.u32()?;
        let end_msw = reader.u32()?;
        let det_lsw = reader.u32()?;
        let det_msw = reader.u32()?;

        Ok(Self {
            model_id,
            keyword_id,
            best_channel,
            best_confidence,
            kw_start_timestamp: join_u64(start_lsw, start_msw),
            kw_end_timestamp: join_u64(end_lsw, end_msw),
            detection_timestamp: join_u64(det_lsw, det_msw),
        })
    }

    /// Best confidence clamped into the client level range
    pub fn best_level(&self) -> u32 {
        self.best_confidence.max(0) as u32
    }
}

/// Byte offsets of the keyword inside the captured FTRT buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeywordIndex {
    pub start_index: u32,
    pub end_index: u32,
}

/// Decoded detection event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    pub status: u32,
    /// Keyphrase levels first, then user levels
    pub confidence_levels: Vec<u8>,
    pub kw_start_timestamp: u64,
    pub kw_end_timestamp: u64,
    pub detection_timestamp: u64,
    pub ftrt_length_us: u32,
    pub model_stats: Vec<ModelStats>,
    pub keyword_index: KeywordIndex,
    pub ftrt_size: u32,
}

impl DetectionResult {
    /// Model id used to route a multi-model detection, 0 for single-model
    pub fn detected_model_id(&self) -> u32 {
        self.model_stats.first().map(|s| s.model_id).unwrap_or(0)
    }

    /// Stats of the model with `model_id`, if it was reported
    pub fn model_stat(&self, model_id: u32) -> Option<&ModelStats> {
        self.model_stats.iter().find(|s| s.model_id == model_id)
    }

    /// Compute keyword byte indices relative to the start of the FTRT buffer
    ///
    /// Indices stay zero when the timestamps are inconsistent.
    fn update_keyword_index(&mut self, attrs: &StreamAttributes) {
        let ftrt_start = self
            .detection_timestamp
            .saturating_sub(self.ftrt_length_us as u64);

        trace!(
            "kwd start timestamp: {}, kwd end timestamp: {}, ftrt start: {}",
            self.kw_start_timestamp,
            self.kw_end_timestamp,
            ftrt_start
        );

        if self.kw_start_timestamp >= self.kw_end_timestamp || self.kw_start_timestamp < ftrt_start {
            debug!("Invalid timestamp, cannot compute keyword index");
            return;
        }

        self.keyword_index = KeywordIndex {
            start_index: attrs.us_to_bytes(self.kw_start_timestamp - ftrt_start),
            end_index: attrs.us_to_bytes(self.kw_end_timestamp - ftrt_start),
        };
        info!(
            "start_index : {}, end_index : {}",
            self.keyword_index.start_index, self.keyword_index.end_index
        );
    }

    fn set_ftrt_length(&mut self, length_us: u32, attrs: &StreamAttributes) {
        self.ftrt_length_us = length_us;
        self.ftrt_size = attrs.us_to_bytes(length_us as u64);
        info!("ftrt_data_length_in_us = {}", length_us);
    }
}

/// Split off the generic header and return `(status, records)`
fn split_event(payload: &[u8]) -> VuiResult<(u32, &[u8])> {
    let mut reader = WireReader::new(payload, "detection event");
    let status = reader.u16()? as u32;
    let event_size = reader.u16()? as usize;
    info!("status = {}, event_size = {}", status, event_size);

    if event_size == 0 {
        error!("Invalid detection payload");
        return Err(VuiError::InvalidDetectionPayload(
            "empty event payload".to_string(),
        ));
    }

    Ok((status, reader.take(event_size)?))
}

/// Decode a single-model (GMM) detection event
pub fn decode_single_model(payload: &[u8], attrs: &StreamAttributes) -> VuiResult<DetectionResult> {
    debug!("Enter");
    let mut result = DetectionResult::default();
    let (status, records) = split_event(payload)?;
    result.status = status;

    for record in ParamRecords::new(records, "detection event") {
        let record = record?;
        debug!("key id = {}, payload_size = {}", record.key, record.payload.len());
        let mut reader = WireReader::new(record.payload, "detection record");

        match record.key {
            KEY_ID_CONFIDENCE_LEVELS_INFO => {
                let _version = reader.u32()?;
                let count = reader.u32()? as usize;
                if count > MAX_DETECTION_CONF_LEVELS {
                    error!("Too many confidence levels {}", count);
                    return Err(VuiError::InvalidDetectionPayload(format!(
                        "{} confidence levels",
                        count
                    )));
                }
                result.confidence_levels = reader.take(count)?.to_vec();
                info!("num_confidence_levels = {}", count);
                for (i, level) in result.confidence_levels.iter().enumerate() {
                    info!("confidence_levels[{}] = {}", i, level);
                }
            }
            KEY_ID_KWD_POSITION_INFO => {
                let _version = reader.u32()?;
                let start_lsw = reader.u32()?;
                let start_msw = reader.u32()?;
                let end_lsw = reader.u32()?;
                let end_msw = reader.u32()?;
                result.kw_start_timestamp = join_u64(start_lsw, start_msw);
                result.kw_end_timestamp = join_u64(end_lsw, end_msw);
                info!(
                    "kw start = {}, kw end = {}",
                    result.kw_start_timestamp, result.kw_end_timestamp
                );
            }
            KEY_ID_TIMESTAMP_INFO => {
                let _version = reader.u32()?;
                let lsw = reader.u32()?;
                let msw = reader.u32()?;
                result.detection_timestamp = join_u64(lsw, msw);
                info!("detection timestamp = {}", result.detection_timestamp);
            }
            KEY_ID_FTRT_DATA_INFO => {
                let _version = reader.u32()?;
                let length_us = reader.u32()?;
                result.set_ftrt_length(length_us, attrs);
            }
            key => {
                error!("Invalid key id {}", key);
                return Err(VuiError::UnknownKey(key));
            }
        }
    }

    result.update_keyword_index(attrs);
    debug!("Exit");
    Ok(result)
}

/// Decode a multi-model (PDK) detection event
///
/// The first model record determines the timestamps used for keyword indices.
pub fn decode_multi_model(payload: &[u8], attrs: &StreamAttributes) -> VuiResult<DetectionResult> {
    debug!("Enter");
    let mut result = DetectionResult::default();
    let (status, records) = split_event(payload)?;
    result.status = status;

    for record in ParamRecords::new(records, "detection event") {
        let record = record?;
        info!("key id = {}, payload_size = {}", record.key, record.payload.len());
        let mut reader = WireReader::new(record.payload, "detection record");

        match record.key {
            KEY_ID_FTRT_DATA_INFO => {
                let _version = reader.u32()?;
                let length_us = reader.u32()?;
                result.set_ftrt_length(length_us, attrs);
            }
            KEY_ID_VOICE_UI_MULTI_MODEL_RESULT_INFO => {
                let _version = reader.u32()?;
                let num_detected_models = reader.u32()? as usize;
                info!("Number of detected models : {}", num_detected_models);

                let needed = num_detected_models.saturating_mul(MODEL_STATS_SIZE);
                if reader.remaining() < needed {
                    error!(
                        "Model stats truncated: {} bytes for {} models",
                        reader.remaining(),
                        num_detected_models
                    );
                    return Err(VuiError::Truncated {
                        what: "model stats",
                        needed,
                        available: reader.remaining(),
                    });
                }

                result.model_stats = (0..num_detected_models)
                    .map(|_| ModelStats::decode(&mut reader))
                    .collect::<VuiResult<Vec<_>>>()?;
                for stat in &result.model_stats {
                    info!(
                        "Detection made for model id : {:#x}, keyword id {}, best conf {}",
                        stat.model_id, stat.keyword_id, stat.best_confidence
                    );
                }
            }
            key => {
                error!("Invalid key id {}", key);
                return Err(VuiError::UnknownKey(key));
            }
        }
    }

    if let Some(first) = result.model_stats.first().copied() {
        result.kw_start_timestamp = first.kw_start_timestamp;
        result.kw_end_timestamp = first.kw_end_timestamp;
        result.detection_timestamp = first.detection_timestamp;
    }
    result.update_keyword_index(attrs);

    debug!("Exit");
    Ok(result)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::BufMut;

    /// Wrap encoded records into a detection event
    pub(crate) fn event(status: u16, records: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16_le(status);
        buf.put_u16_le(records.len() as u16);
        buf.put_slice(records);
        buf
    }

    pub(crate) fn record(key: u32, words: &[u32], tail: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u32_le(key);
        buf.put_u32_le((words.len() * 4 + tail.len()) as u32);
        for &w in words {
            buf.put_u32_le(w);
        }
        buf.put_slice(tail);
        buf
    }

    pub(crate) fn conf_levels_record(levels: &[u8]) -> Vec<u8> {
        record(KEY_ID_CONFIDENCE_LEVELS_INFO, &[1, levels.len() as u32], levels)
    }

    pub(crate) fn model_stats_record(stats: &[(u32, u32, i32, u64, u64, u64)]) -> Vec<u8> {
        let mut words = vec![1, stats.len() as u32];
        for &(model_id, keyword_id, best, start, end, det) in stats {
            words.extend_from_slice(&[
                model_id,
                keyword_id,
                0,
                best as u32,
                start as u32,
                (start >> 32) as u32,
                end as u32,
                (end >> 32) as u32,
                det as u32,
                (det >> 32) as u32,
            ]);
        }
        record(KEY_ID_VOICE_UI_MULTI_MODEL_RESULT_INFO, &words, &[])
    }

    #[test]
    fn test_single_model_event() {
        let mut records = conf_levels_record(&[72, 0, 65]);
        // keyword 1.25s..2.0s, detection at 2.5s with 2.5s of FTRT data
        records.extend(record(KEY_ID_KWD_POSITION_INFO, &[1, 1_250_000, 0, 2_000_000, 0], &[]));
        records.extend(record(KEY_ID_TIMESTAMP_INFO, &[1, 2_500_000, 0], &[]));
        records.extend(record(KEY_ID_FTRT_DATA_INFO, &[1, 2_500_000], &[]));

        let attrs = StreamAttributes::default();
        let result = decode_single_model(&event(0, &records), &attrs).unwrap();

        assert_eq!(result.status, 0);
        assert_eq!(result.confidence_levels, vec![72, 0, 65]);
        assert_eq!(result.detection_timestamp, 2_500_000);
        assert_eq!(result.ftrt_size, 80_000);
        assert_eq!(result.keyword_index.start_index, 40_000);
        assert_eq!(result.keyword_index.end_index, 64_000);
        assert_eq!(result.detected_model_id(), 0);
    }

    #[test]
    fn test_keyword_index_is_best_effort() {
        // start after end
        let mut records = record(KEY_ID_KWD_POSITION_INFO, &[1, 9, 0, 5, 0], &[]);
        records.extend(record(KEY_ID_TIMESTAMP_INFO, &[1, 10, 0], &[]));

        let result = decode_single_model(&event(0, &records), &StreamAttributes::default()).unwrap();
        assert_eq!(result.keyword_index, KeywordIndex::default());

        // start before the FTRT buffer
        let mut records = record(KEY_ID_KWD_POSITION_INFO, &[1, 100, 0, 900, 0], &[]);
        records.extend(record(KEY_ID_TIMESTAMP_INFO, &[1, 1000, 0], &[]));
        records.extend(record(KEY_ID_FTRT_DATA_INFO, &[1, 500], &[]));

        let result = decode_single_model(&event(0, &records), &StreamAttributes::default()).unwrap();
        assert_eq!(result.keyword_index, KeywordIndex::default());
    }

    #[test]
    fn test_ftrt_longer_than_timestamp_saturates() {
        let mut records = record(KEY_ID_KWD_POSITION_INFO, &[1, 0, 0, 1_000, 0], &[]);
        records.extend(record(KEY_ID_TIMESTAMP_INFO, &[1, 100, 0], &[]));
        records.extend(record(KEY_ID_FTRT_DATA_INFO, &[1, 5_000], &[]));

        let result = decode_single_model(&event(0, &records), &StreamAttributes::default()).unwrap();
        assert_eq!(result.keyword_index.start_index, 0);
        assert_eq!(result.keyword_index.end_index, 32);
    }

    #[test]
    fn test_empty_event_rejected() {
        let err = decode_single_model(&event(0, &[]), &StreamAttributes::default()).unwrap_err();
        assert!(matches!(err, VuiError::InvalidDetectionPayload(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let records = record(9, &[1], &[]);
        let err = decode_single_model(&event(0, &records), &StreamAttributes::default()).unwrap_err();
        assert_eq!(err, VuiError::UnknownKey(9));

        // Single-model keys are not valid in multi-model events
        let records = conf_levels_record(&[10]);
        let err = decode_multi_model(&event(0, &records), &StreamAttributes::default()).unwrap_err();
        assert_eq!(err, VuiError::UnknownKey(KEY_ID_CONFIDENCE_LEVELS_INFO));
    }

    #[test]
    fn test_multi_model_walks_every_record() {
        let records = model_stats_record(&[
            (5, 0, 88, 1_000, 2_000, 3_000),
            (7, 2, 61, 10, 20, 30),
            (9, 1, -4, 0, 0, 0),
        ]);

        let result = decode_multi_model(&event(0, &records), &StreamAttributes::default()).unwrap();

        assert_eq!(result.model_stats.len(), 3);
        assert_eq!(result.detected_model_id(), 5);
        assert_eq!(result.model_stats[1].model_id, 7);
        assert_eq!(result.model_stats[1].keyword_id, 2);
        assert_eq!(result.model_stats[2].best_level(), 0);
        assert_eq!(result.model_stat(7).map(|s| s.detection_timestamp), Some(30));
        assert_eq!(result.detection_timestamp, 3_000);
    }

    #[test]
    fn test_multi_model_truncated_stats_rejected() {
        let mut records = model_stats_record(&[(5, 0, 88, 0, 0, 0)]);
        // Claim two models while carrying one
        records[12..16].copy_from_slice(&2u32.to_le_bytes());

        let err = decode_multi_model(&event(0, &records), &StreamAttributes::default()).unwrap_err();
        assert!(matches!(err, VuiError::Truncated { .. }));
    }

    #[test]
    fn test_event_size_past_buffer_rejected() {
        let mut buf = event(0, &conf_levels_record(&[50]));
        buf[2..4].copy_from_slice(&200u16.to_le_bytes());

        assert!(decode_single_model(&buf, &StreamAttributes::default()).is_err());
    }
}
