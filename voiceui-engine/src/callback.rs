/// Client recognition event encoding
///
/// Keyphrase streams get a phrase event whose opaque section carries three
/// records: the client's confidence tree with detected values written in,
/// keyword byte indices and the first-stage detection time. Generic streams
/// get a generic event wrapping a raw payload.

use crate::conf_levels::ConfLevelsWireTree;
use crate::detection::{DetectionResult, KeywordIndex};
use crate::error::{VuiError, VuiResult};
use crate::recognition_config::{
    encode_param, ST_PARAM_KEY_CONFIDENCE_LEVELS, ST_PARAM_KEY_KEYWORD_INDICES,
    ST_PARAM_KEY_TIMESTAMP,
};
use crate::registry::RegisteredModel;
use crate::types::{
    PhraseRecognitionExtra, StreamAttributes, AUDIO_FMT_PCM_S16_LE, MAX_PHRASES, MAX_USERS,
};
use crate::wire::PARAM_HEADER_SIZE;
use bytes::BufMut;
use tracing::{debug, error, info, warn};

/// Size of the common recognition event header
pub const COMMON_EVENT_SIZE: usize = 52;

/// Size of one phrase recognition extra
pub const PHRASE_EXTRA_SIZE: usize = 16 + MAX_USERS * 8;

/// Size of the phrase event header, also its `data_offset`
pub const PHRASE_EVENT_SIZE: usize = COMMON_EVENT_SIZE + 4 + MAX_PHRASES * PHRASE_EXTRA_SIZE;

/// Size of the generic event header, also its `data_offset`
pub const GENERIC_EVENT_SIZE: usize = COMMON_EVENT_SIZE;

/// Size of `st_keyword_indices_info`
pub const KEYWORD_INDICES_INFO_SIZE: usize = 12;

/// Size of `st_timestamp_info`
pub const TIMESTAMP_INFO_SIZE: usize = 24;

const OPAQUE_INFO_VERSION: u32 = 0x1;

/// Size of the opaque section of a phrase event for a given tree
pub fn phrase_opaque_size(tree_size: usize) -> usize {
    3 * PARAM_HEADER_SIZE + tree_size + KEYWORD_INDICES_INFO_SIZE + TIMESTAMP_INFO_SIZE
}

struct CommonHeader<'a> {
    status: u32,
    model_type: u32,
    capture_available: bool,
    attrs: &'a StreamAttributes,
    data_size: usize,
    data_offset: usize,
}

impl CommonHeader<'_> {
    fn put(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.status);
        buf.put_u32_le(self.model_type);
        buf.put_u32_le(self.capture_available as u32);
        // capture session, delay and preamble are owned by the stream layer
        buf.put_i32_le(0);
        buf.put_u32_le(0);
        buf.put_u32_le(0);
        // trigger_in_data
        buf.put_u32_le(1);
        buf.put_u32_le(self.attrs.sample_rate);
        buf.put_u32_le(self.attrs.bit_width);
        buf.put_u32_le(self.attrs.channels);
        buf.put_u32_le(AUDIO_FMT_PCM_S16_LE);
        buf.put_u32_le(self.data_size as u32);
        buf.put_u32_le(self.data_offset as u32);
    }
}

fn alloc_event(size: usize) -> VuiResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).map_err(|_| {
        error!("Failed to alloc memory for recognition event");
        VuiError::NoMemory(size)
    })?;
    Ok(buf)
}

fn put_phrase_extras(buf: &mut Vec<u8>, phrases: &[PhraseRecognitionExtra]) {
    if phrases.len() > MAX_PHRASES {
        warn!("Truncating {} phrases to {}", phrases.len(), MAX_PHRASES);
    }
    let phrases = &phrases[..phrases.len().min(MAX_PHRASES)];
    buf.put_u32_le(phrases.len() as u32);

    for slot in 0..MAX_PHRASES {
        let Some(phrase) = phrases.get(slot) else {
            buf.put_bytes(0, PHRASE_EXTRA_SIZE);
            continue;
        };

        let levels = &phrase.levels[..phrase.levels.len().min(MAX_USERS)];
        buf.put_u32_le(phrase.id);
        buf.put_u32_le(phrase.recognition_modes);
        buf.put_u32_le(phrase.confidence_level);
        buf.put_u32_le(levels.len() as u32);
        for user in levels {
            buf.put_u32_le(user.user_id);
            buf.put_u32_le(user.level);
        }
        buf.put_bytes(0, (MAX_USERS - levels.len()) * 8);
    }
}

/// Detected values a phrase event reports for one stream
#[derive(Debug, Clone, Copy)]
pub struct PhraseEventInputs<'a> {
    pub status: u32,
    pub attrs: &'a StreamAttributes,
    pub result: &'a DetectionResult,
    pub keyword_index: KeywordIndex,
}

/// Client tree of the stream with its detected values written in
fn detected_conf_tree(model: &RegisteredModel, result: &DetectionResult) -> VuiResult<(ConfLevelsWireTree, u64)> {
    let mut tree = match &model.conf_tree {
        Some(tree) => tree.clone(),
        None => {
            let phrases = model
                .rec_config
                .as_ref()
                .map(|rc| rc.phrases.as_slice())
                .unwrap_or(&[]);
            debug!("No cached confidence levels, building tree from {} phrase(s)", phrases.len());
            ConfLevelsWireTree::from_phrases(phrases)?
        }
    };

    let detection_timestamp = if model.model_id > 0 {
        let (keyword_id, best, timestamp) = match result.model_stat(model.model_id) {
            Some(stat) => {
                info!(
                    "keywordID: {}, best_conf_level: {}",
                    stat.keyword_id, stat.best_confidence
                );
                (stat.keyword_id, stat.best_level(), stat.detection_timestamp)
            }
            None => {
                warn!("No detection stats for model id {:#x}", model.model_id);
                (0, 0, 0)
            }
        };
        tree.fill_detected_keyword(keyword_id, best, &model.second_stage_det_levels);
        timestamp
    } else {
        tree.pack_detected_levels(&model.det_conf_levels, &model.second_stage_det_levels);
        result.detection_timestamp
    };

    Ok((tree, detection_timestamp))
}

/// Build the phrase recognition event for a keyphrase stream
pub fn build_phrase_event(model: &RegisteredModel, inputs: &PhraseEventInputs<'_>) -> VuiResult<Vec<u8>> {
    let rec_config = model.rec_config.as_ref().ok_or_else(|| {
        error!("No recognition config for keyphrase stream");
        VuiError::InvalidRecognitionConfig("recognition config not set".to_string())
    })?;

    let (tree, detection_timestamp) = detected_conf_tree(model, inputs.result)?;
    let opaque_size = phrase_opaque_size(tree.as_bytes().len());
    let mut event = alloc_event(PHRASE_EVENT_SIZE + opaque_size)?;

    CommonHeader {
        status: inputs.status,
        model_type: model.model_type.wire_value(),
        capture_available: rec_config.capture_requested,
        attrs: inputs.attrs,
        data_size: opaque_size,
        data_offset: PHRASE_EVENT_SIZE,
    }
    .put(&mut event);
    put_phrase_extras(&mut event, &rec_config.phrases);

    event.put_slice(&encode_param(ST_PARAM_KEY_CONFIDENCE_LEVELS, tree.as_bytes()));

    let mut indices = Vec::with_capacity(KEYWORD_INDICES_INFO_SIZE);
    indices.put_u32_le(OPAQUE_INFO_VERSION);
    indices.put_u32_le(inputs.keyword_index.start_index);
    indices.put_u32_le(inputs.keyword_index.end_index);
    event.put_slice(&encode_param(ST_PARAM_KEY_KEYWORD_INDICES, &indices));

    let mut timestamps = Vec::with_capacity(TIMESTAMP_INFO_SIZE);
    timestamps.put_u32_le(OPAQUE_INFO_VERSION);
    timestamps.put_u32_le(0);
    timestamps.put_u64_le(detection_timestamp.saturating_mul(1000));
    timestamps.put_u64_le(0);
    event.put_slice(&encode_param(ST_PARAM_KEY_TIMESTAMP, &timestamps));

    debug!("Phrase event of {} bytes", event.len());
    Ok(event)
}

/// Build a phrase event whose opaque section is `payload` verbatim
pub fn build_phrase_passthrough_event(
    model: &RegisteredModel,
    status: u32,
    attrs: &StreamAttributes,
    payload: &[u8],
) -> VuiResult<Vec<u8>> {
    let rec_config = model.rec_config.as_ref().ok_or_else(|| {
        error!("No recognition config for keyphrase stream");
        VuiError::InvalidRecognitionConfig("recognition config not set".to_string())
    })?;

    let mut event = alloc_event(PHRASE_EVENT_SIZE + payload.len())?;
    CommonHeader {
        status,
        model_type: model.model_type.wire_value(),
        capture_available: rec_config.capture_requested,
        attrs,
        data_size: payload.len(),
        data_offset: PHRASE_EVENT_SIZE,
    }
    .put(&mut event);
    put_phrase_extras(&mut event, &rec_config.phrases);
    event.put_slice(payload);

    debug!("Pass-through phrase event of {} bytes", event.len());
    Ok(event)
}

/// Build a generic recognition event carrying `payload` verbatim
pub fn build_generic_event(
    model: &RegisteredModel,
    status: u32,
    attrs: &StreamAttributes,
    payload: &[u8],
) -> VuiResult<Vec<u8>> {
    let capture_available = model
        .rec_config
        .as_ref()
        .map(|rc| rc.capture_requested)
        .unwrap_or(false);

    let mut event = alloc_event(GENERIC_EVENT_SIZE + payload.len())?;
    CommonHeader {
        status,
        model_type: model.model_type.wire_value(),
        capture_available,
        attrs,
        data_size: payload.len(),
        data_offset: GENERIC_EVENT_SIZE,
    }
    .put(&mut event);
    event.put_slice(payload);

    debug!("Generic event of {} bytes", event.len());
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf_levels::{ConfLevelsVersion, CONF_LEVELS_TREE_SIZE};
    use crate::sound_model::ParsedSoundModel;
    use crate::types::{ModuleType, Phrase, RecognitionConfig, SoundModel, UserLevel};
    use crate::wire::WireReader;

    fn keyphrase_model(model_id: u32) -> RegisteredModel {
        let sound_model = SoundModel::keyphrase(
            vec![Phrase {
                id: 0,
                recognition_mode: 1,
                locale: "en_US".to_string(),
                text: "hey aether".to_string(),
                users: vec![],
            }],
            vec![],
        );
        let parsed = ParsedSoundModel {
            first_stage_type: ModuleType::Gmm,
            blobs: Vec::new(),
        };
        let mut model = RegisteredModel::new(&sound_model, parsed, model_id);
        model.rec_config = Some(RecognitionConfig {
            capture_requested: true,
            phrases: vec![PhraseRecognitionExtra {
                id: 0,
                recognition_modes: 1,
                confidence_level: 50,
                levels: vec![],
            }],
            opaque: Vec::new(),
        });
        model
    }

    fn inputs<'a>(result: &'a DetectionResult, attrs: &'a StreamAttributes) -> PhraseEventInputs<'a> {
        PhraseEventInputs {
            status: 0,
            attrs,
            result,
            keyword_index: KeywordIndex {
                start_index: 100,
                end_index: 900,
            },
        }
    }

    #[test]
    fn test_phrase_event_layout() {
        let mut model = keyphrase_model(0);
        model.det_conf_levels = vec![72];
        let result = DetectionResult {
            confidence_levels: vec![72],
            detection_timestamp: 5,
            ..Default::default()
        };
        let attrs = StreamAttributes::default();

        let event = build_phrase_event(&model, &inputs(&result, &attrs)).unwrap();
        assert_eq!(
            event.len(),
            PHRASE_EVENT_SIZE + phrase_opaque_size(CONF_LEVELS_TREE_SIZE)
        );

        let mut header = WireReader::new(&event, "event");
        let fields: Vec<u32> = (0..13).map(|_| header.u32().unwrap()).collect();
        assert_eq!(fields[2], 1); // capture available
        assert_eq!(fields[7], 16000);
        assert_eq!(fields[11] as usize, phrase_opaque_size(CONF_LEVELS_TREE_SIZE));
        assert_eq!(fields[12] as usize, PHRASE_EVENT_SIZE);
        assert_eq!(header.u32().unwrap(), 1); // num_phrases
        assert_eq!(header.u32().unwrap(), 0); // phrase id
        assert_eq!(header.u32().unwrap(), 1);
        assert_eq!(header.u32().unwrap(), 50); // client threshold stays

        let opaque = &event[PHRASE_EVENT_SIZE..];
        let tree = ConfLevelsWireTree::decode(&opaque[8..8 + CONF_LEVELS_TREE_SIZE]).unwrap();
        assert_eq!(tree.version(), ConfLevelsVersion::V1);
        assert_eq!(tree.sound_models()[0].keywords[0].kw_level, 72);

        let tail = &opaque[8 + CONF_LEVELS_TREE_SIZE..];
        let mut reader = WireReader::new(tail, "tail");
        assert_eq!(reader.u32().unwrap(), ST_PARAM_KEY_KEYWORD_INDICES);
        assert_eq!(reader.u32().unwrap(), 12);
        assert_eq!(reader.u32().unwrap(), 1);
        assert_eq!(reader.u32().unwrap(), 100);
        assert_eq!(reader.u32().unwrap(), 900);
        assert_eq!(reader.u32().unwrap(), ST_PARAM_KEY_TIMESTAMP);
        assert_eq!(reader.u32().unwrap(), 24);
        assert_eq!(reader.u32().unwrap(), 1);
        assert_eq!(reader.u32().unwrap(), 0);
        assert_eq!(reader.u64().unwrap(), 5_000);
        assert_eq!(reader.u64().unwrap(), 0);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_phrase_event_keeps_user_levels() {
        let mut model = keyphrase_model(0);
        if let Some(rc) = model.rec_config.as_mut() {
            rc.phrases[0].levels = vec![UserLevel { user_id: 1, level: 60 }];
        }
        let result = DetectionResult::default();
        let attrs = StreamAttributes::default();

        let event = build_phrase_event(&model, &inputs(&result, &attrs)).unwrap();
        let mut extra = WireReader::new(&event[COMMON_EVENT_SIZE + 4..], "extra");
        let words: Vec<u32> = (0..6).map(|_| extra.u32().unwrap()).collect();
        assert_eq!(words, vec![0, 1, 50, 1, 1, 60]);
    }

    #[test]
    fn test_phrase_event_without_config_rejected() {
        let mut model = keyphrase_model(0);
        model.rec_config = None;
        let result = DetectionResult::default();
        let attrs = StreamAttributes::default();

        let err = build_phrase_event(&model, &inputs(&result, &attrs)).unwrap_err();
        assert_eq!(err.errno(), -libc::EINVAL);
    }

    #[test]
    fn test_generic_event_carries_payload() {
        let model = RegisteredModel::new(
            &SoundModel::generic(vec![1; 8]),
            ParsedSoundModel {
                first_stage_type: ModuleType::Hotword,
                blobs: Vec::new(),
            },
            0,
        );
        let attrs = StreamAttributes::default();

        let event = build_generic_event(&model, 0, &attrs, &[9, 8, 7]).unwrap();
        assert_eq!(event.len(), GENERIC_EVENT_SIZE + 3);
        assert_eq!(&event[GENERIC_EVENT_SIZE..], &[9, 8, 7]);

        let mut header = WireReader::new(&event, "event");
        let fields: Vec<u32> = (0..13).map(|_| header.u32().unwrap()).collect();
        assert_eq!(fields[1], 1); // generic
        assert_eq!(fields[11], 3);
        assert_eq!(fields[12] as usize, GENERIC_EVENT_SIZE);
    }

    #[test]
    fn test_passthrough_phrase_event() {
        let model = keyphrase_model(0);
        let attrs = StreamAttributes::default();

        let event = build_phrase_passthrough_event(&model, 0, &attrs, &[1, 2, 3, 4]).unwrap();
        assert_eq!(event.len(), PHRASE_EVENT_SIZE + 4);
        assert_eq!(&event[PHRASE_EVENT_SIZE..], &[1, 2, 3, 4]);

        let mut header = WireReader::new(&event, "event");
        let fields: Vec<u32> = (0..13).map(|_| header.u32().unwrap()).collect();
        assert_eq!(fields[1], 0); // keyphrase
        assert_eq!(fields[11], 4);
        assert_eq!(header.u32().unwrap(), 1); // num_phrases
    }
}
