/// Integration tests for the Voice-UI engine
///
/// Drives interfaces end to end: sound model registration, recognition
/// config parsing, detection events from the DSP and the recognition events
/// handed back to clients.

use bytes::BufMut;
use std::io::Write;
use tempfile::NamedTempFile;
use test_case::test_case;
use voiceui_engine::callback::PHRASE_EVENT_SIZE;
use voiceui_engine::conf_levels::{KeywordConfLevels, SoundModelConfLevels, UserConfLevel};
use voiceui_engine::recognition_config::{
    encode_param, ST_PARAM_KEY_CONFIDENCE_LEVELS, ST_PARAM_KEY_HISTORY_BUFFER_CONFIG,
    ST_PARAM_KEY_KEYWORD_INDICES, ST_PARAM_KEY_TIMESTAMP,
};
use voiceui_engine::sound_model::SmlEntry;
use voiceui_engine::wire::WireReader;
use voiceui_engine::{
    create_interface, ConfLevelsVersion, ConfLevelsWireTree, EngineConfig, InterfaceVariant,
    ModuleType, Phrase, PhraseRecognitionExtra, RecognitionConfig, SoundModel, SoundModelId,
    StreamHandle, UserLevel, VoiceUiEngine, VoiceUiInterface, VuiError,
};

const KEY_CONFIDENCE_LEVELS_INFO: u32 = 0;
const KEY_TIMESTAMP_INFO: u32 = 2;
const KEY_FTRT_DATA_INFO: u32 = 3;
const KEY_MULTI_MODEL_RESULT_INFO: u32 = 4;

fn phrase(text: &str, users: &[u32]) -> Phrase {
    Phrase {
        id: 0,
        recognition_mode: 1,
        locale: "en_US".to_string(),
        text: text.to_string(),
        users: users.to_vec(),
    }
}

fn gmm_sound_model(phrases: Vec<Phrase>) -> SoundModel {
    let data = SmlEntry::encode_container(&[SmlEntry::new(SoundModelId::GMM, 0x3, vec![0x5A; 64])]);
    SoundModel::keyphrase(phrases, data)
}

fn keyword(level: u32, users: &[(u32, u32)]) -> KeywordConfLevels {
    KeywordConfLevels {
        kw_level: level,
        users: users
            .iter()
            .map(|&(user_id, level)| UserConfLevel { user_id, level })
            .collect(),
    }
}

fn tree(version: ConfLevelsVersion, sound_models: Vec<SoundModelConfLevels>) -> ConfLevelsWireTree {
    ConfLevelsWireTree::from_sound_models(version, sound_models).unwrap()
}

fn gmm_levels(keywords: Vec<KeywordConfLevels>) -> SoundModelConfLevels {
    SoundModelConfLevels {
        sm_id: SoundModelId::GMM,
        keywords,
    }
}

fn rc_with_opaque(opaque: Vec<u8>) -> RecognitionConfig {
    RecognitionConfig {
        capture_requested: true,
        phrases: vec![PhraseRecognitionExtra {
            id: 0,
            recognition_modes: 1,
            confidence_level: 10,
            levels: vec![],
        }],
        opaque,
    }
}

fn detection_event(status: u16, records: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_u16_le(status);
    buf.put_u16_le(records.len() as u16);
    buf.put_slice(records);
    buf
}

fn record(key: u32, words: &[u32], tail: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_u32_le(key);
    buf.put_u32_le((words.len() * 4 + tail.len()) as u32);
    for &w in words {
        buf.put_u32_le(w);
    }
    buf.put_slice(tail);
    buf
}

fn model_stats(model_id: u32, keyword_id: u32, best: u32, start: u32, end: u32, det: u32) -> [u32; 10] {
    [model_id, keyword_id, 0, best, start, 0, end, 0, det, 0]
}

/// Decode the confidence tree echoed in a phrase event
fn event_tree(event: &[u8], tree_size: usize) -> ConfLevelsWireTree {
    let opaque = &event[PHRASE_EVENT_SIZE..];
    let mut reader = WireReader::new(opaque, "event opaque");
    assert_eq!(reader.u32().unwrap(), ST_PARAM_KEY_CONFIDENCE_LEVELS);
    assert_eq!(reader.u32().unwrap() as usize, tree_size);
    ConfLevelsWireTree::decode(&opaque[8..8 + tree_size]).unwrap()
}

fn pdk_words(config: &[u8]) -> Vec<u32> {
    config
        .chunks(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn sva_engine(stream: StreamHandle, model: &SoundModel) -> VoiceUiEngine {
    create_interface(&EngineConfig::default(), stream, model, 0).unwrap()
}

#[test]
fn test_single_model_detection_echoes_client_tree() {
    let stream = StreamHandle::new(0x100);
    let mut engine = sva_engine(stream, &gmm_sound_model(vec![phrase("hey aether", &[])]));

    let client_tree = tree(ConfLevelsVersion::V2, vec![gmm_levels(vec![keyword(60, &[])])]);
    let mut opaque = encode_param(ST_PARAM_KEY_CONFIDENCE_LEVELS, client_tree.as_bytes());
    opaque.extend(record(ST_PARAM_KEY_HISTORY_BUFFER_CONFIG, &[1, 2000, 500], &[]));
    engine
        .parse_recognition_config(stream, &rc_with_opaque(opaque.clone()))
        .unwrap();

    // SVA never announces a custom payload
    assert_eq!(engine.wakeup_config(stream).unwrap(), &[1, 0, 0, 0, 1, 0, 60, 1]);
    assert_eq!(engine.buffering_config(stream).unwrap().hist_duration_ms, 2000);
    assert_eq!(
        engine.buffering_payload(stream).unwrap(),
        [1u32, 2000, 500]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect::<Vec<u8>>()
    );

    let records = record(KEY_CONFIDENCE_LEVELS_INFO, &[1, 1], &[72]);
    engine
        .parse_detection_payload(&detection_event(0, &records))
        .unwrap();
    assert_eq!(engine.detected_stream(), Some(stream));

    let event = engine.generate_callback_event(stream).unwrap();
    let echoed = event_tree(&event, client_tree.as_bytes().len());
    assert_eq!(echoed.version(), ConfLevelsVersion::V2);
    assert_eq!(echoed.sound_models().len(), 1);
    assert_eq!(echoed.sound_models()[0].keywords[0].kw_level, 72);

    // Client set a history duration, so the read offset stays put
    assert_eq!(engine.read_offset(), 0);
}

#[test]
fn test_multi_model_detection_routes_by_model_id() {
    let config = EngineConfig {
        module_type: ModuleType::Pdk5,
        ..Default::default()
    };
    let first = StreamHandle::new(1);
    let second = StreamHandle::new(2);

    let model = SoundModel::keyphrase(vec![phrase("hey aether", &[])], vec![1; 32]);
    let mut engine = create_interface(&config, first, &model, 5).unwrap();
    engine
        .register_model(second, &SoundModel::keyphrase(vec![phrase("ok aether", &[])], vec![2; 32]), 7)
        .unwrap();
    assert!(engine.interface_property().is_multi_model_supported);

    let client_tree = tree(ConfLevelsVersion::V1, vec![gmm_levels(vec![keyword(50, &[(1, 40)])])]);
    let opaque = encode_param(ST_PARAM_KEY_CONFIDENCE_LEVELS, client_tree.as_bytes());
    for stream in [first, second] {
        engine
            .parse_recognition_config(stream, &rc_with_opaque(opaque.clone()))
            .unwrap();
    }
    // Multi-model configs use the PDK layout with keyword levels only
    assert_eq!(pdk_words(engine.wakeup_config(first).unwrap()), vec![1, 0, 1, 5, 50]);
    assert_eq!(pdk_words(engine.wakeup_config(second).unwrap()), vec![1, 0, 1, 7, 50]);

    let mut words = vec![1, 1];
    words.extend_from_slice(&model_stats(5, 0, 88, 1_000, 2_000, 3_000));
    let mut records = record(KEY_FTRT_DATA_INFO, &[1, 3_000], &[]);
    records.extend(record(KEY_MULTI_MODEL_RESULT_INFO, &words, &[]));
    engine
        .parse_detection_payload(&detection_event(0, &records))
        .unwrap();

    assert_eq!(engine.detected_stream(), Some(first));
    assert_eq!(engine.keyword_index().start_index, 32);
    assert_eq!(engine.keyword_index().end_index, 64);
    assert_eq!(engine.ftrt_data_size(), 96);

    let event = engine.generate_callback_event(first).unwrap();
    let tree_size = client_tree.as_bytes().len();
    let echoed = event_tree(&event, tree_size);
    assert_eq!(echoed.sound_models()[0].keywords[0].kw_level, 88);
    assert_eq!(echoed.sound_models()[0].keywords[0].users[0].level, 0);

    let mut tail = WireReader::new(&event[PHRASE_EVENT_SIZE + 8 + tree_size..], "tail");
    assert_eq!(tail.u32().unwrap(), ST_PARAM_KEY_KEYWORD_INDICES);
    tail.skip(4).unwrap();
    assert_eq!(tail.u32().unwrap(), 1);
    assert_eq!(tail.u32().unwrap(), 32);
    assert_eq!(tail.u32().unwrap(), 64);
    assert_eq!(tail.u32().unwrap(), ST_PARAM_KEY_TIMESTAMP);
    tail.skip(12).unwrap();
    assert_eq!(tail.u64().unwrap(), 3_000_000);
}

#[test]
fn test_unknown_opaque_key_keeps_previous_config() {
    let stream = StreamHandle::new(0x200);
    let mut engine = sva_engine(stream, &gmm_sound_model(vec![phrase("hey aether", &[])]));

    let client_tree = tree(ConfLevelsVersion::V1, vec![gmm_levels(vec![keyword(45, &[])])]);
    let opaque = encode_param(ST_PARAM_KEY_CONFIDENCE_LEVELS, client_tree.as_bytes());
    engine
        .parse_recognition_config(stream, &rc_with_opaque(opaque))
        .unwrap();
    let before = engine.wakeup_config(stream).unwrap().to_vec();

    let bad = record(9, &[1, 2, 3], &[]);
    let err = engine
        .parse_recognition_config(stream, &rc_with_opaque(bad))
        .unwrap_err();
    assert_eq!(err, VuiError::UnknownKey(9));
    assert_eq!(err.errno(), -libc::EINVAL);
    assert_eq!(engine.wakeup_config(stream).unwrap(), before.as_slice());
}

#[test]
fn test_legacy_config_lays_out_keywords_then_users() {
    let stream = StreamHandle::new(0x300);
    let model = gmm_sound_model(vec![phrase("alpha", &[2]), phrase("beta", &[3])]);
    let mut engine = sva_engine(stream, &model);

    let config = RecognitionConfig {
        capture_requested: false,
        phrases: vec![
            PhraseRecognitionExtra {
                id: 0,
                recognition_modes: 1,
                confidence_level: 55,
                levels: vec![UserLevel { user_id: 2, level: 65 }],
            },
            PhraseRecognitionExtra {
                id: 1,
                recognition_modes: 1,
                confidence_level: 100,
                levels: vec![UserLevel { user_id: 3, level: 70 }],
            },
        ],
        opaque: Vec::new(),
    };
    engine.parse_recognition_config(stream, &config).unwrap();

    // 4 slots: two keywords, then users at their ids; level 100 disables
    assert_eq!(
        engine.wakeup_config(stream).unwrap(),
        &[1, 0, 0, 0, 4, 0, 55, 100, 65, 70, 1, 0, 1, 1]
    );
}

#[test_case(1 ; "user id below keyword count")]
#[test_case(4 ; "user id past total")]
fn test_legacy_config_rejects_user_id(user_id: u32) {
    let stream = StreamHandle::new(0x300);
    let model = gmm_sound_model(vec![phrase("alpha", &[]), phrase("beta", &[])]);
    let mut engine = sva_engine(stream, &model);

    let config = RecognitionConfig {
        capture_requested: false,
        phrases: vec![
            PhraseRecognitionExtra {
                id: 0,
                recognition_modes: 1,
                confidence_level: 55,
                levels: vec![UserLevel { user_id, level: 65 }],
            },
            PhraseRecognitionExtra {
                id: 1,
                recognition_modes: 1,
                confidence_level: 60,
                levels: vec![],
            },
        ],
        opaque: Vec::new(),
    };

    let err = engine.parse_recognition_config(stream, &config).unwrap_err();
    assert!(matches!(err, VuiError::InvalidUserId { .. }));
    assert!(engine.wakeup_config(stream).unwrap().is_empty());
}

#[test]
fn test_callback_preserves_tree_shape() {
    let stream = StreamHandle::new(0x400);
    let model = gmm_sound_model(vec![phrase("alpha", &[2]), phrase("beta", &[])]);
    let mut engine = sva_engine(stream, &model);

    let client_tree = tree(
        ConfLevelsVersion::V1,
        vec![
            gmm_levels(vec![keyword(50, &[(2, 60)]), keyword(40, &[])]),
            SoundModelConfLevels {
                sm_id: SoundModelId::SECOND_STAGE_KEYWORD,
                keywords: vec![keyword(30, &[(0, 0)])],
            },
        ],
    );
    let opaque = encode_param(ST_PARAM_KEY_CONFIDENCE_LEVELS, client_tree.as_bytes());
    engine
        .parse_recognition_config(stream, &rc_with_opaque(opaque))
        .unwrap();
    assert_eq!(
        engine
            .second_stage_conf_level(stream, SoundModelId::SECOND_STAGE_KEYWORD)
            .unwrap(),
        30
    );

    engine
        .set_second_stage_det_level(stream, SoundModelId::SECOND_STAGE_KEYWORD, 77)
        .unwrap();
    let mut records = record(KEY_CONFIDENCE_LEVELS_INFO, &[1, 3], &[70, 0, 65]);
    records.extend(record(KEY_TIMESTAMP_INFO, &[1, 9, 0], &[]));
    engine
        .parse_detection_payload(&detection_event(0, &records))
        .unwrap();

    let event = engine.generate_callback_event(stream).unwrap();
    let echoed = event_tree(&event, client_tree.as_bytes().len());

    assert_eq!(echoed.version(), ConfLevelsVersion::V1);
    assert_eq!(echoed.sound_models().len(), 2);
    let gmm = &echoed.sound_models()[0];
    assert_eq!(gmm.sm_id, SoundModelId::GMM);
    assert_eq!(gmm.keywords.len(), 2);
    assert_eq!(gmm.keywords[0].kw_level, 70);
    assert_eq!(gmm.keywords[0].users, vec![UserConfLevel { user_id: 2, level: 65 }]);
    assert_eq!(gmm.keywords[1].kw_level, 0);
    assert!(gmm.keywords[1].users.is_empty());

    let second = &echoed.sound_models()[1];
    assert_eq!(second.sm_id, SoundModelId::SECOND_STAGE_KEYWORD);
    assert_eq!(second.keywords[0].kw_level, 77);
}

#[test]
fn test_detected_stream_is_stable() {
    let alpha = StreamHandle::new(0xA);
    let beta = StreamHandle::new(0xB);
    let mut engine = sva_engine(alpha, &gmm_sound_model(vec![phrase("alpha", &[])]));
    engine
        .register_model(beta, &gmm_sound_model(vec![phrase("beta", &[])]), 0)
        .unwrap();

    let records = record(KEY_CONFIDENCE_LEVELS_INFO, &[1, 2], &[0, 80]);
    engine
        .parse_detection_payload(&detection_event(0, &records))
        .unwrap();

    assert_eq!(engine.detected_stream(), Some(beta));
    assert_eq!(engine.detected_stream(), Some(beta));
    assert_eq!(
        engine.state().registry().get(beta).unwrap().det_conf_levels,
        vec![80]
    );
}

#[test]
fn test_deregistration_releases_model() {
    let stream = StreamHandle::new(0x500);
    let model = gmm_sound_model(vec![phrase("hey aether", &[])]);
    let mut engine = sva_engine(stream, &model);
    assert_eq!(engine.sound_model_load_payload(stream).unwrap(), &[0x5A; 64]);

    engine.deregister_model(stream);
    assert!(engine.state().registry().is_empty());
    assert!(matches!(
        engine.sound_model_list(stream),
        Err(VuiError::StreamNotRegistered(_))
    ));

    // Deregistering again is harmless
    engine.detach_stream(stream);
    assert!(engine.state().registry().is_empty());

    engine.attach_stream(stream, &model, 0).unwrap();
    assert_eq!(engine.sound_model_list(stream).unwrap().len(), 1);
}

#[test_case(ModuleType::Gmm, InterfaceVariant::Sva ; "gmm")]
#[test_case(ModuleType::Pdk6, InterfaceVariant::Sva ; "pdk6")]
#[test_case(ModuleType::Hotword, InterfaceVariant::Hotword ; "hotword")]
#[test_case(ModuleType::Custom1, InterfaceVariant::CustomVa ; "custom1")]
fn test_interface_from_config_file(module: ModuleType, variant: InterfaceVariant) {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "{}",
        serde_json::json!({ "module_type": module, "use_qc_wakeup_config": false })
    )
    .unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    let stream = StreamHandle::new(1);
    let engine = create_interface(&config, stream, &SoundModel::generic(vec![3; 12]), 0).unwrap();

    assert_eq!(engine.variant(), variant);
    assert_eq!(
        engine.interface_property().is_qc_wakeup_config,
        variant == InterfaceVariant::Sva
    );
}
