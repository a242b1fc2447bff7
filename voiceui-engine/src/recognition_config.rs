/// Recognition config parsing
///
/// Turns a client recognition config into thresholds, buffering durations and
/// the wakeup-config blob sent to the DSP. Parsing is pure: the caller only
/// commits a `ParsedRecognitionConfig` to stream state once it is complete,
/// so a failure leaves the previous tree, thresholds and wakeup config intact.

use crate::conf_levels::{fill_conf_levels, ConfLevelsWireTree};
use crate::error::{alloc_copy, VuiError, VuiResult};
use crate::types::{BufferConfig, PhraseRecognitionExtra, SoundModelId, MAX_FSTAGE_CONF_LEVEL};
use crate::wire::{ParamRecords, WireReader, PARAM_HEADER_SIZE};
use bytes::BufMut;
use serde::Serialize;
use tracing::{debug, error, info, trace};

/// Opaque sections up to this size are never treated as TLV records
pub const CUSTOM_CONFIG_OPAQUE_DATA_SIZE: usize = 12;

/// Recognition-config opaque keys
pub const ST_PARAM_KEY_CONFIDENCE_LEVELS: u32 = 0;
pub const ST_PARAM_KEY_HISTORY_BUFFER_CONFIG: u32 = 1;
pub const ST_PARAM_KEY_KEYWORD_INDICES: u32 = 2;
pub const ST_PARAM_KEY_TIMESTAMP: u32 = 3;
pub const ST_PARAM_KEY_DETECTION_PERF_MODE: u32 = 4;

/// Size of `st_hist_buffer_info`
pub const HIST_BUFFER_INFO_SIZE: usize = 12;

/// Size of `st_det_perf_mode_info`
pub const DET_PERF_MODE_INFO_SIZE: usize = 8;

/// Version written into the buffering payload
pub const HIST_BUFFER_INFO_VERSION: u32 = 0x1;

const VOICE_WAKEUP_FIXED_SIZE: usize = 6;

/// `{mode, custom_payload_size, num_keywords, model_id}`, all u32
const PDK_WAKEUP_FIXED_SIZE: usize = 16;

/// Which encoding the opaque section of a recognition config uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigDialect {
    /// `{key, payload_size, payload}` records
    Tlv,
    /// Thresholds taken from the phrase recognition extras
    Legacy,
}

impl ConfigDialect {
    pub fn select(opaque: &[u8], qc_wakeup_config: bool) -> Self {
        if opaque.len() > CUSTOM_CONFIG_OPAQUE_DATA_SIZE && qc_wakeup_config {
            ConfigDialect::Tlv
        } else {
            ConfigDialect::Legacy
        }
    }
}

/// Wakeup configuration handed to the DSP for one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "bytes", rename_all = "snake_case")]
pub enum WakeupConfigBlob {
    /// `detection_engine_config_voice_wakeup` built from confidence levels
    VoiceWakeup(Vec<u8>),
    /// `detection_engine_config_stage1_pdk` for one multi-model sub-model
    PdkWakeup(Vec<u8>),
    /// Client opaque bytes forwarded unchanged
    PassThrough(Vec<u8>),
}

/// How a stream's thresholds are handed to the DSP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupFormat {
    /// Engine-owned voice-wakeup config: the PDK layout on multi-model
    /// modules, otherwise the GMM layout without custom payload
    Engine,
    /// GMM layout announcing the client's opaque size as custom payload
    CustomPayload,
    /// Opaque bytes forwarded as they are
    PassThrough,
}

impl WakeupConfigBlob {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WakeupConfigBlob::VoiceWakeup(bytes)
            | WakeupConfigBlob::PdkWakeup(bytes)
            | WakeupConfigBlob::PassThrough(bytes) => bytes,
        }
    }

    /// Encode a voice-wakeup config
    ///
    /// Layout: `{mode u16, custom_payload_size u16, num_active_models u8,
    /// reserved u8}` then one level byte and one enable byte per slot. A
    /// slot at the maximum level is disabled.
    pub fn voice_wakeup(mode: u32, custom_payload_size: usize, conf_levels: &[u8]) -> VuiResult<Self> {
        let num_active_models = u8::try_from(conf_levels.len()).map_err(|_| {
            VuiError::InvalidRecognitionConfig(format!("{} confidence levels", conf_levels.len()))
        })?;

        let size = VOICE_WAKEUP_FIXED_SIZE + 2 * conf_levels.len();
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(size)
            .map_err(|_| VuiError::NoMemory(size))?;

        payload.put_u16_le(mode as u16);
        payload.put_u16_le(custom_payload_size.min(u16::MAX as usize) as u16);
        payload.put_u8(num_active_models);
        payload.put_u8(0);
        payload.put_slice(conf_levels);
        for (i, &level) in conf_levels.iter().enumerate() {
            let enable = if level as u32 == MAX_FSTAGE_CONF_LEVEL { 0 } else { 1 };
            info!("confidence_level[{}] = {} KW_User_enable[{}] = {}", i, level, i, enable);
            payload.put_u8(enable);
        }

        Ok(WakeupConfigBlob::VoiceWakeup(payload))
    }

    /// Encode a PDK wakeup config
    ///
    /// Layout: `{mode, custom_payload_size = 0, num_keywords, model_id}`
    /// then one u32 level per keyword, all little-endian u32.
    pub fn pdk_wakeup(mode: u32, model_id: u32, conf_levels: &[u8]) -> VuiResult<Self> {
        let size = PDK_WAKEUP_FIXED_SIZE + 4 * conf_levels.len();
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(size)
            .map_err(|_| VuiError::NoMemory(size))?;

        payload.put_u32_le(mode);
        payload.put_u32_le(0);
        payload.put_u32_le(conf_levels.len() as u32);
        payload.put_u32_le(model_id);
        for (i, &level) in conf_levels.iter().enumerate() {
            debug!("model id {:#x} keyword[{}] confidence level {}", model_id, i, level);
            payload.put_u32_le(level as u32);
        }

        Ok(WakeupConfigBlob::PdkWakeup(payload))
    }

    pub fn pass_through(opaque: &[u8]) -> VuiResult<Self> {
        Ok(WakeupConfigBlob::PassThrough(alloc_copy(opaque)?))
    }
}

/// Everything a recognition config contributes to stream state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedRecognitionConfig {
    pub dialect: ConfigDialect,
    /// First-stage confidence array (keywords then users)
    pub conf_levels: Vec<u8>,
    /// Client tree, present only for the TLV dialect
    pub conf_tree: Option<ConfLevelsWireTree>,
    pub second_stage_thresholds: Vec<(SoundModelId, u32)>,
    pub buffer_config: BufferConfig,
    pub hist_duration_set: bool,
    pub perf_mode: Option<u8>,
}

impl ParsedRecognitionConfig {
    fn empty(dialect: ConfigDialect) -> Self {
        Self {
            dialect,
            conf_levels: Vec::new(),
            conf_tree: None,
            second_stage_thresholds: Vec::new(),
            buffer_config: BufferConfig::default(),
            hist_duration_set: false,
            perf_mode: None,
        }
    }

    /// Substitute the platform default when the client set no history duration
    fn apply_default_buffering(&mut self, default_buffer: BufferConfig) {
        if self.buffer_config.hist_duration_ms == 0 {
            self.buffer_config.hist_duration_ms = default_buffer.hist_duration_ms;
            if self.buffer_config.pre_roll_duration_ms == 0 {
                self.buffer_config.pre_roll_duration_ms = default_buffer.pre_roll_duration_ms;
            }
            self.hist_duration_set = false;
        } else {
            self.hist_duration_set = true;
        }
        debug!(
            "hist buffer duration {} ms, pre roll {} ms (client set: {})",
            self.buffer_config.hist_duration_ms,
            self.buffer_config.pre_roll_duration_ms,
            self.hist_duration_set
        );
    }
}

/// Inputs of a recognition-config parse taken from the registered stream
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    pub model_id: u32,
    /// Phrase count of the registered sound model
    pub model_phrases: Option<usize>,
    pub qc_wakeup_config: bool,
    pub default_buffer: BufferConfig,
}

/// Parse a TLV opaque section
pub fn parse_opaque(opaque: &[u8], model_id: u32) -> VuiResult<ParsedRecognitionConfig> {
    let mut parsed = ParsedRecognitionConfig::empty(ConfigDialect::Tlv);

    for record in ParamRecords::new(opaque, "recognition config opaque") {
        let record = record?;
        trace!("key {}, payload size {}", record.key, record.payload.len());

        match record.key {
            ST_PARAM_KEY_CONFIDENCE_LEVELS => {
                let tree = ConfLevelsWireTree::decode(record.payload).map_err(|e| {
                    error!("Failed to parse opaque conf levels: {}", e);
                    e
                })?;
                let thresholds = tree.thresholds(model_id)?;
                parsed.conf_levels = thresholds.first_stage;
                parsed.second_stage_thresholds = thresholds.second_stage;
                parsed.conf_tree = Some(tree);
            }
            ST_PARAM_KEY_HISTORY_BUFFER_CONFIG => {
                expect_size("history buffer config", HIST_BUFFER_INFO_SIZE, record.payload.len())?;
                let mut reader = WireReader::new(record.payload, "history buffer config");
                let _version = reader.u32()?;
                parsed.buffer_config.hist_duration_ms = reader.u32()?;
                parsed.buffer_config.pre_roll_duration_ms = reader.u32()?;
            }
            ST_PARAM_KEY_DETECTION_PERF_MODE => {
                expect_size("detection perf mode", DET_PERF_MODE_INFO_SIZE, record.payload.len())?;
                let mut reader = WireReader::new(record.payload, "detection perf mode");
                let _version = reader.u32()?;
                let mode = reader.u8()?;
                debug!("set perf mode {}", mode);
                parsed.perf_mode = Some(mode);
            }
            key => {
                error!("Unsupported opaque data key id {}, exiting", key);
                return Err(VuiError::UnknownKey(key));
            }
        }
    }

    Ok(parsed)
}

fn expect_size(what: &'static str, expected: usize, actual: usize) -> VuiResult<()> {
    if expected != actual {
        error!("{} format error: size {} != {}", what, actual, expected);
        return Err(VuiError::SizeMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Parse the legacy dialect from the phrase recognition extras
pub fn parse_legacy(
    phrases: &[PhraseRecognitionExtra],
    model_id: u32,
    model_phrases: Option<usize>,
) -> VuiResult<ParsedRecognitionConfig> {
    let mut parsed = ParsedRecognitionConfig::empty(ConfigDialect::Legacy);
    parsed.conf_levels = fill_conf_levels(model_id, phrases, model_phrases).map_err(|e| {
        error!("Failed to parse conf levels from rc config: {}", e);
        e
    })?;
    Ok(parsed)
}

/// Parse a recognition config opaque section and phrases for one stream
///
/// Legacy configs without QC wakeup config carry no thresholds at all; the
/// opaque bytes are forwarded as they are.
pub fn parse_recognition_config(
    phrases: &[PhraseRecognitionExtra],
    opaque: &[u8],
    ctx: &ParseContext,
) -> VuiResult<ParsedRecognitionConfig> {
    debug!("Enter, opaque size {}", opaque.len());

    let dialect = ConfigDialect::select(opaque, ctx.qc_wakeup_config);
    let mut parsed = match dialect {
        ConfigDialect::Tlv => parse_opaque(opaque, ctx.model_id)?,
        ConfigDialect::Legacy if ctx.qc_wakeup_config => {
            parse_legacy(phrases, ctx.model_id, ctx.model_phrases)?
        }
        ConfigDialect::Legacy => ParsedRecognitionConfig::empty(ConfigDialect::Legacy),
    };

    parsed.apply_default_buffering(ctx.default_buffer);
    debug!("Exit, {} conf levels", parsed.conf_levels.len());
    Ok(parsed)
}

/// Encode `st_hist_buffer_info` for the DSP buffering config
pub fn encode_buffering_payload(config: &BufferConfig) -> Vec<u8> {
    let mut payload = Vec::with_capacity(HIST_BUFFER_INFO_SIZE);
    payload.put_u32_le(HIST_BUFFER_INFO_VERSION);
    payload.put_u32_le(config.hist_duration_ms);
    payload.put_u32_le(config.pre_roll_duration_ms);
    payload
}

/// Encode one `{key, payload_size, payload}` record
pub fn encode_param(key: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PARAM_HEADER_SIZE + payload.len());
    out.put_u32_le(key);
    out.put_u32_le(payload.len() as u32);
    out.put_slice(payload);
    out
}
