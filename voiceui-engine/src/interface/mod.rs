/// Voice-UI interface
///
/// One interface serves every stream attached to a detection engine. The
/// variant (SVA, Hotword, CustomVA) is picked once from [`EngineConfig`] and
/// decides how recognition configs, detection payloads and callback events
/// are encoded. State shared by all variants lives in [`EngineState`].
///
/// Interfaces are not internally synchronized: mutating calls take
/// `&mut self` and the caller holds one lock around the interface.

pub mod custom_va;
pub mod hotword;
pub mod sva;

pub use custom_va::CustomVaInterface;
pub use hotword::HotwordInterface;
pub use sva::SvaInterface;

use crate::config::{EngineConfig, InterfaceVariant};
use crate::detection::{decode_multi_model, decode_single_model, DetectionResult, KeywordIndex};
use crate::error::{alloc_copy, VuiError, VuiResult};
use crate::callback::{build_generic_event, build_phrase_event, PhraseEventInputs};
use crate::recognition_config::{
    encode_buffering_payload, parse_recognition_config, ParseContext, WakeupConfigBlob,
    WakeupFormat,
};
use crate::registry::{ModelRegistry, RegisteredModel};
use crate::sound_model::ParsedSoundModel;
use crate::types::{
    BufferConfig, ModuleType, RecognitionConfig, SoundModel, SoundModelBlob, SoundModelId,
    SoundModelType, StreamAttributes, StreamHandle, RECOGNITION_STATUS_SUCCESS,
};
use serde::Serialize;
use tracing::{debug, error, info};

/// Capabilities reported to the stream layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterfaceProperty {
    pub is_qc_wakeup_config: bool,
    pub is_multi_model_supported: bool,
}

/// State shared by every interface variant
#[derive(Debug)]
pub struct EngineState {
    registry: ModelRegistry,
    /// Module type for models that do not announce one
    default_module: ModuleType,
    /// First-stage type of the most recently registered model
    module_type: ModuleType,
    qc_wakeup_config: bool,
    default_buffer: BufferConfig,
    attrs: StreamAttributes,
    result: DetectionResult,
    /// Raw bytes of the last detection event
    detection_payload: Vec<u8>,
    read_offset: u32,
}

impl EngineState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            registry: ModelRegistry::new(),
            default_module: config.module_type,
            module_type: config.module_type,
            qc_wakeup_config: config.qc_wakeup_config(),
            default_buffer: config.default_buffer_config,
            attrs: config.stream_attributes,
            result: DetectionResult::default(),
            detection_payload: Vec::new(),
            read_offset: 0,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModelRegistry {
        &mut self.registry
    }

    pub fn default_module(&self) -> ModuleType {
        self.default_module
    }

    pub fn module_type(&self) -> ModuleType {
        self.module_type
    }

    pub fn qc_wakeup_config(&self) -> bool {
        self.qc_wakeup_config
    }

    pub fn attrs(&self) -> &StreamAttributes {
        &self.attrs
    }

    pub fn result(&self) -> &DetectionResult {
        &self.result
    }

    pub fn detection_payload(&self) -> &[u8] {
        &self.detection_payload
    }

    /// Register an already parsed sound model for a stream
    pub fn register_parsed(
        &mut self,
        stream: StreamHandle,
        sound_model: &SoundModel,
        parsed: ParsedSoundModel,
        model_id: u32,
    ) {
        self.module_type = parsed.first_stage_type;
        let model = RegisteredModel::new(sound_model, parsed, model_id);
        self.registry.register(stream, model);
    }

    /// Context for parsing a recognition config of a registered stream
    pub fn parse_context(&self, stream: StreamHandle) -> VuiResult<ParseContext> {
        let model = self.registry.get(stream)?;
        Ok(ParseContext {
            model_id: model.model_id,
            model_phrases: Some(model.sound_model.phrases.len()),
            qc_wakeup_config: self.qc_wakeup_config,
            default_buffer: self.default_buffer,
        })
    }

    /// Parse a recognition config and commit it to the stream
    ///
    /// `format` picks the wakeup config encoding. Nothing is committed unless
    /// every step succeeds.
    pub fn apply_recognition_config(
        &mut self,
        stream: StreamHandle,
        config: &RecognitionConfig,
        format: WakeupFormat,
    ) -> VuiResult<()> {
        let ctx = self.parse_context(stream)?;
        let parsed = parse_recognition_config(&config.phrases, &config.opaque, &ctx).map_err(|e| {
            error!("Failed to parse recognition config for stream {}: {}", stream, e);
            e
        })?;

        let multi_model = self.is_multi_model();
        let model = self.registry.get_mut(stream)?;
        let mode = model.recognition_mode;
        let wakeup = match format {
            WakeupFormat::Engine if multi_model => {
                WakeupConfigBlob::pdk_wakeup(mode, model.model_id, &parsed.conf_levels)?
            }
            WakeupFormat::Engine => WakeupConfigBlob::voice_wakeup(mode, 0, &parsed.conf_levels)?,
            WakeupFormat::CustomPayload => {
                WakeupConfigBlob::voice_wakeup(mode, config.opaque.len(), &parsed.conf_levels)?
            }
            WakeupFormat::PassThrough => WakeupConfigBlob::pass_through(&config.opaque)?,
        };

        info!(
            "Stream {} recognition config: {:?} dialect, {} conf level(s), {} byte wakeup config",
            stream,
            parsed.dialect,
            parsed.conf_levels.len(),
            wakeup.as_bytes().len()
        );
        model.apply_recognition_config(config, parsed, wakeup);
        Ok(())
    }

    /// Build the recognition event for a stream from the current result
    ///
    /// With `capture_read_offset`, a stream that requested capture without
    /// setting a history duration moves the read offset to the keyword end.
    pub fn callback_event(
        &mut self,
        stream: StreamHandle,
        status: u32,
        capture_read_offset: bool,
    ) -> VuiResult<Vec<u8>> {
        debug!("Enter, stream {}", stream);
        let keyword_index = self.result.keyword_index;
        let model = self.registry.get(stream)?;

        let event = match model.model_type {
            SoundModelType::Keyphrase => {
                let move_offset = capture_read_offset
                    && !model.hist_duration_set
                    && model
                        .rec_config
                        .as_ref()
                        .map(|rc| rc.capture_requested)
                        .unwrap_or(false);

                let event = build_phrase_event(
                    model,
                    &PhraseEventInputs {
                        status,
                        attrs: &self.attrs,
                        result: &self.result,
                        keyword_index,
                    },
                )?;

                if move_offset {
                    debug!("Read offset moved to keyword end {}", keyword_index.end_index);
                    self.read_offset = keyword_index.end_index;
                }
                event
            }
            SoundModelType::Generic => build_generic_event(
                model,
                RECOGNITION_STATUS_SUCCESS,
                &self.attrs,
                &self.detection_payload,
            )?,
        };

        debug!("Exit, event size {}", event.len());
        Ok(event)
    }

    /// Multi-model detection events are used by PDK modules
    pub fn is_multi_model(&self) -> bool {
        self.module_type.is_pdk()
    }

    /// Decode a detection event into the current result
    ///
    /// The previous result is cleared first, so a failed decode leaves an
    /// empty result behind.
    pub fn decode_detection(&mut self, payload: &[u8]) -> VuiResult<()> {
        self.result = DetectionResult::default();
        self.cache_detection_payload(payload)?;

        let decoded = if self.is_multi_model() {
            decode_multi_model(payload, &self.attrs)
        } else {
            decode_single_model(payload, &self.attrs)
        };

        match decoded {
            Ok(result) => {
                self.result = result;
                Ok(())
            }
            Err(e) => {
                error!("Failed to parse detection payload: {}", e);
                Err(e)
            }
        }
    }

    /// Keep the raw detection event for pass-through callbacks
    pub fn cache_detection_payload(&mut self, payload: &[u8]) -> VuiResult<()> {
        self.detection_payload = alloc_copy(payload).map_err(|e| {
            error!("Failed to allocate memory for detection payload");
            e
        })?;
        Ok(())
    }

    /// Distribute merged levels to the detected stream (single-model flow)
    pub fn distribute_detection_levels(&mut self) {
        if self.is_multi_model() {
            return;
        }
        match self.registry.detected_stream(&self.result, false) {
            Some(stream) => self.registry.set_detection_conf_levels(stream, &self.result),
            None => error!("Invalid detected stream"),
        }
    }
}

/// Operations the stream layer performs on a Voice-UI interface
pub trait VoiceUiInterface: Send {
    fn variant(&self) -> InterfaceVariant;

    fn state(&self) -> &EngineState;

    fn state_mut(&mut self) -> &mut EngineState;

    fn interface_property(&self) -> InterfaceProperty;

    /// Parse a sound model and register it for `stream`
    fn register_model(&mut self, stream: StreamHandle, sound_model: &SoundModel, model_id: u32) -> VuiResult<()>;

    /// Parse a recognition config and commit it to the stream on success
    fn parse_recognition_config(
        &mut self,
        stream: StreamHandle,
        config: &RecognitionConfig,
    ) -> VuiResult<()>;

    /// Decode a DSP detection event
    fn parse_detection_payload(&mut self, payload: &[u8]) -> VuiResult<()>;

    /// Encode the recognition event for `stream`
    fn generate_callback_event(&mut self, stream: StreamHandle) -> VuiResult<Vec<u8>>;

    fn deregister_model(&mut self, stream: StreamHandle) {
        self.state_mut().registry_mut().deregister(stream);
    }

    fn attach_stream(&mut self, stream: StreamHandle, sound_model: &SoundModel, model_id: u32) -> VuiResult<()> {
        self.register_model(stream, sound_model, model_id)
    }

    fn detach_stream(&mut self, stream: StreamHandle) {
        self.deregister_model(stream);
    }

    /// Stream the last detection belongs to
    fn detected_stream(&self) -> Option<StreamHandle> {
        let state = self.state();
        state
            .registry()
            .detected_stream(state.result(), state.is_multi_model())
    }

    fn detection_event_info(&self) -> &DetectionResult {
        self.state().result()
    }

    fn set_stream_attributes(&mut self, attrs: StreamAttributes) {
        debug!(
            "Stream attributes: {} Hz, {} bit, {} ch",
            attrs.sample_rate, attrs.bit_width, attrs.channels
        );
        self.state_mut().attrs = attrs;
    }

    fn set_default_buffer_config(&mut self, config: BufferConfig) {
        self.state_mut().default_buffer = config;
    }

    fn buffering_config(&self, stream: StreamHandle) -> VuiResult<BufferConfig> {
        Ok(self.state().registry().get(stream)?.buffer_config)
    }

    /// `st_hist_buffer_info` payload for the stream's buffering
    fn buffering_payload(&self, stream: StreamHandle) -> VuiResult<Vec<u8>> {
        Ok(encode_buffering_payload(&self.buffering_config(stream)?))
    }

    /// Wakeup config bytes, empty until a recognition config was parsed
    fn wakeup_config(&self, stream: StreamHandle) -> VuiResult<&[u8]> {
        let model = self.state().registry().get(stream)?;
        Ok(model
            .wakeup_config
            .as_ref()
            .map(|blob| blob.as_bytes())
            .unwrap_or(&[]))
    }

    /// First blob of the stream's model, the one loaded into the first stage
    fn sound_model_load_payload(&self, stream: StreamHandle) -> VuiResult<&[u8]> {
        let model = self.state().registry().get(stream)?;
        model
            .blobs
            .first()
            .map(|blob| blob.data.as_slice())
            .ok_or_else(|| VuiError::InvalidSoundModel("no sound model blobs".to_string()))
    }

    fn sound_model_list(&self, stream: StreamHandle) -> VuiResult<&[SoundModelBlob]> {
        Ok(&self.state().registry().get(stream)?.blobs)
    }

    fn module_type(&self, stream: StreamHandle) -> VuiResult<ModuleType> {
        Ok(self.state().registry().get(stream)?.first_stage_type)
    }

    fn second_stage_conf_level(&self, stream: StreamHandle, sm_id: SoundModelId) -> VuiResult<u32> {
        Ok(self
            .state()
            .registry()
            .get(stream)?
            .second_stage_conf_level(sm_id))
    }

    fn set_second_stage_det_level(
        &mut self,
        stream: StreamHandle,
        sm_id: SoundModelId,
        level: u32,
    ) -> VuiResult<()> {
        self.state_mut()
            .registry_mut()
            .get_mut(stream)?
            .set_second_stage_det_level(sm_id, level);
        Ok(())
    }

    /// Record the final detection verdict for a stream
    fn update_detection_result(&mut self, stream: StreamHandle, status: u32) -> VuiResult<()> {
        self.state_mut().registry_mut().get_mut(stream)?.detection_status = status;
        Ok(())
    }

    fn keyword_index(&self) -> KeywordIndex {
        self.state().result().keyword_index
    }

    fn ftrt_data_size(&self) -> u32 {
        self.state().result().ftrt_size
    }

    fn read_offset(&self) -> u32 {
        self.state().read_offset
    }

    fn set_read_offset(&mut self, offset: u32) {
        self.state_mut().read_offset = offset;
    }
}

/// Interface chosen at construction
#[derive(Debug)]
pub enum VoiceUiEngine {
    Sva(SvaInterface),
    Hotword(HotwordInterface),
    CustomVa(CustomVaInterface),
}

impl VoiceUiEngine {
    fn inner(&self) -> &dyn VoiceUiInterface {
        match self {
            VoiceUiEngine::Sva(i) => i,
            VoiceUiEngine::Hotword(i) => i,
            VoiceUiEngine::CustomVa(i) => i,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn VoiceUiInterface {
        match self {
            VoiceUiEngine::Sva(i) => i,
            VoiceUiEngine::Hotword(i) => i,
            VoiceUiEngine::CustomVa(i) => i,
        }
    }
}

impl VoiceUiInterface for VoiceUiEngine {
    fn variant(&self) -> InterfaceVariant {
        self.inner().variant()
    }

    fn state(&self) -> &EngineState {
        self.inner().state()
    }

    fn state_mut(&mut self) -> &mut EngineState {
        self.inner_mut().state_mut()
    }

    fn interface_property(&self) -> InterfaceProperty {
        self.inner().interface_property()
    }

    fn register_model(&mut self, stream: StreamHandle, sound_model: &SoundModel, model_id: u32) -> VuiResult<()> {
        self.inner_mut().register_model(stream, sound_model, model_id)
    }

    fn parse_recognition_config(
        &mut self,
        stream: StreamHandle,
        config: &RecognitionConfig,
    ) -> VuiResult<()> {
        self.inner_mut().parse_recognition_config(stream, config)
    }

    fn parse_detection_payload(&mut self, payload: &[u8]) -> VuiResult<()> {
        self.inner_mut().parse_detection_payload(payload)
    }

    fn generate_callback_event(&mut self, stream: StreamHandle) -> VuiResult<Vec<u8>> {
        self.inner_mut().generate_callback_event(stream)
    }
}

/// Build the interface selected by `config` and register the first stream
///
/// Fails when the configured variant cannot serve the module type or the
/// initial sound model cannot be parsed.
pub fn create_interface(
    config: &EngineConfig,
    stream: StreamHandle,
    sound_model: &SoundModel,
    model_id: u32,
) -> VuiResult<VoiceUiEngine> {
    let variant = config.resolved_variant().ok_or_else(|| {
        error!(
            "Variant {:?} does not support module type {:?}",
            config.variant, config.module_type
        );
        VuiError::UnsupportedModuleType(format!("{:?}", config.module_type))
    })?;

    info!(
        "Creating {:?} interface for module type {:?}",
        variant, config.module_type
    );

    let mut engine = match variant {
        InterfaceVariant::Sva => VoiceUiEngine::Sva(SvaInterface::new(config)),
        InterfaceVariant::Hotword => VoiceUiEngine::Hotword(HotwordInterface::new(config)),
        InterfaceVariant::CustomVa => VoiceUiEngine::CustomVa(CustomVaInterface::new(config)),
    };

    engine.register_model(stream, sound_model, model_id).map_err(|e| {
        error!("Failed to register initial sound model: {}", e);
        e
    })?;

    Ok(engine)
}
