/// Hotword interface
///
/// Hotword engines own their model and event formats. Sound models are
/// loaded as one opaque blob, recognition configs are forwarded, and the
/// detection payload is echoed back to the client inside the event.

use super::{EngineState, InterfaceProperty, VoiceUiInterface};
use crate::callback::{build_generic_event, build_phrase_passthrough_event};
use crate::config::{EngineConfig, InterfaceVariant};
use crate::detection::DetectionResult;
use crate::error::VuiResult;
use crate::recognition_config::WakeupFormat;
use crate::sound_model::parse_opaque_sound_model;
use crate::types::{
    ModuleType, RecognitionConfig, SoundModel, SoundModelType, StreamHandle,
    RECOGNITION_STATUS_SUCCESS,
};
use tracing::debug;

#[derive(Debug)]
pub struct HotwordInterface {
    state: EngineState,
}

impl HotwordInterface {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: EngineState::new(config),
        }
    }
}

impl VoiceUiInterface for HotwordInterface {
    fn variant(&self) -> InterfaceVariant {
        InterfaceVariant::Hotword
    }

    fn state(&self) -> &EngineState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    fn interface_property(&self) -> InterfaceProperty {
        InterfaceProperty {
            is_qc_wakeup_config: false,
            is_multi_model_supported: false,
        }
    }

    fn register_model(&mut self, stream: StreamHandle, sound_model: &SoundModel, model_id: u32) -> VuiResult<()> {
        let parsed = parse_opaque_sound_model(sound_model, ModuleType::Hotword)?;
        self.state.register_parsed(stream, sound_model, parsed, model_id);
        Ok(())
    }

    fn parse_recognition_config(&mut self, stream: StreamHandle, config: &RecognitionConfig) -> VuiResult<()> {
        self.state.apply_recognition_config(stream, config, WakeupFormat::PassThrough)
    }

    fn parse_detection_payload(&mut self, payload: &[u8]) -> VuiResult<()> {
        debug!("Caching {} byte hotword detection payload", payload.len());
        self.state.result = DetectionResult::default();
        self.state.cache_detection_payload(payload)
    }

    fn generate_callback_event(&mut self, stream: StreamHandle) -> VuiResult<Vec<u8>> {
        let state = &self.state;
        let model = state.registry.get(stream)?;
        match model.model_type {
            SoundModelType::Keyphrase => build_phrase_passthrough_event(
                model,
                RECOGNITION_STATUS_SUCCESS,
                &state.attrs,
                &state.detection_payload,
            ),
            SoundModelType::Generic => build_generic_event(
                model,
                RECOGNITION_STATUS_SUCCESS,
                &state.attrs,
                &state.detection_payload,
            ),
        }
    }
}
