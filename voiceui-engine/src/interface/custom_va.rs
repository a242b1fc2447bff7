/// CustomVA interface
///
/// Third-party keyword engines loaded on the first stage. Whether thresholds
/// are translated into a voice-wakeup config or the client's opaque bytes
/// are forwarded is a platform choice; without it the engine never looks
/// inside detection events either.

use super::{EngineState, InterfaceProperty, VoiceUiInterface};
use crate::config::{EngineConfig, InterfaceVariant};
use crate::detection::DetectionResult;
use crate::error::VuiResult;
use crate::recognition_config::WakeupFormat;
use crate::sound_model::parse_sound_model;
use crate::types::{RecognitionConfig, SoundModel, StreamHandle};
use tracing::debug;

#[derive(Debug)]
pub struct CustomVaInterface {
    state: EngineState,
}

impl CustomVaInterface {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: EngineState::new(config),
        }
    }
}

impl VoiceUiInterface for CustomVaInterface {
    fn variant(&self) -> InterfaceVariant {
        InterfaceVariant::CustomVa
    }

    fn state(&self) -> &EngineState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    fn interface_property(&self) -> InterfaceProperty {
        InterfaceProperty {
            is_qc_wakeup_config: self.state.qc_wakeup_config(),
            is_multi_model_supported: false,
        }
    }

    fn register_model(&mut self, stream: StreamHandle, sound_model: &SoundModel, model_id: u32) -> VuiResult<()> {
        let parsed = parse_sound_model(sound_model, self.state.default_module())?;
        self.state.register_parsed(stream, sound_model, parsed, model_id);
        Ok(())
    }

    fn parse_recognition_config(&mut self, stream: StreamHandle, config: &RecognitionConfig) -> VuiResult<()> {
        let format = if self.state.qc_wakeup_config() {
            WakeupFormat::CustomPayload
        } else {
            WakeupFormat::PassThrough
        };
        self.state.apply_recognition_config(stream, config, format)
    }

    fn parse_detection_payload(&mut self, payload: &[u8]) -> VuiResult<()> {
        if self.state.qc_wakeup_config() {
            self.state.decode_detection(payload)?;
            self.state.distribute_detection_levels();
            return Ok(());
        }

        debug!("Caching {} byte custom detection payload", payload.len());
        self.state.result = DetectionResult::default();
        self.state.cache_detection_payload(payload)
    }

    fn generate_callback_event(&mut self, stream: StreamHandle) -> VuiResult<Vec<u8>> {
        let status = self.state.registry().get(stream)?.detection_status;
        self.state.callback_event(stream, status, false)
    }
}
