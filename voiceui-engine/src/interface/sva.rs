/// SVA interface
///
/// First-party keyword detection: SML sound models, thresholds always sent
/// as a voice-wakeup config, and single-model (GMM) or multi-model (PDK)
/// detection events depending on the loaded first stage.

use super::{EngineState, InterfaceProperty, VoiceUiInterface};
use crate::config::{EngineConfig, InterfaceVariant};
use crate::error::VuiResult;
use crate::recognition_config::WakeupFormat;
use crate::sound_model::parse_sound_model;
use crate::types::{
    RecognitionConfig, SoundModel, StreamHandle, RECOGNITION_STATUS_FAILURE,
    RECOGNITION_STATUS_SUCCESS,
};
use tracing::debug;

#[derive(Debug)]
pub struct SvaInterface {
    state: EngineState,
}

impl SvaInterface {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: EngineState::new(config),
        }
    }

    /// Build the recognition event reporting a confirmed or rejected detection
    pub fn callback_event(&mut self, stream: StreamHandle, detection: bool) -> VuiResult<Vec<u8>> {
        let status = if detection {
            RECOGNITION_STATUS_SUCCESS
        } else {
            RECOGNITION_STATUS_FAILURE
        };
        self.state.callback_event(stream, status, true)
    }
}

impl VoiceUiInterface for SvaInterface {
    fn variant(&self) -> InterfaceVariant {
        InterfaceVariant::Sva
    }

    fn state(&self) -> &EngineState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    fn interface_property(&self) -> InterfaceProperty {
        InterfaceProperty {
            is_qc_wakeup_config: true,
            is_multi_model_supported: true,
        }
    }

    fn register_model(&mut self, stream: StreamHandle, sound_model: &SoundModel, model_id: u32) -> VuiResult<()> {
        let parsed = parse_sound_model(sound_model, self.state.default_module())?;
        self.state.register_parsed(stream, sound_model, parsed, model_id);
        Ok(())
    }

    fn parse_recognition_config(&mut self, stream: StreamHandle, config: &RecognitionConfig) -> VuiResult<()> {
        self.state.apply_recognition_config(stream, config, WakeupFormat::Engine)
    }

    fn parse_detection_payload(&mut self, payload: &[u8]) -> VuiResult<()> {
        debug!("Detection payload of {} bytes", payload.len());
        self.state.decode_detection(payload)?;
        self.state.distribute_detection_levels();
        Ok(())
    }

    fn generate_callback_event(&mut self, stream: StreamHandle) -> VuiResult<Vec<u8>> {
        self.callback_event(stream, true)
    }
}
