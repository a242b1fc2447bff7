/// Voice-UI engine library
///
/// This library sits between sound-trigger client streams and a DSP
/// detection engine: it parses sound models into loadable blobs, turns
/// recognition configs into wakeup configs, decodes detection events and
/// encodes the recognition events sent back to clients.

pub mod callback;
pub mod conf_levels;
pub mod config;
pub mod detection;
pub mod error;
pub mod interface;
pub mod recognition_config;
pub mod registry;
pub mod sound_model;
pub mod types;
pub mod wire;

// Re-export main types
pub use conf_levels::{ConfLevelsVersion, ConfLevelsWireTree};
pub use config::{ConfigError, EngineConfig, InterfaceVariant};
pub use detection::{DetectionResult, KeywordIndex, ModelStats};
pub use error::{VuiError, VuiResult};
pub use interface::{
    create_interface, CustomVaInterface, EngineState, HotwordInterface, InterfaceProperty,
    SvaInterface, VoiceUiEngine, VoiceUiInterface,
};
pub use recognition_config::{ConfigDialect, ParsedRecognitionConfig, WakeupConfigBlob, WakeupFormat};
pub use sound_model::{parse_sound_model, ParsedSoundModel};
pub use types::{
    BufferConfig, ModuleType, Phrase, PhraseRecognitionExtra, RecognitionConfig, SoundModel,
    SoundModelBlob, SoundModelId, SoundModelType, StreamAttributes, StreamHandle, UserLevel,
};
