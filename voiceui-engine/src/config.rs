/// Engine configuration
///
/// Platform-level choices made once when an interface is created: which
/// wire-format variant to speak, the first-stage module type, whether
/// thresholds are sent in the QC voice-wakeup layout, and the buffering
/// defaults used when a client does not ask for a history duration.

use crate::types::{BufferConfig, ModuleType, StreamAttributes};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Path of a JSON config file
pub const ENV_CONFIG_PATH: &str = "VOICEUI_CONFIG";

/// Override of [`EngineConfig::variant`] (`sva`, `hotword`, `custom_va`)
pub const ENV_VARIANT: &str = "VOICEUI_VARIANT";

/// Override of [`EngineConfig::use_qc_wakeup_config`] (`true`/`false`/`1`/`0`)
pub const ENV_QC_WAKEUP_CONFIG: &str = "VOICEUI_QC_WAKEUP_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

/// Wire-format variant of a Voice-UI interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceVariant {
    Sva,
    Hotword,
    CustomVa,
}

impl InterfaceVariant {
    /// Variant serving a first-stage module type
    pub fn for_module(module: ModuleType) -> Self {
        match module {
            ModuleType::Gmm | ModuleType::Pdk5 | ModuleType::Pdk6 => InterfaceVariant::Sva,
            ModuleType::Hotword => InterfaceVariant::Hotword,
            ModuleType::Custom1 | ModuleType::Custom2 => InterfaceVariant::CustomVa,
        }
    }

    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sva" => Ok(InterfaceVariant::Sva),
            "hotword" => Ok(InterfaceVariant::Hotword),
            "custom_va" | "customva" => Ok(InterfaceVariant::CustomVa),
            other => Err(ConfigError::InvalidValue(format!(
                "Unknown interface variant '{}'",
                other
            ))),
        }
    }
}

/// Configuration for a Voice-UI interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit variant; derived from `module_type` when absent
    pub variant: Option<InterfaceVariant>,

    /// First-stage module type used when a sound model does not announce one
    pub module_type: ModuleType,

    /// Send thresholds as a voice-wakeup config instead of forwarding the
    /// client's opaque bytes (CustomVA only; SVA always does, Hotword never)
    pub use_qc_wakeup_config: bool,

    /// Buffering used when the client sets no history duration
    pub default_buffer_config: BufferConfig,

    /// Capture format until the stream layer pushes its own
    pub stream_attributes: StreamAttributes,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            variant: None,
            module_type: ModuleType::Gmm,
            use_qc_wakeup_config: true,
            default_buffer_config: BufferConfig {
                hist_duration_ms: 1750,
                pre_roll_duration_ms: 250,
            },
            stream_attributes: StreamAttributes::default(),
        }
    }
}

impl EngineConfig {
    /// Variant to construct, `None` when `variant` cannot serve `module_type`
    pub fn resolved_variant(&self) -> Option<InterfaceVariant> {
        let derived = InterfaceVariant::for_module(self.module_type);
        match self.variant {
            None => Some(derived),
            Some(variant) if variant == derived => Some(variant),
            Some(_) => None,
        }
    }

    /// Whether thresholds are parsed and sent in the voice-wakeup layout
    pub fn qc_wakeup_config(&self) -> bool {
        match self.resolved_variant() {
            Some(InterfaceVariant::Sva) => true,
            Some(InterfaceVariant::Hotword) | None => false,
            Some(InterfaceVariant::CustomVa) => self.use_qc_wakeup_config,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolved_variant().is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "Variant {:?} cannot serve module type {:?}",
                self.variant, self.module_type
            )));
        }

        let attrs = &self.stream_attributes;
        if attrs.sample_rate == 0 || attrs.channels == 0 {
            return Err(ConfigError::InvalidValue(
                "Sample rate and channel count must be nonzero".to_string(),
            ));
        }

        if !matches!(attrs.bit_width, 8 | 16 | 24 | 32) {
            return Err(ConfigError::InvalidValue(format!(
                "Unsupported bit width {}",
                attrs.bit_width
            )));
        }

        if self.default_buffer_config.pre_roll_duration_ms > self.default_buffer_config.hist_duration_ms {
            warn!(
                "Default pre-roll {} ms exceeds history duration {} ms",
                self.default_buffer_config.pre_roll_duration_ms,
                self.default_buffer_config.hist_duration_ms
            );
        }

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading engine config from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_VARIANT) {
            let variant = InterfaceVariant::parse(&value)?;
            self.variant = Some(variant);
            // Keep the module type consistent with an overridden variant
            if InterfaceVariant::for_module(self.module_type) != variant {
                self.module_type = match variant {
                    InterfaceVariant::Sva => ModuleType::Gmm,
                    InterfaceVariant::Hotword => ModuleType::Hotword,
                    InterfaceVariant::CustomVa => ModuleType::Custom1,
                };
            }
        }

        if let Some(value) = lookup(ENV_QC_WAKEUP_CONFIG) {
            self.use_qc_wakeup_config = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "{} must be a boolean, got '{}'",
                        ENV_QC_WAKEUP_CONFIG, other
                    )))
                }
            };
        }

        self.validate()
    }
}
