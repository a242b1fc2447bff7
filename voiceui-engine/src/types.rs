/// Shared engine types
///
/// Client-facing descriptors (sound model, recognition config), stream
/// attributes and the identifiers used across all wire formats.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on a first-stage confidence level
pub const MAX_FSTAGE_CONF_LEVEL: u32 = 100;

/// Maximum phrases carried in a recognition event
pub const MAX_PHRASES: usize = 10;

/// Maximum user levels per phrase in a recognition event
pub const MAX_USERS: usize = 10;

/// Recognition mode bits (phrase `recognition_mode`)
pub const RECOGNITION_MODE_VOICE_TRIGGER: u32 = 0x1;
pub const RECOGNITION_MODE_USER_IDENTIFICATION: u32 = 0x2;

/// Recognition event status values
pub const RECOGNITION_STATUS_SUCCESS: u32 = 0;
pub const RECOGNITION_STATUS_FAILURE: u32 = 2;

/// PCM S16 LE audio format id reported in recognition events
pub const AUDIO_FMT_PCM_S16_LE: u32 = 0x1;

/// Opaque handle of a client stream
///
/// The engine only uses it as a key; it never owns or dereferences the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamHandle(u64);

impl StreamHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Sound model identifier (`listen_model_indicator_enum`)
///
/// Second-stage ids are bit flags and are tested with `&`, first-stage GMM
/// is compared for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SoundModelId(pub u32);

impl SoundModelId {
    pub const NONE: Self = Self(0x0000);
    pub const GMM: Self = Self(0x0001);
    pub const SECOND_STAGE_KEYWORD: Self = Self(0x0002);
    pub const SECOND_STAGE_USER: Self = Self(0x0004);
    pub const UBM: Self = Self(0x0010);
    pub const FIRST_STAGE_INTERNAL: Self = Self(0x0020);
    pub const CUSTOM_START: Self = Self(0x0100);

    pub fn is_first_stage(&self) -> bool {
        *self == Self::GMM
    }

    pub fn is_second_stage_keyword(&self) -> bool {
        self.0 & Self::SECOND_STAGE_KEYWORD.0 != 0
    }

    pub fn is_second_stage_user(&self) -> bool {
        self.0 & Self::SECOND_STAGE_USER.0 != 0
    }

    pub fn is_second_stage(&self) -> bool {
        self.is_second_stage_keyword() || self.is_second_stage_user()
    }
}

/// Kind of a parsed sub-model blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    Gmm,
    PdkFirstStage,
    UserVerification,
    Keyword,
    Custom,
}

/// Sound model type as sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundModelType {
    Keyphrase,
    Generic,
}

impl SoundModelType {
    /// Wire value used in recognition events
    pub fn wire_value(&self) -> u32 {
        match self {
            SoundModelType::Keyphrase => 0,
            SoundModelType::Generic => 1,
        }
    }
}

/// First-stage module type selected by platform config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Gmm,
    Pdk5,
    Pdk6,
    Hotword,
    Custom1,
    Custom2,
}

impl ModuleType {
    /// Multi-model (PDK) modules share one detection channel across models
    pub fn is_pdk(&self) -> bool {
        matches!(self, ModuleType::Pdk5 | ModuleType::Pdk6)
    }

    /// Map the SML `versionMajor` of a first-stage entry to a module type
    pub fn from_sml_version(major: u16) -> Option<Self> {
        match major {
            0x3 => Some(ModuleType::Gmm),
            0x5 => Some(ModuleType::Pdk5),
            0x6 => Some(ModuleType::Pdk6),
            _ => None,
        }
    }
}

/// One keyphrase of a keyphrase sound model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub id: u32,
    pub recognition_mode: u32,
    pub locale: String,
    pub text: String,
    /// Enrolled user ids for this phrase
    pub users: Vec<u32>,
}

/// Client sound model descriptor with its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundModel {
    pub kind: SoundModelType,
    pub phrases: Vec<Phrase>,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl SoundModel {
    pub fn keyphrase(phrases: Vec<Phrase>, data: Vec<u8>) -> Self {
        Self {
            kind: SoundModelType::Keyphrase,
            phrases,
            data,
        }
    }

    pub fn generic(data: Vec<u8>) -> Self {
        Self {
            kind: SoundModelType::Generic,
            phrases: Vec::new(),
            data,
        }
    }

    /// Recognition mode of the first phrase (0 for generic models)
    pub fn recognition_mode(&self) -> u32 {
        self.phrases.first().map(|p| p.recognition_mode).unwrap_or(0)
    }

    pub fn keyphrases(&self) -> impl Iterator<Item = &str> {
        self.phrases.iter().map(|p| p.text.as_str())
    }

    /// Labels of the confidence-level slots: keyphrases, then `phrase/user`
    ///
    /// A user label sits at the slot named by its user id, the same slot the
    /// confidence array reserves for that user. Ids outside the user range
    /// take the free slots in phrase order.
    pub fn conf_level_labels(&self) -> Vec<String> {
        let num_kw = self.phrases.len();
        let users: Vec<(usize, String)> = self
            .phrases
            .iter()
            .flat_map(|p| p.users.iter().map(move |u| (*u as usize, format!("{}/{}", p.text, u))))
            .collect();

        let mut slots: Vec<Option<String>> = vec![None; users.len()];
        let mut misplaced = Vec::new();
        for (user_id, label) in users {
            let slot = user_id
                .checked_sub(num_kw)
                .filter(|&slot| slots.get(slot).map_or(false, Option::is_none));
            match slot {
                Some(slot) => slots[slot] = Some(label),
                None => misplaced.push(label),
            }
        }
        let mut misplaced = misplaced.into_iter();
        for slot in slots.iter_mut().filter(|s| s.is_none()) {
            *slot = misplaced.next();
        }

        self.phrases
            .iter()
            .map(|p| p.text.clone())
            .chain(slots.into_iter().flatten())
            .collect()
    }
}

/// Per-user confidence level inside a phrase recognition extra
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLevel {
    pub user_id: u32,
    pub level: u32,
}

/// Per-phrase recognition parameters of a recognition config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseRecognitionExtra {
    pub id: u32,
    pub recognition_modes: u32,
    pub confidence_level: u32,
    pub levels: Vec<UserLevel>,
}

/// Client recognition config with its opaque section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionConfig {
    pub capture_requested: bool,
    pub phrases: Vec<PhraseRecognitionExtra>,
    #[serde(skip)]
    pub opaque: Vec<u8>,
}

/// Capture stream attributes used for µs to byte conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAttributes {
    pub sample_rate: u32,
    pub bit_width: u32,
    pub channels: u32,
}

impl Default for StreamAttributes {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            bit_width: 16,
            channels: 1,
        }
    }
}

impl StreamAttributes {
    /// Convert a duration in microseconds to a byte count of captured PCM
    pub fn us_to_bytes(&self, duration_us: u64) -> u32 {
        let bytes = self.sample_rate as u128
            * self.bit_width as u128
            * self.channels as u128
            * duration_us as u128
            / (8 * 1_000_000);
        bytes.min(u32::MAX as u128) as u32
    }
}

/// History buffering durations in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    pub hist_duration_ms: u32,
    pub pre_roll_duration_ms: u32,
}

/// One typed sub-model extracted from a sound model payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoundModelBlob {
    pub id: SoundModelId,
    pub kind: BlobKind,
    pub version: (u16, u16),
    #[serde(rename = "size", serialize_with = "serialize_len")]
    pub data: Vec<u8>,
}

impl SoundModelBlob {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[allow(clippy::ptr_arg)]
fn serialize_len<S: serde::Serializer>(data: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(data.len() as u64)
}
