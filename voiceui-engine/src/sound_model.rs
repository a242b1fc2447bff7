/// Sound model parser
///
/// Splits a client sound model into the typed sub-model blobs the DSP loads.
/// Keyphrase models may carry an SML container (global header, V3 directory,
/// concatenated payloads); anything else is loaded as a single blob.

use crate::error::{alloc_copy, VuiError, VuiResult};
use crate::types::{
    BlobKind, ModuleType, SoundModel, SoundModelBlob, SoundModelId, SoundModelType,
    RECOGNITION_MODE_USER_IDENTIFICATION,
};
use crate::wire::WireReader;
use bytes::BufMut;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Magic number of the SML global header
pub const SML_GLOBAL_HEADER_MAGIC: u32 = 0x0018_0CC8;

/// `{magic, payload_bytes, model_version}`
pub const SML_GLOBAL_HEADER_SIZE: usize = 12;

/// `{num_models, keyword_spell_len, user_name_spell_len}`
pub const SML_HEADER_V3_SIZE: usize = 12;

/// `{version_major u16, version_minor u16, offset, size, type}`
pub const SML_BIG_SOUND_MODEL_V3_SIZE: usize = 16;

/// SML model version written by [`SmlEntry::encode_container`]
pub const SML_MODEL_VERSION_V3: u32 = 0x0300;

/// Result of parsing a sound model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedSoundModel {
    /// First-stage module type announced by the model (or the platform default)
    pub first_stage_type: ModuleType,
    pub blobs: Vec<SoundModelBlob>,
}

/// Directory entry of an SML container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SmlDirectoryEntry {
    version_major: u16,
    version_minor: u16,
    offset: u32,
    size: u32,
    id: SoundModelId,
}

/// Parse a client sound model into owned sub-model blobs
///
/// `default_module` is used when the payload does not announce its own
/// first-stage module type (legacy and generic models).
pub fn parse_sound_model(
    model: &SoundModel,
    default_module: ModuleType,
) -> VuiResult<ParsedSoundModel> {
    debug!("Parsing {:?} sound model of {} bytes", model.kind, model.data.len());

    let parsed = match model.kind {
        SoundModelType::Keyphrase if has_sml_magic(&model.data) => {
            parse_sml_container(&model.data, model.recognition_mode(), default_module)?
        }
        SoundModelType::Keyphrase => {
            debug!("No SML header, loading legacy single-model payload");
            ParsedSoundModel {
                first_stage_type: default_module,
                blobs: vec![single_blob(&model.data, first_stage_kind(default_module))?],
            }
        }
        SoundModelType::Generic => ParsedSoundModel {
            first_stage_type: default_module,
            blobs: vec![single_blob(&model.data, BlobKind::Custom)?],
        },
    };

    info!(
        "Parsed sound model: first stage {:?}, {} blob(s)",
        parsed.first_stage_type,
        parsed.blobs.len()
    );

    Ok(parsed)
}

/// Load a sound model as one opaque blob without looking inside it
pub fn parse_opaque_sound_model(model: &SoundModel, module: ModuleType) -> VuiResult<ParsedSoundModel> {
    debug!("Loading {} byte sound model as opaque blob", model.data.len());
    Ok(ParsedSoundModel {
        first_stage_type: module,
        blobs: vec![single_blob(&model.data, BlobKind::Custom)?],
    })
}

fn has_sml_magic(payload: &[u8]) -> bool {
    WireReader::new(payload, "SML global header")
        .u32()
        .map(|magic| magic == SML_GLOBAL_HEADER_MAGIC)
        .unwrap_or(false)
}

fn first_stage_kind(module: ModuleType) -> BlobKind {
    if module.is_pdk() {
        BlobKind::PdkFirstStage
    } else {
        BlobKind::Gmm
    }
}

fn single_blob(payload: &[u8], kind: BlobKind) -> VuiResult<SoundModelBlob> {
    let id = match kind {
        BlobKind::Custom => SoundModelId::CUSTOM_START,
        _ => SoundModelId::GMM,
    };

    Ok(SoundModelBlob {
        id,
        kind,
        version: (0, 0),
        data: alloc_copy(payload)?,
    })
}

fn parse_sml_container(
    payload: &[u8],
    recognition_mode: u32,
    default_module: ModuleType,
) -> VuiResult<ParsedSoundModel> {
    let mut reader = WireReader::new(payload, "SML header");
    reader.skip(SML_GLOBAL_HEADER_SIZE)?;
    let num_models = reader.u32()? as usize;
    reader.skip(SML_HEADER_V3_SIZE - 4)?;

    info!("num of sound models = {}", num_models);

    let directory_size = num_models
        .checked_mul(SML_BIG_SOUND_MODEL_V3_SIZE)
        .ok_or_else(|| VuiError::InvalidSoundModel(format!("{} sub-models", num_models)))?;
    let data_base = SML_GLOBAL_HEADER_SIZE + SML_HEADER_V3_SIZE + directory_size;
    if data_base > payload.len() {
        error!(
            "SML directory of {} entries exceeds payload of {} bytes",
            num_models,
            payload.len()
        );
        return Err(VuiError::Truncated {
            what: "SML directory",
            needed: data_base,
            available: payload.len(),
        });
    }

    let mut first_stage_type = default_module;
    let mut blobs = Vec::with_capacity(num_models);

    for _ in 0..num_models {
        let entry = SmlDirectoryEntry {
            version_major: reader.u16()?,
            version_minor: reader.u16()?,
            offset: reader.u32()?,
            size: reader.u32()?,
            id: SoundModelId(reader.u32()?),
        };

        info!(
            "type = {:#x}, size = {}, version = {}.{}",
            entry.id.0, entry.size, entry.version_major, entry.version_minor
        );

        let kind = if entry.id == SoundModelId::GMM {
            match ModuleType::from_sml_version(entry.version_major) {
                Some(module) => first_stage_type = module,
                None => warn!(
                    "Unknown first stage version {}, keeping {:?}",
                    entry.version_major, default_module
                ),
            }
            first_stage_kind(first_stage_type)
        } else if entry.id == SoundModelId::UBM || entry.id == SoundModelId::FIRST_STAGE_INTERNAL {
            continue;
        } else if entry.id == SoundModelId::SECOND_STAGE_USER {
            if recognition_mode & RECOGNITION_MODE_USER_IDENTIFICATION == 0 {
                debug!("Skipping user verification model, not requested");
                continue;
            }
            BlobKind::UserVerification
        } else if entry.id.is_second_stage_keyword() {
            BlobKind::Keyword
        } else {
            BlobKind::Custom
        };

        let start = data_base
            .checked_add(entry.offset as usize)
            .ok_or_else(|| VuiError::InvalidSoundModel("entry offset overflow".to_string()))?;
        let end = start
            .checked_add(entry.size as usize)
            .ok_or_else(|| VuiError::InvalidSoundModel("entry size overflow".to_string()))?;
        if end > payload.len() {
            error!(
                "Sub-model {:#x} spans {}..{} beyond payload of {} bytes",
                entry.id.0,
                start,
                end,
                payload.len()
            );
            return Err(VuiError::Truncated {
                what: "SML sub-model",
                needed: end,
                available: payload.len(),
            });
        }

        blobs.push(SoundModelBlob {
            id: entry.id,
            kind,
            version: (entry.version_major, entry.version_minor),
            data: alloc_copy(&payload[start..end])?,
        });
    }

    Ok(ParsedSoundModel {
        first_stage_type,
        blobs,
    })
}

/// Entry used to assemble an SML container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmlEntry {
    pub id: SoundModelId,
    pub version_major: u16,
    pub version_minor: u16,
    pub data: Vec<u8>,
}

impl SmlEntry {
    pub fn new(id: SoundModelId, version_major: u16, data: Vec<u8>) -> Self {
        Self {
            id,
            version_major,
            version_minor: 0,
            data,
        }
    }

    /// Encode entries into an SML V3 container, payloads in entry order
    pub fn encode_container(entries: &[SmlEntry]) -> Vec<u8> {
        let payload_bytes: usize = entries.iter().map(|e| e.data.len()).sum();
        let mut buf = Vec::with_capacity(
            SML_GLOBAL_HEADER_SIZE
                + SML_HEADER_V3_SIZE
                + entries.len() * SML_BIG_SOUND_MODEL_V3_SIZE
                + payload_bytes,
        );

        buf.put_u32_le(SML_GLOBAL_HEADER_MAGIC);
        buf.put_u32_le(payload_bytes as u32);
        buf.put_u32_le(SML_MODEL_VERSION_V3);

        buf.put_u32_le(entries.len() as u32);
        buf.put_u32_le(0);
        buf.put_u32_le(0);

        let mut offset = 0u32;
        for entry in entries {
            buf.put_u16_le(entry.version_major);
            buf.put_u16_le(entry.version_minor);
            buf.put_u32_le(offset);
            buf.put_u32_le(entry.data.len() as u32);
            buf.put_u32_le(entry.id.0);
            offset += entry.data.len() as u32;
        }

        for entry in entries {
            buf.put_slice(&entry.data);
        }

        buf
    }
}
