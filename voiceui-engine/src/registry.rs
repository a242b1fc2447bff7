/// Per-stream registered model state
///
/// Streams are kept in registration order; merged-model keyphrase matching
/// and label distribution depend on that order.

use crate::conf_levels::ConfLevelsWireTree;
use crate::detection::DetectionResult;
use crate::error::{VuiError, VuiResult};
use crate::recognition_config::{ParsedRecognitionConfig, WakeupConfigBlob};
use crate::sound_model::ParsedSoundModel;
use crate::types::{
    BufferConfig, ModuleType, RecognitionConfig, SoundModel, SoundModelBlob, SoundModelId,
    SoundModelType, StreamHandle,
};
use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

/// Everything the engine tracks for one client stream
#[derive(Debug, Clone)]
pub struct RegisteredModel {
    pub model_type: SoundModelType,
    /// Recognition mode bitmask of the first phrase
    pub recognition_mode: u32,
    /// 0 for single-model flows, the PDK sub-model id otherwise
    pub model_id: u32,
    pub first_stage_type: ModuleType,
    /// Client descriptor without its payload
    pub sound_model: SoundModel,
    pub blobs: Vec<SoundModelBlob>,
    pub rec_config: Option<RecognitionConfig>,
    pub wakeup_config: Option<WakeupConfigBlob>,
    pub buffer_config: BufferConfig,
    pub hist_duration_set: bool,
    pub second_stage_thresholds: Vec<(SoundModelId, u32)>,
    pub second_stage_det_levels: Vec<(SoundModelId, u32)>,
    /// Detected levels laid out on this stream's own labels
    pub det_conf_levels: Vec<u8>,
    pub detection_status: u32,
    pub conf_tree: Option<ConfLevelsWireTree>,
}

impl RegisteredModel {
    pub fn new(sound_model: &SoundModel, parsed: ParsedSoundModel, model_id: u32) -> Self {
        let descriptor = SoundModel {
            kind: sound_model.kind,
            phrases: sound_model.phrases.clone(),
            data: Vec::new(),
        };
        let det_conf_levels = vec![0; descriptor.conf_level_labels().len()];

        Self {
            model_type: sound_model.kind,
            recognition_mode: sound_model.recognition_mode(),
            model_id,
            first_stage_type: parsed.first_stage_type,
            sound_model: descriptor,
            blobs: parsed.blobs,
            rec_config: None,
            wakeup_config: None,
            buffer_config: BufferConfig::default(),
            hist_duration_set: false,
            second_stage_thresholds: Vec::new(),
            second_stage_det_levels: Vec::new(),
            det_conf_levels,
            detection_status: 0,
            conf_tree: None,
        }
    }

    /// Commit a fully parsed recognition config
    pub fn apply_recognition_config(
        &mut self,
        config: &RecognitionConfig,
        parsed: ParsedRecognitionConfig,
        wakeup_config: WakeupConfigBlob,
    ) {
        self.rec_config = Some(config.clone());
        self.buffer_config = parsed.buffer_config;
        self.hist_duration_set = parsed.hist_duration_set;
        self.wakeup_config = Some(wakeup_config);
        self.conf_tree = parsed.conf_tree;
        self.second_stage_thresholds = parsed.second_stage_thresholds;
    }

    /// Update the detected level of a second-stage model, appending if new
    pub fn set_second_stage_det_level(&mut self, sm_id: SoundModelId, level: u32) {
        match self
            .second_stage_det_levels
            .iter_mut()
            .find(|(id, _)| *id == sm_id)
        {
            Some(entry) => entry.1 = level,
            None => self.second_stage_det_levels.push((sm_id, level)),
        }
    }

    /// Threshold recorded for a second-stage model, 0 when none was given
    pub fn second_stage_conf_level(&self, sm_id: SoundModelId) -> u32 {
        self.second_stage_thresholds
            .iter()
            .rev()
            .find(|(id, _)| *id == sm_id)
            .map(|(_, level)| *level)
            .unwrap_or(0)
    }
}

/// Streams registered to one interface
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: IndexMap<StreamHandle, RegisteredModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream, replacing any previous registration
    pub fn register(&mut self, stream: StreamHandle, model: RegisteredModel) {
        info!(
            "Register stream {} (model id {}, {} blob(s))",
            stream,
            model.model_id,
            model.blobs.len()
        );
        if let Some(old) = self.models.insert(stream, model) {
            warn!(
                "Stream {} already registered, replaced model with {} blob(s)",
                stream,
                old.blobs.len()
            );
        }
    }

    /// Remove a stream; its blobs are released with the returned model
    pub fn deregister(&mut self, stream: StreamHandle) -> Option<RegisteredModel> {
        let removed = self.models.shift_remove(&stream);
        match &removed {
            Some(model) => info!(
                "Deregister stream {}, releasing {} blob(s)",
                stream,
                model.blobs.len()
            ),
            None => debug!("Stream {} not registered", stream),
        }
        removed
    }

    pub fn get(&self, stream: StreamHandle) -> VuiResult<&RegisteredModel> {
        self.models.get(&stream).ok_or_else(|| {
            error!("Stream {} not registered to interface", stream);
            VuiError::StreamNotRegistered(stream)
        })
    }

    pub fn get_mut(&mut self, stream: StreamHandle) -> VuiResult<&mut RegisteredModel> {
        self.models.get_mut(&stream).ok_or_else(|| {
            error!("Stream {} not registered to interface", stream);
            VuiError::StreamNotRegistered(stream)
        })
    }

    pub fn contains(&self, stream: StreamHandle) -> bool {
        self.models.contains_key(&stream)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn streams(&self) -> impl Iterator<Item = StreamHandle> + '_ {
        self.models.keys().copied()
    }

    /// Keyphrases of all streams, deduplicated in registration order
    pub fn merged_keyphrases(&self) -> Vec<String> {
        let mut keyphrases: Vec<String> = Vec::new();
        for model in self.models.values() {
            for text in model.sound_model.keyphrases() {
                if !keyphrases.iter().any(|k| k == text) {
                    keyphrases.push(text.to_string());
                }
            }
        }
        keyphrases
    }

    /// Labels of the merged confidence array: keyphrases, then `phrase/user`
    pub fn merged_conf_labels(&self) -> Vec<String> {
        let mut labels = self.merged_keyphrases();
        for model in self.models.values() {
            for label in model.sound_model.conf_level_labels() {
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
        }
        labels
    }

    /// Resolve the stream a detection belongs to
    ///
    /// Depends only on the registry and `result`, so repeated calls agree.
    pub fn detected_stream(&self, result: &DetectionResult, multi_model: bool) -> Option<StreamHandle> {
        if self.models.is_empty() {
            error!("Unexpected, No streams attached to engine!");
            return None;
        }

        if multi_model {
            let model_id = result.detected_model_id();
            let stream = self
                .models
                .iter()
                .find(|(_, m)| m.model_id == model_id)
                .map(|(s, _)| *s);
            if stream.is_none() {
                error!("Invalid model id = {:#x}", model_id);
            }
            return stream;
        }

        if self.models.len() == 1 {
            return self.models.keys().next().copied();
        }

        let keyphrases = self.merged_keyphrases();
        if result.confidence_levels.len() < keyphrases.len() {
            error!(
                "detection event conf levels {} < num of keyphrases {}",
                result.confidence_levels.len(),
                keyphrases.len()
            );
            return None;
        }

        for (i, keyphrase) in keyphrases.iter().enumerate() {
            if result.confidence_levels[i] == 0 {
                continue;
            }
            for (stream, model) in &self.models {
                if model.sound_model.keyphrases().any(|k| k == keyphrase) {
                    return Some(*stream);
                }
            }
        }

        None
    }

    /// Distribute merged detection levels onto the stream's own label slots
    pub fn set_detection_conf_levels(&mut self, stream: StreamHandle, result: &DetectionResult) {
        let merged = self.merged_conf_labels();
        if result.confidence_levels.len() < merged.len() {
            error!(
                "detection event conf lvls {} < eng conf lvl size {}",
                result.confidence_levels.len(),
                merged.len()
            );
            return;
        }

        let model = match self.models.get_mut(&stream) {
            Some(model) => model,
            None => {
                error!("Invalid detected stream {}", stream);
                return;
            }
        };

        let labels = model.sound_model.conf_level_labels();
        model.det_conf_levels = vec![0; labels.len()];
        for (i, merged_label) in merged.iter().enumerate() {
            let level = result.confidence_levels[i];
            if level == 0 {
                continue;
            }
            for (j, label) in labels.iter().enumerate() {
                if label == merged_label {
                    model.det_conf_levels[j] = level;
                }
            }
        }

        for (i, level) in model.det_conf_levels.iter().enumerate() {
            info!("det_cf_levels[{}]-{}", i, level);
        }
    }
}
