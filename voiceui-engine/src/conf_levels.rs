/// Confidence-level wire tree
///
/// The client describes thresholds as a fixed-size nested struct:
/// sound model -> keyword level -> user level. Two layouts exist; version 2
/// widens every level to 32 bits, version 1 keeps them as bytes followed by
/// padding. The tree is cached as the exact bytes the client sent and leaf
/// values are patched in place, so the echo back to the client keeps its
/// shape (counts, ids, unused slots, padding) byte for byte.

use crate::error::{alloc_zeroed, VuiError, VuiResult};
use crate::types::{PhraseRecognitionExtra, SoundModelId, MAX_FSTAGE_CONF_LEVEL};
use crate::wire::WireReader;
use serde::Serialize;
use tracing::{debug, error, info, trace};

/// Sound model slots in a tree
pub const MAX_SOUND_MODELS: usize = 8;

/// Keyword slots per sound model
pub const MAX_KEYWORDS: usize = 20;

/// User slots per keyword
pub const MAX_KEYWORD_USERS: usize = 20;

const USER_LEVEL_SIZE: usize = 8;
const KEYWORD_LEVEL_SIZE: usize = 8 + MAX_KEYWORD_USERS * USER_LEVEL_SIZE;
const SOUND_MODEL_LEVEL_SIZE: usize = 8 + MAX_KEYWORDS * KEYWORD_LEVEL_SIZE;

/// Encoded size of a confidence-level tree
pub const CONF_LEVELS_TREE_SIZE: usize = 8 + MAX_SOUND_MODELS * SOUND_MODEL_LEVEL_SIZE;

/// Raw version tag of the 32-bit level layout
pub const CONF_LEVELS_INTF_VERSION_0002: u32 = 0x02;

/// Layout of a confidence-level tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfLevelsVersion {
    /// Byte-wide levels
    V1,
    /// 32-bit levels
    V2,
}

impl ConfLevelsVersion {
    pub fn from_raw(version: u32) -> Self {
        if version == CONF_LEVELS_INTF_VERSION_0002 {
            ConfLevelsVersion::V2
        } else {
            ConfLevelsVersion::V1
        }
    }

    pub fn raw(&self) -> u32 {
        match self {
            ConfLevelsVersion::V1 => 0x01,
            ConfLevelsVersion::V2 => CONF_LEVELS_INTF_VERSION_0002,
        }
    }

    /// Expected payload size of a tree in this layout
    pub fn tree_size(&self) -> usize {
        CONF_LEVELS_TREE_SIZE
    }

    fn read_level(&self, reader: &mut WireReader<'_>) -> VuiResult<u32> {
        match self {
            ConfLevelsVersion::V1 => {
                let level = reader.u8()? as u32;
                reader.skip(3)?;
                Ok(level)
            }
            ConfLevelsVersion::V2 => reader.u32(),
        }
    }

    fn write_level(&self, slot: &mut [u8], level: u32) {
        match self {
            ConfLevelsVersion::V1 => slot[0] = level.min(u8::MAX as u32) as u8,
            ConfLevelsVersion::V2 => slot[..4].copy_from_slice(&level.to_le_bytes()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserConfLevel {
    pub user_id: u32,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordConfLevels {
    pub kw_level: u32,
    pub users: Vec<UserConfLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoundModelConfLevels {
    pub sm_id: SoundModelId,
    pub keywords: Vec<KeywordConfLevels>,
}

/// Decoded view of a confidence-level tree together with its wire bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfLevelsWireTree {
    version: ConfLevelsVersion,
    sound_models: Vec<SoundModelConfLevels>,
    #[serde(skip)]
    raw: Vec<u8>,
}

fn sound_model_offset(sm: usize) -> usize {
    8 + sm * SOUND_MODEL_LEVEL_SIZE
}

fn keyword_offset(sm: usize, kw: usize) -> usize {
    sound_model_offset(sm) + 8 + kw * KEYWORD_LEVEL_SIZE
}

fn user_offset(sm: usize, kw: usize, user: usize) -> usize {
    keyword_offset(sm, kw) + 8 + user * USER_LEVEL_SIZE
}

fn check_count(what: &'static str, count: usize, max: usize) -> VuiResult<()> {
    if count > max {
        error!("{} count {} exceeds {}", what, count, max);
        return Err(VuiError::InvalidRecognitionConfig(format!(
            "{} count {} exceeds {}",
            what, count, max
        )));
    }
    Ok(())
}

impl ConfLevelsWireTree {
    /// Decode a tree from its record payload (starting at the version field)
    pub fn decode(payload: &[u8]) -> VuiResult<Self> {
        let mut reader = WireReader::new(payload, "confidence levels");
        let version = ConfLevelsVersion::from_raw(reader.u32()?);

        if payload.len() != version.tree_size() {
            error!(
                "Conf level format error: size {} != {}",
                payload.len(),
                version.tree_size()
            );
            return Err(VuiError::SizeMismatch {
                what: "confidence levels",
                expected: version.tree_size(),
                actual: payload.len(),
            });
        }

        let num_sound_models = reader.u32()? as usize;
        check_count("sound model", num_sound_models, MAX_SOUND_MODELS)?;

        let mut sound_models = Vec::with_capacity(num_sound_models);
        for sm in 0..num_sound_models {
            let mut sm_reader = WireReader::new(&payload[sound_model_offset(sm)..], "sound model levels");
            let sm_id = SoundModelId(sm_reader.u32()?);
            let num_kw_levels = sm_reader.u32()? as usize;
            check_count("keyword", num_kw_levels, MAX_KEYWORDS)?;

            let mut keywords = Vec::with_capacity(num_kw_levels);
            for kw in 0..num_kw_levels {
                let mut kw_reader = WireReader::new(&payload[keyword_offset(sm, kw)..], "keyword levels");
                let kw_level = version.read_level(&mut kw_reader)?;
                let num_user_levels = kw_reader.u32()? as usize;
                check_count("user", num_user_levels, MAX_KEYWORD_USERS)?;

                let mut users = Vec::with_capacity(num_user_levels);
                for _ in 0..num_user_levels {
                    let user_id = kw_reader.u32()?;
                    let level = version.read_level(&mut kw_reader)?;
                    users.push(UserConfLevel { user_id, level });
                }
                keywords.push(KeywordConfLevels { kw_level, users });
            }

            sound_models.push(SoundModelConfLevels { sm_id, keywords });
        }

        let mut raw = alloc_zeroed(payload.len())?;
        raw.copy_from_slice(payload);

        debug!(
            "Decoded {:?} confidence levels with {} sound model(s)",
            version,
            sound_models.len()
        );

        Ok(Self {
            version,
            sound_models,
            raw,
        })
    }

    /// Build a version 1 tree carrying one GMM entry from recognition phrases
    pub fn from_phrases(phrases: &[PhraseRecognitionExtra]) -> VuiResult<Self> {
        check_count("keyword", phrases.len(), MAX_KEYWORDS)?;

        let keywords = phrases
            .iter()
            .map(|phrase| {
                check_count("user", phrase.levels.len(), MAX_KEYWORD_USERS)?;
                Ok(KeywordConfLevels {
                    kw_level: phrase.confidence_level,
                    users: phrase
                        .levels
                        .iter()
                        .map(|l| UserConfLevel {
                            user_id: l.user_id,
                            level: l.level,
                        })
                        .collect(),
                })
            })
            .collect::<VuiResult<Vec<_>>>()?;

        Self::from_sound_models(
            ConfLevelsVersion::V1,
            vec![SoundModelConfLevels {
                sm_id: SoundModelId::GMM,
                keywords,
            }],
        )
    }

    /// Encode a tree from its decoded form into a zeroed wire buffer
    pub fn from_sound_models(
        version: ConfLevelsVersion,
        sound_models: Vec<SoundModelConfLevels>,
    ) -> VuiResult<Self> {
        check_count("sound model", sound_models.len(), MAX_SOUND_MODELS)?;

        let mut raw = alloc_zeroed(version.tree_size())?;
        raw[0..4].copy_from_slice(&version.raw().to_le_bytes());
        raw[4..8].copy_from_slice(&(sound_models.len() as u32).to_le_bytes());

        for (sm, levels) in sound_models.iter().enumerate() {
            check_count("keyword", levels.keywords.len(), MAX_KEYWORDS)?;
            let off = sound_model_offset(sm);
            raw[off..off + 4].copy_from_slice(&levels.sm_id.0.to_le_bytes());
            raw[off + 4..off + 8].copy_from_slice(&(levels.keywords.len() as u32).to_le_bytes());

            for (kw, keyword) in levels.keywords.iter().enumerate() {
                check_count("user", keyword.users.len(), MAX_KEYWORD_USERS)?;
                let off = keyword_offset(sm, kw);
                version.write_level(&mut raw[off..off + 4], keyword.kw_level);
                raw[off + 4..off + 8].copy_from_slice(&(keyword.users.len() as u32).to_le_bytes());

                for (k, user) in keyword.users.iter().enumerate() {
                    let off = user_offset(sm, kw, k);
                    raw[off..off + 4].copy_from_slice(&user.user_id.to_le_bytes());
                    version.write_level(&mut raw[off + 4..off + 8], user.level);
                }
            }
        }

        Ok(Self {
            version,
            sound_models,
            raw,
        })
    }

    pub fn version(&self) -> ConfLevelsVersion {
        self.version
    }

    pub fn sound_models(&self) -> &[SoundModelConfLevels] {
        &self.sound_models
    }

    /// Wire bytes of the tree, including the values patched so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Overwrite the keyword level in slot `(sm, kw)`
    ///
    /// Slots past the counted entries are still part of the fixed layout and
    /// are written in place without changing any count.
    pub fn set_keyword_level(&mut self, sm: usize, kw: usize, level: u32) {
        if sm >= MAX_SOUND_MODELS || kw >= MAX_KEYWORDS {
            error!("Keyword slot ({}, {}) out of range", sm, kw);
            return;
        }

        let off = keyword_offset(sm, kw);
        self.version.write_level(&mut self.raw[off..off + 4], level);
        if let Some(keyword) = self
            .sound_models
            .get_mut(sm)
            .and_then(|m| m.keywords.get_mut(kw))
        {
            keyword.kw_level = level;
        }
    }

    /// Overwrite the user level in slot `(sm, kw, user)`
    pub fn set_user_level(&mut self, sm: usize, kw: usize, user: usize, level: u32) {
        if sm >= MAX_SOUND_MODELS || kw >= MAX_KEYWORDS || user >= MAX_KEYWORD_USERS {
            error!("User slot ({}, {}, {}) out of range", sm, kw, user);
            return;
        }

        let off = user_offset(sm, kw, user) + 4;
        self.version.write_level(&mut self.raw[off..off + 4], level);
        if let Some(entry) = self
            .sound_models
            .get_mut(sm)
            .and_then(|m| m.keywords.get_mut(kw))
            .and_then(|k| k.users.get_mut(user))
        {
            entry.level = level;
        }
    }

    /// Level stored in slot `(sm, 0)`, the second-stage threshold position
    fn second_stage_level(&self, sm: usize, sm_id: SoundModelId) -> u32 {
        let keyword = self.sound_models[sm].keywords.first();
        if sm_id.is_second_stage_keyword() {
            keyword.map(|k| k.kw_level).unwrap_or(0)
        } else {
            keyword
                .and_then(|k| k.users.first())
                .map(|u| u.level)
                .unwrap_or(0)
        }
    }

    /// Extract thresholds for the stream from a client tree
    ///
    /// The GMM entry yields the first-stage confidence array; second-stage
    /// entries yield `(sm_id, level)` thresholds. A tree without a GMM entry
    /// is rejected.
    pub fn thresholds(&self, model_id: u32) -> VuiResult<ConfThresholds> {
        let mut first_stage = None;
        let mut second_stage = Vec::new();

        for (sm, levels) in self.sound_models.iter().enumerate() {
            if levels.sm_id.is_first_stage() {
                first_stage = Some(fill_opaque_conf_levels(model_id, levels)?);
            } else if levels.sm_id.is_second_stage() {
                let level = self.second_stage_level(sm, levels.sm_id);
                if levels.sm_id.is_second_stage_keyword() {
                    info!("second stage keyword confidence level = {}", level);
                } else {
                    info!("second stage user confidence level = {}", level);
                }
                second_stage.push((levels.sm_id, level));
            }
        }

        match first_stage {
            Some(first_stage) => Ok(ConfThresholds {
                first_stage,
                second_stage,
            }),
            None => {
                error!("Did not receive GMM confidence threshold");
                Err(VuiError::InvalidRecognitionConfig(
                    "missing first stage confidence levels".to_string(),
                ))
            }
        }
    }

    /// Pack detected levels into the tree (single-model flow)
    ///
    /// First-stage keyword `j` takes `detected[j]`, each user takes
    /// `detected[user_id]`; second-stage entries take the recorded
    /// second-stage detection levels.
    pub fn pack_detected_levels(&mut self, detected: &[u8], second_stage: &[(SoundModelId, u32)]) {
        for sm in 0..self.sound_models.len() {
            let sm_id = self.sound_models[sm].sm_id;
            if sm_id.is_first_stage() {
                for kw in 0..self.sound_models[sm].keywords.len() {
                    match detected.get(kw) {
                        Some(&level) => self.set_keyword_level(sm, kw, level as u32),
                        None => error!("unexpected conf size {} <= {}", detected.len(), kw),
                    }
                    trace!("First stage KW conf level[{}] = {:?}", kw, detected.get(kw));

                    for user in 0..self.sound_models[sm].keywords[kw].users.len() {
                        let user_id = self.sound_models[sm].keywords[kw].users[user].user_id as usize;
                        match detected.get(user_id) {
                            Some(&level) => self.set_user_level(sm, kw, user, level as u32),
                            None => error!("Unexpected conf size {} <= {}", detected.len(), user_id),
                        }
                    }
                }
            } else if sm_id.is_second_stage() {
                self.apply_second_stage(sm, sm_id, second_stage);
            }
        }
    }

    /// Fill the detected keyword slot of the tree (multi-model flow)
    pub fn fill_detected_keyword(
        &mut self,
        keyword_id: u32,
        best_confidence: u32,
        second_stage: &[(SoundModelId, u32)],
    ) {
        for sm in 0..self.sound_models.len() {
            let sm_id = self.sound_models[sm].sm_id;
            if sm_id.is_first_stage() {
                let kw = keyword_id as usize;
                self.set_keyword_level(sm, kw, best_confidence);
                self.set_user_level(sm, kw, 0, 0);
                info!("First stage returning conf level: {}", best_confidence);
            } else if sm_id.is_second_stage() {
                self.apply_second_stage(sm, sm_id, second_stage);
            }
        }
    }

    fn apply_second_stage(&mut self, sm: usize, sm_id: SoundModelId, second_stage: &[(SoundModelId, u32)]) {
        for &(id, level) in second_stage {
            if sm_id.is_second_stage_keyword() && id.is_second_stage_keyword() {
                self.set_keyword_level(sm, 0, level);
                self.set_user_level(sm, 0, 0, 0);
                info!("Second stage keyword conf level: {}", level);
            } else if sm_id.is_second_stage_user() && id.is_second_stage_user() {
                self.set_keyword_level(sm, 0, level);
                self.set_user_level(sm, 0, 0, level);
                info!("Second stage user conf level: {}", level);
            }
        }
    }
}

/// Thresholds extracted from a confidence-level tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfThresholds {
    /// `[keyword levels] ++ [user levels at their user-id slots]`
    pub first_stage: Vec<u8>,
    pub second_stage: Vec<(SoundModelId, u32)>,
}

fn check_level(level: u32, context: impl FnOnce() -> String) -> VuiResult<()> {
    if level > MAX_FSTAGE_CONF_LEVEL {
        let context = context();
        error!("Invalid {} level {}", context, level);
        return Err(VuiError::InvalidLevel { level, context });
    }
    Ok(())
}

/// Lay out `[k0..kN, users at their ids]` and validate the user-id slots
///
/// `entries` yields `(kw_level, [(user_id, level)])` per keyword. With a
/// nonzero `model_id` only keyword levels are emitted.
fn layout_conf_levels<'a, I>(model_id: u32, entries: I) -> VuiResult<Vec<u8>>
where
    I: Iterator<Item = (u32, &'a [(u32, u32)])> + Clone,
{
    let num_kw = entries.clone().count();
    let num_users: usize = if model_id == 0 {
        entries.clone().map(|(_, users)| users.len()).sum()
    } else {
        0
    };
    let num_conf_levels = num_kw + num_users;

    if num_conf_levels == 0 {
        error!("Invalid num_conf_levels input");
        return Err(VuiError::InvalidRecognitionConfig(
            "no confidence levels".to_string(),
        ));
    }

    let mut conf_levels = alloc_zeroed(num_conf_levels)?;
    let mut user_id_tracker = alloc_zeroed(num_conf_levels)?;

    for (i, (kw_level, users)) in entries.enumerate() {
        conf_levels[i] = kw_level as u8;
        if model_id != 0 {
            continue;
        }

        for &(user_id, level) in users {
            let slot = user_id as usize;
            if slot < num_kw || slot >= num_conf_levels {
                error!("Invalid params user id {} (keywords {}, total {})", user_id, num_kw, num_conf_levels);
                return Err(VuiError::InvalidUserId {
                    user_id,
                    min: num_kw as u32,
                    max: num_conf_levels as u32,
                });
            }
            if user_id_tracker[slot] == 1 {
                error!("Duplicate user id {}", user_id);
                return Err(VuiError::DuplicateUserId(user_id));
            }
            conf_levels[slot] = level.min(MAX_FSTAGE_CONF_LEVEL) as u8;
            user_id_tracker[slot] = 1;
            trace!("user_conf_levels[{}] = {}", user_id, conf_levels[slot]);
        }
    }

    debug!("Returning number of conf levels : {}", num_conf_levels);
    Ok(conf_levels)
}

/// First-stage confidence array from the GMM entry of a client tree
pub fn fill_opaque_conf_levels(model_id: u32, levels: &SoundModelConfLevels) -> VuiResult<Vec<u8>> {
    for (i, keyword) in levels.keywords.iter().enumerate() {
        check_level(keyword.kw_level, || format!("first stage [{}] kw", i))?;
        for user in &keyword.users {
            check_level(user.level, || format!("first stage [{}] user_id {}", i, user.user_id))?;
        }
    }

    let users: Vec<Vec<(u32, u32)>> = levels
        .keywords
        .iter()
        .map(|k| k.users.iter().map(|u| (u.user_id, u.level)).collect())
        .collect();
    let entries = levels
        .keywords
        .iter()
        .zip(users.iter())
        .map(|(k, u)| (k.kw_level, u.as_slice()));

    layout_conf_levels(model_id, entries)
}

/// First-stage confidence array from the phrases of a legacy recognition config
///
/// `model_phrases` is the number of phrases of the registered sound model;
/// `None` skips that bound (no phrase descriptor available).
pub fn fill_conf_levels(
    model_id: u32,
    phrases: &[PhraseRecognitionExtra],
    model_phrases: Option<usize>,
) -> VuiResult<Vec<u8>> {
    if phrases.is_empty() || model_phrases.map_or(false, |n| phrases.len() > n) {
        error!(
            "Invalid phrase data: {} phrases for model with {:?}",
            phrases.len(),
            model_phrases
        );
        return Err(VuiError::InvalidRecognitionConfig(format!(
            "invalid phrase count {}",
            phrases.len()
        )));
    }

    for (i, phrase) in phrases.iter().enumerate() {
        trace!("[{}] kw level {}", i, phrase.confidence_level);
        check_level(phrase.confidence_level, || format!("[{}] kw", i))?;
        for user in &phrase.levels {
            check_level(user.level, || format!("[{}] user_id {}", i, user.user_id))?;
        }
    }

    let users: Vec<Vec<(u32, u32)>> = phrases
        .iter()
        .map(|p| p.levels.iter().map(|u| (u.user_id, u.level)).collect())
        .collect();
    let entries = phrases
        .iter()
        .zip(users.iter())
        .map(|(p, u)| (p.confidence_level, u.as_slice()));

    layout_conf_levels(model_id, entries)
}
