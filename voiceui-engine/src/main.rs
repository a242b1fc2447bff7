/// Voice-UI payload inspector binary
///
/// Decodes sound models, DSP detection events and recognition-config opaque
/// sections captured from a device and prints them as JSON.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{error, info};
use voiceui_engine::config::ENV_CONFIG_PATH;
use voiceui_engine::detection::{decode_multi_model, decode_single_model};
use voiceui_engine::recognition_config::parse_opaque;
use voiceui_engine::{parse_sound_model, EngineConfig, SoundModel};

const USAGE: &str = "usage: voiceui-inspect <sound-model|detection|rc-opaque> <file>";

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voiceui_engine=debug".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, path) = match args.as_slice() {
        [command, path] => (command.as_str(), Path::new(path)),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    match run(&config, command, path) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("{} failed: {:#}", command, e);
            std::process::exit(1);
        }
    }
}

/// Decode `path` according to `command` and render the result as JSON
fn run(config: &EngineConfig, command: &str, path: &Path) -> Result<String> {
    let payload = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    info!("Inspecting {} ({} bytes) as {}", path.display(), payload.len(), command);

    let json = match command {
        "sound-model" => {
            let model = SoundModel::keyphrase(Vec::new(), payload);
            let parsed = parse_sound_model(&model, config.module_type)?;
            serde_json::to_string_pretty(&parsed)?
        }
        "detection" => {
            let attrs = &config.stream_attributes;
            let result = if config.module_type.is_pdk() {
                decode_multi_model(&payload, attrs)?
            } else {
                decode_single_model(&payload, attrs)?
            };
            serde_json::to_string_pretty(&result)?
        }
        "rc-opaque" => {
            let parsed = parse_opaque(&payload, 0)?;
            serde_json::to_string_pretty(&parsed)?
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    };

    Ok(json)
}

/// Load configuration from the config file and environment
fn load_config() -> Result<EngineConfig> {
    let mut config = match std::env::var(ENV_CONFIG_PATH) {
        Ok(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        Err(_) => EngineConfig::default(),
    };

    config.apply_overrides(|key| std::env::var(key).ok())?;
    info!(
        "Module type {:?}, variant {:?}",
        config.module_type,
        config.resolved_variant()
    );
    Ok(config)
}
