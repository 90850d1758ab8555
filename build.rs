use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct Config {
    session: Session,
    audio: Audio,
    host: Host,
    #[serde(default)]
    apps: Vec<App>,
}

#[derive(Deserialize)]
struct Session {
    api_host: String,
    model: String,
    voice: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    capture_sample_rate: u32,
    playback_sample_rate: u32,
    chunk_frames: usize,
}

#[derive(Deserialize)]
struct Host {
    focus_command: String,
    edit_mode: bool,
}

#[derive(Deserialize, Serialize)]
struct App {
    id: String,
    name: String,
    process_name: String,
    category: String,
    shortcut: String,
}

// Read config.toml at compile time and export it as environment variables.
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // Session configuration
    println!("cargo:rustc-env=API_HOST={}", config.session.api_host);
    println!("cargo:rustc-env=MODEL_ID={}", config.session.model);
    println!("cargo:rustc-env=VOICE_NAME={}", config.session.voice);

    // Audio configuration
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!(
        "cargo:rustc-env=CAPTURE_SAMPLE_RATE={}",
        config.audio.capture_sample_rate
    );
    println!(
        "cargo:rustc-env=PLAYBACK_SAMPLE_RATE={}",
        config.audio.playback_sample_rate
    );
    println!("cargo:rustc-env=CHUNK_FRAMES={}", config.audio.chunk_frames);

    // Host configuration
    println!("cargo:rustc-env=FOCUS_COMMAND={}", config.host.focus_command);
    println!("cargo:rustc-env=EDIT_MODE={}", config.host.edit_mode);

    // Controllable application list, passed through as one JSON line
    let apps_json = serde_json::to_string(&config.apps).expect("Failed to serialize app list");
    println!("cargo:rustc-env=APPS_JSON={}", apps_json);
}
