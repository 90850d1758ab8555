#[derive(Debug, Clone)]
pub struct Config {
    // Remote session (static part)
    pub api_host: &'static str,
    pub model: &'static str,
    pub voice: &'static str,

    // API key (dynamic part, read from the process environment)
    pub api_key: String,

    // Audio device configuration
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub chunk_frames: usize,

    // Host integration
    pub focus_command: &'static str,
    pub edit_mode: bool,
}

impl Config {
    /// Build the configuration from compile-time environment variables.
    /// Everything except the API key is baked in from config.toml at build time.
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            api_host: env!("API_HOST"),
            model: env!("MODEL_ID"),
            voice: env!("VOICE_NAME"),

            api_key: std::env::var("GEMINI_API_KEY")
                .map_err(|_| "GEMINI_API_KEY not set in the environment")?,

            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
            capture_sample_rate: env!("CAPTURE_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse CAPTURE_SAMPLE_RATE")?,
            playback_sample_rate: env!("PLAYBACK_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse PLAYBACK_SAMPLE_RATE")?,
            chunk_frames: env!("CHUNK_FRAMES")
                .parse()
                .map_err(|_| "Failed to parse CHUNK_FRAMES")?,

            focus_command: env!("FOCUS_COMMAND"),
            edit_mode: env!("EDIT_MODE")
                .parse()
                .map_err(|_| "Failed to parse EDIT_MODE")?,
        })
    }
}
