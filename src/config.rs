//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// How long the recognizer waits for speech before reporting no input
pub const NO_INPUT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Delay between a final recognition result and listen-complete
pub const COMPLETE_TIMEOUT: Duration = Duration::from_millis(0);

/// Settings handed to the speech subsystem. The dialogue core never reads
/// these.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Speech service endpoint, if a remote service is used
    pub endpoint: Option<String>,

    /// Subscription key for the speech service
    pub credentials: Option<String>,

    pub region: String,

    /// Recognition and synthesis locale
    pub locale: String,

    /// Default synthesis voice
    pub voice: String,

    pub no_input_timeout: Duration,

    pub complete_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            credentials: None,
            region: "northeurope".to_string(),
            locale: "en-US".to_string(),
            voice: "en-US-DavisNeural".to_string(),
            no_input_timeout: NO_INPUT_TIMEOUT,
            complete_timeout: COMPLETE_TIMEOUT,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Optional JSON vocabulary replacing the built-in one
    pub vocabulary_path: Option<PathBuf>,

    /// Send a start click as soon as the speech subsystem is ready
    pub autostart: bool,

    pub adapter: AdapterConfig,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("appointment-dialogue");

        let socket_path = data_dir.join("dialogue.sock");

        let defaults = AdapterConfig::default();
        let adapter = AdapterConfig {
            endpoint: lookup("APPOINTMENT_SPEECH_ENDPOINT"),
            credentials: lookup("APPOINTMENT_SPEECH_KEY"),
            region: lookup("APPOINTMENT_SPEECH_REGION").unwrap_or(defaults.region),
            locale: lookup("APPOINTMENT_LOCALE").unwrap_or(defaults.locale),
            voice: lookup("APPOINTMENT_VOICE").unwrap_or(defaults.voice),
            ..defaults
        };

        Ok(Self {
            socket_path,
            data_dir,
            vocabulary_path: lookup("APPOINTMENT_VOCABULARY").map(PathBuf::from),
            autostart: lookup("APPOINTMENT_AUTOSTART").is_some_and(|value| is_truthy(&value)),
            adapter,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
