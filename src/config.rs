/// Listener and service configuration
///
/// `ListenerConfig` is the immutable value handed to an engine at
/// construction. `ServiceConfig` is what the host binary loads from a JSON
/// file and the environment before building one.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Keyword resource bundled with the assistant
pub const DEFAULT_KEYWORD_PATH: &str = "Asistente_es_android_v3_0_0.ppn";

/// Acoustic model matching the bundled keyword's language
pub const DEFAULT_MODEL_PATH: &str = "porcupine_params_es.pv";

pub const DEFAULT_SENSITIVITY: f32 = 0.7;

pub const ENV_ACCESS_KEY: &str = "WAKEWORD_ACCESS_KEY";
pub const ENV_KEYWORD_PATH: &str = "WAKEWORD_KEYWORD_PATH";
pub const ENV_MODEL_PATH: &str = "WAKEWORD_MODEL_PATH";
pub const ENV_SENSITIVITY: &str = "WAKEWORD_SENSITIVITY";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Access key not found")]
    MissingAccessKey,

    #[error("Access key is required")]
    EmptyAccessKey,

    #[error("Sensitivity must be between 0.0 and 1.0, got {0}")]
    SensitivityOutOfRange(f32),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Parameters for constructing a wake-word engine
#[derive(Clone, PartialEq)]
pub struct ListenerConfig {
    access_key: String,
    keyword_path: PathBuf,
    model_path: PathBuf,
    sensitivity: f32,
}

impl ListenerConfig {
    pub fn new(
        access_key: impl Into<String>,
        keyword_path: impl Into<PathBuf>,
        model_path: impl Into<PathBuf>,
        sensitivity: f32,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            keyword_path: keyword_path.into(),
            model_path: model_path.into(),
            sensitivity,
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn keyword_path(&self) -> &Path {
        &self.keyword_path
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    /// Check the invariants every engine relies on
    ///
    /// Resource paths are not checked here; resolving them is the engine's job.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key.trim().is_empty() {
            return Err(ConfigError::EmptyAccessKey);
        }

        // NaN fails the range check too
        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(ConfigError::SensitivityOutOfRange(self.sensitivity));
        }

        Ok(())
    }
}

// Keeps the credential out of logs
impl std::fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("access_key", &"<redacted>")
            .field("keyword_path", &self.keyword_path)
            .field("model_path", &self.model_path)
            .field("sensitivity", &self.sensitivity)
            .finish()
    }
}

/// Program launched when the wake word is heard
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OnDetectCommand {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

/// Settings for the wake-word service binary
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Engine access key (takes precedence over `access_key_file`)
    pub access_key: Option<String>,

    /// File holding the access key on its first line
    pub access_key_file: Option<PathBuf>,

    pub keyword_path: PathBuf,

    pub model_path: PathBuf,

    /// Detection sensitivity (0.0 - 1.0, higher = more sensitive, more false positives)
    pub sensitivity: f32,

    /// Launched on every detection; detections are only logged when unset
    pub on_detect: Option<OnDetectCommand>,

    /// Show desktop notifications in addition to log output
    pub desktop_notifications: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            access_key_file: None,
            keyword_path: PathBuf::from(DEFAULT_KEYWORD_PATH),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            sensitivity: DEFAULT_SENSITIVITY,
            on_detect: None,
            desktop_notifications: true,
        }
    }
}

impl ServiceConfig {
    /// Load settings from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `WAKEWORD_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_ACCESS_KEY) {
            self.access_key = Some(key);
        }

        if let Some(path) = lookup(ENV_KEYWORD_PATH) {
            self.keyword_path = PathBuf::from(path);
        }

        if let Some(path) = lookup(ENV_MODEL_PATH) {
            self.model_path = PathBuf::from(path);
        }

        if let Some(value) = lookup(ENV_SENSITIVITY) {
            self.sensitivity = value.trim().parse::<f32>().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_SENSITIVITY,
                value,
            })?;
        }

        Ok(())
    }

    /// Resolve the access key, inline value first
    pub fn resolve_access_key(&self) -> Result<String, ConfigError> {
        if let Some(ref key) = self.access_key {
            return Ok(key.clone());
        }

        if let Some(ref path) = self.access_key_file {
            debug!("Reading access key from {}", path.display());
            let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                path: path.clone(),
                message: e.to_string(),
            })?;

            return Ok(contents.lines().next().unwrap_or_default().trim().to_string());
        }

        warn!("No access key configured (set {})", ENV_ACCESS_KEY);
        Err(ConfigError::MissingAccessKey)
    }

    /// Build the engine parameters
    ///
    /// Invariants are checked later by the listener so failures surface as
    /// a classified `InvalidConfiguration` state rather than here.
    pub fn listener_config(&self) -> Result<ListenerConfig, ConfigError> {
        let access_key = self.resolve_access_key()?;

        Ok(ListenerConfig::new(
            access_key,
            self.keyword_path.clone(),
            self.model_path.clone(),
            self.sensitivity,
        ))
    }
}
