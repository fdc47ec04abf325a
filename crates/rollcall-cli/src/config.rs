use rollcall_core::matcher::DEFAULT_TOLERANCE;
use rollcall_core::pipeline::DEFAULT_DETECTION_SCALE;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Runtime configuration.
///
/// Resolved in layers: built-in defaults, then a TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Gallery store file.
    pub store_path: PathBuf,
    /// Directory receiving one snapshot per enrollment.
    pub archive_dir: PathBuf,
    /// Euclidean distance at or below which two embeddings are the same person.
    pub tolerance: f32,
    /// Linear downscale applied before detection, in (0, 1].
    pub detection_scale: f32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = rollcall_core::default_data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: rollcall_core::default_model_dir(),
            store_path: data_dir.join("face_data.json"),
            archive_dir: data_dir.join("faces"),
            tolerance: DEFAULT_TOLERANCE,
            detection_scale: DEFAULT_DETECTION_SCALE,
        }
    }
}

impl Config {
    /// Load from `path` (or the default config file if it exists), then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Override fields from `ROLLCALL_*` variables. Unparseable numbers are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_ARCHIVE_DIR") {
            self.archive_dir = PathBuf::from(v);
        }
        self.tolerance = env_f32(&var, "ROLLCALL_TOLERANCE", self.tolerance);
        self.detection_scale = env_f32(&var, "ROLLCALL_DETECTION_SCALE", self.detection_scale);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !(self.detection_scale > 0.0 && self.detection_scale <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "detection_scale must be in (0, 1], got {}",
                self.detection_scale
            )));
        }
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/rollcall/config.toml`, else `~/.config/rollcall/config.toml`.
pub fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("rollcall/config.toml")
}

fn env_f32(var: &impl Fn(&str) -> Option<String>, key: &str, default: f32) -> f32 {
    match var(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            default
        }),
    }
}
