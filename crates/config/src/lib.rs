//! Configuration loading, validation, and management for Amaryllis.
//!
//! Loads configuration from `~/.amaryllis/config.toml` (directory overridable
//! with `AMARYLLIS_HOME`) with environment variable overrides. Validates all
//! settings at load time.
//!
//! The bundled CLI has no native engine, so it only inspects `[engine]`,
//! `[session]` and `generation_timeout_secs`. A host application that owns a
//! `NativeEngine` wires them up itself:
//!
//! ```ignore
//! let config = AppConfig::load()?;
//! let engine = LlmEngine::new(native, emitter);
//! engine.init(config.engine_config()?).await?;
//! let mut hook = InferenceAsync::new(engine);
//! if let Some(limit) = config.generation_timeout() {
//!     hook = hook.with_timeout(limit);
//! }
//! ```

use amaryllis_core::context::{ContextPolicy, ContextQuery};
use amaryllis_core::engine::{EngineConfig, SessionParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.amaryllis/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cancel a generation that produces no terminal result in time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_timeout_secs: Option<u64>,

    /// Native engine settings
    #[serde(default)]
    pub engine: EngineSection,

    /// Session installed right after the engine loads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionParams>,

    /// Context store policy and query defaults
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_encoder_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_adapter_path: Option<PathBuf>,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: u32,

    /// Prompt plus response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_max_num_images")]
    pub max_num_images: u32,
}

fn default_max_top_k() -> u32 {
    64
}
fn default_max_tokens() -> u32 {
    512
}
fn default_max_num_images() -> u32 {
    1
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            model_path: None,
            vision_encoder_path: None,
            vision_adapter_path: None,
            max_top_k: default_max_top_k(),
            max_tokens: default_max_tokens(),
            max_num_images: default_max_num_images(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Recency weighting for derived queries (scorer default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency_bias: Option<f64>,

    /// Result limit for derived queries
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(flatten)]
    pub policy: ContextPolicy,
}

fn default_limit() -> usize {
    5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recency_bias: None,
            default_limit: default_limit(),
            policy: ContextPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.amaryllis/config.toml).
    ///
    /// Environment overrides:
    /// - `AMARYLLIS_MODEL_PATH`
    /// - `AMARYLLIS_MAX_TOKENS`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in [`load`](Self::load)).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(path) = lookup("AMARYLLIS_MODEL_PATH").filter(|p| !p.trim().is_empty()) {
            self.engine.model_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("AMARYLLIS_MAX_TOKENS") {
            self.engine.max_tokens = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "AMARYLLIS_MAX_TOKENS must be a positive integer, got {raw:?}"
                ))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        match std::env::var("AMARYLLIS_HOME") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => dirs_home().join(".amaryllis"),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        for (name, value) in [
            ("engine.max_top_k", engine.max_top_k),
            ("engine.max_tokens", engine.max_tokens),
            ("engine.max_num_images", engine.max_num_images),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }

        if let Some(session) = &self.session {
            if session.top_k == Some(0) {
                return Err(ConfigError::ValidationError("session.top_k must be > 0".into()));
            }
            if let Some(top_k) = session.top_k
                && top_k > engine.max_top_k
            {
                return Err(ConfigError::ValidationError(format!(
                    "session.top_k ({top_k}) exceeds engine.max_top_k ({})",
                    engine.max_top_k
                )));
            }
            if let Some(top_p) = session.top_p
                && !(top_p > 0.0 && top_p <= 1.0)
            {
                return Err(ConfigError::ValidationError(
                    "session.top_p must be in (0.0, 1.0]".into(),
                ));
            }
            if let Some(temperature) = session.temperature
                && !(temperature.is_finite() && temperature >= 0.0)
            {
                return Err(ConfigError::ValidationError(
                    "session.temperature must be a finite number >= 0.0".into(),
                ));
            }
        }

        if self.generation_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "generation_timeout_secs must be > 0".into(),
            ));
        }

        let context = &self.context;
        if context.default_limit == 0 {
            return Err(ConfigError::ValidationError("context.default_limit must be > 0".into()));
        }
        if let Some(bias) = context.recency_bias
            && !bias.is_finite()
        {
            return Err(ConfigError::ValidationError(
                "context.recency_bias must be a finite number".into(),
            ));
        }
        amaryllis_context::validate_context_policy(&context.policy)
            .map_err(|e| ConfigError::ValidationError(format!("context: {e}")))?;

        Ok(())
    }

    /// The engine config to pass to `init`. Fails when no model is configured.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let Some(model_path) = self.engine.model_path.clone() else {
            return Err(ConfigError::ValidationError(
                "engine.model_path is not set (config file or AMARYLLIS_MODEL_PATH)".into(),
            ));
        };
        Ok(EngineConfig {
            model_path,
            vision_encoder_path: self.engine.vision_encoder_path.clone(),
            vision_adapter_path: self.engine.vision_adapter_path.clone(),
            max_top_k: Some(self.engine.max_top_k),
            max_tokens: Some(self.engine.max_tokens),
            max_num_images: Some(self.engine.max_num_images),
            session: self.session.clone(),
        })
    }

    /// A context query for `prompt` using the configured defaults.
    /// `None` for a blank prompt.
    pub fn context_query(&self, prompt: &str) -> Option<ContextQuery> {
        let text = prompt.trim();
        if text.is_empty() {
            return None;
        }
        let mut query = ContextQuery::new(text).with_limit(self.context.default_limit);
        query.recency_bias = self.context.recency_bias;
        Some(query)
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout_secs.map(Duration::from_secs)
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Write the default config to `path` unless a file is already there.
    /// Returns whether a file was written.
    pub fn write_default(path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        let write_error = |e: std::io::Error| ConfigError::WriteError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, Self::default_toml()).map_err(write_error)?;
        tracing::info!("Wrote default config to {}", path.display());
        Ok(true)
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to write config file at {path}: {reason}")]
    WriteError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
