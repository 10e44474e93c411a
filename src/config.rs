// Configuration loading and parsing (tutor.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::session::Level;
use crate::speech::Accent;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub speech: SpeechConfig,
    pub session: SessionConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// tutor.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire tutor.toml file.
#[derive(Debug, Clone, Deserialize)]
struct TutorFile {
    database: DatabaseConfig,
    model: ModelConfig,
    speech: SpeechConfig,
    session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub request_timeout_secs: u64,
    /// Reply budget for typed turns (detailed, educational answers).
    pub chat_max_tokens_text: u32,
    /// Reply budget for voice turns (short, conversational answers).
    pub chat_max_tokens_voice: u32,
    pub chat_temperature: f32,
    pub analysis_max_tokens: u32,
    pub analysis_temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    pub language_hint: String,
    pub default_accent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub default_level: String,
    pub auto_speak: bool,
    pub correction_enabled: bool,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub anthropic_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/tutor.toml` and (optionally)
/// `config/credentials.toml`, both relative to the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- tutor.toml (required) ---
    let tutor_path = config_dir.join("tutor.toml");
    let tutor_text = read_file(&tutor_path)?;
    let tutor_file: TutorFile =
        toml::from_str(&tutor_text).map_err(|e| ConfigError::ParseError {
            path: tutor_path.clone(),
            source: e,
        })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        database: tutor_file.database,
        model: tutor_file.model,
        speech: tutor_file.speech,
        session: tutor_file.session,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        // Without defaults/ we can still run against an existing config/,
        // but if both are missing nothing can be loaded.
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        // Skip .example template files
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // File already exists in config/, skip it
            }
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.database.path.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    // Model validations
    if config.model.name.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "model.name".into(),
            message: "must not be empty".into(),
        });
    }

    if config.model.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "model.request_timeout_secs".into(),
            message: "must be > 0".into(),
        });
    }

    let budget_fields: &[(&str, u32)] = &[
        ("model.chat_max_tokens_text", config.model.chat_max_tokens_text),
        ("model.chat_max_tokens_voice", config.model.chat_max_tokens_voice),
        ("model.analysis_max_tokens", config.model.analysis_max_tokens),
    ];
    for (name, val) in budget_fields {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    let temperature_fields: &[(&str, f32)] = &[
        ("model.chat_temperature", config.model.chat_temperature),
        ("model.analysis_temperature", config.model.analysis_temperature),
    ];
    for (name, val) in temperature_fields {
        if !(0.0..=1.0).contains(val) {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: format!("must be between 0.0 and 1.0 inclusive, got {val}"),
            });
        }
    }

    // Speech validations
    if config.speech.language_hint.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "speech.language_hint".into(),
            message: "must not be empty".into(),
        });
    }

    if Accent::parse(&config.speech.default_accent).is_none() {
        return Err(ConfigError::ValidationError {
            field: "speech.default_accent".into(),
            message: format!(
                "unknown accent `{}`; expected US, UK or Australian",
                config.speech.default_accent
            ),
        });
    }

    // Session validations
    if Level::parse(&config.session.default_level).is_none() {
        return Err(ConfigError::ValidationError {
            field: "session.default_level".into(),
            message: format!(
                "unknown level `{}`; expected Beginner, Intermediate or Advanced",
                config.session.default_level
            ),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
