//! Flow configuration
//!
//! Controls the runtime features a flow opts into: default language, language
//! detection, handling of concurrent messages, and recursion limits.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Hard cap on node executions per `run` call
pub const MAX_RECURSION_LIMIT: u32 = 100;
/// Node executions per `run` call when nothing else is configured
pub const DEFAULT_RECURSION_LIMIT: u32 = 25;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Language detector needs at least two expected languages, got {count}")]
    TooFewLanguages { count: usize },
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("Failed to read environment: {0}")]
    Environment(#[from] dotenvy::Error),
}

// ============================================================================
// Language detection
// ============================================================================

/// Which detector the runtime uses for incoming messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorModel {
    /// LLM based detection; handles mixed-language messages, adds latency
    #[default]
    Llm,
    /// Dedicated NLP model; fast, best with single-language messages
    Nlp,
}

impl std::str::FromStr for DetectorModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "llm" => Ok(Self::Llm),
            "nlp" => Ok(Self::Nlp),
            _ => Err(ConfigError::InvalidValue {
                key: "detector model".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawLanguageDetectorConfig {
    expected_languages: BTreeSet<String>,
    #[serde(default)]
    model: DetectorModel,
}

/// Language detector settings, validated on construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLanguageDetectorConfig")]
pub struct LanguageDetectorConfig {
    expected_languages: BTreeSet<String>,
    model: DetectorModel,
}

impl LanguageDetectorConfig {
    pub fn new<I, S>(expected_languages: I, model: DetectorModel) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let expected_languages: BTreeSet<String> =
            expected_languages.into_iter().map(Into::into).collect();
        if expected_languages.len() < 2 {
            return Err(ConfigError::TooFewLanguages {
                count: expected_languages.len(),
            });
        }
        Ok(Self {
            expected_languages,
            model,
        })
    }

    pub fn expected_languages(&self) -> &BTreeSet<String> {
        &self.expected_languages
    }

    pub fn model(&self) -> DetectorModel {
        self.model
    }
}

impl TryFrom<RawLanguageDetectorConfig> for LanguageDetectorConfig {
    type Error = ConfigError;

    fn try_from(raw: RawLanguageDetectorConfig) -> Result<Self, Self::Error> {
        Self::new(raw.expected_languages, raw.model)
    }
}

// ============================================================================
// Chatbot configuration
// ============================================================================

/// What happens when a message arrives while the previous one for the same
/// session is still being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrentSessionPolicy {
    /// Wait for the in-flight message to finish, then run the next one
    #[default]
    Enqueue,
}

/// Configuration of a chatbot flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatbotConfiguration {
    pub default_language: String,
    #[serde(default)]
    pub language_detector: Option<LanguageDetectorConfig>,
    #[serde(default)]
    pub concurrent_session: ConcurrentSessionPolicy,
    /// Upper bound on node executions per `run`; capped at [`MAX_RECURSION_LIMIT`]
    #[serde(default)]
    pub recursion_limit: Option<u32>,
    /// Fail nodes that mutate state or send responses before waiting for input
    #[serde(default)]
    pub strict_suspension: bool,
}

impl ChatbotConfiguration {
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            default_language: default_language.into(),
            language_detector: None,
            concurrent_session: ConcurrentSessionPolicy::Enqueue,
            recursion_limit: None,
            strict_suspension: false,
        }
    }

    #[must_use]
    pub fn with_language_detector(mut self, detector: LanguageDetectorConfig) -> Self {
        self.language_detector = Some(detector);
        self
    }

    #[must_use]
    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_strict_suspension(mut self, strict: bool) -> Self {
        self.strict_suspension = strict;
        self
    }

    /// Configured recursion limit, capped at [`MAX_RECURSION_LIMIT`]
    pub fn effective_recursion_limit(&self) -> Option<u32> {
        self.recursion_limit.map(|l| l.min(MAX_RECURSION_LIMIT))
    }

    /// Load from `CHATFLOW_*` environment variables.
    ///
    /// `CHATFLOW_DEFAULT_LANGUAGE` defaults to `en`. A detector is configured
    /// when `CHATFLOW_DETECTOR_LANGUAGES` (comma separated) is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Same as [`Self::from_env`], reading from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let var = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let mut config = Self::new(var("CHATFLOW_DEFAULT_LANGUAGE").unwrap_or("en"));

        if let Some(limit) = var("CHATFLOW_RECURSION_LIMIT") {
            config.recursion_limit = Some(parse_value("CHATFLOW_RECURSION_LIMIT", limit)?);
        }

        if let Some(strict) = var("CHATFLOW_STRICT_SUSPENSION") {
            config.strict_suspension = parse_value("CHATFLOW_STRICT_SUSPENSION", strict)?;
        }

        if let Some(languages) = var("CHATFLOW_DETECTOR_LANGUAGES") {
            let model = var("CHATFLOW_DETECTOR_MODEL")
                .map(str::parse::<DetectorModel>)
                .transpose()?
                .unwrap_or_default();
            let languages = languages
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty());
            config.language_detector = Some(LanguageDetectorConfig::new(languages, model)?);
        }

        Ok(config)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// ============================================================================
// Environment files
// ============================================================================

/// Read a `.env` style file into a map, without touching the process env
pub fn read_environment_file(
    path: impl AsRef<Path>,
) -> Result<HashMap<String, String>, ConfigError> {
    dotenvy::from_path_iter(path.as_ref())?
        .map(|item| item.map_err(ConfigError::from))
        .collect()
}

/// Read `.env` style content from any reader
pub fn read_environment<R: Read>(reader: R) -> Result<HashMap<String, String>, ConfigError> {
    dotenvy::from_read_iter(reader)
        .map(|item| item.map_err(ConfigError::from))
        .collect()
}
