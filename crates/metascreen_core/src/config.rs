//! Screening engine configuration.
//!
//! # Responsibility
//! - Hold tunables that must not be hard-coded: ranking threshold, scoring
//!   timeout, label normalization sets, highlight keywords, reset-token TTL.
//! - Load them from TOML and validate before use.
//!
//! # Invariants
//! - Every field has a default, so an empty document is a valid config.
//! - A config returned by [`ScreeningConfig::from_toml_str`] or
//!   [`ScreeningConfig::load`] has passed [`ScreeningConfig::validate`].

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

/// Labeled records required before ranking is attempted.
pub const DEFAULT_MIN_LABELED: usize = 10;
const DEFAULT_RANKING_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RANKING_BATCH_SIZE: usize = 32;
const DEFAULT_RESET_TOKEN_TTL_SECS: u64 = 60 * 60;

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    pub ranking: RankingConfig,
    pub highlight: HighlightConfig,
    pub auth: AuthConfig,
}

/// Ranker tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Decided records needed before the classifier is consulted.
    pub min_labeled: usize,
    /// Upper bound for one full classification pass.
    pub timeout_ms: u64,
    /// Texts sent per classifier call.
    pub batch_size: usize,
    /// Labels whose confidence counts toward relevance.
    pub positive_labels: Vec<String>,
    /// Labels whose confidence counts against relevance.
    pub negative_labels: Vec<String>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            min_labeled: DEFAULT_MIN_LABELED,
            timeout_ms: DEFAULT_RANKING_TIMEOUT_MS,
            batch_size: DEFAULT_RANKING_BATCH_SIZE,
            positive_labels: ["relevant", "include", "included", "positive", "label_1"]
                .iter()
                .map(|label| label.to_string())
                .collect(),
            negative_labels: ["irrelevant", "exclude", "excluded", "negative", "label_0"]
                .iter()
                .map(|label| label.to_string())
                .collect(),
        }
    }
}

impl RankingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Keyword highlighting for reviewers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub keywords: Vec<String>,
}

/// Account/password-reset tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub reset_token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            reset_token_ttl_secs: DEFAULT_RESET_TOKEN_TTL_SECS,
        }
    }
}

impl AuthConfig {
    pub fn reset_token_ttl_ms(&self) -> i64 {
        i64::try_from(self.reset_token_ttl_secs.saturating_mul(1_000)).unwrap_or(i64::MAX)
    }
}

/// Configuration load/validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

impl ScreeningConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    /// - `timeout_ms`, `batch_size` or `reset_token_ttl_secs` is zero.
    /// - A label appears in both the positive and negative sets.
    /// - A highlight keyword is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ranking.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "ranking.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.ranking.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "ranking.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.auth.reset_token_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "auth.reset_token_ttl_secs must be greater than 0".to_string(),
            ));
        }
        for label in &self.ranking.positive_labels {
            let normalized = label.trim().to_lowercase();
            if self
                .ranking
                .negative_labels
                .iter()
                .any(|other| other.trim().to_lowercase() == normalized)
            {
                return Err(ConfigError::Invalid(format!(
                    "label `{label}` is listed as both positive and negative"
                )));
            }
        }
        if self
            .highlight
            .keywords
            .iter()
            .any(|keyword| keyword.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "highlight.keywords must not contain blank values".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ScreeningConfig, DEFAULT_MIN_LABELED};

    #[test]
    fn empty_document_yields_defaults() {
        let config = ScreeningConfig::from_toml_str("").expect("empty config should parse");
        assert_eq!(config, ScreeningConfig::default());
        assert_eq!(config.ranking.min_labeled, DEFAULT_MIN_LABELED);
        assert_eq!(config.auth.reset_token_ttl_ms(), 3_600_000);
        assert!(config.highlight.keywords.is_empty());
    }

    #[test]
    fn partial_document_overrides_only_named_fields() {
        let config = ScreeningConfig::from_toml_str(
            r#"
            [ranking]
            min_labeled = 4
            timeout_ms = 250

            [highlight]
            keywords = ["randomized", "cohort"]
            "#,
        )
        .expect("partial config should parse");
        assert_eq!(config.ranking.min_labeled, 4);
        assert_eq!(config.ranking.timeout_ms, 250);
        assert_eq!(config.ranking.batch_size, 32);
        assert_eq!(config.highlight.keywords, vec!["randomized", "cohort"]);
        assert_eq!(config.auth.reset_token_ttl_secs, 3_600);
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = ScreeningConfig::from_toml_str("[ranking]\ntimeout_ms = 0\n")
            .expect_err("zero timeout must fail");
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("timeout_ms")));
    }

    #[test]
    fn rejects_overlapping_label_sets() {
        let err = ScreeningConfig::from_toml_str(
            "[ranking]\npositive_labels = [\"yes\"]\nnegative_labels = [\" YES \"]\n",
        )
        .expect_err("overlapping labels must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = ScreeningConfig::from_toml_str("[ranking\n").expect_err("bad toml must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("metascreen.toml");
        std::fs::write(&path, "[auth]\nreset_token_ttl_secs = 120\n").expect("write config");
        let config = ScreeningConfig::load(&path).expect("config should load");
        assert_eq!(config.auth.reset_token_ttl_ms(), 120_000);
    }
}
