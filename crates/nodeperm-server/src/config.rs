//! Engine configuration.
//!
//! Configuration is layered from three sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables use the `NODEPERM_` prefix and `__` between nested
//! keys, e.g. `NODEPERM_CACHE__MAX_CAPACITY=1024` overrides `cache.max_capacity`.
//!
//! # Example
//!
//! ```ignore
//! use nodeperm_server::config::EngineConfig;
//!
//! let config = EngineConfig::load("nodeperm.yaml")?;
//! let engine = PermissionEngine::new(config.to_engine_settings()?);
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use nodeperm_domain::calculator::CalculatorSettings;
use nodeperm_domain::metastack::{DuplicateRemoval, MetaStackDefinition};
use nodeperm_domain::query::FlagSet;
use nodeperm_domain::{
    CachedDataConfig, ContextSatisfyMode, ContextSet, EngineSettings, Flag,
    PrimaryGroupCalculation, QueryOptions,
};

const ENV_PREFIX: &str = "NODEPERM";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub resolution: ResolutionSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub meta_formatting: MetaFormattingSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// How nodes and inheritance are resolved.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResolutionSettings {
    /// Apply nodes without a `server` context.
    #[serde(default = "default_true")]
    pub include_global: bool,

    /// Apply nodes without a `world` context.
    #[serde(default = "default_true")]
    pub include_global_world: bool,

    /// Follow inheritance nodes without a `server` context.
    #[serde(default = "default_true")]
    pub apply_global_groups: bool,

    /// Follow inheritance nodes without a `world` context.
    #[serde(default = "default_true")]
    pub apply_global_world_groups: bool,

    /// Treat every user as inheriting its primary group.
    #[serde(default = "default_true")]
    pub apply_primary_group_implicitly: bool,

    /// `all-values-per-key` or `at-least-one-value-per-key`
    #[serde(default = "default_satisfy_mode")]
    pub context_satisfy_mode: String,

    /// `stored`, `parents-by-weight` or `all-parents-by-weight`
    #[serde(default = "default_primary_group_calculation")]
    pub primary_group_calculation: String,

    #[serde(default = "default_true")]
    pub apply_wildcards: bool,

    #[serde(default = "default_true")]
    pub apply_regex: bool,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            include_global: true,
            include_global_world: true,
            apply_global_groups: true,
            apply_global_world_groups: true,
            apply_primary_group_implicitly: true,
            context_satisfy_mode: default_satisfy_mode(),
            primary_group_calculation: default_primary_group_calculation(),
            apply_wildcards: true,
            apply_regex: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_satisfy_mode() -> String {
    "all-values-per-key".to_string()
}

fn default_primary_group_calculation() -> String {
    "stored".to_string()
}

/// Per-holder cached data bounds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    /// Maximum entries per holder cache.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    /// Seconds an unused entry survives.
    #[serde(default = "default_expire_after_access")]
    pub expire_after_access_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            expire_after_access_secs: default_expire_after_access(),
        }
    }
}

fn default_max_capacity() -> u64 {
    256
}

fn default_expire_after_access() -> u64 {
    120
}

/// Prefix and suffix stack definitions.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct MetaFormattingSettings {
    #[serde(default)]
    pub prefix: MetaStackSettings,

    #[serde(default)]
    pub suffix: MetaStackSettings,
}

/// One meta stack definition.
///
/// ```yaml
/// meta_formatting:
///   prefix:
///     format: ["highest_own", "highest_inherited"]
///     duplicates: first-only
///     start_spacer: ""
///     middle_spacer: " "
///     end_spacer: ""
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetaStackSettings {
    /// Stack elements, e.g. `highest`, `lowest_own`, `highest_from_group_staff`.
    #[serde(default = "default_stack_format")]
    pub format: Vec<String>,

    /// `retain-all`, `first-only` or `last-only`
    #[serde(default = "default_duplicates")]
    pub duplicates: String,

    #[serde(default)]
    pub start_spacer: String,

    #[serde(default = "default_middle_spacer")]
    pub middle_spacer: String,

    #[serde(default)]
    pub end_spacer: String,
}

impl Default for MetaStackSettings {
    fn default() -> Self {
        Self {
            format: default_stack_format(),
            duplicates: default_duplicates(),
            start_spacer: String::new(),
            middle_spacer: default_middle_spacer(),
            end_spacer: String::new(),
        }
    }
}

fn default_stack_format() -> Vec<String> {
    vec!["highest".to_string()]
}

fn default_duplicates() -> String {
    "first-only".to_string()
}

fn default_middle_spacer() -> String {
    " ".to_string()
}

impl MetaStackSettings {
    fn to_definition(&self, section: &str) -> Result<MetaStackDefinition, ConfigLoadError> {
        let invalid = |err: nodeperm_domain::DomainError| ConfigLoadError::Invalid {
            message: format!("meta_formatting.{section}: {err}"),
        };
        Ok(MetaStackDefinition {
            elements: MetaStackDefinition::parse_elements(&self.format).map_err(invalid)?,
            duplicates: DuplicateRemoval::from_str(&self.duplicates).map_err(invalid)?,
            start_spacer: self.start_spacer.clone(),
            middle_spacer: self.middle_spacer.clone(),
            end_spacer: self.end_spacer.clone(),
        })
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl EngineConfig {
    /// Loads a YAML file with environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(env_source())
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Loads defaults with environment variable overrides only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(env_source())
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Validates every section, including the values that are parsed later.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.cache.max_capacity == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "cache.max_capacity must be greater than 0".to_string(),
            });
        }
        if self.cache.expire_after_access_secs == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "cache.expire_after_access_secs must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        self.to_engine_settings().map(|_| ())
    }

    pub fn to_engine_settings(&self) -> Result<EngineSettings, ConfigLoadError> {
        let resolution = &self.resolution;
        Ok(EngineSettings {
            satisfy_mode: parse_satisfy_mode(&resolution.context_satisfy_mode)?,
            calculator: CalculatorSettings {
                apply_wildcards: resolution.apply_wildcards,
                apply_regex: resolution.apply_regex,
            },
            prefix_stack: self.meta_formatting.prefix.to_definition("prefix")?,
            suffix_stack: self.meta_formatting.suffix.to_definition("suffix")?,
            primary_group_calculation: parse_primary_group_calculation(
                &resolution.primary_group_calculation,
            )?,
            cache: CachedDataConfig::default()
                .with_max_capacity(self.cache.max_capacity)
                .with_expire_after_access(Duration::from_secs(self.cache.expire_after_access_secs)),
        })
    }

    /// Contextual query options for `context` carrying the configured flags.
    pub fn query_options(&self, context: ContextSet) -> QueryOptions {
        let resolution = &self.resolution;
        let flags = FlagSet::all()
            .with(Flag::IncludeNodesWithoutServerContext, resolution.include_global)
            .with(Flag::IncludeNodesWithoutWorldContext, resolution.include_global_world)
            .with(Flag::ApplyInheritanceNodesWithoutServerContext, resolution.apply_global_groups)
            .with(
                Flag::ApplyInheritanceNodesWithoutWorldContext,
                resolution.apply_global_world_groups,
            )
            .with(
                Flag::ApplyPrimaryGroupImplicitly,
                resolution.apply_primary_group_implicitly,
            );
        QueryOptions::contextual(context).with_flags(flags)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase().replace('_', "-")
}

fn parse_satisfy_mode(value: &str) -> Result<ContextSatisfyMode, ConfigLoadError> {
    match normalize(value).as_str() {
        "all-values-per-key" => Ok(ContextSatisfyMode::AllValuesPerKey),
        "at-least-one-value-per-key" => Ok(ContextSatisfyMode::AtLeastOneValuePerKey),
        _ => Err(ConfigLoadError::Invalid {
            message: format!(
                "resolution.context_satisfy_mode must be all-values-per-key or at-least-one-value-per-key, got: {value}"
            ),
        }),
    }
}

fn parse_primary_group_calculation(value: &str) -> Result<PrimaryGroupCalculation, ConfigLoadError> {
    match normalize(value).as_str() {
        "stored" => Ok(PrimaryGroupCalculation::Stored),
        "parents-by-weight" => Ok(PrimaryGroupCalculation::ParentsByWeight),
        "all-parents-by-weight" => Ok(PrimaryGroupCalculation::AllParentsByWeight),
        _ => Err(ConfigLoadError::Invalid {
            message: format!(
                "resolution.primary_group_calculation must be stored, parents-by-weight or all-parents-by-weight, got: {value}"
            ),
        }),
    }
}
