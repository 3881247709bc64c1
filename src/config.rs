//! Deployment configuration.
//!
//! Configuration is an explicit value built once at startup (usually from a
//! TOML file) and handed to the components that need it:
//!
//! ```toml
//! [dead_letter]
//! routing_key_template = "{queue}.dlq"
//!
//! [dead_letter.exchange]
//! name = "dlx.exchange"
//!
//! [info]
//! application_name = "billing"
//!
//! [info.headers]
//! team = "payments"
//! ```

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the original queue name in routing key templates.
pub const QUEUE_PLACEHOLDER: &str = "{queue}";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,
    /// Outbound info stamping; absent when the `[info]` section is missing.
    #[serde(default)]
    pub info: Option<InfoConfig>,
}

impl Config {
    /// Parse configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::parse)
    }

    /// Read and parse a TOML configuration file.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::io)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("Configuration loaded");
        Ok(config)
    }
}

/// Resolves where dead letters go.
///
/// `routing_key_for` must be a pure function of the queue name.
pub trait DeadLetterNaming: Send + Sync {
    /// Name of the dead-letter exchange.
    fn exchange_name(&self) -> Result<String, ConfigError>;

    /// Dead-letter routing key for a message consumed from `queue`.
    fn routing_key_for(&self, queue: &str) -> Result<String, ConfigError>;
}

impl<T: DeadLetterNaming + ?Sized> DeadLetterNaming for std::sync::Arc<T> {
    fn exchange_name(&self) -> Result<String, ConfigError> {
        (**self).exchange_name()
    }

    fn routing_key_for(&self, queue: &str) -> Result<String, ConfigError> {
        (**self).routing_key_for(queue)
    }
}

/// Template based dead-letter naming.
///
/// The exchange is optional so that a half-configured deployment still
/// starts; recovering a message without it fails with
/// [`ConfigErrorKind::MissingExchange`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    pub exchange: Option<ExchangeConfig>,
    /// Routing key template, `{queue}` is replaced by the original queue.
    pub routing_key_template: String,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            exchange: None,
            routing_key_template: format!("{QUEUE_PLACEHOLDER}.dlq"),
        }
    }
}

impl DeadLetterConfig {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: Some(ExchangeConfig {
                name: exchange.into(),
            }),
            ..Default::default()
        }
    }

    pub fn with_routing_key_template(mut self, template: impl Into<String>) -> Self {
        self.routing_key_template = template.into();
        self
    }
}

impl DeadLetterNaming for DeadLetterConfig {
    fn exchange_name(&self) -> Result<String, ConfigError> {
        self.exchange
            .as_ref()
            .map(|e| e.name.clone())
            .ok_or_else(ConfigError::missing_exchange)
    }

    fn routing_key_for(&self, queue: &str) -> Result<String, ConfigError> {
        if !self.routing_key_template.contains(QUEUE_PLACEHOLDER) {
            return Err(ConfigError::invalid_template(&self.routing_key_template));
        }
        Ok(self.routing_key_template.replace(QUEUE_PLACEHOLDER, queue))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
}

/// Settings for the outbound info stamper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoConfig {
    pub application_name: String,
    /// Extra static entries of the info block.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl InfoConfig {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            headers: BTreeMap::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub struct ConfigError {
    kind: ConfigErrorKind,
}

/// Configuration error kinds.
#[derive(Debug)]
pub enum ConfigErrorKind {
    /// No dead-letter exchange configured.
    MissingExchange,
    /// Routing key template without the `{queue}` placeholder.
    InvalidTemplate(String),
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl ConfigError {
    pub fn kind(&self) -> &ConfigErrorKind {
        &self.kind
    }

    fn missing_exchange() -> Self {
        Self {
            kind: ConfigErrorKind::MissingExchange,
        }
    }

    fn invalid_template(template: &str) -> Self {
        Self {
            kind: ConfigErrorKind::InvalidTemplate(template.to_owned()),
        }
    }

    fn io(err: std::io::Error) -> Self {
        Self {
            kind: ConfigErrorKind::Io(err),
        }
    }

    fn parse(err: toml::de::Error) -> Self {
        Self {
            kind: ConfigErrorKind::Parse(err),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ConfigErrorKind::MissingExchange => write!(f, "Dead-letter exchange is not configured"),
            ConfigErrorKind::InvalidTemplate(t) => {
                write!(f, "Routing key template {t:?} has no {QUEUE_PLACEHOLDER} placeholder")
            }
            ConfigErrorKind::Io(err) => write!(f, "Cannot read configuration: {err}"),
            ConfigErrorKind::Parse(err) => write!(f, "Cannot parse configuration: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ConfigErrorKind::Io(err) => Some(err),
            ConfigErrorKind::Parse(err) => Some(err),
            _ => None,
        }
    }
}
