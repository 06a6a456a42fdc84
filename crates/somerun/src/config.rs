//! # Configuration
//!
//! TOML configuration for the provider, publisher and consumers. Every field
//! has a default, so an empty file (or no file) yields a working setup:
//! service `0x1234.0x5678`, CPU on event `0x43` in group 1 and memory on
//! event `0x44` in group 2, published every two seconds.
//!
//! Validation happens once at load. An invalid configuration is fatal.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use somerpc::EventGroupId;
use somerpc::EventId;
use somerpc::ServiceAddress;

use crate::correlator::CorrelationMode;
use crate::methods;
use crate::telemetry::Metric;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Io { path: PathBuf, message: String },
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "Could not read config {}: {}", path.display(), message),
            Self::Parse(msg) => write!(f, "Invalid config syntax: {}", msg),
            Self::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub service: ServiceConfig,
    pub telemetry: TelemetryConfig,
    pub publisher: PublisherConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub service_id: u16,
    pub instance_id: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_id: 0x1234,
            instance_id: 0x5678,
        }
    }
}

impl ServiceConfig {
    pub fn address(&self) -> ServiceAddress {
        ServiceAddress::new(self.service_id, self.instance_id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Where procfs is mounted. Containers often use `/host_proc`.
    pub proc_root: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublisherConfig {
    pub interval_ms: u64,
    pub initial_delay_ms: u64,
    /// Emitted in this order on every tick.
    pub events: Vec<EventConfig>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            initial_delay_ms: 0,
            events: vec![
                EventConfig {
                    metric: Metric::Cpu,
                    event_id: methods::EVENT_CPU.0,
                    event_group: methods::GROUP_CPU.0,
                },
                EventConfig {
                    metric: Metric::Memory,
                    event_id: methods::EVENT_MEMORY.0,
                    event_group: methods::GROUP_MEMORY.0,
                },
            ],
        }
    }
}

impl PublisherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Distinct groups in first-seen order.
    pub fn groups(&self) -> Vec<EventGroupId> {
        let mut groups = Vec::new();
        for event in &self.events {
            if !groups.contains(&event.group()) {
                groups.push(event.group());
            }
        }
        groups
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventConfig {
    pub metric: Metric,
    pub event_id: u16,
    pub event_group: u8,
}

impl EventConfig {
    pub fn event(&self) -> EventId {
        EventId(self.event_id)
    }

    pub fn group(&self) -> EventGroupId {
        EventGroupId(self.event_group)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub request_timeout_ms: u64,
    pub correlation: CorrelationMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            correlation: CorrelationMode::Token,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.publisher.interval_ms == 0 {
            return Err(Error::Invalid("publisher.interval_ms must be positive".to_string()));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(Error::Invalid("client.request_timeout_ms must be positive".to_string()));
        }

        let mut groups: BTreeMap<u16, u8> = BTreeMap::new();
        for event in &self.publisher.events {
            match groups.insert(event.event_id, event.event_group) {
                Some(existing) if existing != event.event_group => {
                    return Err(Error::Invalid(format!(
                        "{} is mapped to {} and {}",
                        event.event(),
                        EventGroupId(existing),
                        event.group()
                    )));
                }
                Some(_) => {
                    return Err(Error::Invalid(format!("{} is configured twice", event.event())));
                }
                None => {}
            }
        }
        Ok(())
    }
}
