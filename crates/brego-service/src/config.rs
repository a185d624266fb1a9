//! Server configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use brego_types::wire::WireFormat;

use crate::endpoint::Endpoint;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process-wide settings.
    pub server: ServerConfig,
    /// Persistence sink settings.
    pub storage: StorageConfig,
    /// Stream broadcast sink settings.
    pub broadcast: BroadcastConfig,
    /// WebSocket sink settings.
    pub websocket: WebSocketConfig,
    /// Queue depth reporting.
    pub status: StatusConfig,
    /// Reading producers.
    #[serde(default)]
    pub producers: Vec<ProducerConfig>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use brego_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.broadcast.validate());
        errors.extend(self.websocket.validate());
        errors.extend(self.status.validate());

        let mut seen_names = HashSet::new();
        for (i, producer) in self.producers.iter().enumerate() {
            let prefix = format!("producers[{}]", i);
            errors.extend(producer.validate(&prefix));

            if !seen_names.insert(producer.name().to_lowercase()) {
                errors.push(ValidationError {
                    field: format!("{}.name", prefix),
                    message: format!("duplicate producer name '{}'", producer.name()),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How long shutdown waits for tasks to drain.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.shutdown_grace_secs == 0 {
            errors.push(ValidationError {
                field: "server.shutdown_grace_secs".to_string(),
                message: "shutdown grace period cannot be 0".to_string(),
            });
        }
        errors
    }

    /// The drain bound as a `Duration`.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Persistence sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Whether readings are written to the database.
    pub enabled: bool,
    /// Database file path.
    pub path: PathBuf,
    /// Extra attempts for a batch after a failed insert.
    pub max_retries: u32,
    /// Pause between attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: brego_store::default_db_path(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.enabled && self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }

    /// The retry pause as a `Duration`.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Default broadcast socket.
pub const DEFAULT_BROADCAST_ENDPOINT: &str = "unix:/tmp/brego.gpio.sock";

/// Stream broadcast sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Whether the broadcast listener runs.
    pub enabled: bool,
    /// `unix:<path>` or `tcp:<host:port>`.
    pub endpoint: String,
    /// Per-line write timeout, in seconds.
    pub write_timeout_secs: u64,
    /// Line layout.
    pub format: WireFormat,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_BROADCAST_ENDPOINT.to_string(),
            write_timeout_secs: 60,
            format: WireFormat::default(),
        }
    }
}

impl BroadcastConfig {
    /// Validate broadcast configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = self.endpoint.parse::<Endpoint>() {
            errors.push(ValidationError {
                field: "broadcast.endpoint".to_string(),
                message: e.to_string(),
            });
        }

        if self.write_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "broadcast.write_timeout_secs".to_string(),
                message: "write timeout cannot be 0".to_string(),
            });
        }

        errors
    }

    /// The write timeout as a `Duration`.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Smallest allowed `websocket.max_frame_size`: the largest control frame payload.
pub const MIN_FRAME_SIZE: usize = 125;

/// WebSocket sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Whether the WebSocket listener runs.
    pub enabled: bool,
    /// Bind address (e.g., "0.0.0.0:6565").
    pub bind: String,
    /// Bound of each connection's outbound message queue.
    pub outbound_capacity: usize,
    /// Largest accepted frame payload, in bytes.
    pub max_frame_size: usize,
    /// How long to wait for the peer to acknowledge a close, in seconds.
    pub close_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:6565".to_string(),
            outbound_capacity: 32,
            max_frame_size: 1 << 20,
            close_timeout_secs: 5,
        }
    }
}

impl WebSocketConfig {
    /// Validate WebSocket configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "websocket.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
        } else {
            match self.bind.rsplit_once(':') {
                None => errors.push(ValidationError {
                    field: "websocket.bind".to_string(),
                    message: format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                }),
                // Port 0 binds an ephemeral port
                Some((_, port)) => {
                    if port.parse::<u16>().is_err() {
                        errors.push(ValidationError {
                            field: "websocket.bind".to_string(),
                            message: format!("invalid port '{}': must be a number 0-65535", port),
                        });
                    }
                }
            }
        }

        if self.outbound_capacity == 0 {
            errors.push(ValidationError {
                field: "websocket.outbound_capacity".to_string(),
                message: "outbound capacity cannot be 0".to_string(),
            });
        }

        if self.max_frame_size < MIN_FRAME_SIZE {
            errors.push(ValidationError {
                field: "websocket.max_frame_size".to_string(),
                message: format!(
                    "max frame size {} is too small (minimum {} bytes)",
                    self.max_frame_size, MIN_FRAME_SIZE
                ),
            });
        }

        if self.close_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "websocket.close_timeout_secs".to_string(),
                message: "close timeout cannot be 0".to_string(),
            });
        }

        errors
    }

    /// The close-acknowledgement timeout as a `Duration`.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

/// Queue depth reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Whether subscriber queue depths are logged.
    pub enabled: bool,
    /// Report interval, in seconds.
    pub interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 5,
        }
    }
}

impl StatusConfig {
    /// Validate status configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.enabled && self.interval_secs == 0 {
            errors.push(ValidationError {
                field: "status.interval_secs".to_string(),
                message: "status interval cannot be 0".to_string(),
            });
        }
        errors
    }

    /// The report interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// A reading producer, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProducerConfig {
    /// DS18B20 probes on the one-wire bus.
    Onewire(OneWireConfig),
    /// Sine-wave sensors for demos.
    Simulated(SimulatedConfig),
    /// A fast multi-channel source sampled in windows.
    Sampler(SamplerConfig),
}

impl ProducerConfig {
    /// The producer's name.
    pub fn name(&self) -> &str {
        match self {
            ProducerConfig::Onewire(c) => &c.name,
            ProducerConfig::Simulated(c) => &c.name,
            ProducerConfig::Sampler(c) => &c.name,
        }
    }

    /// Validate producer configuration.
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.name().is_empty() {
            errors.push(ValidationError {
                field: format!("{}.name", prefix),
                message: "producer name cannot be empty".to_string(),
            });
        }

        match self {
            ProducerConfig::Onewire(c) => {
                if c.interval_ms == 0 {
                    errors.push(zero(prefix, "interval_ms", "poll interval"));
                }
                if c.pool_size == Some(0) {
                    errors.push(zero(prefix, "pool_size", "pool size"));
                }
            }
            ProducerConfig::Simulated(c) => {
                if c.devices.is_empty() {
                    errors.push(ValidationError {
                        field: format!("{}.devices", prefix),
                        message: "at least one device is required".to_string(),
                    });
                }
                if c.interval_ms == 0 {
                    errors.push(zero(prefix, "interval_ms", "poll interval"));
                }
            }
            ProducerConfig::Sampler(c) => {
                if c.channels.is_empty() {
                    errors.push(ValidationError {
                        field: format!("{}.channels", prefix),
                        message: "at least one channel is required".to_string(),
                    });
                }
                if c.sample_interval_ms == 0 {
                    errors.push(zero(prefix, "sample_interval_ms", "sample interval"));
                }
                if c.window_ms < c.sample_interval_ms {
                    errors.push(ValidationError {
                        field: format!("{}.window_ms", prefix),
                        message: format!(
                            "window {}ms is shorter than the sample interval {}ms",
                            c.window_ms, c.sample_interval_ms
                        ),
                    });
                }
                if c.capacity == 0 {
                    errors.push(zero(prefix, "capacity", "queue capacity"));
                }
            }
        }

        errors
    }
}

fn zero(prefix: &str, field: &str, what: &str) -> ValidationError {
    ValidationError {
        field: format!("{}.{}", prefix, field),
        message: format!("{} cannot be 0", what),
    }
}

/// DS18B20 probes on the one-wire bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneWireConfig {
    /// Producer name.
    pub name: String,
    /// Where the kernel exposes one-wire devices.
    pub root: PathBuf,
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    /// Concurrent reads; defaults to one per probe.
    pub pool_size: Option<usize>,
}

impl Default for OneWireConfig {
    fn default() -> Self {
        Self {
            name: "onewire".to_string(),
            root: PathBuf::from(brego_core::w1::DEFAULT_W1_ROOT),
            interval_ms: 1000,
            pool_size: None,
        }
    }
}

/// Sine-wave sensors for demos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Producer name.
    pub name: String,
    /// Device names, one sensor each.
    pub devices: Vec<String>,
    /// Centre value.
    pub base: f64,
    /// Swing either side of `base`.
    pub amplitude: f64,
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    /// Simulated read latency in milliseconds.
    pub latency_ms: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            name: "simulated".to_string(),
            devices: vec!["28-sim-0001".to_string(), "28-sim-0002".to_string()],
            base: 20.0,
            amplitude: 2.0,
            interval_ms: 1000,
            latency_ms: 0,
        }
    }
}

/// A fast multi-channel source sampled in windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Producer name.
    pub name: String,
    /// Channel names, each registered as an `ADC` device.
    pub channels: Vec<String>,
    /// Pause between samples in milliseconds.
    pub sample_interval_ms: u64,
    /// Window accumulated into one batch, in milliseconds.
    pub window_ms: u64,
    /// Windows buffered between the sampling thread and the bus.
    pub capacity: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            name: "adc".to_string(),
            channels: vec!["Potentiometer".to_string(), "Tachometer".to_string()],
            sample_interval_ms: 10,
            window_ms: 250,
            capacity: 10,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `broadcast.endpoint` or `producers[0].name`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("brego")
        .join("server.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validation_errors(config: &Config) -> Vec<ValidationError> {
        match config.validate() {
            Err(ConfigError::Validation(errors)) => errors,
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.shutdown_grace_secs, 5);
        assert!(config.storage.enabled);
        assert_eq!(config.broadcast.endpoint, DEFAULT_BROADCAST_ENDPOINT);
        assert_eq!(config.broadcast.write_timeout(), Duration::from_secs(60));
        assert_eq!(config.websocket.bind, "0.0.0.0:6565");
        assert!(!config.status.enabled);
        assert!(config.producers.is_empty());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.path, brego_store::default_db_path());
        assert_eq!(config.retry_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [server]
            shutdown_grace_secs = 10

            [storage]
            path = "/data/brego.db"
            max_retries = 5

            [broadcast]
            endpoint = "tcp:127.0.0.1:7000"
            format = "records"

            [websocket]
            bind = "127.0.0.1:6565"
            outbound_capacity = 8

            [status]
            enabled = true
            interval_secs = 2

            [[producers]]
            kind = "onewire"
            interval_ms = 2000

            [[producers]]
            kind = "simulated"
            name = "demo"
            devices = ["a", "b", "c"]

            [[producers]]
            kind = "sampler"
            channels = ["Potentiometer"]
            window_ms = 500
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.shutdown_grace_secs, 10);
        assert_eq!(config.storage.path, PathBuf::from("/data/brego.db"));
        assert_eq!(config.storage.max_retries, 5);
        assert_eq!(config.storage.retry_delay_ms, 500);
        assert_eq!(config.broadcast.format, WireFormat::Records);
        assert_eq!(config.websocket.outbound_capacity, 8);
        assert_eq!(config.status.interval(), Duration::from_secs(2));
        assert_eq!(config.producers.len(), 3);

        match &config.producers[0] {
            ProducerConfig::Onewire(c) => {
                assert_eq!(c.name, "onewire");
                assert_eq!(c.interval_ms, 2000);
                assert_eq!(c.root, PathBuf::from("/sys/bus/w1/devices"));
            }
            other => panic!("unexpected producer {other:?}"),
        }
        assert_eq!(config.producers[1].name(), "demo");
        match &config.producers[2] {
            ProducerConfig::Sampler(c) => {
                assert_eq!(c.channels, vec!["Potentiometer"]);
                assert_eq!(c.sample_interval_ms, 10);
            }
            other => panic!("unexpected producer {other:?}"),
        }

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_producer_kind_is_a_parse_error() {
        let toml = r#"
            [[producers]]
            kind = "gpio"
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("server.toml");

        let config = Config {
            broadcast: BroadcastConfig {
                endpoint: "unix:/run/brego.sock".to_string(),
                ..Default::default()
            },
            producers: vec![ProducerConfig::Simulated(SimulatedConfig::default())],
            ..Default::default()
        };

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.broadcast.endpoint, "unix:/run/brego.sock");
        assert_eq!(loaded.producers, config.producers);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("brego/server.toml"));
    }

    #[test]
    fn test_invalid_endpoint_reported() {
        let mut config = Config::default();
        config.broadcast.endpoint = "/tmp/brego.sock".to_string();

        let errors = validation_errors(&config);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "broadcast.endpoint");
    }

    #[test]
    fn test_zero_timeouts_reported() {
        let mut config = Config::default();
        config.server.shutdown_grace_secs = 0;
        config.broadcast.write_timeout_secs = 0;
        config.websocket.close_timeout_secs = 0;

        let fields: Vec<String> = validation_errors(&config)
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec![
                "server.shutdown_grace_secs",
                "broadcast.write_timeout_secs",
                "websocket.close_timeout_secs"
            ]
        );
    }

    #[test]
    fn test_websocket_bind_validation() {
        let mut ws = WebSocketConfig::default();
        assert!(ws.validate().is_empty());

        ws.bind = "[::1]:6565".to_string();
        assert!(ws.validate().is_empty());

        ws.bind = "localhost".to_string();
        assert!(ws.validate()[0].message.contains("host:port"));

        ws.bind = "127.0.0.1:0".to_string();
        assert!(ws.validate().is_empty());

        ws.bind = "localhost:ws".to_string();
        assert!(ws.validate()[0].message.contains("must be a number"));

        ws.bind = "localhost:6565".to_string();
        ws.max_frame_size = 16;
        ws.outbound_capacity = 0;
        assert_eq!(ws.validate().len(), 2);
    }

    #[test]
    fn test_duplicate_producer_names() {
        let config = Config {
            producers: vec![
                ProducerConfig::Simulated(SimulatedConfig {
                    name: "Bench".to_string(),
                    ..Default::default()
                }),
                ProducerConfig::Sampler(SamplerConfig {
                    name: "bench".to_string(),
                    ..Default::default()
                }),
            ],
            ..Default::default()
        };

        let errors = validation_errors(&config);
        assert!(errors.iter().any(|e| e.message.contains("duplicate")));
        assert_eq!(errors[0].field, "producers[1].name");
    }

    #[test]
    fn test_producer_validation() {
        let sampler = ProducerConfig::Sampler(SamplerConfig {
            channels: Vec::new(),
            sample_interval_ms: 100,
            window_ms: 50,
            ..Default::default()
        });
        let errors = sampler.validate("producers[0]");
        assert_eq!(errors.len(), 2);

        let onewire = ProducerConfig::Onewire(OneWireConfig {
            pool_size: Some(0),
            ..Default::default()
        });
        assert_eq!(onewire.validate("p")[0].field, "p.pool_size");

        let simulated = ProducerConfig::Simulated(SimulatedConfig {
            name: String::new(),
            devices: Vec::new(),
            ..Default::default()
        });
        assert_eq!(simulated.validate("p").len(), 2);
    }

    #[test]
    fn test_disabled_storage_skips_path_check() {
        let storage = StorageConfig {
            enabled: false,
            path: PathBuf::new(),
            ..Default::default()
        };
        assert!(storage.validate().is_empty());
    }

    #[test]
    fn test_config_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError {
                field: "broadcast.endpoint".to_string(),
                message: "invalid".to_string(),
            },
            ValidationError {
                field: "producers[0].name".to_string(),
                message: "cannot be empty".to_string(),
            },
        ]);
        let display = format!("{}", error);
        assert!(display.contains("broadcast.endpoint"));
        assert!(display.contains("producers[0].name"));
    }
}
