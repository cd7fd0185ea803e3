//! Configuration system (layered: defaults > TOML file > environment).
//!
//! Server configuration is consumed, never produced, by the connection and
//! mapping layers: they pass it through to upstream clients untouched. The
//! aggregator-level settings (`conflict_resolution`, `timeout`, strategy mode)
//! are read by [`crate::mcp::aggregate::McpAggregator`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{MusterError, Result};
use crate::util::backoff::{BackoffStrategy, RetryConfig};

/// Default per-server connect timeout in milliseconds.
pub const DEFAULT_SERVER_TIMEOUT_MS: u64 = 30_000;
/// Default aggregate operation timeout in milliseconds.
pub const DEFAULT_AGGREGATE_TIMEOUT_MS: u64 = 60_000;

const CONFIG_FILE_NAME: &str = "muster.toml";

/// How an upstream server is reached.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransportConfig {
    /// Launch a local subprocess and speak MCP over its stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Legacy HTTP + server-sent events endpoint.
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Streamable HTTP endpoint.
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    /// Wire name of the transport (`stdio`, `sse`, `streamable-http`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Sse { .. } => "sse",
            Self::StreamableHttp { .. } => "streamable-http",
        }
    }
}

fn redacted(headers: &HashMap<String, String>) -> BTreeMap<&str, &str> {
    headers.keys().map(|k| (k.as_str(), "****")).collect()
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio { command, args, env } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("env", &env.keys().collect::<Vec<_>>())
                .finish(),
            Self::Sse { url, headers } => f
                .debug_struct("Sse")
                .field("url", url)
                .field("headers", &redacted(headers))
                .finish(),
            Self::StreamableHttp { url, headers } => f
                .debug_struct("StreamableHttp")
                .field("url", url)
                .field("headers", &redacted(headers))
                .finish(),
        }
    }
}

/// What the caller should do when a server fails to connect.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionMode {
    /// Fail fast.
    Strict,
    /// Continue with a warning.
    #[default]
    Lenient,
}

/// Configuration of one upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Connect timeout in milliseconds.
    #[serde(default = "default_server_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub connection_mode: ConnectionMode,
}

fn default_true() -> bool {
    true
}

fn default_server_timeout() -> u64 {
    DEFAULT_SERVER_TIMEOUT_MS
}

impl ServerConfig {
    /// Create an enabled stdio server configuration.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_transport(TransportConfig::Stdio {
            command: command.into(),
            args,
            env: HashMap::new(),
        })
    }

    /// Create an enabled streamable HTTP server configuration.
    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self::with_transport(TransportConfig::StreamableHttp {
            url: url.into(),
            headers: HashMap::new(),
        })
    }

    /// Create an enabled SSE server configuration.
    pub fn sse(url: impl Into<String>) -> Self {
        Self::with_transport(TransportConfig::Sse {
            url: url.into(),
            headers: HashMap::new(),
        })
    }

    fn with_transport(transport: TransportConfig) -> Self {
        Self {
            transport,
            enabled: true,
            timeout: DEFAULT_SERVER_TIMEOUT_MS,
            connection_mode: ConnectionMode::default(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Connect timeout as a [`Duration`].
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.timeout == 0 {
            return Err(MusterError::Configuration(format!(
                "server '{name}' timeout must be greater than zero"
            )));
        }
        match &self.transport {
            TransportConfig::Stdio { command, .. } if command.trim().is_empty() => Err(
                MusterError::Configuration(format!("server '{name}' has an empty command")),
            ),
            TransportConfig::Sse { url, .. } | TransportConfig::StreamableHttp { url, .. }
                if url.trim().is_empty() =>
            {
                Err(MusterError::Configuration(format!(
                    "server '{name}' has an empty url"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// How name collisions between servers are resolved by the aggregator.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConflictResolution {
    /// Always register under the namespaced name; bare names go to the first owner.
    #[default]
    Prefix,
    /// The first server to expose a bare name keeps it; later ones are skipped.
    FirstWins,
    /// A second server exposing an already-owned bare name is an error.
    Error,
}

/// Which connection strategy the aggregator uses.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StrategyMode {
    /// Long-lived pooled connections.
    Persistent,
    /// One connection per operation.
    #[default]
    Temporary,
}

/// Backoff algorithm name used in configuration files.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackoffKind {
    Immediate,
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// Serializable retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    #[serde(default)]
    pub strategy: BackoffKind,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub jitter: f64,
    #[serde(default)]
    pub max_total_time_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            strategy: BackoffKind::default(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: 0.0,
            max_total_time_ms: None,
        }
    }
}

impl RetrySettings {
    /// Convert into a validated [`RetryConfig`].
    pub fn to_retry_config(&self) -> Result<RetryConfig> {
        let strategy = match self.strategy {
            BackoffKind::Immediate => BackoffStrategy::Immediate,
            BackoffKind::Fixed => BackoffStrategy::Fixed,
            BackoffKind::Linear => BackoffStrategy::Linear,
            BackoffKind::Exponential => BackoffStrategy::Exponential,
        };
        let config = RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
            max_total_time: self.max_total_time_ms.map(Duration::from_millis),
            strategy,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Aggregator-level configuration layered on top of the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorConfig {
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Aggregate operation timeout in milliseconds. Bounds one routed call
    /// end to end: acquiring the connection, connect retries and the call itself.
    #[serde(default = "default_aggregate_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub connection_strategy: StrategyMode,
    #[serde(default)]
    pub retry: Option<RetrySettings>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_aggregate_timeout() -> u64 {
    DEFAULT_AGGREGATE_TIMEOUT_MS
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            mcp_servers: BTreeMap::new(),
            conflict_resolution: ConflictResolution::default(),
            host: default_host(),
            port: default_port(),
            timeout: DEFAULT_AGGREGATE_TIMEOUT_MS,
            connection_strategy: StrategyMode::default(),
            retry: None,
        }
    }
}

impl AggregatorConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Platform config location, e.g. `~/.config/muster/muster.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "muster")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load the file at [`Self::default_path`] if it exists, else defaults,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading aggregator config");
                Self::from_file(path)?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `MUSTER_*` environment variables (and `.env` if present).
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("MUSTER_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("MUSTER_PORT") {
            self.port = parse_env("MUSTER_PORT", &port)?;
        }
        if let Some(timeout) = lookup("MUSTER_TIMEOUT_MS") {
            self.timeout = parse_env("MUSTER_TIMEOUT_MS", &timeout)?;
        }
        if let Some(mode) = lookup("MUSTER_CONFLICT_RESOLUTION") {
            self.conflict_resolution = parse_env("MUSTER_CONFLICT_RESOLUTION", &mode)?;
        }
        if let Some(mode) = lookup("MUSTER_CONNECTION_STRATEGY") {
            self.connection_strategy = parse_env("MUSTER_CONNECTION_STRATEGY", &mode)?;
        }
        self.validate()
    }

    /// Check server entries and timeouts.
    pub fn validate(&self) -> Result<()> {
        if self.timeout == 0 {
            return Err(MusterError::Configuration(
                "aggregate timeout must be greater than zero".into(),
            ));
        }
        for (name, server) in &self.mcp_servers {
            if name.trim().is_empty() {
                return Err(MusterError::Configuration(
                    "server name must not be empty".into(),
                ));
            }
            server.validate(name)?;
        }
        if let Some(retry) = &self.retry {
            retry.to_retry_config()?;
        }
        Ok(())
    }

    /// Servers with `enabled = true`.
    pub fn enabled_servers(&self) -> HashMap<String, ServerConfig> {
        self.mcp_servers
            .iter()
            .filter(|(_, server)| server.enabled)
            .map(|(name, server)| (name.clone(), server.clone()))
            .collect()
    }

    /// Aggregate operation timeout as a [`Duration`].
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Listening address as `host:port`.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| MusterError::Configuration(format!("invalid {key} '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
conflictResolution = "first-wins"
port = 8080
connectionStrategy = "persistent"

[mcpServers.fs]
type = "stdio"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]

[mcpServers.search]
type = "streamable-http"
url = "https://search.example.com/mcp"
timeout = 5000
connectionMode = "strict"
headers = { Authorization = "Bearer secret" }

[mcpServers.legacy]
type = "sse"
url = "https://legacy.example.com/sse"
enabled = false

[retry]
strategy = "linear"
maxAttempts = 4
baseDelayMs = 250
maxDelayMs = 2000
"#;

    #[test]
    fn parses_tagged_server_configs_with_defaults() {
        let config = AggregatorConfig::from_toml_str(SAMPLE).expect("sample should parse");

        assert_eq!(config.conflict_resolution, ConflictResolution::FirstWins);
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.timeout, DEFAULT_AGGREGATE_TIMEOUT_MS);
        assert_eq!(config.connection_strategy, StrategyMode::Persistent);

        let fs = &config.mcp_servers["fs"];
        assert!(fs.enabled);
        assert_eq!(fs.timeout, DEFAULT_SERVER_TIMEOUT_MS);
        assert_eq!(fs.connection_mode, ConnectionMode::Lenient);
        assert_eq!(fs.transport.kind(), "stdio");

        let search = &config.mcp_servers["search"];
        assert_eq!(search.timeout, 5000);
        assert_eq!(search.connection_mode, ConnectionMode::Strict);
        assert!(matches!(
            &search.transport,
            TransportConfig::StreamableHttp { headers, .. }
            if headers.get("Authorization").map(String::as_str) == Some("Bearer secret")
        ));

        let enabled = config.enabled_servers();
        assert_eq!(enabled.len(), 2);
        assert!(!enabled.contains_key("legacy"));
    }

    #[test]
    fn retry_settings_convert_to_validated_config() {
        let config = AggregatorConfig::from_toml_str(SAMPLE).expect("sample should parse");
        let retry = config
            .retry
            .expect("retry section present")
            .to_retry_config()
            .expect("retry settings are valid");

        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.base_delay, Duration::from_millis(250));
        assert_eq!(retry.max_delay, Duration::from_millis(2000));
        assert!(matches!(retry.strategy, BackoffStrategy::Linear));
    }

    #[test]
    fn debug_output_redacts_header_values() {
        let config = AggregatorConfig::from_toml_str(SAMPLE).expect("sample should parse");
        let rendered = format!("{:?}", config.mcp_servers["search"]);

        assert!(rendered.contains("Authorization"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn rejects_empty_command() {
        let raw = r#"
[mcpServers.broken]
type = "stdio"
command = "  "
"#;
        let err = AggregatorConfig::from_toml_str(raw).expect_err("empty command should fail");
        assert!(matches!(err, MusterError::Configuration(message) if message.contains("broken")));
    }

    #[test]
    fn rejects_unknown_transport_type() {
        let raw = r#"
[mcpServers.odd]
type = "carrier-pigeon"
url = "coo://"
"#;
        let err = AggregatorConfig::from_toml_str(raw).expect_err("unknown type should fail");
        assert!(matches!(err, MusterError::TomlParse(_)));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = AggregatorConfig::default();
        let env = HashMap::from([
            ("MUSTER_HOST", "0.0.0.0"),
            ("MUSTER_PORT", "9000"),
            ("MUSTER_CONFLICT_RESOLUTION", "error"),
            ("MUSTER_CONNECTION_STRATEGY", "persistent"),
        ]);

        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .expect("overrides are valid");

        assert_eq!(config.listen_address(), "0.0.0.0:9000");
        assert_eq!(config.conflict_resolution, ConflictResolution::Error);
        assert_eq!(config.connection_strategy, StrategyMode::Persistent);
    }

    #[test]
    fn env_override_with_bad_port_is_configuration_error() {
        let mut config = AggregatorConfig::default();
        let err = config
            .apply_overrides(|key| (key == "MUSTER_PORT").then(|| "eighty".to_string()))
            .expect_err("bad port should fail");

        assert!(matches!(err, MusterError::Configuration(message) if message.contains("MUSTER_PORT")));
    }

    #[test]
    fn from_file_reads_toml_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, SAMPLE).unwrap();

        let config = AggregatorConfig::from_file(&path).expect("file should load");
        assert_eq!(config.mcp_servers.len(), 3);
    }

    #[test]
    fn server_config_round_trips_through_json_with_camel_case_keys() {
        let server = ServerConfig::streamable_http("http://localhost:9000/mcp")
            .with_connection_mode(ConnectionMode::Strict);
        let value = serde_json::to_value(&server).unwrap();

        assert_eq!(value["type"], "streamable-http");
        assert_eq!(value["connectionMode"], "strict");
        assert_eq!(value["timeout"], 30000);
    }
}
