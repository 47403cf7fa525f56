use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "minepanel.toml";

pub const DEFAULT_CONFIG: &str = r#"
[server]
host = "0.0.0.0"
port = 8080
tls_port = 8443

[console]
max_entries = 500
command_timeout_ms = 5000
dispatch = "concurrent"
echo_prefix = "> "

[transport]
kind = "mock"
mock_delay_ms = 500
mock_jitter_ms = 0
remote_url = "ws://127.0.0.1:25575/console"

[reconnect]
enabled = true
initial_backoff_ms = 500
max_backoff_ms = 30000
max_attempts = 0

[game]
name = "Survival_World"
max_players = 20
restart_delay_ms = 2000
sample_interval_ms = 5000
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("console.command_timeout_ms must be greater than zero")]
    ZeroTimeout,
    #[error("reconnect.initial_backoff_ms ({initial}) exceeds reconnect.max_backoff_ms ({max})")]
    BackoffRange { initial: u64, max: u64 },
    #[error("game.max_players must be greater than zero")]
    ZeroMaxPlayers,
    #[error("game.sample_interval_ms must be greater than zero")]
    ZeroSampleInterval,
    #[error("server.tls_cert and server.tls_key must be set together")]
    PartialTls,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub game: GameConfig,
}

impl Config {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.console.command_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(ConfigError::BackoffRange {
                initial: self.reconnect.initial_backoff_ms,
                max: self.reconnect.max_backoff_ms,
            });
        }
        if self.game.max_players == 0 {
            return Err(ConfigError::ZeroMaxPlayers);
        }
        if self.game.sample_interval_ms == 0 {
            return Err(ConfigError::ZeroSampleInterval);
        }
        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }
        Ok(())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_tls_port() -> u16 {
    8443
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_tls_port")]
    pub tls_port: u16,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls_port: default_tls_port(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// How the dispatcher orders command resolutions.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPolicy {
    /// Every command resolves on its own; responses may interleave.
    #[default]
    Concurrent,
    /// Commands are delivered one at a time in submission order.
    Serial,
}

fn default_max_entries() -> usize {
    500
}

fn default_command_timeout_ms() -> u64 {
    5000
}

fn default_echo_prefix() -> String {
    "> ".to_string()
}

#[derive(Deserialize, Clone, Debug)]
pub struct ConsoleConfig {
    /// Retained entry cap, 0 keeps everything.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default)]
    pub dispatch: DispatchPolicy,
    #[serde(default = "default_echo_prefix")]
    pub echo_prefix: String,
}

impl ConsoleConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            command_timeout_ms: default_command_timeout_ms(),
            dispatch: DispatchPolicy::default(),
            echo_prefix: default_echo_prefix(),
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Mock,
    Remote,
}

fn default_mock_delay_ms() -> u64 {
    500
}

fn default_remote_url() -> String {
    "ws://127.0.0.1:25575/console".to_string()
}

#[derive(Deserialize, Clone, Debug)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    #[serde(default = "default_mock_delay_ms")]
    pub mock_delay_ms: u64,
    #[serde(default)]
    pub mock_jitter_ms: u64,
    #[serde(default = "default_remote_url")]
    pub remote_url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            mock_delay_ms: default_mock_delay_ms(),
            mock_jitter_ms: 0,
            remote_url: default_remote_url(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

#[derive(Deserialize, Clone, Debug)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// 0 retries forever.
    #[serde(default)]
    pub max_attempts: u32,
}

impl ReconnectConfig {
    /// Delay before the given (zero-based) reconnect attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: 0,
        }
    }
}

fn default_game_name() -> String {
    "Survival_World".to_string()
}

fn default_max_players() -> u32 {
    20
}

fn default_restart_delay_ms() -> u64 {
    2000
}

fn default_sample_interval_ms() -> u64 {
    5000
}

#[derive(Deserialize, Clone, Debug)]
pub struct GameConfig {
    #[serde(default = "default_game_name")]
    pub name: String,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// How often the dashboard's resource chart takes a sample.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

impl GameConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            name: default_game_name(),
            max_players: default_max_players(),
            restart_delay_ms: default_restart_delay_ms(),
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}
