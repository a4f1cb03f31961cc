//! Configuration for flootty terminal sharing.

mod floorc;
mod workspace;

pub use floorc::Floorc;
pub use workspace::{DEFAULT_HOST, PLAIN_PORT, TLS_PORT, Workspace, find_floo_file};

/// Main configuration structure, read from `config.toml`.
#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Shell to spawn when hosting.
    /// Falls back to $SHELL, then "/bin/sh".
    pub shell: Option<String>,

    /// Timing configuration.
    pub timing: TimingConfig,

    /// Reconnect backoff configuration.
    pub reconnect: ReconnectConfig,

    /// Limits on output queued while disconnected.
    pub output: OutputConfig,

    /// TLS configuration.
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Upper bound on how long the event loop blocks in poll.
    pub poll_interval_ms: u64,
    /// Consecutive empty reads spanning longer than this mean the peer is gone.
    pub net_timeout_ms: u64,
    /// TCP connect and TLS handshake timeout.
    pub connect_timeout_ms: u64,
    /// Minimum spacing of "someone is typing" notices while hosting.
    pub typing_notice_ms: u64,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Budget for `term_stdout` payloads kept while disconnected.
    pub backlog_bytes: usize,
}

#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM bundle to pin the server certificate chain to.
    /// The bundled web PKI roots are used when unset.
    pub ca_cert: Option<std::path::PathBuf>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            net_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            typing_notice_ms: 2_000,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 10_000,
            multiplier: 1.5,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            backlog_bytes: 64 * 1024,
        }
    }
}

/// Returns the config file path: ~/.config/flootty/config.toml
#[must_use]
pub fn config_path() -> std::path::PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("~/.config"))
        .join("flootty")
        .join("config.toml")
}

/// Load configuration from default path, falling back to defaults if not found.
pub fn load() -> eyre::Result<Config> {
    load_from(&config_path())
}

/// Load configuration from `path`, falling back to defaults if it does not exist.
pub fn load_from(path: &std::path::Path) -> eyre::Result<Config> {
    use eyre::WrapErr as _;

    if path.exists() {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).wrap_err_with(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

/// Get the effective shell command.
#[must_use]
pub fn get_shell(config: &Config) -> String {
    config
        .shell
        .clone()
        .or_else(|| std::env::var("SHELL").ok())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}
