//! Terminal sharing client for Floobits workspaces.
//!
//! A [`Flootty`] owns one server connection and at most one shared terminal,
//! and drives both from a single-threaded [`reactor::Reactor`] loop.

mod backoff;
mod client;
mod error;
pub mod link;
pub mod outbox;
pub mod reactor;
mod room;
pub mod session;
pub mod term;

use std::path::PathBuf;
use std::time::Duration;

pub use backoff::Backoff;
pub use client::{Flootty, Flow};
pub use error::Fatal;
pub use room::unique_term_name;

/// Name offered when hosting without an explicit one.
pub const DEFAULT_TERM_NAME: &str = "ftty";

/// What the user asked to do in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Share a new terminal under (a disambiguated form of) this name.
    Create(String),
    /// Join the named terminal, or the only one there is.
    Join(Option<String>),
    /// Print the workspace's terminals and exit.
    List,
}

/// Everything the client needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub username: String,
    pub secret: String,
    pub workspace: flootty_config::Workspace,
    pub intent: Intent,
    /// Strip Enter from remote input to a hosted terminal.
    pub safe: bool,
    /// Leave the hosted shell's prompt alone.
    pub preserve_prompt: bool,
    /// Follow local window size changes.
    pub resize: bool,
    pub shell: String,
    pub ca_cert: Option<PathBuf>,
    pub poll_interval: Duration,
    pub net_timeout: Duration,
    pub connect_timeout: Duration,
    pub typing_notice: Duration,
    pub reconnect: flootty_config::ReconnectConfig,
    pub backlog_bytes: usize,
}

impl Settings {
    /// Settings with the config file's tunables and default flags.
    #[must_use]
    pub fn new(
        username: &str,
        secret: &str,
        workspace: flootty_config::Workspace,
        intent: Intent,
        config: &flootty_config::Config,
    ) -> Self {
        Self {
            username: username.to_string(),
            secret: secret.to_string(),
            workspace,
            intent,
            safe: true,
            preserve_prompt: false,
            resize: true,
            shell: flootty_config::get_shell(config),
            ca_cert: config.tls.ca_cert.clone(),
            poll_interval: Duration::from_millis(config.timing.poll_interval_ms),
            net_timeout: Duration::from_millis(config.timing.net_timeout_ms),
            connect_timeout: Duration::from_millis(config.timing.connect_timeout_ms),
            typing_notice: Duration::from_millis(config.timing.typing_notice_ms),
            reconnect: config.reconnect.clone(),
            backlog_bytes: config.output.backlog_bytes,
        }
    }
}

/// What a registered descriptor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Socket,
    PtyMaster,
    Stdin,
}

/// Deferred work scheduled on the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Reconnect,
}

pub type EventLoop = reactor::Reactor<Source, Wake>;
