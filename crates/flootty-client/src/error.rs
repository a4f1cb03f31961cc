use std::path::PathBuf;

use flootty_protocol::ProtocolError;

use crate::reactor::ReactorError;

/// Conditions that end the session. Everything else is retried or ignored.
#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    #[error("terminal {0} was deleted")]
    TermDeleted(String),
    #[error("disconnected by server: {0}")]
    Disconnected(String),
    #[error("error from server: {0}")]
    Server(String),
    #[error("no terminal named {0:?} in this workspace; use --list to see them or --create to share one")]
    NoSuchTerm(String),
    #[error(
        "this workspace has several terminals, pick one by name:\n{0}\nor use --create to share a new one"
    )]
    AmbiguousTerm(String),
    #[error("the shell exited")]
    ShellExited,
    #[error("standard input closed")]
    StdinClosed,
    #[error("terminated by signal")]
    Terminated,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Reactor(#[from] ReactorError),
    #[error("failed to {action}: {source}")]
    Io {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to {action}: {source}")]
    Sys {
        action: &'static str,
        #[source]
        source: nix::Error,
    },
    #[error("invalid CA certificate {}: {reason}", path.display())]
    Certificate { path: PathBuf, reason: String },
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

impl Fatal {
    pub(crate) fn io(action: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io { action, source }
    }

    pub(crate) fn sys(action: &'static str) -> impl FnOnce(nix::Error) -> Self {
        move |source| Self::Sys { action, source }
    }
}
