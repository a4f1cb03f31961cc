//! The server connection and its reconnect loop.
//!
//! A [`Link`] never gives up on its own: every I/O failure tears the
//! connection down and schedules another attempt on the reactor, spaced out by
//! [`Backoff`]. Only protocol violations escape as errors.

use std::io::{Read as _, Write as _};
use std::net::{TcpStream, ToSocketAddrs as _};
use std::os::fd::{AsRawFd as _, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flootty_protocol::{Auth, ClientMessage, FrameCodec, ProtocolError, ServerEvent};
use rustls::pki_types::pem::PemObject as _;
use rustls::pki_types::{CertificateDer, ServerName};

use crate::outbox::Outbox;
use crate::reactor::{Interest, TimerId};
use crate::{Backoff, EventLoop, Fatal, Settings, Source, Wake};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Handshaking,
    Authenticating,
    Connected,
}

/// Outcome of one read or write on the socket.
#[derive(Debug)]
pub enum Io {
    Data(usize),
    WouldBlock,
    Closed,
    Failed(std::io::Error),
}

impl From<std::io::Result<usize>> for Io {
    fn from(result: std::io::Result<usize>) -> Self {
        match result {
            Ok(0) => Self::Closed,
            Ok(n) => Self::Data(n),
            Err(e) => match e.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Self::WouldBlock,
                std::io::ErrorKind::UnexpectedEof => Self::Closed,
                _ => Self::Failed(e),
            },
        }
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(sock) => f.debug_tuple("Plain").field(sock).finish(),
            Self::Tls(tls) => f.debug_tuple("Tls").field(&tls.sock).finish(),
        }
    }
}

impl Transport {
    fn fd(&self) -> RawFd {
        match self {
            Self::Plain(sock) => sock.as_raw_fd(),
            Self::Tls(tls) => tls.sock.as_raw_fd(),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Io {
        match self {
            Self::Plain(sock) => sock.read(buf).into(),
            Self::Tls(tls) => tls.read(buf).into(),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Io {
        match self {
            Self::Plain(sock) => sock.write(buf).into(),
            Self::Tls(tls) => tls.write(buf).into(),
        }
    }

    /// Push TLS records already produced by rustls onto the socket.
    fn flush(&mut self) -> Io {
        let Self::Tls(tls) = self else {
            return Io::Data(0);
        };
        let mut total = 0;
        while tls.conn.wants_write() {
            match Io::from(tls.conn.write_tls(&mut tls.sock)) {
                Io::Data(n) => total += n,
                Io::WouldBlock => break,
                other => return other,
            }
        }
        Io::Data(total)
    }

    fn wants_write(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            Self::Tls(tls) => tls.conn.wants_write(),
        }
    }

    fn close(self) {
        match self {
            Self::Plain(sock) => {
                let _ = sock.shutdown(std::net::Shutdown::Both);
            }
            Self::Tls(mut tls) => {
                tls.conn.send_close_notify();
                let _ = tls.conn.write_tls(&mut tls.sock);
                let _ = tls.sock.shutdown(std::net::Shutdown::Both);
            }
        }
    }
}

/// Client TLS settings trusting `ca_cert` if given, else the web PKI roots.
pub fn tls_config(ca_cert: Option<&Path>) -> Result<Arc<rustls::ClientConfig>, Fatal> {
    let mut roots = rustls::RootCertStore::empty();
    match ca_cert {
        Some(path) => {
            let invalid = |reason: String| Fatal::Certificate {
                path: path.to_path_buf(),
                reason,
            };
            let certs = CertificateDer::pem_file_iter(path).map_err(|e| invalid(e.to_string()))?;
            for cert in certs {
                roots.add(cert.map_err(|e| invalid(e.to_string()))?)?;
            }
            if roots.is_empty() {
                return Err(invalid("no certificates found".to_string()));
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// The connection to the workspace server.
#[derive(Debug)]
pub struct Link {
    host: String,
    port: u16,
    tls: Option<Arc<rustls::ClientConfig>>,
    auth: Auth,
    connect_timeout: Duration,
    poll_interval: Duration,
    net_timeout: Duration,

    state: LinkState,
    transport: Option<Transport>,
    authenticated: bool,
    empty_reads: u32,
    backoff: Backoff,
    reconnect: Option<TimerId>,
    outbox: Outbox,
    codec: FrameCodec,
}

impl Link {
    pub fn new(settings: &Settings) -> Result<Self, Fatal> {
        let workspace = &settings.workspace;
        let tls = if workspace.secure {
            Some(tls_config(settings.ca_cert.as_deref())?)
        } else {
            None
        };
        Ok(Self {
            host: workspace.host.clone(),
            port: workspace.port,
            tls,
            auth: Auth::new(
                &settings.username,
                &settings.secret,
                &workspace.name,
                &workspace.owner,
            ),
            connect_timeout: settings.connect_timeout,
            poll_interval: settings.poll_interval,
            net_timeout: settings.net_timeout,
            state: LinkState::Disconnected,
            transport: None,
            authenticated: false,
            empty_reads: 0,
            backoff: Backoff::from_config(&settings.reconnect),
            reconnect: None,
            outbox: Outbox::new(settings.backlog_bytes),
            codec: FrameCodec::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    #[must_use]
    pub fn reconnect_scheduled(&self) -> bool {
        self.reconnect.is_some()
    }

    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    #[must_use]
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    #[must_use]
    pub fn fd(&self) -> Option<RawFd> {
        self.transport.as_ref().map(Transport::fd)
    }

    /// Open a new connection and queue `auth` ahead of everything else.
    ///
    /// Failure is not an error: it schedules the next attempt.
    pub fn connect(&mut self, reactor: &mut EventLoop) {
        if let Some(timer) = self.reconnect.take() {
            reactor.cancel_timeout(timer);
        }
        if let Some(old) = self.transport.take() {
            reactor.deregister(old.fd());
            old.close();
        }

        self.state = LinkState::Connecting;
        tracing::info!("connecting to {}:{}", self.host, self.port);
        match self.open() {
            Ok(transport) => {
                reactor.register(transport.fd(), Source::Socket, Interest::ALL);
                self.transport = Some(transport);
                self.state = LinkState::Authenticating;
                self.authenticated = false;
                self.empty_reads = 0;
                self.codec.reset();
                self.outbox.requeue_unsent();
                self.outbox.push_auth(self.auth.clone());
                tracing::info!("connected to {}:{}, authenticating", self.host, self.port);
            }
            Err(e) => self.fail(reactor, &format!("error connecting to {}:{}: {e}", self.host, self.port)),
        }
    }

    fn open(&mut self) -> std::io::Result<Transport> {
        let addrs = (self.host.as_str(), self.port).to_socket_addrs()?;
        let mut last_err = None;
        let mut sock = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(s) => {
                    sock = Some(s);
                    break;
                }
                Err(e) => {
                    tracing::debug!("connect to {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        let sock = match (sock, last_err) {
            (Some(sock), _) => sock,
            (None, Some(e)) => return Err(e),
            (None, None) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} did not resolve to any address", self.host),
                ));
            }
        };
        sock.set_nodelay(true)?;

        let transport = match &self.tls {
            None => Transport::Plain(sock),
            Some(config) => {
                self.state = LinkState::Handshaking;
                let name = ServerName::try_from(self.host.clone())
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
                let conn = rustls::ClientConnection::new(Arc::clone(config), name)
                    .map_err(std::io::Error::other)?;

                sock.set_read_timeout(Some(self.connect_timeout))?;
                sock.set_write_timeout(Some(self.connect_timeout))?;
                let mut tls = rustls::StreamOwned::new(conn, sock);
                while tls.conn.is_handshaking() {
                    tls.conn.complete_io(&mut tls.sock)?;
                }
                tls.sock.set_read_timeout(None)?;
                tls.sock.set_write_timeout(None)?;
                Transport::Tls(Box::new(tls))
            }
        };

        match &transport {
            Transport::Plain(sock) => sock.set_nonblocking(true)?,
            Transport::Tls(tls) => tls.sock.set_nonblocking(true)?,
        }
        Ok(transport)
    }

    /// Tear the connection down and schedule a reconnect, once.
    pub fn fail(&mut self, reactor: &mut EventLoop, reason: &str) {
        if let Some(transport) = self.transport.take() {
            reactor.deregister(transport.fd());
            transport.close();
        }
        self.state = LinkState::Disconnected;
        self.authenticated = false;
        self.empty_reads = 0;
        self.codec.reset();
        self.outbox.requeue_unsent();
        self.outbox.set_bounded(true);

        if self.reconnect.is_some() {
            tracing::debug!("reconnect already scheduled, ignoring: {reason}");
            return;
        }
        let delay = self.backoff.next_delay();
        tracing::warn!("{reason}");
        crate::term::notice(&format!(
            "{reason}; reconnecting in {:.1}s",
            delay.as_secs_f64()
        ));
        self.reconnect = Some(reactor.set_timeout(delay, Wake::Reconnect));
    }

    /// The reconnect timer fired.
    pub fn on_reconnect_timer(&mut self, reactor: &mut EventLoop) {
        self.reconnect = None;
        self.connect(reactor);
    }

    /// Drain the socket and decode whatever complete events arrived.
    pub fn on_readable(&mut self, reactor: &mut EventLoop) -> Result<Vec<ServerEvent>, ProtocolError> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(Vec::new());
        };

        let mut buf = vec![0u8; READ_CHUNK];
        let mut events = Vec::new();
        let mut received = false;
        let outcome = loop {
            match transport.read(&mut buf) {
                Io::Data(n) => {
                    received = true;
                    events.extend(self.codec.feed::<ServerEvent>(&buf[..n])?);
                }
                other => break other,
            }
        };

        if received {
            self.empty_reads = 0;
        }
        match outcome {
            Io::Closed if !received => self.on_empty_read(reactor),
            Io::Failed(e) => self.fail(reactor, &format!("error reading from server: {e}")),
            _ => {}
        }
        if !events.is_empty() {
            tracing::debug!("received {} events", events.len());
        }
        Ok(events)
    }

    fn on_empty_read(&mut self, reactor: &mut EventLoop) {
        self.empty_reads += 1;
        if self.poll_interval * self.empty_reads > self.net_timeout {
            let reads = self.empty_reads;
            self.fail(reactor, &format!("no data from server after {reads} reads"));
        }
    }

    /// Write as much queued data as the socket takes.
    pub fn on_writable(&mut self, reactor: &mut EventLoop) -> Result<(), ProtocolError> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };

        let failure = loop {
            if let Io::Failed(e) = transport.flush() {
                break Some(e.to_string());
            }
            if transport.wants_write() {
                break None;
            }
            self.outbox.fill(self.authenticated)?;
            if self.outbox.pending().is_empty() {
                break None;
            }
            match transport.write(self.outbox.pending()) {
                Io::Data(n) => self.outbox.advance(n),
                Io::WouldBlock => break None,
                Io::Closed => break Some("connection closed".to_string()),
                Io::Failed(e) => break Some(e.to_string()),
            }
        };

        if let Some(reason) = failure {
            self.fail(reactor, &format!("error writing to server: {reason}"));
        }
        Ok(())
    }

    pub fn on_error(&mut self, reactor: &mut EventLoop) {
        self.fail(reactor, "connection error");
    }

    /// Whether the socket should be polled for writability.
    #[must_use]
    pub fn wants_write(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|t| t.wants_write() || self.outbox.wants_write(self.authenticated))
    }

    pub fn send(&mut self, message: ClientMessage) {
        tracing::debug!("queue {}", message.name());
        self.outbox.push(message);
    }

    pub fn send_all(&mut self, messages: impl IntoIterator<Item = ClientMessage>) {
        for message in messages {
            self.send(message);
        }
    }

    /// The server accepted `auth`: release the queue, lift the backlog cap
    /// and reset the backoff.
    pub fn mark_authenticated(&mut self) {
        if !self.authenticated {
            tracing::info!("authenticated with {}", self.host);
        }
        self.authenticated = true;
        self.outbox.set_bounded(false);
        self.state = LinkState::Connected;
        self.backoff.reset();
    }
}
