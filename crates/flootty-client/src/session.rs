//! The shared terminal: a hosted shell on a PTY, or a view of someone else's.

use std::ffi::{CStr, CString};
use std::io::{Read as _, Write as _};
use std::os::fd::{AsRawFd as _, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use bytes::{Buf as _, BytesMut};
use flootty_protocol::{ClientMessage, SafeTermNotice, TermId, TermSize, UserId};
use nix::unistd::Pid;

use crate::reactor::Interest;
use crate::term::{self, LocalTerminal};
use crate::{EventLoop, Fatal, Settings, Source};

const READ_CHUNK: usize = 16 * 1024;
const BELL: &[u8] = b"\x07";
/// Sent in place of the host's keystrokes so others see activity, not content.
pub const PLACEHOLDER_INPUT: &[u8] = b" ";
/// Input held for a shell that is not reading. Anything beyond is dropped.
pub const MAX_PENDING_INPUT: usize = 1024 * 1024;

/// Spaces notices of local typing at least `interval` apart.
#[derive(Debug, Clone)]
pub struct TypingNotice {
    interval: Duration,
    last: Option<Instant>,
}

impl TypingNotice {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a notice should go out for typing at `now`.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Remove every `\n` and `\r`. Reports whether anything was removed.
#[must_use]
pub fn strip_enter(data: &[u8]) -> (Vec<u8>, bool) {
    let kept: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !matches!(b, b'\n' | b'\r'))
        .collect();
    let stripped = kept.len() != data.len();
    (kept, stripped)
}

/// Command typed into a fresh shell to tag its prompt with the terminal name.
/// Only for shells that understand `export PS1=...`.
#[must_use]
pub fn prompt_line(shell: &str, term_name: &str) -> Option<String> {
    let program = std::path::Path::new(shell).file_name()?.to_str()?;
    if !matches!(program, "sh" | "bash" | "zsh" | "dash" | "ksh") {
        return None;
    }
    let label: String = term_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    Some(format!(" export PS1=\"[ftty:{label}] $PS1\" && clear\n"))
}

/// A shell running on the slave side of a PTY we hold the master of.
#[derive(Debug)]
struct Shell {
    master: std::fs::File,
    child: Pid,
    /// Bytes the master has not accepted yet, flushed on write readiness.
    input: BytesMut,
}

impl Shell {
    /// Queue `bytes` for the shell and write what the master takes now.
    fn send_input(&mut self, bytes: &[u8]) -> Result<(), Fatal> {
        let room = MAX_PENDING_INPUT.saturating_sub(self.input.len());
        if bytes.len() > room {
            tracing::warn!(
                "shell is not reading, dropped {} bytes of input",
                bytes.len() - room
            );
        }
        self.input.extend_from_slice(&bytes[..bytes.len().min(room)]);
        self.flush_input()
    }

    /// Write pending input until the master would block.
    fn flush_input(&mut self) -> Result<(), Fatal> {
        while !self.input.is_empty() {
            match self.master.write(&self.input) {
                Ok(0) => return Err(Fatal::ShellExited),
                Ok(n) => self.input.advance(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!("pty write failed: {e}");
                    return Err(Fatal::ShellExited);
                }
            }
        }
        Ok(())
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        use nix::sys::signal::{Signal, kill};
        use nix::sys::wait::{WaitPidFlag, waitpid};

        let _ = kill(self.child, Signal::SIGHUP);
        let _ = waitpid(self.child, Some(WaitPidFlag::WNOHANG));
    }
}

#[derive(Debug)]
enum Role {
    Hosting {
        shell: Shell,
        typing: TypingNotice,
        safe: bool,
    },
    Joining {
        can_write: bool,
    },
}

/// The one terminal this client shares or watches.
#[derive(Debug)]
pub struct TermSession {
    id: TermId,
    name: String,
    size: TermSize,
    role: Role,
    local: LocalTerminal,
}

impl TermSession {
    /// Spawn the shell for terminal `id` and start relaying it.
    pub fn host(
        id: TermId,
        name: &str,
        settings: &Settings,
        local: LocalTerminal,
        reactor: &mut EventLoop,
    ) -> Result<Self, Fatal> {
        let size = local.size().unwrap_or_default();
        let (master, child) = spawn_shell(&settings.shell, size)?;
        tracing::info!("hosting terminal {name} ({id}) running {} as pid {child}", settings.shell);

        reactor.register(master.as_raw_fd(), Source::PtyMaster, Interest::ALL);
        if let Some(fd) = local.input_fd() {
            reactor.register(fd, Source::Stdin, Interest::READ);
        }
        local.activate()?;

        let mut shell = Shell {
            master,
            child,
            input: BytesMut::new(),
        };
        if !settings.preserve_prompt {
            if let Some(line) = prompt_line(&settings.shell, name) {
                shell.send_input(line.as_bytes())?;
            }
        }

        Ok(Self {
            id,
            name: name.to_string(),
            size,
            role: Role::Hosting {
                shell,
                typing: TypingNotice::new(settings.typing_notice),
                safe: settings.safe,
            },
            local,
        })
    }

    /// Attach to somebody else's terminal `id`.
    pub fn join(
        id: TermId,
        name: &str,
        size: Option<TermSize>,
        can_write: bool,
        local: LocalTerminal,
        reactor: &mut EventLoop,
    ) -> Result<Self, Fatal> {
        tracing::info!("joining terminal {name} ({id}), writable: {can_write}");
        if let Some(fd) = local.input_fd().filter(|_| can_write) {
            reactor.register(fd, Source::Stdin, Interest::READ);
        }
        local.activate()?;

        Ok(Self {
            id,
            name: name.to_string(),
            size: size.unwrap_or_default(),
            role: Role::Joining { can_write },
            local,
        })
    }

    #[must_use]
    pub fn id(&self) -> TermId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn size(&self) -> TermSize {
        self.size
    }

    #[must_use]
    pub fn is_hosting(&self) -> bool {
        matches!(self.role, Role::Hosting { .. })
    }

    /// Keep hosting under the id the server assigned after a reconnect.
    pub fn adopt_id(&mut self, id: TermId) {
        tracing::info!("terminal {} is now id {id} (was {})", self.name, self.id);
        self.id = id;
    }

    #[must_use]
    pub fn master_fd(&self) -> Option<RawFd> {
        match &self.role {
            Role::Hosting { shell, .. } => Some(shell.master.as_raw_fd()),
            Role::Joining { .. } => None,
        }
    }

    #[must_use]
    pub fn input_fd(&self) -> Option<RawFd> {
        self.local.input_fd()
    }

    /// Input queued for the hosted shell that the master has not taken yet.
    #[must_use]
    pub fn pending_input(&self) -> usize {
        match &self.role {
            Role::Hosting { shell, .. } => shell.input.len(),
            Role::Joining { .. } => 0,
        }
    }

    /// Whether the master should be polled for writability.
    #[must_use]
    pub fn wants_master_write(&self) -> bool {
        self.pending_input() > 0
    }

    /// The shell made room in its input queue.
    pub fn on_master_writable(&mut self) -> Result<(), Fatal> {
        match &mut self.role {
            Role::Hosting { shell, .. } => shell.flush_input(),
            Role::Joining { .. } => Ok(()),
        }
    }

    /// Shell output: echo locally and forward to the room.
    pub fn on_master_readable(&mut self) -> Result<Vec<ClientMessage>, Fatal> {
        let Role::Hosting { shell, .. } = &mut self.role else {
            return Ok(Vec::new());
        };
        let mut buf = [0u8; READ_CHUNK];
        let n = match shell.master.read(&mut buf) {
            Ok(0) => return Err(Fatal::ShellExited),
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(Vec::new()),
            Err(e) => {
                tracing::debug!("pty read failed: {e}");
                return Err(Fatal::ShellExited);
            }
        };
        self.local.write(&buf[..n])?;
        Ok(vec![ClientMessage::term_stdout(self.id, &buf[..n])])
    }

    /// Local keystrokes. The host's go to its shell and are only announced
    /// as activity; a joiner's go to the room.
    pub fn on_stdin_readable(&mut self, now: Instant) -> Result<Vec<ClientMessage>, Fatal> {
        let mut buf = [0u8; READ_CHUNK];
        let n = match self.local.read_input(&mut buf) {
            Ok(0) => return Err(Fatal::StdinClosed),
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(Vec::new()),
            Err(source) => {
                return Err(Fatal::Io {
                    action: "read stdin",
                    source,
                });
            }
        };

        match &mut self.role {
            Role::Hosting { shell, typing, .. } => {
                shell.send_input(&buf[..n])?;
                if typing.due(now) {
                    Ok(vec![ClientMessage::term_stdin(self.id, PLACEHOLDER_INPUT)])
                } else {
                    Ok(Vec::new())
                }
            }
            Role::Joining { can_write: true } => {
                Ok(vec![ClientMessage::term_stdin(self.id, &buf[..n])])
            }
            Role::Joining { can_write: false } => Ok(Vec::new()),
        }
    }

    /// Input typed by `from` into our hosted terminal.
    pub fn on_remote_input(
        &mut self,
        data: &[u8],
        from: Option<UserId>,
    ) -> Result<Vec<ClientMessage>, Fatal> {
        let Role::Hosting { shell, safe, .. } = &mut self.role else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        let (input, stripped) = if *safe {
            strip_enter(data)
        } else {
            (data.to_vec(), false)
        };
        if stripped {
            tracing::debug!("stripped enter from {from:?} in safe mode");
            self.local.write(BELL)?;
            out.push(ClientMessage::term_stdout(self.id, BELL));
            out.push(ClientMessage::Datamsg {
                to: from.map(|user| vec![user]),
                data: SafeTermNotice::new(self.id, &self.name),
            });
        }
        if !input.is_empty() {
            shell.send_input(&input)?;
        }
        Ok(out)
    }

    /// Output of the terminal we joined.
    pub fn on_remote_output(&mut self, data: &[u8]) -> Result<(), Fatal> {
        match self.role {
            Role::Joining { .. } => self.local.write(data),
            Role::Hosting { .. } => Ok(()),
        }
    }

    /// Follow the local window. Hosting only.
    pub fn apply_local_size(&mut self) -> Result<Vec<ClientMessage>, Fatal> {
        let Role::Hosting { shell, .. } = &self.role else {
            return Ok(Vec::new());
        };
        let Some(size) = self.local.size() else {
            return Ok(Vec::new());
        };
        term::set_window_size(shell.master.as_raw_fd(), size)
            .map_err(Fatal::sys("resize the pty"))?;
        self.size = size;
        Ok(vec![self.announce_size()])
    }

    /// Someone changed the size of our terminal.
    ///
    /// A host keeps its own window size and re-announces it if the room
    /// disagrees; a joiner just records it.
    pub fn on_remote_resize(&mut self, size: Option<TermSize>) -> Result<Vec<ClientMessage>, Fatal> {
        match &self.role {
            Role::Hosting { shell, .. } => {
                let local = self.local.size().unwrap_or(self.size);
                term::set_window_size(shell.master.as_raw_fd(), local)
                    .map_err(Fatal::sys("resize the pty"))?;
                self.size = local;
                if size == Some(local) {
                    Ok(Vec::new())
                } else {
                    Ok(vec![self.announce_size()])
                }
            }
            Role::Joining { .. } => {
                if let Some(size) = size {
                    self.size = size;
                }
                Ok(Vec::new())
            }
        }
    }

    #[must_use]
    pub fn announce_size(&self) -> ClientMessage {
        ClientMessage::UpdateTerm {
            id: self.id,
            size: self.size,
        }
    }

    pub fn deregister(&self, reactor: &mut EventLoop) {
        if let Some(fd) = self.master_fd() {
            reactor.deregister(fd);
        }
        if let Some(fd) = self.input_fd() {
            reactor.deregister(fd);
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { nix::libc::fcntl(fd, nix::libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { nix::libc::fcntl(fd, nix::libc::F_SETFL, flags | nix::libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Start `shell` as a login shell on a new PTY of `size`.
fn spawn_shell(shell: &str, size: TermSize) -> Result<(std::fs::File, Pid), Fatal> {
    let invalid = |_| Fatal::Io {
        action: "spawn the shell",
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("shell path {shell:?} contains a NUL byte"),
        ),
    };
    let program = CString::new(shell).map_err(invalid)?;
    let login_name = std::path::Path::new(shell)
        .file_name()
        .map_or_else(|| shell.to_string(), |n| format!("-{}", n.to_string_lossy()));
    let argv0 = CString::new(login_name).map_err(invalid)?;

    let ws = nix::pty::Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let nix::pty::OpenptyResult { master, slave } =
        nix::pty::openpty(Some(&ws), None).map_err(Fatal::sys("open a pty"))?;

    match unsafe { nix::unistd::fork() } {
        Ok(nix::unistd::ForkResult::Child) => {
            drop(master);
            exec_on_slave(slave, &program, &argv0)
        }
        Ok(nix::unistd::ForkResult::Parent { child }) => {
            drop(slave);
            set_nonblocking(master.as_raw_fd()).map_err(Fatal::io("configure the pty"))?;
            Ok((master.into(), child))
        }
        Err(e) => Err(Fatal::sys("fork")(e)),
    }
}

/// Child side of the fork: make the slave our controlling terminal and stdio,
/// then become the shell.
fn exec_on_slave(slave: OwnedFd, program: &CStr, argv0: &CStr) -> ! {
    let _ = nix::unistd::setsid();

    let slave_raw = slave.as_raw_fd();
    unsafe {
        nix::libc::ioctl(slave_raw, nix::libc::TIOCSCTTY as _, 0);
        nix::libc::dup2(slave_raw, nix::libc::STDIN_FILENO);
        nix::libc::dup2(slave_raw, nix::libc::STDOUT_FILENO);
        nix::libc::dup2(slave_raw, nix::libc::STDERR_FILENO);
    }
    if slave_raw > 2 {
        drop(slave);
    } else {
        std::mem::forget(slave);
    }

    let _ = nix::unistd::execvp(program, &[argv0]);
    unsafe { nix::libc::_exit(127) }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Write as _;
    use std::rc::Rc;

    use flootty_protocol::decode_data;

    use super::*;
    use crate::Intent;

    fn settings(shell: &str) -> Settings {
        let workspace = flootty_config::Workspace::new("127.0.0.1", Some(1), false, "bob", "ws");
        let mut settings = Settings::new(
            "alice",
            "s3cret",
            workspace,
            Intent::Create("ftty".to_string()),
            &flootty_config::Config::default(),
        );
        settings.shell = shell.to_string();
        settings.preserve_prompt = true;
        settings
    }

    #[derive(Clone, Default)]
    struct Screen(Rc<RefCell<Vec<u8>>>);

    impl std::io::Write for Screen {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Read shell output until it contains `needle`; returns what the room saw.
    fn read_until(session: &mut TermSession, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = Vec::new();
        while !String::from_utf8_lossy(&seen).contains(needle) {
            assert!(Instant::now() < deadline, "never saw {needle:?} in {seen:?}");
            let messages = session.on_master_readable().unwrap();
            if messages.is_empty() {
                std::thread::sleep(Duration::from_millis(10));
            }
            for message in messages {
                let ClientMessage::TermStdout { id, data } = message else {
                    panic!("expected term_stdout, got {message:?}");
                };
                assert_eq!(id, 5);
                seen.extend(decode_data(&data).unwrap());
            }
        }
        String::from_utf8_lossy(&seen).into_owned()
    }

    fn pty_size(session: &TermSession) -> (u16, u16) {
        let fd = session.master_fd().unwrap();
        let mut ws: nix::pty::Winsize = unsafe { std::mem::zeroed() };
        let ret = unsafe { nix::libc::ioctl(fd, nix::libc::TIOCGWINSZ, &mut ws) };
        assert_eq!(ret, 0);
        (ws.ws_row, ws.ws_col)
    }

    #[test]
    fn test_host_stdin_reaches_shell_with_one_placeholder() {
        let (r, w) = nix::unistd::pipe().unwrap();
        let mut keyboard = std::fs::File::from(w);
        let screen = Screen::default();
        let local = LocalTerminal::new(Some(r.into()), Box::new(screen.clone()));
        let mut reactor = EventLoop::new();
        let mut session =
            TermSession::host(5, "ftty", &settings("/bin/cat"), local, &mut reactor).unwrap();

        let start = Instant::now();
        keyboard.write_all(b"hello\n").unwrap();
        let first = session.on_stdin_readable(start).unwrap();
        assert_eq!(first, vec![ClientMessage::term_stdin(5, PLACEHOLDER_INPUT)]);

        keyboard.write_all(b"again\n").unwrap();
        let second = session.on_stdin_readable(start + Duration::from_secs(1)).unwrap();
        assert!(second.is_empty());

        let output = read_until(&mut session, "again");
        assert!(output.contains("hello"));
        assert!(String::from_utf8_lossy(&screen.0.borrow()).contains("hello"));
    }

    #[test]
    fn test_host_keeps_local_size_on_remote_resize() {
        let local = LocalTerminal::new(None, Box::new(std::io::sink()))
            .with_size(TermSize::new(24, 80));
        let mut reactor = EventLoop::new();
        let mut session =
            TermSession::host(5, "ftty", &settings("/bin/cat"), local, &mut reactor).unwrap();
        assert_eq!(session.size(), TermSize::new(24, 80));
        assert_eq!(pty_size(&session), (24, 80));

        let same = session.on_remote_resize(Some(TermSize::new(24, 80))).unwrap();
        assert!(same.is_empty());

        let other = session.on_remote_resize(Some(TermSize::new(10, 10))).unwrap();
        assert_eq!(
            other,
            vec![ClientMessage::UpdateTerm {
                id: 5,
                size: TermSize::new(24, 80)
            }]
        );
        assert_eq!(pty_size(&session), (24, 80));
    }

    #[test]
    fn test_apply_local_size_resizes_pty() {
        let local = LocalTerminal::new(None, Box::new(std::io::sink()))
            .with_size(TermSize::new(24, 80));
        let mut reactor = EventLoop::new();
        let mut session =
            TermSession::host(5, "ftty", &settings("/bin/cat"), local, &mut reactor).unwrap();

        session.local.set_size(TermSize::new(40, 120));
        let messages = session.apply_local_size().unwrap();
        assert_eq!(
            messages,
            vec![ClientMessage::UpdateTerm {
                id: 5,
                size: TermSize::new(40, 120)
            }]
        );
        assert_eq!(session.size(), TermSize::new(40, 120));
        assert_eq!(pty_size(&session), (40, 120));
    }

    #[test]
    fn test_joiner_records_remote_size() {
        let local = LocalTerminal::new(None, Box::new(std::io::sink()));
        let mut reactor = EventLoop::new();
        let mut session =
            TermSession::join(5, "ftty", Some(TermSize::new(24, 80)), true, local, &mut reactor)
                .unwrap();
        let messages = session.on_remote_resize(Some(TermSize::new(50, 132))).unwrap();
        assert!(messages.is_empty());
        assert_eq!(session.size(), TermSize::new(50, 132));
        assert!(session.apply_local_size().unwrap().is_empty());
    }

    #[test]
    fn test_stalled_shell_queues_input_without_blocking() {
        let mut settings = settings("/bin/sh");
        settings.safe = false;
        let local = LocalTerminal::new(None, Box::new(std::io::sink()));
        let mut reactor = EventLoop::new();
        let mut session = TermSession::host(5, "ftty", &settings, local, &mut reactor).unwrap();

        // The shell stops reading its terminal once it prints "ready".
        session
            .on_remote_input(b"stty raw -echo; echo re''ady; exec sleep 30\n", Some(3))
            .unwrap();
        read_until(&mut session, "ready");

        let start = Instant::now();
        let out = session.on_remote_input(&[b'a'; 256 * 1024], Some(3)).unwrap();
        assert!(start.elapsed() < Duration::from_millis(500), "{:?}", start.elapsed());
        assert!(out.is_empty());
        assert!(session.wants_master_write());
        let queued = session.pending_input();
        assert!(queued > 0);

        // Still stalled: a flush takes nothing and returns at once.
        session.on_master_writable().unwrap();
        assert_eq!(session.pending_input(), queued);

        session
            .on_remote_input(&vec![b'b'; 2 * MAX_PENDING_INPUT], Some(3))
            .unwrap();
        assert_eq!(session.pending_input(), MAX_PENDING_INPUT);
    }

    #[test]
    fn test_queued_input_drains_when_shell_reads() {
        let mut settings = settings("/bin/cat");
        settings.safe = false;
        let local = LocalTerminal::new(None, Box::new(std::io::sink()));
        let mut reactor = EventLoop::new();
        let mut session = TermSession::host(5, "ftty", &settings, local, &mut reactor).unwrap();

        session.on_remote_input(b"drained\n", Some(3)).unwrap();
        session.on_master_writable().unwrap();
        assert_eq!(session.pending_input(), 0);
        assert!(!session.wants_master_write());
        read_until(&mut session, "drained");
    }

    #[test]
    fn test_strip_enter() {
        assert_eq!(strip_enter(b"ls -la\r"), (b"ls -la".to_vec(), true));
        assert_eq!(strip_enter(b"\r\n"), (Vec::new(), true));
        assert_eq!(strip_enter(b"a\nb\rc"), (b"abc".to_vec(), true));
        assert_eq!(strip_enter(b"\x1b[A\x03"), (b"\x1b[A\x03".to_vec(), false));
        assert_eq!(strip_enter(b""), (Vec::new(), false));
    }

    #[test]
    fn test_typing_notice_throttle() {
        let mut typing = TypingNotice::new(Duration::from_secs(2));
        let start = Instant::now();
        assert!(typing.due(start));
        assert!(!typing.due(start + Duration::from_millis(500)));
        assert!(!typing.due(start + Duration::from_millis(1999)));
        assert!(typing.due(start + Duration::from_secs(2)));
        assert!(!typing.due(start + Duration::from_millis(2500)));
    }

    #[test]
    fn test_placeholder_is_a_space() {
        let ClientMessage::TermStdin { data, .. } = ClientMessage::term_stdin(5, PLACEHOLDER_INPUT)
        else {
            panic!("expected term_stdin");
        };
        assert_eq!(data, "IA==");
    }

    #[test]
    fn test_prompt_line() {
        let line = prompt_line("/bin/bash", "ftty").unwrap();
        assert!(line.starts_with(' '));
        assert!(line.contains("[ftty:ftty]"));
        assert!(line.ends_with('\n'));

        assert!(prompt_line("/usr/bin/fish", "ftty").is_none());
        let sanitized = prompt_line("/bin/sh", "a\"b$(c)").unwrap();
        assert!(sanitized.contains("[ftty:abc]"));
    }
}
