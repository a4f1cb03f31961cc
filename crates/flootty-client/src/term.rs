//! The local terminal: raw mode, window size, signals and status lines.

use std::io::{IsTerminal as _, Read as _, Write as _};
use std::os::fd::{AsFd as _, AsRawFd as _, BorrowedFd, RawFd};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use flootty_protocol::TermSize;
use nix::sys::termios;

use crate::Fatal;

/// Attributes of stdin before raw mode, restored on every exit path.
static SAVED_TERMIOS: OnceLock<nix::libc::termios> = OnceLock::new();
static RESIZED: AtomicBool = AtomicBool::new(false);
static TERMINATED: AtomicBool = AtomicBool::new(false);

fn stdin_fd() -> BorrowedFd<'static> {
    // SAFETY: fd 0 stays open for the life of the process.
    unsafe { BorrowedFd::borrow_raw(nix::libc::STDIN_FILENO) }
}

fn setup_terminal(fd: BorrowedFd<'_>) -> nix::Result<termios::Termios> {
    let orig = termios::tcgetattr(fd)?;
    let mut raw = orig.clone();
    termios::cfmakeraw(&mut raw);
    termios::tcsetattr(fd, termios::SetArg::TCSANOW, &raw)?;
    Ok(orig)
}

/// Put stdin into raw mode. Returns false when stdin is not a terminal.
pub fn enter_raw_mode() -> nix::Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(false);
    }
    let orig = setup_terminal(stdin_fd())?;
    SAVED_TERMIOS.get_or_init(|| orig.into());
    Ok(true)
}

/// Restore the attributes saved by [`enter_raw_mode`], if any.
pub fn restore() {
    if let Some(saved) = SAVED_TERMIOS.get() {
        let orig = termios::Termios::from(*saved);
        let _ = termios::tcsetattr(stdin_fd(), termios::SetArg::TCSANOW, &orig);
    }
}

/// Restore the terminal before a panic message is printed.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        restore();
        previous(info);
    }));
}

/// Reduce SIGWINCH, SIGTERM and SIGHUP to flags polled by the event loop.
pub fn install_signal_handlers() -> nix::Result<()> {
    use nix::sys::signal::{SigHandler, Signal, signal};

    extern "C" fn on_resize(_: nix::libc::c_int) {
        RESIZED.store(true, Ordering::Relaxed);
    }
    extern "C" fn on_terminate(_: nix::libc::c_int) {
        TERMINATED.store(true, Ordering::Relaxed);
    }

    unsafe {
        signal(Signal::SIGWINCH, SigHandler::Handler(on_resize))?;
        signal(Signal::SIGTERM, SigHandler::Handler(on_terminate))?;
        signal(Signal::SIGHUP, SigHandler::Handler(on_terminate))?;
    }
    Ok(())
}

/// Whether the window changed size since the last call.
pub fn take_resized() -> bool {
    RESIZED.swap(false, Ordering::Relaxed)
}

#[must_use]
pub fn terminated() -> bool {
    TERMINATED.load(Ordering::Relaxed)
}

/// Size of the terminal on stdin, if there is one.
#[must_use]
pub fn window_size() -> Option<TermSize> {
    let mut ws: nix::pty::Winsize = unsafe { std::mem::zeroed() };
    let ret = unsafe { nix::libc::ioctl(nix::libc::STDIN_FILENO, nix::libc::TIOCGWINSZ, &mut ws) };
    if ret != 0 || ws.ws_row == 0 || ws.ws_col == 0 {
        return None;
    }
    Some(TermSize::new(ws.ws_row, ws.ws_col))
}

pub fn set_window_size(fd: RawFd, size: TermSize) -> nix::Result<()> {
    let ws = nix::pty::Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { nix::libc::ioctl(fd, nix::libc::TIOCSWINSZ, &ws) };
    nix::errno::Errno::result(ret).map(drop)
}

/// Print a status line that renders correctly in raw mode.
pub fn notice(msg: &str) {
    tracing::info!("{msg}");
    eprint!("\x1b[2m[flootty: {msg}]\x1b[0m\r\n");
}

/// Ask a yes/no question on the cooked terminal. Anything but yes is no.
#[must_use]
pub fn ask(question: &str) -> bool {
    print!("{question} [y/N] ");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Where a session reads keystrokes from and writes terminal output to.
pub struct LocalTerminal {
    input: Option<std::fs::File>,
    output: Box<dyn std::io::Write>,
    interactive: bool,
    /// Reported instead of the window size when set.
    fixed_size: Option<TermSize>,
}

impl std::fmt::Debug for LocalTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTerminal")
            .field("input", &self.input)
            .field("interactive", &self.interactive)
            .field("fixed_size", &self.fixed_size)
            .finish_non_exhaustive()
    }
}

impl LocalTerminal {
    /// The process's own stdin and stdout, switched to raw mode on activation.
    pub fn stdio() -> Result<Self, Fatal> {
        let input = std::io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map_err(Fatal::io("duplicate stdin"))?;
        Ok(Self {
            input: Some(input.into()),
            output: Box::new(std::io::stdout()),
            interactive: true,
            fixed_size: None,
        })
    }

    /// Arbitrary endpoints. Never touches terminal attributes.
    #[must_use]
    pub fn new(input: Option<std::fs::File>, output: Box<dyn std::io::Write>) -> Self {
        Self {
            input,
            output,
            interactive: false,
            fixed_size: None,
        }
    }

    /// Report `size` as the window size, e.g. for a detached endpoint.
    #[must_use]
    pub fn with_size(mut self, size: TermSize) -> Self {
        self.fixed_size = Some(size);
        self
    }

    pub fn set_size(&mut self, size: TermSize) {
        self.fixed_size = Some(size);
    }

    pub fn activate(&self) -> Result<(), Fatal> {
        if self.interactive {
            enter_raw_mode().map_err(Fatal::sys("put the terminal in raw mode"))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn input_fd(&self) -> Option<RawFd> {
        self.input.as_ref().map(|f| f.as_raw_fd())
    }

    pub fn read_input(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.input.as_mut() {
            Some(input) => input.read(buf),
            None => Ok(0),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), Fatal> {
        self.output
            .write_all(bytes)
            .and_then(|()| self.output.flush())
            .map_err(Fatal::io("write to the terminal"))
    }

    /// Current window size; `None` for a non-interactive endpoint without
    /// a fixed size.
    #[must_use]
    pub fn size(&self) -> Option<TermSize> {
        match self.fixed_size {
            Some(size) => Some(size),
            None if self.interactive => window_size(),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::os::fd::AsRawFd as _;

    use super::*;

    #[test]
    fn test_set_window_size_on_pty() {
        let pty = nix::pty::openpty(None, None).unwrap();
        set_window_size(pty.master.as_raw_fd(), TermSize::new(40, 120)).unwrap();

        let mut ws: nix::pty::Winsize = unsafe { std::mem::zeroed() };
        let ret =
            unsafe { nix::libc::ioctl(pty.slave.as_raw_fd(), nix::libc::TIOCGWINSZ, &mut ws) };
        assert_eq!(ret, 0);
        assert_eq!((ws.ws_row, ws.ws_col), (40, 120));
    }

    #[test]
    fn test_detached_terminal() {
        let (r, w) = nix::unistd::pipe().unwrap();
        let mut writer = std::fs::File::from(w);
        writer.write_all(b"ls\r").unwrap();

        let mut local = LocalTerminal::new(Some(r.into()), Box::new(std::io::sink()));
        local.activate().unwrap();
        assert!(local.size().is_none());
        assert!(local.input_fd().is_some());

        let mut buf = [0u8; 16];
        let n = local.read_input(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ls\r");
        local.write(b"output").unwrap();
    }

    #[test]
    fn test_fixed_size_overrides_window() {
        let mut local = LocalTerminal::new(None, Box::new(std::io::sink()))
            .with_size(TermSize::new(30, 100));
        assert_eq!(local.size(), Some(TermSize::new(30, 100)));
        local.set_size(TermSize::new(50, 132));
        assert_eq!(local.size(), Some(TermSize::new(50, 132)));
    }
}
