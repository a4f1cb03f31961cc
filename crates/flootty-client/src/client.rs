use std::time::Instant;

use flootty_protocol::RoomInfo;

use crate::link::Link;
use crate::reactor::{Event, Readiness};
use crate::session::TermSession;
use crate::term::{self, LocalTerminal};
use crate::{EventLoop, Fatal, Settings, Source, Wake};

/// Whether the event loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// One client: a connection to a workspace and at most one shared terminal.
pub struct Flootty<'a> {
    pub(crate) settings: &'a Settings,
    pub(crate) reactor: EventLoop,
    pub(crate) link: Link,
    pub(crate) room: RoomInfo,
    pub(crate) session: Option<TermSession>,
    /// Handed to the session once one starts.
    pub(crate) local: Option<LocalTerminal>,
    /// Name of the terminal we asked the server to create.
    pub(crate) pending_create: Option<String>,
    pub(crate) confirm: Box<dyn FnMut(&str) -> bool>,
}

impl<'a> Flootty<'a> {
    pub fn new(settings: &'a Settings, local: LocalTerminal) -> Result<Self, Fatal> {
        Ok(Self {
            settings,
            reactor: EventLoop::new(),
            link: Link::new(settings)?,
            room: RoomInfo::default(),
            session: None,
            local: Some(local),
            pending_create: None,
            confirm: Box::new(term::ask),
        })
    }

    /// Replace the interactive yes/no prompt.
    #[must_use]
    pub fn with_confirm(mut self, confirm: impl FnMut(&str) -> bool + 'static) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    #[must_use]
    pub fn link(&self) -> &Link {
        &self.link
    }

    #[must_use]
    pub fn session(&self) -> Option<&TermSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn room(&self) -> &RoomInfo {
        &self.room
    }

    pub fn connect(&mut self) {
        self.link.connect(&mut self.reactor);
    }

    /// Connect and loop until the session ends.
    pub fn run(&mut self) -> Result<(), Fatal> {
        self.connect();
        loop {
            if self.turn()? == Flow::Exit {
                return Ok(());
            }
        }
    }

    /// One loop iteration: signals, due timers, then one bounded poll.
    pub fn turn(&mut self) -> Result<Flow, Fatal> {
        if term::terminated() {
            return Err(Fatal::Terminated);
        }
        if term::take_resized() && self.settings.resize {
            if let Some(session) = self.session.as_mut() {
                let messages = session.apply_local_size()?;
                self.link.send_all(messages);
            }
        }

        for wake in self.reactor.expired_timers(Instant::now()) {
            match wake {
                Wake::Reconnect => self.link.on_reconnect_timer(&mut self.reactor),
            }
        }

        if let Some(fd) = self.link.fd() {
            self.reactor.set_write_interest(fd, self.link.wants_write());
        }
        if let Some(session) = self.session.as_ref() {
            if let Some(fd) = session.master_fd() {
                self.reactor.set_write_interest(fd, session.wants_master_write());
            }
        }

        let events = self.reactor.poll(self.settings.poll_interval)?;
        for event in events {
            if !self.reactor.is_registered(event.fd, event.source) {
                continue;
            }
            if self.dispatch(event)? == Flow::Exit {
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    fn dispatch(&mut self, event: Event<Source>) -> Result<Flow, Fatal> {
        match (event.source, event.readiness) {
            (Source::Socket, Readiness::Readable) => {
                for server_event in self.link.on_readable(&mut self.reactor)? {
                    if self.handle_event(server_event)? == Flow::Exit {
                        return Ok(Flow::Exit);
                    }
                }
            }
            (Source::Socket, Readiness::Writable) => self.link.on_writable(&mut self.reactor)?,
            (Source::Socket, Readiness::Error) => self.link.on_error(&mut self.reactor),

            (Source::PtyMaster, Readiness::Readable) => {
                if let Some(session) = self.session.as_mut() {
                    let messages = session.on_master_readable()?;
                    self.link.send_all(messages);
                }
            }
            (Source::PtyMaster, Readiness::Writable) => {
                if let Some(session) = self.session.as_mut() {
                    session.on_master_writable()?;
                }
            }
            (Source::PtyMaster, Readiness::Error) => return Err(Fatal::ShellExited),

            (Source::Stdin, Readiness::Readable) => {
                if let Some(session) = self.session.as_mut() {
                    let messages = session.on_stdin_readable(Instant::now())?;
                    self.link.send_all(messages);
                }
            }
            (Source::Stdin, Readiness::Error) => return Err(Fatal::StdinClosed),

            // Stdin is never registered for writability.
            (Source::Stdin, Readiness::Writable) => {}
        }
        Ok(Flow::Continue)
    }
}
