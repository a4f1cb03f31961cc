//! Single-threaded readiness loop: an fd registry polled with `poll(2)` plus a
//! timer queue for deferred work.
//!
//! The reactor does not own handlers. Each registration carries a `Copy`
//! token naming the source, and [`Reactor::poll`] hands back `(fd, token,
//! readiness)` triples for the owner to dispatch on. Timers work the same way.

use std::collections::BTreeMap;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use nix::poll::{PollFd, PollFlags, PollTimeout};

pub type TimerId = u64;

#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("poll failed: {0}")]
    Poll(#[from] nix::Error),
    #[error("fd {fd} ({token}) became {readiness:?} with no handler registered")]
    Unhandled {
        fd: RawFd,
        token: String,
        readiness: Readiness,
    },
}

/// Which readiness kinds a registration has handlers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
    pub error: bool,
}

impl Interest {
    pub const READ: Self = Self {
        read: true,
        write: false,
        error: true,
    };
    pub const ALL: Self = Self {
        read: true,
        write: true,
        error: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event<S> {
    pub fd: RawFd,
    pub source: S,
    pub readiness: Readiness,
}

#[derive(Debug, Clone, Copy)]
struct Registration<S> {
    source: S,
    interest: Interest,
    /// Write interest as last requested; `interest.write` is the capability.
    write_enabled: bool,
}

/// Deferred tokens keyed by fire time.
#[derive(Debug)]
pub struct TimerQueue<T> {
    queue: BTreeMap<Instant, Vec<(TimerId, T)>>,
    next_id: TimerId,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            queue: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn set_timeout(&mut self, at: Instant, timer: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.entry(at).or_default().push((id, timer));
        id
    }

    /// Returns whether the timer was still pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let mut emptied = None;
        let mut found = false;
        for (at, timers) in &mut self.queue {
            if let Some(pos) = timers.iter().position(|(tid, _)| *tid == id) {
                timers.remove(pos);
                found = true;
                if timers.is_empty() {
                    emptied = Some(*at);
                }
                break;
            }
        }
        if let Some(at) = emptied {
            self.queue.remove(&at);
        }
        found
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn expired(&mut self, now: Instant) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if *entry.key() > now {
                break;
            }
            due.extend(entry.remove().into_iter().map(|(_, timer)| timer));
        }
        due
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// The fd registry and timer queue driven by the client's main loop.
#[derive(Debug)]
pub struct Reactor<S, T> {
    registry: BTreeMap<RawFd, Registration<S>>,
    timers: TimerQueue<T>,
}

impl<S, T> Default for Reactor<S, T> {
    fn default() -> Self {
        Self {
            registry: BTreeMap::new(),
            timers: TimerQueue::default(),
        }
    }
}

impl<S: Copy + PartialEq + std::fmt::Debug, T> Reactor<S, T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fd`, replacing any previous registration for it.
    pub fn register(&mut self, fd: RawFd, source: S, interest: Interest) {
        tracing::debug!("register fd {fd} as {source:?} ({interest:?})");
        self.registry.insert(
            fd,
            Registration {
                source,
                interest,
                write_enabled: interest.write,
            },
        );
    }

    pub fn deregister(&mut self, fd: RawFd) -> bool {
        tracing::debug!("deregister fd {fd}");
        self.registry.remove(&fd).is_some()
    }

    /// Temporarily add or drop `fd` from the writable set.
    pub fn set_write_interest(&mut self, fd: RawFd, enabled: bool) {
        if let Some(reg) = self.registry.get_mut(&fd) {
            reg.write_enabled = enabled && reg.interest.write;
        }
    }

    #[must_use]
    pub fn is_registered(&self, fd: RawFd, source: S) -> bool {
        self.registry.get(&fd).is_some_and(|reg| reg.source == source)
    }

    #[must_use]
    pub fn registered(&self) -> usize {
        self.registry.len()
    }

    pub fn set_timeout(&mut self, delay: Duration, timer: T) -> TimerId {
        self.timers.set_timeout(Instant::now() + delay, timer)
    }

    pub fn cancel_timeout(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    pub fn expired_timers(&mut self, now: Instant) -> Vec<T> {
        self.timers.expired(now)
    }

    #[must_use]
    pub fn timers(&self) -> &TimerQueue<T> {
        &self.timers
    }

    /// Block for at most `timeout` and report ready descriptors.
    ///
    /// A readiness with no matching interest is an error. An interrupted poll
    /// reports no events.
    pub fn poll(&self, timeout: Duration) -> Result<Vec<Event<S>>, ReactorError> {
        let regs: Vec<(RawFd, Registration<S>)> =
            self.registry.iter().map(|(fd, reg)| (*fd, *reg)).collect();

        let mut fds: Vec<PollFd<'_>> = regs
            .iter()
            .map(|(fd, reg)| {
                let mut flags = PollFlags::empty();
                if reg.interest.read {
                    flags |= PollFlags::POLLIN;
                }
                if reg.write_enabled {
                    flags |= PollFlags::POLLOUT;
                }
                // SAFETY: registered descriptors stay open until deregistered,
                // and the registry is not mutated while polling.
                let fd = unsafe { BorrowedFd::borrow_raw(*fd) };
                PollFd::new(fd, flags)
            })
            .collect();

        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        match nix::poll::poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Ok(Vec::new()),
            Err(e) => return Err(ReactorError::Poll(e)),
        }

        let mut events = Vec::new();
        for (pfd, (fd, reg)) in fds.iter().zip(&regs) {
            let Some(revents) = pfd.revents() else {
                continue;
            };
            for readiness in classify(revents, reg.interest) {
                let wanted = match readiness {
                    Readiness::Readable => reg.interest.read,
                    Readiness::Writable => reg.interest.write,
                    Readiness::Error => reg.interest.error,
                };
                if !wanted {
                    return Err(ReactorError::Unhandled {
                        fd: *fd,
                        token: format!("{:?}", reg.source),
                        readiness,
                    });
                }
                events.push(Event {
                    fd: *fd,
                    source: reg.source,
                    readiness,
                });
            }
        }
        Ok(events)
    }
}

/// Map `revents` to dispatchable readiness kinds.
///
/// Errors shadow everything else. A hang-up goes to the error handler when
/// there is one, otherwise to the read handler, which will observe EOF.
fn classify(revents: PollFlags, interest: Interest) -> Vec<Readiness> {
    if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
        return vec![Readiness::Error];
    }
    let mut out = Vec::with_capacity(2);
    if revents.contains(PollFlags::POLLHUP) && !revents.contains(PollFlags::POLLIN) {
        if interest.error || !interest.read {
            return vec![Readiness::Error];
        }
        out.push(Readiness::Readable);
    } else if revents.contains(PollFlags::POLLIN) {
        out.push(Readiness::Readable);
    }
    if revents.contains(PollFlags::POLLOUT) {
        out.push(Readiness::Writable);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::os::fd::AsRawFd as _;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Src {
        A,
        B,
    }

    fn pipe() -> (std::fs::File, std::fs::File) {
        let (r, w) = nix::unistd::pipe().unwrap();
        (std::fs::File::from(r), std::fs::File::from(w))
    }

    #[test]
    fn test_readable_pipe() {
        let (r, mut w) = pipe();
        let mut reactor: Reactor<Src, ()> = Reactor::new();
        reactor.register(r.as_raw_fd(), Src::A, Interest::READ);

        assert!(reactor.poll(Duration::from_millis(10)).unwrap().is_empty());

        w.write_all(b"x").unwrap();
        let events = reactor.poll(Duration::from_millis(100)).unwrap();
        assert_eq!(
            events,
            vec![Event {
                fd: r.as_raw_fd(),
                source: Src::A,
                readiness: Readiness::Readable
            }]
        );
    }

    #[test]
    fn test_write_interest_toggle() {
        let (_r, w) = pipe();
        let mut reactor: Reactor<Src, ()> = Reactor::new();
        reactor.register(w.as_raw_fd(), Src::B, Interest::ALL);

        let events = reactor.poll(Duration::from_millis(10)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].readiness, Readiness::Writable);

        reactor.set_write_interest(w.as_raw_fd(), false);
        assert!(reactor.poll(Duration::from_millis(10)).unwrap().is_empty());

        reactor.set_write_interest(w.as_raw_fd(), true);
        assert_eq!(reactor.poll(Duration::from_millis(10)).unwrap().len(), 1);
    }

    #[test]
    fn test_hangup_without_error_handler_reads_eof() {
        let (r, w) = pipe();
        let mut reactor: Reactor<Src, ()> = Reactor::new();
        reactor.register(
            r.as_raw_fd(),
            Src::A,
            Interest {
                read: true,
                write: false,
                error: false,
            },
        );
        drop(w);
        let events = reactor.poll(Duration::from_millis(100)).unwrap();
        assert_eq!(events[0].readiness, Readiness::Readable);
    }

    #[test]
    fn test_hangup_with_error_handler() {
        let (r, w) = pipe();
        let mut reactor: Reactor<Src, ()> = Reactor::new();
        reactor.register(r.as_raw_fd(), Src::A, Interest::READ);
        drop(w);
        let events = reactor.poll(Duration::from_millis(100)).unwrap();
        assert_eq!(events[0].readiness, Readiness::Error);
    }

    #[test]
    fn test_unhandled_error_is_fatal() {
        let (r, w) = pipe();
        let mut reactor: Reactor<Src, ()> = Reactor::new();
        reactor.register(
            w.as_raw_fd(),
            Src::B,
            Interest {
                read: true,
                write: false,
                error: false,
            },
        );
        drop(r);
        let err = reactor.poll(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(
            err,
            ReactorError::Unhandled {
                readiness: Readiness::Error,
                ..
            }
        ));
    }

    #[test]
    fn test_deregistered_mid_iteration() {
        let (r1, mut w1) = pipe();
        let (r2, mut w2) = pipe();
        let mut reactor: Reactor<Src, ()> = Reactor::new();
        reactor.register(r1.as_raw_fd(), Src::A, Interest::READ);
        reactor.register(r2.as_raw_fd(), Src::B, Interest::READ);
        w1.write_all(b"1").unwrap();
        w2.write_all(b"2").unwrap();

        let events = reactor.poll(Duration::from_millis(100)).unwrap();
        assert_eq!(events.len(), 2);

        let mut dispatched = Vec::new();
        for event in events {
            if !reactor.is_registered(event.fd, event.source) {
                continue;
            }
            dispatched.push(event.source);
            // The first handler drops every registration, including its own.
            reactor.deregister(r1.as_raw_fd());
            reactor.deregister(r2.as_raw_fd());
        }
        assert_eq!(dispatched.len(), 1);
        assert_eq!(reactor.registered(), 0);
    }

    #[test]
    fn test_timers_fire_in_order() {
        let mut timers = TimerQueue::default();
        let now = Instant::now();
        timers.set_timeout(now + Duration::from_millis(30), "late");
        timers.set_timeout(now + Duration::from_millis(10), "early");
        timers.set_timeout(now + Duration::from_millis(10), "early-too");

        assert!(timers.expired(now).is_empty());
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(10)));
        assert_eq!(
            timers.expired(now + Duration::from_millis(10)),
            vec!["early", "early-too"]
        );
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.expired(now + Duration::from_secs(1)), vec!["late"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel_timer() {
        let mut timers = TimerQueue::default();
        let now = Instant::now();
        let id = timers.set_timeout(now, 1);
        timers.set_timeout(now, 2);
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert_eq!(timers.expired(now), vec![2]);

        let lone = timers.set_timeout(now, 3);
        assert!(timers.cancel(lone));
        assert!(timers.is_empty());
    }
}
