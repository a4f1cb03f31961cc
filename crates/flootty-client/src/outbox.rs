//! Outbound message queue and the encoded bytes waiting on the socket.

use std::collections::VecDeque;

use bytes::{Buf as _, BytesMut};
use flootty_protocol::{Auth, ClientMessage, FrameCodec, ProtocolError};

/// Stop encoding more messages once this much is waiting on the socket.
const WIRE_HIGH_WATER: usize = 64 * 1024;

/// Messages not yet encoded, plus encoded bytes not yet written.
///
/// Nothing but `auth` leaves the queue before the server accepts it. Until
/// then, queued `term_stdout` is capped at `backlog_bytes` of payload, oldest
/// dropped first.
#[derive(Debug)]
pub struct Outbox {
    queue: VecDeque<ClientMessage>,
    wire: BytesMut,
    /// Messages encoded onto `wire`, with their encoded length.
    in_flight: VecDeque<(ClientMessage, usize)>,
    /// Bytes of the head of `in_flight` already written.
    written: usize,
    backlog_bytes: usize,
    bounded: bool,
}

impl Outbox {
    #[must_use]
    pub fn new(backlog_bytes: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            wire: BytesMut::new(),
            in_flight: VecDeque::new(),
            written: 0,
            backlog_bytes,
            bounded: true,
        }
    }

    pub fn push(&mut self, message: ClientMessage) {
        let is_output = matches!(message, ClientMessage::TermStdout { .. });
        self.queue.push_back(message);
        if self.bounded && is_output {
            self.prune();
        }
    }

    /// Put a fresh `auth` at the head, dropping any stale one.
    pub fn push_auth(&mut self, auth: Auth) {
        self.queue.retain(|m| !matches!(m, ClientMessage::Auth(_)));
        self.queue.push_front(ClientMessage::Auth(auth));
    }

    /// Enforce the backlog cap until authenticated; lift it afterwards.
    pub fn set_bounded(&mut self, bounded: bool) {
        self.bounded = bounded;
        if bounded {
            self.prune();
        }
    }

    /// Drop the oldest `term_stdout` until the backlog fits. Returns how many went.
    pub fn prune(&mut self) -> usize {
        let mut dropped = 0;
        while self.backlog() > self.backlog_bytes {
            let Some(pos) = self
                .queue
                .iter()
                .position(|m| matches!(m, ClientMessage::TermStdout { .. }))
            else {
                break;
            };
            self.queue.remove(pos);
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!("dropped {dropped} queued output messages over the backlog cap");
        }
        dropped
    }

    /// Encoded payload bytes of queued `term_stdout` messages.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.queue
            .iter()
            .map(|m| match m {
                ClientMessage::TermStdout { data, .. } => data.len(),
                _ => 0,
            })
            .sum()
    }

    #[must_use]
    pub fn wants_write(&self, authenticated: bool) -> bool {
        !self.wire.is_empty() || self.next_sendable(authenticated)
    }

    fn next_sendable(&self, authenticated: bool) -> bool {
        match self.queue.front() {
            Some(ClientMessage::Auth(_)) => true,
            Some(_) => authenticated,
            None => false,
        }
    }

    /// Move messages from the queue onto the wire in order.
    pub fn fill(&mut self, authenticated: bool) -> Result<(), ProtocolError> {
        while self.wire.len() < WIRE_HIGH_WATER && self.next_sendable(authenticated) {
            let Some(message) = self.queue.pop_front() else {
                break;
            };
            let is_auth = matches!(message, ClientMessage::Auth(_));
            let encoded = FrameCodec::encode(&message)?;
            self.wire.extend_from_slice(&encoded);
            self.in_flight.push_back((message, encoded.len()));
            if is_auth && !authenticated {
                break;
            }
        }
        Ok(())
    }

    /// Encoded bytes waiting to be written.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.wire
    }

    pub fn advance(&mut self, written: usize) {
        let written = written.min(self.wire.len());
        self.wire.advance(written);
        self.written += written;
        while let Some((_, len)) = self.in_flight.front() {
            if self.written < *len {
                break;
            }
            self.written -= len;
            self.in_flight.pop_front();
        }
    }

    /// The connection went away: put messages that never reached the socket
    /// back at the head of the queue. A message cut off mid-write is lost,
    /// and so is any `auth`, which every connection sends afresh.
    pub fn requeue_unsent(&mut self) {
        if self.written > 0 {
            if let Some((message, _)) = self.in_flight.pop_front() {
                tracing::debug!("dropping partially sent {}", message.name());
            }
        }
        self.written = 0;
        self.wire.clear();
        while let Some((message, _)) = self.in_flight.pop_back() {
            if !matches!(message, ClientMessage::Auth(_)) {
                self.queue.push_front(message);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientMessage> {
        self.queue.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> Auth {
        Auth::new("alice", "s3cret", "ws", "bob")
    }

    fn decode(wire: &[u8]) -> Vec<ClientMessage> {
        FrameCodec::new().feed(wire).unwrap()
    }

    #[test]
    fn test_only_auth_before_authenticated() {
        let mut outbox = Outbox::new(1024);
        outbox.push(ClientMessage::Pong);
        outbox.push(ClientMessage::term_stdout(5, b"hi"));
        outbox.push_auth(auth());

        assert!(outbox.wants_write(false));
        outbox.fill(false).unwrap();
        assert_eq!(decode(outbox.pending()), vec![ClientMessage::Auth(auth())]);

        let sent = outbox.pending().len();
        outbox.advance(sent);
        assert!(!outbox.wants_write(false));
        outbox.fill(false).unwrap();
        assert!(outbox.pending().is_empty());

        outbox.fill(true).unwrap();
        assert_eq!(
            decode(outbox.pending()),
            vec![ClientMessage::Pong, ClientMessage::term_stdout(5, b"hi")]
        );
    }

    #[test]
    fn test_reauth_replaces_stale_auth() {
        let mut outbox = Outbox::new(1024);
        outbox.push_auth(auth());
        outbox.push(ClientMessage::Pong);
        outbox.push_auth(auth());
        let names: Vec<_> = outbox.iter().map(ClientMessage::name).collect();
        assert_eq!(names, vec!["auth", "pong"]);
    }

    #[test]
    fn test_backlog_drops_oldest_output() {
        // Each 6-byte chunk encodes to 8 base64 characters.
        let mut outbox = Outbox::new(20);
        outbox.push(ClientMessage::term_stdout(5, b"first!"));
        outbox.push(ClientMessage::UpdateTerm {
            id: 5,
            size: Default::default(),
        });
        outbox.push(ClientMessage::term_stdout(5, b"second"));
        assert_eq!(outbox.backlog(), 16);

        outbox.push(ClientMessage::term_stdout(5, b"third!"));
        assert_eq!(outbox.backlog(), 16);
        let kept: Vec<_> = outbox.iter().cloned().collect();
        assert_eq!(
            kept,
            vec![
                ClientMessage::UpdateTerm {
                    id: 5,
                    size: Default::default()
                },
                ClientMessage::term_stdout(5, b"second"),
                ClientMessage::term_stdout(5, b"third!"),
            ]
        );
    }

    #[test]
    fn test_unbounded_once_authenticated() {
        let mut outbox = Outbox::new(8);
        outbox.set_bounded(false);
        for _ in 0..4 {
            outbox.push(ClientMessage::term_stdout(1, b"abcdef"));
        }
        assert_eq!(outbox.len(), 4);

        outbox.set_bounded(true);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn test_partial_write_advances() {
        let mut outbox = Outbox::new(1024);
        outbox.push_auth(auth());
        outbox.fill(false).unwrap();
        let total = outbox.pending().len();
        outbox.advance(3);
        assert_eq!(outbox.pending().len(), total - 3);
        outbox.requeue_unsent();
        assert!(outbox.pending().is_empty());
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_unsent_messages_survive_a_lost_connection() {
        let notice = ClientMessage::Datamsg {
            to: Some(vec![3]),
            data: flootty_protocol::SafeTermNotice::new(5, "ftty"),
        };
        let resize = ClientMessage::UpdateTerm {
            id: 5,
            size: Default::default(),
        };
        let mut outbox = Outbox::new(1024);
        outbox.push(ClientMessage::Pong);
        outbox.push(resize.clone());
        outbox.push(notice.clone());
        outbox.fill(true).unwrap();
        outbox.push(ClientMessage::term_stdout(5, b"later"));

        // All of the pong and part of the update_term reached the socket.
        let pong_len = FrameCodec::encode(&ClientMessage::Pong).unwrap().len();
        outbox.advance(pong_len + 4);
        outbox.requeue_unsent();

        assert!(outbox.pending().is_empty());
        let queued: Vec<_> = outbox.iter().cloned().collect();
        assert_eq!(queued, vec![notice, ClientMessage::term_stdout(5, b"later")]);
    }

    #[test]
    fn test_requeue_keeps_order_and_drops_stale_auth() {
        let mut outbox = Outbox::new(1024);
        outbox.push_auth(auth());
        outbox.push(ClientMessage::Pong);
        outbox.push(ClientMessage::term_stdout(5, b"hi"));
        outbox.fill(true).unwrap();
        assert!(outbox.is_empty());

        outbox.requeue_unsent();
        let names: Vec<_> = outbox.iter().map(ClientMessage::name).collect();
        assert_eq!(names, vec!["pong", "term_stdout"]);

        outbox.push_auth(auth());
        let names: Vec<_> = outbox.iter().map(ClientMessage::name).collect();
        assert_eq!(names, vec!["auth", "pong", "term_stdout"]);
    }
}
