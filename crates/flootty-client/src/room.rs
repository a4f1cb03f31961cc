//! Reacting to server events.

use std::collections::HashSet;

use flootty_protocol::{
    ClientMessage, ServerEvent, TermId, TermInfo, TermSize, UserId, decode_data,
};

use crate::client::{Flootty, Flow};
use crate::session::TermSession;
use crate::term;
use crate::{DEFAULT_TERM_NAME, Fatal, Intent};

/// `requested`, or the first `requested{n}` (n = 1, 2, ...) not in `existing`.
#[must_use]
pub fn unique_term_name<'a>(requested: &str, existing: impl IntoIterator<Item = &'a str>) -> String {
    let taken: HashSet<&str> = existing.into_iter().collect();
    if !taken.contains(requested) {
        return requested.to_string();
    }
    let mut suffix: u64 = 1;
    loop {
        let candidate = format!("{requested}{suffix}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        suffix += 1;
    }
}

fn listing(terms: &[(TermId, TermInfo)]) -> String {
    terms
        .iter()
        .map(|(id, info)| {
            let size = info
                .size
                .map(|s| format!("{}x{}", s.cols, s.rows))
                .unwrap_or_default();
            format!("  {:<20} {:>6} {size}", info.term_name, id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Flootty<'_> {
    /// Apply one server event.
    pub fn handle_event(&mut self, event: ServerEvent) -> Result<Flow, Fatal> {
        match event {
            ServerEvent::RoomInfo(info) => {
                self.link.mark_authenticated();
                self.room = info;
                return self.on_room_info();
            }
            ServerEvent::Ping => self.link.send(ClientMessage::Pong),
            ServerEvent::Disconnect { reason } => match reason.filter(|r| !r.is_empty()) {
                Some(reason) => return Err(Fatal::Disconnected(reason)),
                None => self.link.fail(&mut self.reactor, "disconnected by server"),
            },
            ServerEvent::Error { msg } => {
                let msg = msg.unwrap_or_else(|| "unknown error".to_string());
                if self.session.is_none() {
                    return Err(Fatal::Server(msg));
                }
                term::notice(&format!("server error: {msg}"));
            }
            ServerEvent::CreateTerm {
                id,
                term_name,
                owner,
                size,
            } => self.on_create_term(id, term_name, owner, size)?,
            ServerEvent::DeleteTerm { id } => {
                let removed = self.room.terms.remove(&id.to_string());
                if let Some(session) = self.session_for(id) {
                    return Err(Fatal::TermDeleted(session.name().to_string()));
                }
                tracing::debug!("terminal {id} deleted: {removed:?}");
            }
            ServerEvent::UpdateTerm { id, size } => {
                if let (Some(info), Some(size)) = (self.room.terms.get_mut(&id.to_string()), size) {
                    info.size = Some(size);
                }
                if let Some(session) = self.session.as_mut().filter(|s| s.id() == id) {
                    let messages = session.on_remote_resize(size)?;
                    self.link.send_all(messages);
                }
            }
            ServerEvent::TermStdin { id, data, user_id } => {
                if let Some(session) = self.session.as_mut().filter(|s| s.id() == id && s.is_hosting()) {
                    let input = decode_data(&data)?;
                    let messages = session.on_remote_input(&input, user_id)?;
                    self.link.send_all(messages);
                }
            }
            ServerEvent::TermStdout { id, data } => {
                if let Some(session) = self.session.as_mut().filter(|s| s.id() == id && !s.is_hosting()) {
                    session.on_remote_output(&decode_data(&data)?)?;
                }
            }
            ServerEvent::Unknown => tracing::debug!("ignoring unhandled event"),
        }
        Ok(Flow::Continue)
    }

    fn session_for(&self, id: TermId) -> Option<&TermSession> {
        self.session.as_ref().filter(|s| s.id() == id)
    }

    fn terms(&self) -> Vec<(TermId, TermInfo)> {
        self.room.terms().map(|(id, info)| (id, info.clone())).collect()
    }

    fn on_room_info(&mut self) -> Result<Flow, Fatal> {
        if let Some((id, hosting)) = self.session.as_ref().map(|s| (s.id(), s.is_hosting())) {
            return self.resume(id, hosting);
        }

        let terms = self.terms();
        match self.settings.intent.clone() {
            Intent::List => {
                if terms.is_empty() {
                    println!("No terminals in {}", self.settings.workspace.url());
                } else {
                    println!("Terminals in {}:\n{}", self.settings.workspace.url(), listing(&terms));
                }
                return Ok(Flow::Exit);
            }
            Intent::Create(name) => self.request_term(&name),
            Intent::Join(Some(name)) => {
                let Some((id, info)) = terms.into_iter().find(|(_, t)| t.term_name == name) else {
                    return Err(Fatal::NoSuchTerm(name));
                };
                self.join(id, &info)?;
            }
            Intent::Join(None) => match terms.as_slice() {
                [] => {
                    let question = format!(
                        "There are no terminals in {}. Share one?",
                        self.settings.workspace.url()
                    );
                    if !(self.confirm)(&question) {
                        return Ok(Flow::Exit);
                    }
                    self.request_term(DEFAULT_TERM_NAME);
                }
                [(id, info)] => self.join(*id, info)?,
                many => return Err(Fatal::AmbiguousTerm(listing(many))),
            },
        }
        Ok(Flow::Continue)
    }

    /// `room_info` after a reconnect with a session still running.
    fn resume(&mut self, id: TermId, hosting: bool) -> Result<Flow, Fatal> {
        let still_there = self.room.terms().any(|(tid, _)| tid == id);
        let Some(session) = self.session.as_ref() else {
            return Ok(Flow::Continue);
        };
        match (hosting, still_there) {
            (true, true) => {
                let message = session.announce_size();
                self.link.send(message);
            }
            (true, false) => {
                let name = session.name().to_string();
                let size = session.size();
                tracing::info!("terminal {name} is gone after reconnect, recreating it");
                self.pending_create = Some(name.clone());
                self.link.send(ClientMessage::CreateTerm {
                    term_name: name,
                    size,
                });
            }
            (false, true) => {}
            (false, false) => return Err(Fatal::TermDeleted(session.name().to_string())),
        }
        Ok(Flow::Continue)
    }

    fn request_term(&mut self, requested: &str) {
        let name = unique_term_name(
            requested,
            self.room.terms().map(|(_, info)| info.term_name.as_str()),
        );
        let size = self
            .local
            .as_ref()
            .and_then(|local| local.size())
            .unwrap_or_default();
        tracing::info!("requesting terminal {name}");
        self.pending_create = Some(name.clone());
        self.link.send(ClientMessage::CreateTerm {
            term_name: name,
            size,
        });
    }

    fn join(&mut self, id: TermId, info: &TermInfo) -> Result<(), Fatal> {
        let Some(local) = self.local.take() else {
            return Ok(());
        };
        let can_write = self.room.can("term_stdin");
        let session = TermSession::join(
            id,
            &info.term_name,
            info.size,
            can_write,
            local,
            &mut self.reactor,
        )?;
        let mode = if can_write { "" } else { " (read-only)" };
        term::notice(&format!("joined terminal {}{mode}", info.term_name));
        self.session = Some(session);
        Ok(())
    }

    fn on_create_term(
        &mut self,
        id: TermId,
        term_name: String,
        owner: Option<UserId>,
        size: Option<TermSize>,
    ) -> Result<(), Fatal> {
        let ours = self.pending_create.as_deref() == Some(term_name.as_str())
            && (owner.is_none() || self.room.user_id.is_none() || owner == self.room.user_id);
        self.room.terms.insert(
            id.to_string(),
            TermInfo {
                term_name: term_name.clone(),
                owner,
                size,
            },
        );
        if !ours {
            return Ok(());
        }
        self.pending_create = None;

        if let Some(session) = self.session.as_mut() {
            session.adopt_id(id);
            let message = session.announce_size();
            self.link.send(message);
            return Ok(());
        }
        let Some(local) = self.local.take() else {
            return Ok(());
        };
        let session = TermSession::host(id, &term_name, self.settings, local, &mut self.reactor)?;
        term::notice(&format!(
            "sharing terminal {term_name} in {}",
            self.settings.workspace.url()
        ));
        self.session = Some(session);
        Ok(())
    }
}
