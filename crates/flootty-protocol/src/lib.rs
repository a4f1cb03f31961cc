//! Shared protocol types for flootty terminal sessions.
//!
//! Every message on the wire is a JSON object terminated by `\n` whose `name`
//! field identifies its type. Terminal bytes travel base64-encoded in `data`.

mod codec;

use std::collections::BTreeMap;

use base64::Engine as _;

pub use codec::FrameCodec;

/// Protocol version announced in `auth`.
pub const PROTOCOL_VERSION: &str = "0.11";
/// Client identifier announced in `auth`.
pub const CLIENT_NAME: &str = "flootty";

/// Server-assigned terminal id.
pub type TermId = u64;
/// Server-assigned user (connection) id.
pub type UserId = u64;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed message {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid base64 terminal data: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Terminal dimensions. Serialized as `[cols, rows]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(from = "[u16; 2]", into = "[u16; 2]")]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

impl TermSize {
    #[must_use]
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl From<[u16; 2]> for TermSize {
    fn from([cols, rows]: [u16; 2]) -> Self {
        Self { rows, cols }
    }
}

impl From<TermSize> for [u16; 2] {
    fn from(size: TermSize) -> Self {
        [size.cols, size.rows]
    }
}

/// Credentials and target workspace, always the first message on a connection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Auth {
    pub username: String,
    pub secret: String,
    pub room: String,
    pub room_owner: String,
    pub client: String,
    pub platform: String,
    pub version: String,
}

impl Auth {
    /// Build an `auth` payload with this client's identity filled in.
    #[must_use]
    pub fn new(username: &str, secret: &str, room: &str, room_owner: &str) -> Self {
        Self {
            username: username.to_string(),
            secret: secret.to_string(),
            room: room.to_string(),
            room_owner: room_owner.to_string(),
            client: CLIENT_NAME.to_string(),
            platform: std::env::consts::OS.to_string(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Payload of the `datamsg` sent when a remote user presses Enter in safe mode.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SafeTermNotice {
    pub name: String,
    pub term_id: TermId,
    pub msg: String,
}

impl SafeTermNotice {
    #[must_use]
    pub fn new(term_id: TermId, term_name: &str) -> Self {
        Self {
            name: "safe_term".to_string(),
            term_id,
            msg: format!(
                "Terminal {term_name} is in safe mode. Other users are not allowed to press enter."
            ),
        }
    }
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth(Auth),
    CreateTerm {
        term_name: String,
        size: TermSize,
    },
    UpdateTerm {
        id: TermId,
        size: TermSize,
    },
    TermStdin {
        id: TermId,
        data: String,
    },
    TermStdout {
        id: TermId,
        data: String,
    },
    Pong,
    Datamsg {
        /// Recipients; broadcast to the whole room when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<Vec<UserId>>,
        data: SafeTermNotice,
    },
}

impl ClientMessage {
    #[must_use]
    pub fn term_stdin(id: TermId, bytes: &[u8]) -> Self {
        Self::TermStdin {
            id,
            data: encode_data(bytes),
        }
    }

    #[must_use]
    pub fn term_stdout(id: TermId, bytes: &[u8]) -> Self {
        Self::TermStdout {
            id,
            data: encode_data(bytes),
        }
    }

    /// Wire name of this message.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::CreateTerm { .. } => "create_term",
            Self::UpdateTerm { .. } => "update_term",
            Self::TermStdin { .. } => "term_stdin",
            Self::TermStdout { .. } => "term_stdout",
            Self::Pong => "pong",
            Self::Datamsg { .. } => "datamsg",
        }
    }
}

/// A terminal as listed in `room_info`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TermInfo {
    pub term_name: String,
    #[serde(default)]
    pub owner: Option<UserId>,
    #[serde(default)]
    pub size: Option<TermSize>,
}

/// Workspace state pushed once the server accepts `auth`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RoomInfo {
    /// Keyed by the terminal id as a JSON object key (a decimal string).
    #[serde(default)]
    pub terms: BTreeMap<String, TermInfo>,
    #[serde(default)]
    pub perms: Vec<String>,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

impl RoomInfo {
    /// Terminals with well-formed ids.
    pub fn terms(&self) -> impl Iterator<Item = (TermId, &TermInfo)> {
        self.terms
            .iter()
            .filter_map(|(id, info)| id.parse().ok().map(|id| (id, info)))
    }

    #[must_use]
    pub fn can(&self, perm: &str) -> bool {
        self.perms.iter().any(|p| p == perm)
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomInfo(RoomInfo),
    Ping,
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
    },
    Error {
        #[serde(default)]
        msg: Option<String>,
    },
    CreateTerm {
        id: TermId,
        term_name: String,
        #[serde(default)]
        owner: Option<UserId>,
        #[serde(default)]
        size: Option<TermSize>,
    },
    DeleteTerm {
        id: TermId,
    },
    UpdateTerm {
        id: TermId,
        #[serde(default)]
        size: Option<TermSize>,
    },
    TermStdin {
        id: TermId,
        data: String,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    TermStdout {
        id: TermId,
        data: String,
    },
    /// Any event this client has no handler for.
    #[serde(other)]
    Unknown,
}

/// Base64-encode raw terminal bytes for a `data` field.
#[must_use]
pub fn encode_data(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a `data` field back into raw terminal bytes.
pub fn decode_data(data: &str) -> Result<Vec<u8>, ProtocolError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}
