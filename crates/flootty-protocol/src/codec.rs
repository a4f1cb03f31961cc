//! Newline-delimited JSON framing.

use bytes::{Buf as _, BytesMut};

use crate::ProtocolError;

const DELIMITER: u8 = b'\n';

/// Accumulates inbound bytes and yields one decoded message per `\n`.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: BytesMut,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a message and terminate it with `\n`.
    pub fn encode<T: serde::Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
        bytes.push(DELIMITER);
        Ok(bytes)
    }

    /// Append raw bytes and decode every complete record.
    ///
    /// A trailing partial record stays buffered for the next call. A complete
    /// record that fails to decode is an error; records before it in the same
    /// call are lost along with it.
    pub fn feed<T: serde::de::DeserializeOwned>(
        &mut self,
        raw: &[u8],
    ) -> Result<Vec<T>, ProtocolError> {
        self.buf.extend_from_slice(raw);

        let mut messages = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == DELIMITER) {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let message = serde_json::from_slice(&line).map_err(|source| ProtocolError::Decode {
                line: String::from_utf8_lossy(&line).into_owned(),
                source,
            })?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Bytes of an incomplete record waiting for its delimiter.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial record, e.g. when the connection it came from is gone.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
