use std::fmt;

use mailparse::MailHeaderMap;

use super::{Seq, Uid};
use crate::error::Result;

/// A message in the current session, as produced by `UIDL` (or `LIST` when the server has no
/// unique-id support).
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct MessageRef {
    /// The message-number; only meaningful until the session ends.
    pub index: Seq,
    /// The server's unique-id for the message; empty when unknown.
    pub uid: Uid,
}

impl MessageRef {
    /// Make a reference to a message that has no known unique-id.
    pub fn numbered(index: Seq) -> Self {
        MessageRef {
            index,
            uid: Uid::new(),
        }
    }

    /// Whether the server gave this message a unique-id.
    pub fn has_uid(&self) -> bool {
        !self.uid.is_empty()
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_uid() {
            write!(f, "{} ({})", self.index, self.uid)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// A scan listing line returned by `LIST`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListEntry {
    /// The message-number.
    pub index: Seq,
    /// The exact size of the message in octets.
    pub size: u64,
}

/// The four raw header values a message is named from.
///
/// Values are unfolded and trimmed but are otherwise exactly what the server sent, encoded
/// words included. A header the message does not carry is an empty string.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct MessageHeaders {
    pub from: String,
    pub date: String,
    pub message_id: String,
    pub subject: String,
}

impl MessageHeaders {
    /// Parse the header block of a message, such as the response to `TOP n 0`.
    ///
    /// Parsing stops at the first empty line, so a full message may be passed as well.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (headers, _) = mailparse::parse_headers(raw)?;
        let get = |name: &str| {
            headers
                .get_first_header(name)
                .map(|h| unfold(&String::from_utf8_lossy(h.get_value_raw())))
                .unwrap_or_default()
        };
        Ok(MessageHeaders {
            from: get("From"),
            date: get("Date"),
            message_id: get("Message-ID"),
            subject: get("Subject"),
        })
    }
}

/// Undo header folding: a line break followed by whitespace is removed, the whitespace kept.
fn unfold(value: &str) -> String {
    let out: String = value
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    out.trim().to_string()
}
