//! This module contains types used throughout the POP3 protocol and the export driver.

/// From [section 5 of RFC 1939](https://tools.ietf.org/html/rfc1939#section-5).
///
/// Each message in the maildrop is assigned a message-number, starting at 1 for the first
/// message. Message numbers are only valid for the duration of a session: once the session
/// ends (and any messages marked as deleted are removed) the server is free to renumber what
/// remains. Use [`MessageRef::uid`] to refer to a message across sessions.
pub type Seq = u32;

/// From [section 7 of RFC 1939](https://tools.ietf.org/html/rfc1939#page-12).
///
/// The unique-id listing (`UIDL`) assigns each message a string of 1 to 70 printable
/// characters that is persistent across sessions. Servers that do not implement `UIDL` leave
/// clients with nothing but the message number, in which case the uid is empty.
pub type Uid = String;

mod stat;
pub use self::stat::Stat;

mod message;
pub use self::message::{ListEntry, MessageHeaders, MessageRef};
