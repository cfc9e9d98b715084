//! Deterministic file names for exported messages.
//!
//! A name has four bracketed parts: the sender address, the date, a short fingerprint of the
//! `Message-ID` and the subject.
//!
//! ```
//! # use export_mail::naming::NameSynthesizer;
//! # use export_mail::MessageHeaders;
//! let headers = MessageHeaders {
//!     from: "Bob <bob@example.com>".into(),
//!     date: "Mon, 02 Jan 2006 15:04:05 +0000".into(),
//!     message_id: "abc123".into(),
//!     subject: "Hello".into(),
//! };
//! let name = NameSynthesizer::new().synthesize(&headers);
//! assert_eq!(name, "[bob@example.com][2006-01-02 15.04.05][e99a1][Hello]");
//! ```

use chrono::{DateTime, FixedOffset, Local};
use lazy_static::lazy_static;
use mailparse::MailAddr;
use md5::{Digest, Md5};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

use crate::codec::HeaderCodec;
use crate::types::MessageHeaders;
use crate::utils::truncate_chars;

/// Longest sender or subject kept, in code points, before `...` is appended.
pub const MAX_FIELD_CHARS: usize = 30;

/// Hex digits of the `Message-ID` digest that go into a name.
pub const FINGERPRINT_CHARS: usize = 5;

/// How dates are written into names.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Extension of exported files.
pub const EXTENSION: &str = "eml";

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r#"[<>:"/\\|?*]"#).unwrap();
}

// Forms seen in the wild that RFC 5322 parsing rejects, tried after comments are stripped.
const LOOSE_DATE_FORMATS: [&str; 4] = [
    "%a, %d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %z",
    "%a, %d %b %Y %H:%M %z",
    "%a %b %e %H:%M:%S %Y %z",
];

type Clock = Arc<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

/// Derives a file name stem from a message's headers.
#[derive(Clone)]
pub struct NameSynthesizer {
    codec: HeaderCodec,
    clock: Clock,
}

impl fmt::Debug for NameSynthesizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameSynthesizer")
            .field("codec", &self.codec)
            .finish()
    }
}

impl Default for NameSynthesizer {
    fn default() -> Self {
        NameSynthesizer::new()
    }
}

impl NameSynthesizer {
    /// A synthesizer using the default [`HeaderCodec`], and the local time for messages whose
    /// date cannot be parsed.
    pub fn new() -> Self {
        NameSynthesizer {
            codec: HeaderCodec::new(),
            clock: Arc::new(|| {
                let now = Local::now();
                now.with_timezone(now.offset())
            }),
        }
    }

    pub fn with_codec(mut self, codec: HeaderCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the clock consulted when a `Date` header is unusable.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<FixedOffset> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// The file name stem for a message, safe to use on any common filesystem.
    pub fn synthesize(&self, headers: &MessageHeaders) -> String {
        sanitize(&self.stem(headers))
    }

    /// The name before unsafe characters are replaced.
    pub fn stem(&self, headers: &MessageHeaders) -> String {
        format!(
            "[{}][{}][{}][{}]",
            self.sender(&headers.from),
            self.date(&headers.date),
            fingerprint(&headers.message_id),
            self.subject(&headers.subject)
        )
    }

    fn sender(&self, raw: &str) -> String {
        let decoded = self.decode(raw);
        let address = first_address(&decoded).unwrap_or(decoded);
        truncate_chars(&address, MAX_FIELD_CHARS)
            .trim_matches(|c| c == '<' || c == '>')
            .to_string()
    }

    fn date(&self, raw: &str) -> String {
        let date = parse_date(raw).unwrap_or_else(|| {
            tracing::debug!("unparseable date {:?}, using current time", raw);
            (self.clock)()
        });
        date.format(DATE_FORMAT).to_string()
    }

    fn subject(&self, raw: &str) -> String {
        truncate_chars(&self.decode(raw), MAX_FIELD_CHARS)
    }

    fn decode(&self, raw: &str) -> String {
        self.codec.decode(raw).unwrap_or_else(|e| {
            tracing::debug!("keeping {:?} undecoded: {}", raw, e);
            raw.to_string()
        })
    }
}

/// The bare address of the first mailbox in an address list.
fn first_address(list: &str) -> Option<String> {
    let addrs = mailparse::addrparse(list).ok()?;
    addrs.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => Some(info.addr.clone()),
        MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
    })
}

/// The first hex digits of the MD5 digest of a raw `Message-ID`, empty ids included.
pub fn fingerprint(message_id: &str) -> String {
    let mut hex = format!("{:x}", Md5::digest(message_id.as_bytes()));
    hex.truncate(FINGERPRINT_CHARS);
    hex
}

/// Replace each of `< > : " / \ | ? *` with a dot.
pub fn sanitize(name: &str) -> String {
    UNSAFE_CHARS.replace_all(name, ".").into_owned()
}

/// Parse a `Date` header, keeping the offset it was written in.
pub fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date);
    }
    let cleaned = strip_comments(raw);
    if let Ok(date) = DateTime::parse_from_rfc2822(&cleaned) {
        return Some(date);
    }
    LOOSE_DATE_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(&cleaned, format).ok())
}

/// Drop parenthesized comments and collapse whitespace runs.
fn strip_comments(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            c if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
