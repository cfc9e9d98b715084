//! Decoding of RFC 2047 encoded words in header fields.
//!
//! ```
//! # use export_mail::codec::HeaderCodec;
//! let codec = HeaderCodec::new();
//! assert_eq!(codec.decode("=?ISO-8859-1?Q?Andr=E9?= Pirard").unwrap(), "André Pirard");
//! ```

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

lazy_static! {
    static ref ENCODED_WORD: Regex =
        Regex::new(r"=\?([^?\s]+)\?([BbQq])\?([^?\s]*)\?=").unwrap();
}

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

// senders routinely drop the padding, and a few use the URL-safe alphabet
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Turns bytes in one character encoding into text.
pub trait TextDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> String;
}

struct Whatwg(&'static encoding_rs::Encoding);

impl TextDecoder for Whatwg {
    fn decode(&self, bytes: &[u8]) -> String {
        let (text, _) = self.0.decode_without_bom_handling(bytes);
        text.into_owned()
    }
}

impl<F> TextDecoder for F
where
    F: Fn(&[u8]) -> String + Send + Sync,
{
    fn decode(&self, bytes: &[u8]) -> String {
        self(bytes)
    }
}

/// Resolves charset names to decoders.
///
/// Registered decoders are looked up first, by lowercase name. A registry built with
/// [`CharsetRegistry::new`] then falls back to the WHATWG encoding labels, which cover the
/// usual mail charsets (`utf-8`, `iso-8859-*`, `windows-125*`, `koi8-r`, `gb2312`, `big5`,
/// `shift_jis`, `euc-kr`, ...).
#[derive(Clone)]
pub struct CharsetRegistry {
    decoders: HashMap<String, Arc<dyn TextDecoder>>,
    whatwg_labels: bool,
}

impl Default for CharsetRegistry {
    fn default() -> Self {
        CharsetRegistry::new()
    }
}

impl fmt::Debug for CharsetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("CharsetRegistry")
            .field("decoders", &names)
            .field("whatwg_labels", &self.whatwg_labels)
            .finish()
    }
}

impl CharsetRegistry {
    /// A registry resolving every WHATWG encoding label.
    pub fn new() -> Self {
        CharsetRegistry {
            decoders: HashMap::new(),
            whatwg_labels: true,
        }
    }

    /// A registry that only knows the decoders registered on it.
    pub fn empty() -> Self {
        CharsetRegistry {
            decoders: HashMap::new(),
            whatwg_labels: false,
        }
    }

    /// Register `decoder` under `charset`, replacing any earlier entry or label.
    pub fn register<D: TextDecoder + 'static>(&mut self, charset: &str, decoder: D) -> &mut Self {
        self.decoders
            .insert(charset.trim().to_ascii_lowercase(), Arc::new(decoder));
        self
    }

    /// Find the decoder for `charset`, if there is one.
    pub fn lookup(&self, charset: &str) -> Option<Arc<dyn TextDecoder>> {
        let name = charset.trim().to_ascii_lowercase();
        if let Some(decoder) = self.decoders.get(&name) {
            return Some(Arc::clone(decoder));
        }
        if !self.whatwg_labels {
            return None;
        }
        encoding_rs::Encoding::for_label(name.as_bytes())
            .map(|encoding| Arc::new(Whatwg(encoding)) as Arc<dyn TextDecoder>)
    }
}

/// The encoded word names a charset nobody registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    UnknownCharset(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DecodeError::UnknownCharset(ref charset) => write!(f, "unknown charset {:?}", charset),
        }
    }
}

impl StdError for DecodeError {}

/// Decodes header field values containing encoded words.
#[derive(Clone, Debug, Default)]
pub struct HeaderCodec {
    charsets: CharsetRegistry,
}

impl HeaderCodec {
    /// A codec using the default [`CharsetRegistry`].
    pub fn new() -> Self {
        HeaderCodec::default()
    }

    pub fn with_registry(charsets: CharsetRegistry) -> Self {
        HeaderCodec { charsets }
    }

    pub fn registry_mut(&mut self) -> &mut CharsetRegistry {
        &mut self.charsets
    }

    /// Replace every encoded word in `raw` with its text.
    ///
    /// Literal text is kept as-is, except that whitespace between two adjacent encoded words
    /// is dropped. Anything that is not a well-formed encoded word, or whose payload does not
    /// decode, is left literally. The only failure is an encoded word in a charset the registry
    /// cannot resolve, in which case callers are expected to keep the raw value.
    pub fn decode(&self, raw: &str) -> Result<String, DecodeError> {
        if !raw.contains("=?") {
            return Ok(raw.to_string());
        }

        let mut out = String::with_capacity(raw.len());
        let mut last = 0;
        let mut after_word = false;
        for caps in ENCODED_WORD.captures_iter(raw) {
            let whole = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            let between = &raw[last..whole.start()];
            match self.decode_word(&caps)? {
                Some(text) => {
                    if !(after_word && between.trim().is_empty()) {
                        out.push_str(between);
                    }
                    out.push_str(&text);
                    after_word = true;
                }
                None => {
                    out.push_str(between);
                    out.push_str(whole.as_str());
                    after_word = false;
                }
            }
            last = whole.end();
        }
        out.push_str(&raw[last..]);
        Ok(out)
    }

    fn decode_word(&self, caps: &Captures<'_>) -> Result<Option<String>, DecodeError> {
        // RFC 2231 allows a language tag: =?utf-8*en?q?...?=
        let charset = caps[1].split('*').next().unwrap_or("");
        let payload = &caps[3];
        let bytes = match &caps[2] {
            "B" | "b" => decode_b(payload),
            _ => decode_q(payload),
        };
        let bytes = match bytes {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        match self.charsets.lookup(charset) {
            Some(decoder) => Ok(Some(decoder.decode(&bytes))),
            None => Err(DecodeError::UnknownCharset(charset.to_string())),
        }
    }
}

fn decode_b(payload: &str) -> Option<Vec<u8>> {
    STANDARD_LENIENT
        .decode(payload)
        .or_else(|_| URL_SAFE_LENIENT.decode(payload))
        .ok()
}

fn decode_q(payload: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len());
    let mut bytes = payload.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'_' => out.push(b' '),
            b'=' => {
                let hi = bytes.next().and_then(hex_value)?;
                let lo = bytes.next().and_then(hex_value)?;
                out.push(hi << 4 | lo);
            }
            b => out.push(b),
        }
    }
    Some(out)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
