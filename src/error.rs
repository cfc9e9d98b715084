//! Errors that can occur while talking to a POP3 server or exporting messages.

use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
#[cfg(feature = "native-tls")]
use std::net::TcpStream;
use std::result;
use std::str::Utf8Error;

use bufstream::IntoInnerError as BufError;
use mailparse::MailParseError;
#[cfg(feature = "native-tls")]
use native_tls::Error as TlsError;
#[cfg(feature = "native-tls")]
use native_tls::HandshakeError as TlsHandshakeError;

/// A convenience wrapper around `Result` for `export_mail::Error`.
pub type Result<T> = result::Result<T, Error>;

/// A set of errors that can occur in the POP3 client and the export driver.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An `io::Error` that occurred while trying to read or write to a network stream or to the
    /// output directory.
    Io(IoError),
    /// An error from the `native_tls` library during the TLS handshake.
    #[cfg(feature = "native-tls")]
    TlsHandshake(TlsHandshakeError<TcpStream>),
    /// An error from the `native_tls` library while managing the socket.
    #[cfg(feature = "native-tls")]
    Tls(TlsError),
    /// A `-ERR` response from the POP3 server, with the text the server gave.
    ErrResponse(String),
    /// The connection was terminated unexpectedly.
    ConnectionLost,
    /// Error parsing a server response.
    Parse(ParseError),
    /// Command arguments were not valid for the wire.
    Validate(ValidateError),
    /// The message header returned by `TOP` could not be parsed.
    Header(MailParseError),
    /// The configuration cannot be used to run an export.
    Config(String),
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error::Io(err)
    }
}

impl<T> From<BufError<T>> for Error {
    fn from(err: BufError<T>) -> Error {
        Error::Io(err.into())
    }
}

#[cfg(feature = "native-tls")]
impl From<TlsHandshakeError<TcpStream>> for Error {
    fn from(err: TlsHandshakeError<TcpStream>) -> Error {
        Error::TlsHandshake(err)
    }
}

#[cfg(feature = "native-tls")]
impl From<TlsError> for Error {
    fn from(err: TlsError) -> Error {
        Error::Tls(err)
    }
}

impl From<MailParseError> for Error {
    fn from(err: MailParseError) -> Error {
        Error::Header(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref e) => fmt::Display::fmt(e, f),
            #[cfg(feature = "native-tls")]
            Error::Tls(ref e) => fmt::Display::fmt(e, f),
            #[cfg(feature = "native-tls")]
            Error::TlsHandshake(ref e) => fmt::Display::fmt(e, f),
            Error::ErrResponse(ref data) => write!(f, "Server error: {}", data),
            Error::ConnectionLost => f.write_str("Connection Lost"),
            Error::Parse(ref e) => fmt::Display::fmt(e, f),
            Error::Validate(ref e) => fmt::Display::fmt(e, f),
            Error::Header(ref e) => write!(f, "Unable to parse message header: {}", e),
            Error::Config(ref e) => write!(f, "Invalid configuration: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            #[cfg(feature = "native-tls")]
            Error::Tls(ref e) => Some(e),
            #[cfg(feature = "native-tls")]
            Error::TlsHandshake(ref e) => Some(e),
            Error::Parse(ParseError::DataNotUtf8(_, ref e)) => Some(e),
            Error::Header(ref e) => Some(e),
            _ => None,
        }
    }
}

/// An error occured while trying to parse a server response.
#[derive(Debug)]
pub enum ParseError {
    /// Indicates an error parsing the status response. Such as `+OK` and `-ERR`.
    Invalid(Vec<u8>),
    /// A `STAT` response did not carry a message count and a size.
    Stat(String),
    /// A `UIDL` or `LIST` line did not carry a message number and a value.
    Listing(String),
    /// The server sent us a status line that is not valid UTF-8.
    DataNotUtf8(Vec<u8>, Utf8Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::Invalid(ref data) => write!(
                f,
                "Unable to parse status response: {:?}",
                String::from_utf8_lossy(data)
            ),
            ParseError::Stat(ref line) => write!(f, "Unable to parse STAT response: {:?}", line),
            ParseError::Listing(ref line) => {
                write!(f, "Unable to parse listing response: {:?}", line)
            }
            ParseError::DataNotUtf8(_, _) => f.write_str("Unable to parse data as UTF-8 text"),
        }
    }
}

impl StdError for ParseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            ParseError::DataNotUtf8(_, ref e) => Some(e),
            _ => None,
        }
    }
}

/// An invalid character was found in a command argument.
#[derive(Debug)]
pub struct ValidateError(pub char);

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // print character in debug form because invalid ones are often whitespaces
        write!(f, "Invalid character in input: {:?}", self.0)
    }
}

impl StdError for ValidateError {}
