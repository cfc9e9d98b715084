use bufstream::BufStream;
use std::io::{BufRead, Read, Write};
use std::ops::{Deref, DerefMut};

use super::error::{Error, Result, ValidateError};
use super::parse::{
    parse_list, parse_list_line, parse_stat, parse_status, parse_uid_line, parse_uids,
};
use super::types::*;

const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

macro_rules! ok_or_unauth_client_err {
    ($r:expr, $self:expr) => {
        match $r {
            Ok(o) => o,
            Err(e) => return Err((e, $self)),
        }
    };
}

/// Arguments go on the wire verbatim, so a line break would end the command early.
fn validate_arg(value: &str) -> Result<&str> {
    if value.contains('\n') {
        return Err(Error::Validate(ValidateError('\n')));
    }
    if value.contains('\r') {
        return Err(Error::Validate(ValidateError('\r')));
    }
    Ok(value)
}

/// An authenticated POP3 session providing the usual POP3 commands.
///
/// The maildrop is locked by the server for as long as the session lives. Messages marked with
/// [`Session::dele`] are only removed once [`Session::quit`] is called; a session that is
/// dropped without quitting leaves the maildrop untouched.
#[derive(Debug)]
pub struct Session<T: Read + Write> {
    conn: Connection<T>,
}

/// A POP3 client in the AUTHORIZATION state.
///
/// Use [`ClientBuilder`](crate::ClientBuilder) to connect, then [`Client::login`] to obtain a
/// [`Session`].
#[derive(Debug)]
pub struct Client<T: Read + Write> {
    conn: Connection<T>,
}

/// The underlying command stream shared by [`Client`] and [`Session`].
#[derive(Debug)]
#[doc(hidden)]
pub struct Connection<T: Read + Write> {
    pub(crate) stream: BufStream<T>,

    /// Enable tracing of every line sent and received.
    pub debug: bool,

    /// The server greeting, once it has been read.
    pub greeting: Option<String>,
}

// `Deref` instances are so we can make use of the same underlying primitives in `Client` and
// `Session`
impl<T: Read + Write> Deref for Client<T> {
    type Target = Connection<T>;

    fn deref(&self) -> &Connection<T> {
        &self.conn
    }
}

impl<T: Read + Write> DerefMut for Client<T> {
    fn deref_mut(&mut self) -> &mut Connection<T> {
        &mut self.conn
    }
}

impl<T: Read + Write> Deref for Session<T> {
    type Target = Connection<T>;

    fn deref(&self) -> &Connection<T> {
        &self.conn
    }
}

impl<T: Read + Write> DerefMut for Session<T> {
    fn deref_mut(&mut self) -> &mut Connection<T> {
        &mut self.conn
    }
}

impl<T: Read + Write> Client<T> {
    /// Creates a new client over the given stream.
    ///
    /// This method does not read the server greeting; call [`Connection::read_greeting`]
    /// before issuing commands if the stream was freshly opened.
    pub fn new(stream: T) -> Client<T> {
        Client {
            conn: Connection {
                stream: BufStream::new(stream),
                debug: false,
                greeting: None,
            },
        }
    }

    /// Yield the underlying connection for this client, e.g. to wrap it in TLS.
    pub fn into_inner(self) -> Result<T> {
        let res = self.conn.stream.into_inner()?;
        Ok(res)
    }

    /// Log in with `USER` and `PASS`, entering the TRANSACTION state.
    ///
    /// On failure the unauthenticated client is handed back alongside the error so the caller
    /// may retry, or quit cleanly.
    pub fn login<U: AsRef<str>, P: AsRef<str>>(
        mut self,
        username: U,
        password: P,
    ) -> ::std::result::Result<Session<T>, (Error, Client<T>)> {
        let username = ok_or_unauth_client_err!(validate_arg(username.as_ref()), self);
        let password = ok_or_unauth_client_err!(validate_arg(password.as_ref()), self);
        ok_or_unauth_client_err!(
            self.run_command_and_check_ok(&format!("USER {}", username)),
            self
        );
        ok_or_unauth_client_err!(
            self.run_command_and_check_ok(&format!("PASS {}", password)),
            self
        );
        Ok(Session { conn: self.conn })
    }

    /// End the conversation before authenticating.
    pub fn quit(&mut self) -> Result<()> {
        self.run_command_and_check_ok("QUIT").map(|_| ())
    }
}

impl<T: Read + Write> Session<T> {
    /// Get the number of messages in the maildrop and their total size.
    pub fn stat(&mut self) -> Result<Stat> {
        self.run_command_and_check_ok("STAT")
            .and_then(|info| parse_stat(&info))
    }

    /// Get the unique-id listing, for one message or all of them in ascending order.
    pub fn uidl(&mut self, index: Option<Seq>) -> Result<Vec<MessageRef>> {
        match index {
            Some(index) => self
                .run_command_and_check_ok(&format!("UIDL {}", index))
                .and_then(|info| parse_uid_line(&info))
                .map(|uid| vec![uid]),
            None => self
                .run_command_and_read_multiline("UIDL")
                .and_then(|data| parse_uids(&data)),
        }
    }

    /// Get the scan listing, for one message or all of them in ascending order.
    pub fn list(&mut self, index: Option<Seq>) -> Result<Vec<ListEntry>> {
        match index {
            Some(index) => self
                .run_command_and_check_ok(&format!("LIST {}", index))
                .and_then(|info| parse_list_line(&info))
                .map(|entry| vec![entry]),
            None => self
                .run_command_and_read_multiline("LIST")
                .and_then(|data| parse_list(&data)),
        }
    }

    /// Fetch the header of a message followed by the first `lines` lines of its body.
    pub fn top(&mut self, index: Seq, lines: u32) -> Result<Vec<u8>> {
        self.run_command_and_read_multiline(&format!("TOP {} {}", index, lines))
    }

    /// Fetch a whole message, exactly as stored on the server.
    pub fn retr(&mut self, index: Seq) -> Result<Vec<u8>> {
        self.run_command_and_read_multiline(&format!("RETR {}", index))
    }

    /// Mark a message as deleted. It is removed when the session quits.
    pub fn dele(&mut self, index: Seq) -> Result<()> {
        self.run_command_and_check_ok(&format!("DELE {}", index))
            .map(|_| ())
    }

    /// Noop always succeeds, and it does nothing.
    pub fn noop(&mut self) -> Result<()> {
        self.run_command_and_check_ok("NOOP").map(|_| ())
    }

    /// Unmark every message marked as deleted in this session.
    pub fn rset(&mut self) -> Result<()> {
        self.run_command_and_check_ok("RSET").map(|_| ())
    }

    /// Enter the UPDATE state: the server removes deleted messages and closes the connection.
    pub fn quit(&mut self) -> Result<()> {
        self.run_command_and_check_ok("QUIT").map(|_| ())
    }
}

impl<T: Read + Write> Connection<T> {
    /// Read the `+OK` greeting the server sends on connect.
    pub fn read_greeting(&mut self) -> Result<String> {
        let greeting = self.read_status()?;
        self.greeting = Some(greeting.clone());
        Ok(greeting)
    }

    /// Runs a command and checks if it returns `+OK`, yielding the rest of the status line.
    pub fn run_command_and_check_ok(&mut self, command: &str) -> Result<String> {
        self.run_command(command)?;
        self.read_status()
    }

    /// Runs a command that answers with a multi-line response and returns its data, with the
    /// terminating line removed and dot-stuffing undone.
    pub fn run_command_and_read_multiline(&mut self, command: &str) -> Result<Vec<u8>> {
        self.run_command_and_check_ok(command)?;
        self.read_multiline()
    }

    /// Runs any command passed to it.
    pub fn run_command(&mut self, command: &str) -> Result<()> {
        self.write_line(command.as_bytes())
    }

    fn read_status(&mut self) -> Result<String> {
        let mut line = Vec::new();
        self.readline(&mut line)?;
        parse_status(&line)
    }

    fn read_multiline(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let mut line = Vec::new();
            self.readline(&mut line)?;
            if line == b".\r\n" || line == b".\n" {
                break Ok(data);
            }
            if line.starts_with(b"..") {
                data.extend_from_slice(&line[1..]);
            } else {
                data.extend_from_slice(&line);
            }
        }
    }

    pub(crate) fn readline(&mut self, into: &mut Vec<u8>) -> Result<usize> {
        let read = self.stream.read_until(LF, into)?;
        if read == 0 {
            return Err(Error::ConnectionLost);
        }

        if self.debug {
            let line = &into[into.len() - read..];
            tracing::trace!("S: {}", String::from_utf8_lossy(line).trim_end());
        }

        Ok(read)
    }

    fn write_line(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        if self.debug {
            if buf.starts_with(b"PASS ") {
                tracing::trace!("C: PASS ****");
            } else {
                tracing::trace!("C: {}", String::from_utf8_lossy(buf));
            }
        }
        Ok(())
    }
}
