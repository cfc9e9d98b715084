//! The mailbox capability the export driver runs against, and its POP3 implementation.

use std::io::{Read, Write};
use std::time::Duration;

use crate::client::Session;
use crate::client_builder::{ClientBuilder, ConnectionMode};
use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::types::{MessageHeaders, MessageRef, Seq, Stat};

/// Something that can open an authenticated session on a mailbox.
pub trait MailboxClient {
    /// The live session type.
    type Session: MailboxSession;

    /// Connect to `host:port`, optionally over TLS, and authenticate.
    fn connect(&self, host: &str, port: u16, tls: bool) -> Result<Self::Session>;
}

/// A live, exclusively owned session on a mailbox.
pub trait MailboxSession {
    /// Number of messages and their total size.
    fn stat(&mut self) -> Result<Stat>;

    /// All messages with an index greater than `after`, in ascending index order.
    fn list(&mut self, after: Seq) -> Result<Vec<MessageRef>>;

    /// The naming headers of one message, without downloading its body.
    fn fetch_header(&mut self, index: Seq) -> Result<MessageHeaders>;

    /// The raw bytes of one message.
    fn fetch_body(&mut self, index: Seq) -> Result<Vec<u8>>;

    /// Remove one message from the server.
    fn delete(&mut self, index: Seq) -> Result<()>;

    /// End the session. Pending deletions take effect here.
    fn close(&mut self) -> Result<()>;
}

/// POP3 credentials and transport options.
#[derive(Clone)]
pub struct Pop3Mailbox {
    username: String,
    password: String,
    skip_tls_verify: bool,
    timeout: Option<Duration>,
    debug: bool,
}

impl std::fmt::Debug for Pop3Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pop3Mailbox")
            .field("username", &self.username)
            .field("password", &"****")
            .field("skip_tls_verify", &self.skip_tls_verify)
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .finish()
    }
}

impl Pop3Mailbox {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Pop3Mailbox {
            username: username.into(),
            password: password.into(),
            skip_tls_verify: false,
            timeout: None,
            debug: false,
        }
    }

    /// Accept invalid certificates and hostnames. See
    /// [`ClientBuilder::danger_skip_tls_verify`].
    pub fn danger_skip_tls_verify(mut self, skip: bool) -> Self {
        self.skip_tls_verify = skip;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Trace the wire conversation of every session.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl MailboxClient for Pop3Mailbox {
    type Session = Session<Connection>;

    fn connect(&self, host: &str, port: u16, tls: bool) -> Result<Self::Session> {
        let mode = if tls {
            ConnectionMode::Tls
        } else {
            ConnectionMode::Plain
        };
        tracing::info!("connecting {}:{}", host, port);
        let mut client = ClientBuilder::new(host, port)
            .mode(mode)
            .danger_skip_tls_verify(self.skip_tls_verify)
            .timeout(self.timeout)
            .connect()?;
        client.debug = self.debug;

        tracing::info!("authenticating");
        match client.login(&self.username, &self.password) {
            Ok(session) => Ok(session),
            Err((e, mut client)) => {
                // the server is owed a QUIT, but the login error is what matters
                let _ = client.quit();
                Err(e)
            }
        }
    }
}

impl<T: Read + Write> MailboxSession for Session<T> {
    fn stat(&mut self) -> Result<Stat> {
        Session::stat(self)
    }

    fn list(&mut self, after: Seq) -> Result<Vec<MessageRef>> {
        let refs = match self.uidl(None) {
            Ok(refs) => refs,
            Err(Error::ErrResponse(info)) => {
                tracing::warn!("server rejected UIDL ({}), listing without unique ids", info);
                Session::list(self, None)?
                    .into_iter()
                    .map(|entry| MessageRef::numbered(entry.index))
                    .collect()
            }
            Err(e) => return Err(e),
        };
        Ok(refs.into_iter().filter(|r| r.index > after).collect())
    }

    fn fetch_header(&mut self, index: Seq) -> Result<MessageHeaders> {
        let raw = self.top(index, 0)?;
        MessageHeaders::parse(&raw)
    }

    fn fetch_body(&mut self, index: Seq) -> Result<Vec<u8>> {
        self.retr(index)
    }

    fn delete(&mut self, index: Seq) -> Result<()> {
        self.dele(index)
    }

    fn close(&mut self) -> Result<()> {
        self.quit()
    }
}
