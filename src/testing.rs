//! In-memory stand-ins for a POP3 mailbox and an output directory.
//!
//! Enable the `test_helpers` feature to use them from outside this crate:
//!
//! ```toml
//! [dev-dependencies]
//! export-mail = { version = "0.3", features = ["test_helpers"] }
//! ```
//!
//! Both types are cheap handles onto shared state, so a test can hand a clone to an
//! [`Exporter`](crate::export::Exporter) and inspect the original afterwards.
//!
//! ```
//! use export_mail::config::ExportConfig;
//! use export_mail::export::{Exporter, PolicyKind};
//! use export_mail::testing::{Call, FakeMailbox, MemoryStore};
//!
//! let mailbox = FakeMailbox::with_messages(2);
//! let store = MemoryStore::new();
//! let mut config = ExportConfig::new("fake");
//! config.policy = PolicyKind::Descending { reconnect_every: 50 };
//! let summary = Exporter::new(mailbox.clone(), store.clone(), config)
//!     .run()
//!     .unwrap();
//! assert_eq!(summary.saved, 2);
//! assert_eq!(store.len(), 2);
//! assert_eq!(mailbox.calls().last(), Some(&Call::Close));
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::mailbox::{MailboxClient, MailboxSession};
use crate::store::FileStore;
use crate::types::{MessageHeaders, MessageRef, Seq, Stat};

/// One operation performed against a [`FakeMailbox`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Call {
    Connect,
    Stat,
    List(Seq),
    Header(Seq),
    Body(Seq),
    Delete(Seq),
    Close,
}

/// A message held by a [`FakeMailbox`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeMessage {
    pub uid: String,
    pub raw: Vec<u8>,
}

impl FakeMessage {
    /// A message with the given unique-id and naming headers.
    pub fn new(uid: &str, headers: &MessageHeaders) -> Self {
        let raw = format!(
            "From: {}\r\nDate: {}\r\nMessage-ID: {}\r\nSubject: {}\r\n\r\nHello from {}.\r\n",
            headers.from, headers.date, headers.message_id, headers.subject, uid
        );
        FakeMessage {
            uid: uid.to_string(),
            raw: raw.into_bytes(),
        }
    }

    /// The `n`th message of [`FakeMailbox::with_messages`].
    pub fn numbered(n: Seq) -> Self {
        FakeMessage::new(
            &format!("U{}", n),
            &MessageHeaders {
                from: format!("user{}@example.com", n),
                date: format!("{:02} Jan 2006 15:04:05 +0000", (n - 1) % 28 + 1),
                message_id: format!("<{}@example.com>", n),
                subject: format!("Message {}", n),
            },
        )
    }
}

#[derive(Debug, Default)]
struct MailboxState {
    messages: Vec<FakeMessage>,
    calls: Vec<Call>,
    failing: BTreeSet<Call>,
    dropping: BTreeSet<Call>,
}

impl MailboxState {
    fn call(&mut self, call: Call) -> Result<()> {
        let fails = self.failing.contains(&call);
        let drops = self.dropping.contains(&call);
        self.calls.push(call);
        if drops {
            return Err(Error::ConnectionLost);
        }
        if fails {
            return Err(Error::ErrResponse("scripted failure".into()));
        }
        Ok(())
    }

    fn message(&self, index: Seq) -> Result<&FakeMessage> {
        index
            .checked_sub(1)
            .and_then(|i| self.messages.get(i as usize))
            .ok_or_else(|| Error::ErrResponse("no such message".into()))
    }
}

/// A mailbox whose messages live in memory and whose every call is logged.
///
/// Deletions take effect when a session is closed, and the remaining messages are renumbered,
/// just as a POP3 server does on `QUIT`.
#[derive(Clone, Debug, Default)]
pub struct FakeMailbox {
    state: Rc<RefCell<MailboxState>>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        FakeMailbox::default()
    }

    /// A mailbox holding `FakeMessage::numbered(1..=n)`.
    pub fn with_messages(n: Seq) -> Self {
        let mailbox = FakeMailbox::new();
        for i in 1..=n {
            mailbox.push(FakeMessage::numbered(i));
        }
        mailbox
    }

    /// Append a message; it gets the next message-number.
    pub fn push(&self, message: FakeMessage) -> &Self {
        self.state.borrow_mut().messages.push(message);
        self
    }

    /// Make every future `call` fail with a server error.
    pub fn fail_on(&self, call: Call) -> &Self {
        self.state.borrow_mut().failing.insert(call);
        self
    }

    /// Make every future `call` fail as if the server hung up.
    pub fn disconnect_on(&self, call: Call) -> &Self {
        self.state.borrow_mut().dropping.insert(call);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Unique-ids of the messages still in the mailbox.
    pub fn uids(&self) -> Vec<String> {
        let state = self.state.borrow();
        state.messages.iter().map(|m| m.uid.clone()).collect()
    }

    /// Open a session without going through [`MailboxClient::connect`].
    pub fn session(&self) -> FakeSession {
        FakeSession {
            state: Rc::clone(&self.state),
            deleted: BTreeSet::new(),
        }
    }
}

impl MailboxClient for FakeMailbox {
    type Session = FakeSession;

    fn connect(&self, _host: &str, _port: u16, _tls: bool) -> Result<FakeSession> {
        self.state.borrow_mut().call(Call::Connect)?;
        Ok(self.session())
    }
}

/// A session on a [`FakeMailbox`].
#[derive(Debug)]
pub struct FakeSession {
    state: Rc<RefCell<MailboxState>>,
    deleted: BTreeSet<Seq>,
}

impl MailboxSession for FakeSession {
    fn stat(&mut self) -> Result<Stat> {
        let mut state = self.state.borrow_mut();
        state.call(Call::Stat)?;
        Ok(Stat {
            count: state.messages.len() as u32,
            size: state.messages.iter().map(|m| m.raw.len() as u64).sum(),
        })
    }

    fn list(&mut self, after: Seq) -> Result<Vec<MessageRef>> {
        let mut state = self.state.borrow_mut();
        state.call(Call::List(after))?;
        Ok((1..)
            .zip(state.messages.iter())
            .filter(|&(index, _)| index > after)
            .map(|(index, m)| MessageRef {
                index,
                uid: m.uid.clone(),
            })
            .collect())
    }

    fn fetch_header(&mut self, index: Seq) -> Result<MessageHeaders> {
        let mut state = self.state.borrow_mut();
        state.call(Call::Header(index))?;
        MessageHeaders::parse(&state.message(index)?.raw)
    }

    fn fetch_body(&mut self, index: Seq) -> Result<Vec<u8>> {
        let mut state = self.state.borrow_mut();
        state.call(Call::Body(index))?;
        Ok(state.message(index)?.raw.clone())
    }

    fn delete(&mut self, index: Seq) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.call(Call::Delete(index))?;
        state.message(index)?;
        self.deleted.insert(index);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.call(Call::Close)?;
        for index in std::mem::take(&mut self.deleted).into_iter().rev() {
            state.messages.remove(index as usize - 1);
        }
        Ok(())
    }
}

/// An output directory kept in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    files: Rc<RefCell<BTreeMap<PathBuf, Vec<u8>>>>,
    failing: Rc<RefCell<BTreeSet<PathBuf>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Put a file in place, as if an earlier run had written it.
    pub fn insert<P: Into<PathBuf>>(&self, path: P, data: &[u8]) -> &Self {
        self.files.borrow_mut().insert(path.into(), data.to_vec());
        self
    }

    /// Make writes to `path` fail.
    pub fn fail_on<P: Into<PathBuf>>(&self, path: P) -> &Self {
        self.failing.borrow_mut().insert(path.into());
        self
    }

    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<Vec<u8>> {
        self.files.borrow().get(path.as_ref()).cloned()
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.files.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.borrow().is_empty()
    }
}

impl FileStore for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn write_file(&self, path: &Path, data: &[u8], _create_dirs: bool) -> Result<()> {
        if self.failing.borrow().contains(path) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "scripted write failure",
            )));
        }
        self.insert(path, data);
        Ok(())
    }
}
