use std::collections::VecDeque;
use std::fmt;

use crate::error::{Error, Result};
use crate::ledger::ExportLedger;
use crate::mailbox::MailboxSession;
use crate::types::{MessageRef, Seq, Stat};

/// Default number of messages visited between reconnects of [`Descending`].
pub const DEFAULT_RECONNECT_EVERY: u32 = 50;

/// The step of a message export that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Header,
    Body,
    Write,
    Delete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Stage::Header => "read header",
            Stage::Body => "read body",
            Stage::Write => "save",
            Stage::Delete => "remove",
        })
    }
}

/// What the driver does after a per-message error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Give up on this message and go on with the next one.
    Skip,
    /// Stop the run, returning the error.
    Abort,
}

/// Decides which messages a run visits, in what order, and how failures are treated.
pub trait ExportPolicy {
    fn name(&self) -> &'static str;

    /// Whether exported unique-ids are recorded and consulted.
    fn uses_ledger(&self) -> bool;

    /// Prepare the work list for a freshly opened session.
    fn enumerate(&mut self, session: &mut dyn MailboxSession, stat: &Stat) -> Result<()>;

    /// The next message to visit, or `None` when there are no more.
    fn next_ref(&mut self) -> Option<MessageRef>;

    /// Whether `msg` is known to be exported already and need not be fetched.
    fn should_skip(&self, msg: &MessageRef, ledger: &ExportLedger) -> bool;

    fn on_error(&self, msg: &MessageRef, stage: Stage, err: &Error) -> Flow;

    /// Whether the session should be reopened before visiting the next message, given how many
    /// have been visited so far.
    fn should_reconnect(&self, visited: usize, deleting: bool) -> bool;
}

/// Ledger-driven export from the newest message to the oldest, tolerating failures.
///
/// A message is only recorded once every step succeeded, so one whose removal failed is tried
/// again by the next run. A lost or broken connection still stops the run, since the session is
/// no longer in step with the server.
#[derive(Clone, Debug, Default)]
pub struct NewestFirst {
    pending: VecDeque<MessageRef>,
}

impl ExportPolicy for NewestFirst {
    fn name(&self) -> &'static str {
        "newest-first"
    }

    fn uses_ledger(&self) -> bool {
        true
    }

    fn enumerate(&mut self, session: &mut dyn MailboxSession, _stat: &Stat) -> Result<()> {
        self.pending = session.list(0)?.into();
        Ok(())
    }

    fn next_ref(&mut self) -> Option<MessageRef> {
        self.pending.pop_back()
    }

    fn should_skip(&self, msg: &MessageRef, ledger: &ExportLedger) -> bool {
        msg.has_uid() && ledger.contains(&msg.uid)
    }

    fn on_error(&self, _msg: &MessageRef, stage: Stage, err: &Error) -> Flow {
        // a write failure is local, the session is still fine
        match err {
            Error::ConnectionLost | Error::Io(_) if stage != Stage::Write => Flow::Abort,
            _ => Flow::Skip,
        }
    }

    fn should_reconnect(&self, _visited: usize, _deleting: bool) -> bool {
        false
    }
}

/// Export counting down from the highest message-number, stopping at the first failure.
///
/// When messages are being removed the session is reopened every `reconnect_every` messages,
/// which makes the server commit the pending deletions. Counting down keeps the remaining
/// message-numbers valid across the reconnect.
#[derive(Clone, Debug)]
pub struct Descending {
    reconnect_every: u32,
    cursor: Seq,
}

impl Descending {
    pub fn new(reconnect_every: u32) -> Self {
        Descending {
            reconnect_every,
            cursor: 0,
        }
    }
}

impl Default for Descending {
    fn default() -> Self {
        Descending::new(DEFAULT_RECONNECT_EVERY)
    }
}

impl ExportPolicy for Descending {
    fn name(&self) -> &'static str {
        "descending"
    }

    fn uses_ledger(&self) -> bool {
        false
    }

    fn enumerate(&mut self, _session: &mut dyn MailboxSession, stat: &Stat) -> Result<()> {
        self.cursor = stat.count;
        Ok(())
    }

    fn next_ref(&mut self) -> Option<MessageRef> {
        if self.cursor == 0 {
            return None;
        }
        let msg = MessageRef::numbered(self.cursor);
        self.cursor -= 1;
        Some(msg)
    }

    fn should_skip(&self, _msg: &MessageRef, _ledger: &ExportLedger) -> bool {
        false
    }

    fn on_error(&self, _msg: &MessageRef, _stage: Stage, _err: &Error) -> Flow {
        Flow::Abort
    }

    fn should_reconnect(&self, visited: usize, deleting: bool) -> bool {
        let every = self.reconnect_every as usize;
        deleting && every > 0 && visited > 0 && visited % every == 0
    }
}

/// The policy a configuration selects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolicyKind {
    #[default]
    NewestFirst,
    Descending {
        reconnect_every: u32,
    },
}

impl PolicyKind {
    pub fn build(&self) -> Box<dyn ExportPolicy> {
        match *self {
            PolicyKind::NewestFirst => Box::new(NewestFirst::default()),
            PolicyKind::Descending { reconnect_every } => {
                Box::new(Descending::new(reconnect_every))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMailbox;

    fn refs(policy: &mut dyn ExportPolicy) -> Vec<Seq> {
        std::iter::from_fn(|| policy.next_ref()).map(|r| r.index).collect()
    }

    #[test]
    fn newest_first_order() {
        let mailbox = FakeMailbox::with_messages(3);
        let mut session = mailbox.session();
        let mut policy = NewestFirst::default();
        let stat = session.stat().unwrap();
        policy.enumerate(&mut session, &stat).unwrap();
        assert_eq!(refs(&mut policy), vec![3, 2, 1]);
    }

    #[test]
    fn newest_first_skips_known_uids() {
        let policy = NewestFirst::default();
        let mut ledger = ExportLedger::default();
        ledger.insert("U1", 1);
        let known = MessageRef {
            index: 1,
            uid: "U1".into(),
        };
        let unknown = MessageRef {
            index: 2,
            uid: "U2".into(),
        };
        assert!(policy.should_skip(&known, &ledger));
        assert!(!policy.should_skip(&unknown, &ledger));
        assert!(!policy.should_skip(&MessageRef::numbered(1), &ledger));
    }

    #[test]
    fn newest_first_tolerates() {
        let policy = NewestFirst::default();
        let msg = MessageRef::numbered(1);
        let err = Error::ErrResponse("no such message".into());
        assert_eq!(policy.on_error(&msg, Stage::Header, &err), Flow::Skip);
        assert_eq!(policy.on_error(&msg, Stage::Body, &err), Flow::Skip);
        assert_eq!(policy.on_error(&msg, Stage::Delete, &err), Flow::Skip);
        let denied = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        ));
        assert_eq!(policy.on_error(&msg, Stage::Write, &denied), Flow::Skip);
        assert!(!policy.should_reconnect(50, true));
    }

    #[test]
    fn newest_first_stops_on_broken_session() {
        let policy = NewestFirst::default();
        let msg = MessageRef::numbered(1);
        let timeout = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"));
        for stage in [Stage::Header, Stage::Body, Stage::Delete] {
            assert_eq!(policy.on_error(&msg, stage, &Error::ConnectionLost), Flow::Abort);
            assert_eq!(policy.on_error(&msg, stage, &timeout), Flow::Abort);
        }
    }

    #[test]
    fn descending_counts_down() {
        let mailbox = FakeMailbox::with_messages(4);
        let mut session = mailbox.session();
        let mut policy = Descending::default();
        let stat = session.stat().unwrap();
        policy.enumerate(&mut session, &stat).unwrap();
        assert_eq!(refs(&mut policy), vec![4, 3, 2, 1]);
        assert!(policy.next_ref().is_none());
    }

    #[test]
    fn descending_reconnects_only_when_deleting() {
        let policy = Descending::new(2);
        assert!(!policy.should_reconnect(0, true));
        assert!(!policy.should_reconnect(1, true));
        assert!(policy.should_reconnect(2, true));
        assert!(!policy.should_reconnect(3, true));
        assert!(policy.should_reconnect(4, true));
        assert!(!policy.should_reconnect(2, false));
        assert_eq!(
            policy.on_error(&MessageRef::numbered(1), Stage::Body, &Error::ConnectionLost),
            Flow::Abort
        );
    }

    #[test]
    fn kind_builds() {
        assert_eq!(PolicyKind::default().build().name(), "newest-first");
        let policy = PolicyKind::Descending { reconnect_every: 5 }.build();
        assert_eq!(policy.name(), "descending");
        assert!(!policy.uses_ledger());
    }
}
