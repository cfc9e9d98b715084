//! The export driver: walks a mailbox under an [`ExportPolicy`] and writes every message it
//! visits to a [`FileStore`].

use std::fmt;

use crate::config::ExportConfig;
use crate::error::{Error, Result};
use crate::ledger::ExportLedger;
use crate::mailbox::{MailboxClient, MailboxSession};
use crate::naming::{NameSynthesizer, EXTENSION};
use crate::store::FileStore;
use crate::types::MessageRef;
use crate::utils::human_bytes;

mod policy;

pub use self::policy::{
    Descending, ExportPolicy, Flow, NewestFirst, PolicyKind, Stage, DEFAULT_RECONNECT_EVERY,
};

/// What a run did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Messages written to the store.
    pub saved: usize,
    /// Messages the ledger already listed.
    pub skipped_known: usize,
    /// Messages whose file was already present.
    pub skipped_existing: usize,
    /// Messages given up on after an error.
    pub failed: usize,
    /// Messages removed from the server.
    pub deleted: usize,
}

impl fmt::Display for ExportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} saved, {} already exported, {} already on disk, {} failed, {} removed",
            self.saved, self.skipped_known, self.skipped_existing, self.failed, self.deleted
        )
    }
}

enum Outcome {
    Saved { deleted: bool },
    Exists { deleted: bool },
    Failed,
}

/// Owns the session of a run and closes it however the run ends.
struct SessionGuard<'a, C: MailboxClient> {
    client: &'a C,
    config: &'a ExportConfig,
    session: Option<C::Session>,
}

impl<'a, C: MailboxClient> SessionGuard<'a, C> {
    fn open(client: &'a C, config: &'a ExportConfig) -> Result<Self> {
        let session = client.connect(&config.host, config.port, config.tls)?;
        Ok(SessionGuard {
            client,
            config,
            session: Some(session),
        })
    }

    fn session(&mut self) -> Result<&mut C::Session> {
        self.session.as_mut().ok_or(Error::ConnectionLost)
    }

    /// Close the session and open a new one, committing any deletions.
    fn reconnect(&mut self) -> Result<()> {
        self.close();
        let config = self.config;
        self.session = Some(self.client.connect(&config.host, config.port, config.tls)?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            tracing::info!("disconnecting {}:{}", self.config.host, self.config.port);
            if let Err(e) = session.close() {
                tracing::warn!("disconnect failed: {}", e);
            }
        }
    }
}

impl<'a, C: MailboxClient> Drop for SessionGuard<'a, C> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Exports messages from a mailbox into a store.
///
/// ```no_run
/// use export_mail::config::ExportConfig;
/// use export_mail::export::Exporter;
/// use export_mail::mailbox::Pop3Mailbox;
/// use export_mail::store::FsStore;
///
/// # fn main() -> export_mail::Result<()> {
/// let mut config = ExportConfig::new("pop.example.com");
/// config.output_dir = "mail".into();
/// let mailbox = Pop3Mailbox::new("bob", "hunter2");
/// let summary = Exporter::new(mailbox, FsStore, config).run()?;
/// println!("{}", summary);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Exporter<C, F> {
    client: C,
    store: F,
    config: ExportConfig,
    names: NameSynthesizer,
}

impl<C: MailboxClient, F: FileStore> Exporter<C, F> {
    pub fn new(client: C, store: F, config: ExportConfig) -> Self {
        Exporter {
            client,
            store,
            config,
            names: NameSynthesizer::new(),
        }
    }

    /// Name files with `names` instead of the default synthesizer.
    pub fn with_names(mut self, names: NameSynthesizer) -> Self {
        self.names = names;
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Connect, export under the configured policy, and disconnect.
    ///
    /// Connection, authentication and enumeration errors end the run, as does any error the
    /// policy decides to abort on. The session is closed on every path.
    pub fn run(&self) -> Result<ExportSummary> {
        self.config.validate()?;
        let mut policy = self.config.policy.build();
        tracing::debug!(
            "policy {}, limit {}, output {}",
            policy.name(),
            self.config.limit,
            self.config.output_dir.display()
        );

        let mut guard = SessionGuard::open(&self.client, &self.config)?;
        let stat = guard.session()?.stat()?;
        tracing::info!(
            "found {} messages on server, total size {}",
            stat.count,
            human_bytes(stat.size)
        );
        policy.enumerate(guard.session()?, &stat)?;

        let mut ledger = if policy.uses_ledger() {
            let ledger = ExportLedger::load(self.config.ledger_path());
            tracing::debug!(
                "{} messages exported before according to {}",
                ledger.len(),
                ledger.path().display()
            );
            ledger
        } else {
            ExportLedger::default()
        };

        let mut summary = ExportSummary::default();
        let mut visited = 0;
        while !self.config.limit.reached(summary.saved) {
            let msg = match policy.next_ref() {
                Some(msg) => msg,
                None => break,
            };
            if policy.should_skip(&msg, &ledger) {
                tracing::debug!("message {} is saved before, skipped", msg);
                summary.skipped_known += 1;
                continue;
            }
            if policy.should_reconnect(visited, self.config.delete) {
                tracing::info!("reconnecting after {} messages", visited);
                guard.reconnect()?;
            }
            visited += 1;

            let span = tracing::info_span!("message", index = msg.index);
            let _enter = span.enter();
            match self.export_one(guard.session()?, &msg, policy.as_ref())? {
                Outcome::Saved { deleted } => {
                    summary.saved += 1;
                    if deleted {
                        summary.deleted += 1;
                    }
                    if policy.uses_ledger() && msg.has_uid() {
                        ledger.insert(msg.uid.clone(), msg.index);
                        if let Err(e) = ledger.record() {
                            tracing::error!(
                                "cannot record {}: {}",
                                ledger.path().display(),
                                e
                            );
                        }
                    }
                }
                Outcome::Exists { deleted } => {
                    summary.skipped_existing += 1;
                    if deleted {
                        summary.deleted += 1;
                    }
                }
                Outcome::Failed => summary.failed += 1,
            }
        }

        tracing::info!("export finished: {}", summary);
        Ok(summary)
    }

    fn export_one(
        &self,
        session: &mut C::Session,
        msg: &MessageRef,
        policy: &dyn ExportPolicy,
    ) -> Result<Outcome> {
        tracing::debug!("read header");
        let headers = match session.fetch_header(msg.index) {
            Ok(headers) => headers,
            Err(e) => return self.failed(policy, msg, Stage::Header, e),
        };
        let name = self.names.synthesize(&headers);
        let path = self
            .config
            .output_dir
            .join(format!("{}.{}", name, EXTENSION));
        tracing::debug!("read header done: {}", name);

        if self.store.exists(&path) {
            tracing::warn!("file {} already exists, skipped", path.display());
            // an earlier run saved it but could not remove it
            return match self.remove(session, msg, policy)? {
                Some(deleted) => Ok(Outcome::Exists { deleted }),
                None => Ok(Outcome::Failed),
            };
        }

        tracing::debug!("read body");
        let body = match session.fetch_body(msg.index) {
            Ok(body) => body,
            Err(e) => return self.failed(policy, msg, Stage::Body, e),
        };
        if let Err(e) = self.store.write_file(&path, &body, true) {
            return self.failed(policy, msg, Stage::Write, e);
        }
        tracing::info!("save message {} done", path.display());

        match self.remove(session, msg, policy)? {
            Some(deleted) => Ok(Outcome::Saved { deleted }),
            None => Ok(Outcome::Failed),
        }
    }

    /// Remove `msg` from the server if the run deletes. `None` means the removal failed and
    /// the message is given up on.
    fn remove(
        &self,
        session: &mut C::Session,
        msg: &MessageRef,
        policy: &dyn ExportPolicy,
    ) -> Result<Option<bool>> {
        if !self.config.delete {
            return Ok(Some(false));
        }
        match session.delete(msg.index) {
            Ok(()) => {
                tracing::debug!("message {} removed", msg);
                Ok(Some(true))
            }
            Err(e) => self.failed(policy, msg, Stage::Delete, e).map(|_| None),
        }
    }

    fn failed(
        &self,
        policy: &dyn ExportPolicy,
        msg: &MessageRef,
        stage: Stage,
        err: Error,
    ) -> Result<Outcome> {
        match policy.on_error(msg, stage, &err) {
            Flow::Abort => {
                tracing::error!("{} message {} failed, stopping: {}", stage, msg, err);
                Err(err)
            }
            Flow::Skip => {
                tracing::error!("{} message {} failed: {}", stage, msg, err);
                Ok(Outcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CharsetRegistry, HeaderCodec};
    use crate::config::Limit;
    use crate::testing::{Call, FakeMailbox, FakeMessage, MemoryStore};
    use crate::types::MessageHeaders;
    use chrono::{FixedOffset, TimeZone};
    use std::path::{Path, PathBuf};

    struct Fixture {
        mailbox: FakeMailbox,
        store: MemoryStore,
        config: ExportConfig,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(messages: u32) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = ExportConfig::new("pop.example.com");
            config.output_dir = PathBuf::from("out");
            config.ledger_path = Some(dir.path().join("saved-uid.json"));
            Fixture {
                mailbox: FakeMailbox::with_messages(messages),
                store: MemoryStore::new(),
                config,
                _dir: dir,
            }
        }

        fn descending(mut self, reconnect_every: u32) -> Self {
            self.config.policy = PolicyKind::Descending { reconnect_every };
            self
        }

        fn run(&self) -> Result<ExportSummary> {
            Exporter::new(
                self.mailbox.clone(),
                self.store.clone(),
                self.config.clone(),
            )
            .run()
        }

        fn ledger(&self) -> ExportLedger {
            ExportLedger::load(self.config.ledger_path())
        }
    }

    fn file_of(message: &FakeMessage) -> PathBuf {
        let headers = MessageHeaders::parse(&message.raw).unwrap();
        Path::new("out").join(format!(
            "{}.eml",
            NameSynthesizer::new().synthesize(&headers)
        ))
    }

    fn headers_fetched(calls: &[Call]) -> Vec<u32> {
        calls
            .iter()
            .filter_map(|c| match *c {
                Call::Header(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn newest_first_exports_everything() {
        let fx = Fixture::new(3);
        let summary = fx.run().unwrap();
        assert_eq!(summary.saved, 3);
        assert_eq!(headers_fetched(&fx.mailbox.calls()), vec![3, 2, 1]);

        for n in 1..=3 {
            let message = FakeMessage::numbered(n);
            assert_eq!(fx.store.get(file_of(&message)), Some(message.raw));
        }
        let ledger = fx.ledger();
        assert!(ledger.contains("U1") && ledger.contains("U2") && ledger.contains("U3"));

        let calls = fx.mailbox.calls();
        assert_eq!(calls.first(), Some(&Call::Connect));
        assert_eq!(calls.last(), Some(&Call::Close));
        assert!(!calls.iter().any(|c| matches!(c, Call::Delete(_))));
    }

    #[test]
    fn file_name_from_headers() {
        let fx = Fixture::new(0);
        fx.mailbox.push(FakeMessage::new(
            "U1",
            &MessageHeaders {
                from: "<bob@example.com>".into(),
                date: "Mon, 02 Jan 2006 15:04:05 +0000".into(),
                message_id: "abc123".into(),
                subject: "Hello".into(),
            },
        ));
        fx.run().unwrap();
        assert_eq!(
            fx.store.paths(),
            vec![PathBuf::from(
                "out/[bob@example.com][2006-01-02 15.04.05][e99a1][Hello].eml"
            )]
        );
    }

    #[test]
    fn unknown_charset_does_not_abort() {
        let fx = Fixture::new(0);
        fx.mailbox.push(FakeMessage::new(
            "U1",
            &MessageHeaders {
                from: "=?UTF-8?B?Qm9i?= <bob@example.com>".into(),
                date: "Mon, 02 Jan 2006 15:04:05 +0000".into(),
                message_id: "abc123".into(),
                subject: "=?x-unknown?Q?Hi?=".into(),
            },
        ));
        assert_eq!(fx.run().unwrap().saved, 1);
        assert_eq!(
            fx.store.paths(),
            vec![PathBuf::from(
                "out/[bob@example.com][2006-01-02 15.04.05][e99a1][=.x-unknown.Q.Hi.=].eml"
            )]
        );
    }

    #[test]
    fn known_uid_not_fetched_or_counted() {
        let mut fx = Fixture::new(3);
        let mut ledger = fx.ledger();
        ledger.insert("U3", 3);
        ledger.record().unwrap();
        fx.config.limit = Limit::from(1);

        let summary = fx.run().unwrap();
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.skipped_known, 1);
        let calls = fx.mailbox.calls();
        assert!(!calls.contains(&Call::Header(3)));
        assert!(!calls.contains(&Call::Body(3)));
        assert_eq!(headers_fetched(&calls), vec![2]);
        assert_eq!(fx.store.paths(), vec![file_of(&FakeMessage::numbered(2))]);
    }

    #[test]
    fn existing_file_skipped() {
        let fx = Fixture::new(2);
        let existing = file_of(&FakeMessage::numbered(2));
        fx.store.insert(&existing, b"old");

        let summary = fx.run().unwrap();
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(fx.store.get(&existing), Some(b"old".to_vec()));
        assert!(!fx.mailbox.calls().contains(&Call::Body(2)));
        assert!(!fx.ledger().contains("U2"));
        assert!(fx.ledger().contains("U1"));
    }

    #[test]
    fn newest_first_continues_after_errors() {
        let fx = Fixture::new(3);
        fx.mailbox.fail_on(Call::Body(2));
        fx.store.fail_on(file_of(&FakeMessage::numbered(1)));

        let summary = fx.run().unwrap();
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.failed, 2);
        let ledger = fx.ledger();
        assert!(ledger.contains("U3"));
        assert!(!ledger.contains("U2") && !ledger.contains("U1"));
    }

    #[test]
    fn delete_failure_retried_next_run() {
        let mut fx = Fixture::new(3);
        fx.config.delete = true;
        fx.mailbox.fail_on(Call::Delete(3));

        let summary = fx.run().unwrap();
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.deleted, 2);
        assert!(!fx.ledger().contains("U3"));
        assert!(fx.store.get(file_of(&FakeMessage::numbered(3))).is_some());
        // deletions are committed by the final QUIT
        assert_eq!(fx.mailbox.uids(), vec!["U3".to_string()]);

        let healthy = FakeMailbox::new();
        healthy.push(FakeMessage::numbered(3));
        let summary = Exporter::new(healthy.clone(), fx.store.clone(), fx.config.clone())
            .run()
            .unwrap();
        assert_eq!(summary.saved, 0);
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(summary.deleted, 1);
        assert!(!healthy.calls().contains(&Call::Body(1)));
        assert!(healthy.uids().is_empty());
        assert!(!fx.ledger().contains("U3"));
    }

    #[test]
    fn existing_file_kept_without_delete() {
        let fx = Fixture::new(1);
        fx.store.insert(file_of(&FakeMessage::numbered(1)), b"old");
        let summary = fx.run().unwrap();
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(summary.deleted, 0);
        assert_eq!(fx.mailbox.uids(), vec!["U1".to_string()]);
    }

    #[test]
    fn newest_first_stops_on_lost_connection() {
        let fx = Fixture::new(3);
        fx.mailbox.disconnect_on(Call::Body(2));

        assert!(matches!(fx.run(), Err(Error::ConnectionLost)));
        let calls = fx.mailbox.calls();
        assert!(!calls.contains(&Call::Header(1)));
        assert_eq!(calls.last(), Some(&Call::Close));
        let ledger = fx.ledger();
        assert!(ledger.contains("U3"));
        assert!(!ledger.contains("U2"));
        assert_eq!(fx.store.paths(), vec![file_of(&FakeMessage::numbered(3))]);
    }

    #[test]
    fn custom_names() {
        let fx = Fixture::new(0);
        fx.mailbox.push(FakeMessage::new(
            "U1",
            &MessageHeaders {
                from: "bob@example.com".into(),
                date: "someday".into(),
                message_id: "abc123".into(),
                subject: "=?x-legacy?Q?hi_there?=".into(),
            },
        ));
        let mut charsets = CharsetRegistry::new();
        charsets.register("x-legacy", |bytes: &[u8]| {
            String::from_utf8_lossy(bytes).to_uppercase()
        });
        let names = NameSynthesizer::new()
            .with_codec(HeaderCodec::with_registry(charsets))
            .with_clock(|| {
                FixedOffset::east_opt(3600)
                    .unwrap()
                    .with_ymd_and_hms(2021, 6, 1, 8, 0, 0)
                    .unwrap()
            });

        let summary = Exporter::new(fx.mailbox.clone(), fx.store.clone(), fx.config.clone())
            .with_names(names)
            .run()
            .unwrap();
        assert_eq!(summary.saved, 1);
        assert_eq!(
            fx.store.paths(),
            vec![PathBuf::from(
                "out/[bob@example.com][2021-06-01 08.00.00][e99a1][HI THERE].eml"
            )]
        );
    }

    #[test]
    fn limit_stops_early() {
        let mut fx = Fixture::new(5);
        fx.config.limit = Limit::from(2);
        assert_eq!(fx.run().unwrap().saved, 2);
        assert_eq!(headers_fetched(&fx.mailbox.calls()), vec![5, 4]);
    }

    #[test]
    fn second_run_skips_everything() {
        let fx = Fixture::new(2);
        fx.run().unwrap();
        let summary = fx.run().unwrap();
        assert_eq!(summary.saved, 0);
        assert_eq!(summary.skipped_known, 2);
    }

    #[test]
    fn descending_aborts_on_body_error() {
        let fx = Fixture::new(4).descending(50);
        fx.mailbox.fail_on(Call::Body(3));

        let err = fx.run().unwrap_err();
        assert!(matches!(err, Error::ErrResponse(_)));
        let calls = fx.mailbox.calls();
        assert!(calls.contains(&Call::Body(3)));
        assert!(!calls.contains(&Call::Header(2)));
        assert_eq!(calls.last(), Some(&Call::Close));
        assert_eq!(fx.store.paths(), vec![file_of(&FakeMessage::numbered(4))]);
    }

    #[test]
    fn descending_aborts_on_header_error() {
        let fx = Fixture::new(4).descending(50);
        fx.mailbox.fail_on(Call::Header(3));

        assert!(matches!(fx.run(), Err(Error::ErrResponse(_))));
        let calls = fx.mailbox.calls();
        assert!(!calls.contains(&Call::Body(3)));
        assert!(!calls.contains(&Call::Header(2)));
        assert_eq!(calls.last(), Some(&Call::Close));
        assert_eq!(fx.store.paths(), vec![file_of(&FakeMessage::numbered(4))]);
    }

    #[test]
    fn descending_aborts_on_write_error() {
        let fx = Fixture::new(4).descending(50);
        fx.store.fail_on(file_of(&FakeMessage::numbered(3)));

        assert!(matches!(fx.run(), Err(Error::Io(_))));
        let calls = fx.mailbox.calls();
        assert!(calls.contains(&Call::Body(3)));
        assert!(!calls.contains(&Call::Header(2)));
        assert_eq!(calls.last(), Some(&Call::Close));
        assert_eq!(fx.store.paths(), vec![file_of(&FakeMessage::numbered(4))]);
    }

    #[test]
    fn descending_aborts_on_delete_error() {
        let mut fx = Fixture::new(4).descending(50);
        fx.config.delete = true;
        fx.mailbox.fail_on(Call::Delete(3));

        assert!(matches!(fx.run(), Err(Error::ErrResponse(_))));
        let calls = fx.mailbox.calls();
        assert!(calls.contains(&Call::Delete(4)));
        assert!(!calls.contains(&Call::Header(2)));
        assert_eq!(calls.last(), Some(&Call::Close));
        assert_eq!(fx.store.len(), 2);
        // the removal of 4 is still committed on close
        assert_eq!(
            fx.mailbox.uids(),
            vec!["U1".to_string(), "U2".to_string(), "U3".to_string()]
        );
    }

    #[test]
    fn descending_has_no_ledger() {
        let fx = Fixture::new(2).descending(50);
        assert_eq!(fx.run().unwrap().saved, 2);
        assert!(!fx.config.ledger_path().exists());
        assert!(!fx.mailbox.calls().iter().any(|c| matches!(c, Call::List(_))));
    }

    #[test]
    fn descending_reconnects_while_deleting() {
        let mut fx = Fixture::new(5).descending(2);
        fx.config.delete = true;

        let summary = fx.run().unwrap();
        assert_eq!(summary.saved, 5);
        assert_eq!(summary.deleted, 5);
        let calls = fx.mailbox.calls();
        assert_eq!(calls.iter().filter(|c| **c == Call::Connect).count(), 3);
        assert_eq!(calls.iter().filter(|c| **c == Call::Close).count(), 3);
        assert!(fx.mailbox.uids().is_empty());
        assert_eq!(fx.store.len(), 5);
    }

    #[test]
    fn descending_without_delete_never_reconnects() {
        let fx = Fixture::new(5).descending(2);
        fx.run().unwrap();
        let connects = fx.mailbox.calls().iter().filter(|c| **c == Call::Connect).count();
        assert_eq!(connects, 1);
    }

    #[test]
    fn connect_failure() {
        let fx = Fixture::new(1);
        fx.mailbox.fail_on(Call::Connect);
        assert!(fx.run().is_err());
        assert_eq!(fx.mailbox.calls(), vec![Call::Connect]);
    }

    #[test]
    fn enumeration_failure_still_closes() {
        let fx = Fixture::new(1);
        fx.mailbox.fail_on(Call::List(0));
        assert!(fx.run().is_err());
        assert_eq!(
            fx.mailbox.calls(),
            vec![Call::Connect, Call::Stat, Call::List(0), Call::Close]
        );
        assert!(fx.store.is_empty());
    }

    #[test]
    fn invalid_config_never_connects() {
        let mut fx = Fixture::new(1).descending(0);
        fx.config.delete = true;
        assert!(matches!(fx.run(), Err(Error::Config(_))));
        assert!(fx.mailbox.calls().is_empty());
    }
}
