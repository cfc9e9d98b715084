//! What an export run does, independent of how it was asked for.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::export::PolicyKind;
use crate::ledger::LEDGER_FILE;

/// The POP3-over-TLS port.
pub const DEFAULT_PORT: u16 = 995;

/// How many messages a run may save.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Limit {
    #[default]
    Unlimited,
    AtMost(NonZeroUsize),
}

impl Limit {
    /// Whether `saved` messages exhaust this limit.
    pub fn reached(&self, saved: usize) -> bool {
        match *self {
            Limit::Unlimited => false,
            Limit::AtMost(n) => saved >= n.get(),
        }
    }
}

/// Zero means no limit.
impl From<usize> for Limit {
    fn from(n: usize) -> Self {
        NonZeroUsize::new(n).map_or(Limit::Unlimited, Limit::AtMost)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Limit::Unlimited => f.write_str("unlimited"),
            Limit::AtMost(n) => write!(f, "at most {}", n),
        }
    }
}

/// Settings for one export run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Directory the `.eml` files are written to.
    pub output_dir: PathBuf,
    /// Where the ledger lives; `None` puts it in `output_dir`.
    pub ledger_path: Option<PathBuf>,
    /// Remove each message from the server once it is saved.
    pub delete: bool,
    pub limit: Limit,
    pub policy: PolicyKind,
}

impl ExportConfig {
    /// Export everything from `host` over TLS into the working directory.
    pub fn new<H: Into<String>>(host: H) -> Self {
        ExportConfig {
            host: host.into(),
            port: DEFAULT_PORT,
            tls: true,
            output_dir: PathBuf::from("."),
            ledger_path: None,
            delete: false,
            limit: Limit::Unlimited,
            policy: PolicyKind::default(),
        }
    }

    /// The ledger file this run reads and writes.
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join(LEDGER_FILE))
    }

    /// Reject settings no run can use.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("no host given".into()));
        }
        if let PolicyKind::Descending { reconnect_every: 0 } = self.policy {
            return Err(Error::Config("reconnect interval must be at least 1".into()));
        }
        Ok(())
    }
}
