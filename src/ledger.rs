//! The persisted record of which messages have been exported.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::error::Result;
use crate::types::Seq;

/// Default file name of the ledger inside the output directory.
pub const LEDGER_FILE: &str = "saved-uid.json";

/// A map from server unique-id to the message-number it had when it was exported.
///
/// The message-number is kept for diagnosis only; lookups go by unique-id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportLedger {
    path: PathBuf,
    entries: BTreeMap<String, Seq>,
}

impl ExportLedger {
    /// Read the ledger at `path`.
    ///
    /// A missing file yields an empty ledger, and so does an unreadable or corrupt one, after a
    /// warning.
    pub fn load<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                tracing::warn!("ignoring corrupt ledger {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!("cannot read ledger {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        ExportLedger { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.entries.contains_key(uid)
    }

    pub fn insert<U: Into<String>>(&mut self, uid: U, index: Seq) {
        self.entries.insert(uid.into(), index);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the whole ledger to its file.
    ///
    /// The data goes to a sibling temporary file first, which is then renamed over the ledger.
    pub fn record(&self) -> Result<()> {
        let mut data = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut data, PrettyFormatter::with_indent(b" "));
        self.entries
            .serialize(&mut ser)
            .map_err(io::Error::from)?;
        data.push(b'\n');

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.tmp_path();
        fs::write(&tmp, &data)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| LEDGER_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
