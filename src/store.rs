//! Where exported messages are written.

use std::fs;
use std::path::Path;

use crate::error::Result;

/// A destination for exported message files.
pub trait FileStore {
    /// Whether a file already exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Write `data` to `path`, replacing any existing file. With `create_dirs`, missing parent
    /// directories are created first.
    fn write_file(&self, path: &Path, data: &[u8], create_dirs: bool) -> Result<()>;
}

/// The local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsStore;

impl FileStore for FsStore {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write_file(&self, path: &Path, data: &[u8], create_dirs: bool) -> Result<()> {
        if create_dirs {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, data)?;
        Ok(())
    }
}
