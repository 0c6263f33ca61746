//! File-per-session store.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use super::Store;
use crate::codec::{BinaryCodec, SessionCodec};
use crate::error::{Error, Result};
use crate::lock::KeyLockTable;
use crate::session::Session;

/// Extension of session files.
pub const SESSION_FILE_EXT: &str = "session";

/// Store that keeps each session in `<directory>/<id>.session`.
///
/// Saves and removes take the per-id write lock, loads the read lock, so
/// operations on one id are ordered while different ids run in parallel.
/// Ids that would resolve outside the directory are treated as absent.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    codec: Arc<dyn SessionCodec>,
    locks: KeyLockTable,
}

impl FileStore {
    /// Open a store rooted at `directory`, creating it if needed.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        Self::with_codec(directory, Arc::new(BinaryCodec))
    }

    /// Open a store that encodes sessions with `codec`.
    pub fn with_codec(directory: impl AsRef<Path>, codec: Arc<dyn SessionCodec>) -> Result<Self> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;
        let root = directory.canonicalize()?;
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "store path {} is not a directory",
                root.display()
            )));
        }

        info!("File store opened at {:?}", root);
        Ok(Self {
            root,
            codec,
            locks: KeyLockTable::new(),
        })
    }

    /// The canonical store directory.
    pub fn directory(&self) -> &Path {
        &self.root
    }

    /// Resolve the file for `id`, or `None` if the id is unsafe.
    fn session_path(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\', ':', '\0']) {
            warn!(session_id = %id, "Rejecting session id that is not a plain file name");
            return None;
        }

        let path = self.root.join(format!("{id}.{SESSION_FILE_EXT}"));
        if path.parent() != Some(self.root.as_path()) {
            warn!(session_id = %id, "Rejecting session id that resolves outside the store");
            return None;
        }

        if let Ok(meta) = fs::symlink_metadata(&path) {
            if meta.file_type().is_symlink() {
                let escapes = match path.canonicalize() {
                    Ok(target) => !target.starts_with(&self.root),
                    Err(_) => true,
                };
                if escapes {
                    warn!(session_id = %id, "Rejecting session file linked outside the store");
                    return None;
                }
            }
        }

        Some(path)
    }
}

impl Store for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    fn keys(&self, _expired_only: bool) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                error!(directory = ?self.root, error = %e, "Failed to list store directory");
                return Err(e.into());
            }
        };

        let suffix = format!(".{SESSION_FILE_EXT}");
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(&suffix)) {
                if !id.is_empty() {
                    keys.push(id.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn size(&self) -> Result<usize> {
        Ok(self.keys(false)?.len())
    }

    fn load(&self, id: &str) -> Result<Option<Session>> {
        let Some(path) = self.session_path(id) else {
            return Ok(None);
        };

        let bytes = {
            let _guard = self.locks.read(id);
            match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    error!(session_id = %id, path = ?path, error = %e, "Failed to read session file");
                    return Err(e.into());
                }
            }
        };

        let data = self.codec.decode(&bytes)?;
        debug!(session_id = %id, "Loaded session from file store");
        Ok(Some(Session::from_data(data)))
    }

    fn save(&self, session: &Session) -> Result<()> {
        let id = session.id();
        let Some(path) = self.session_path(&id) else {
            return Ok(());
        };

        // Encode first: dropping live attributes runs user callbacks.
        let bytes = self.codec.encode(&session.to_data())?;

        let _guard = self.locks.write(&id);
        if let Err(e) = fs::write(&path, &bytes) {
            error!(session_id = %id, path = ?path, error = %e, "Failed to write session file");
            return Err(e.into());
        }
        trace!(session_id = %id, bytes = bytes.len(), "Saved session to file store");
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let Some(path) = self.session_path(id) else {
            return Ok(());
        };

        let _guard = self.locks.write(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(session_id = %id, "Removed session file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!(session_id = %id, path = ?path, error = %e, "Failed to remove session file");
                Err(e.into())
            }
        }
    }

    fn clear(&self) -> Result<()> {
        for id in self.keys(false)? {
            self.remove(&id)?;
        }
        Ok(())
    }
}
