//! One file per record under an application directory.

use log::debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use profile_mirror_core::persistence::PersistenceStore;

use crate::error::{Result, StorageError};

const RECORD_EXTENSION: &str = "record";

/// Writes go to a temporary file that is renamed over the record, so a crash leaves either the
/// old or the new version.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    /// Uses `base_dir/app_id`, creating it when missing.
    pub fn open(base_dir: &Path, app_id: &str) -> Result<Self> {
        validate_key(app_id)?;
        let dir = base_dir.join(app_id);
        fs::create_dir_all(&dir)?;
        debug!("[ProfileStore] Using record directory {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.{}", key, RECORD_EXTENSION)))
    }

    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.record_path(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.record_path(key)?;
        let tmp = self.dir.join(format!(".{}.{}.tmp", key, RECORD_EXTENSION));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

impl PersistenceStore for FileRecordStore {
    fn load(&self, key: &str) -> profile_mirror_core::Result<Option<Vec<u8>>> {
        Ok(self.read(key)?)
    }

    fn save(&self, key: &str, bytes: &[u8]) -> profile_mirror_core::Result<()> {
        Ok(self.write(key, bytes)?)
    }
}
