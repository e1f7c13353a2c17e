//! Storage backed by one JSON document per limiter id.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{trace, warn};

use super::{expires_at, is_expired, Storage};
use crate::clock::{Clock, SystemClock};
use crate::error::{RateLimiterError, Result};
use crate::ratelimit::LimiterState;

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    state: LimiterState,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Limiter state persisted under a directory.
///
/// Every write goes to its own temporary file that is then renamed over the
/// record, so a reader never sees a partially written document. A record
/// that cannot be decoded is reported as unavailable rather than read as
/// empty, so a damaged file never hands out a fresh budget.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileStorage {
    /// Open (and create if needed) a storage directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with_clock(dir, Arc::new(SystemClock))
    }

    pub fn open_with_clock<P: AsRef<Path>>(dir: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| unavailable(&dir, e))?;
        Ok(Self { dir, clock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document holding `id`.
    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_id(id)))
    }
}

impl Storage for FileStorage {
    fn fetch(&self, id: &str) -> Result<Option<LimiterState>> {
        let path = self.record_path(id);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&path, e)),
        };

        let record: Record = serde_json::from_slice(&contents).map_err(|e| {
            warn!(id = %id, path = %path.display(), error = %e, "Unreadable limiter state");
            RateLimiterError::StorageUnavailable(format!("{}: {}", path.display(), e))
        })?;

        if is_expired(record.expires_at, self.clock.now()) {
            trace!(id = %id, "Stored limiter state has expired");
            return Ok(None);
        }
        Ok(Some(record.state))
    }

    fn save(&self, id: &str, state: &LimiterState, ttl: Option<Duration>) -> Result<()> {
        let record = Record {
            state: state.clone(),
            expires_at: expires_at(self.clock.now(), ttl),
        };
        let json = serde_json::to_vec(&record).map_err(|e| {
            RateLimiterError::StorageUnavailable(format!("encoding state for {}: {}", id, e))
        })?;

        let path = self.record_path(id);
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| unavailable(&self.dir, e))?;
        tmp.write_all(&json).map_err(|e| unavailable(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| unavailable(&path, e.error))?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(&path, e)),
        }
    }
}

fn unavailable(path: &Path, error: io::Error) -> RateLimiterError {
    RateLimiterError::StorageUnavailable(format!("{}: {}", path.display(), error))
}

/// Make a limiter id safe to use as a file name.
///
/// ASCII letters, digits, `-` and `_` are kept; every other byte becomes
/// `%XX`, so distinct ids never map to the same file.
fn encode_id(id: &str) -> String {
    let mut encoded = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}
