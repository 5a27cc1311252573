// src/task/store.rs

//! On-disk result timestamp store.
//!
//! Layout:
//!
//! `<state_dir>/stamps/<blake3(identity)>.json`
//!
//! Each file records the identity it belongs to and when the result was
//! last produced. A missing or unreadable stamp means "never computed".

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::task::{Identity, Timestamp};

const STAMP_DIR: &str = "stamps";

#[derive(Debug, Serialize, Deserialize)]
struct StampRecord {
    identity: Identity,
    /// Nanoseconds since the epoch, matching file mtime precision.
    completed_at_ns: u64,
}

/// Stores one completion stamp per task identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampStore {
    root: PathBuf,
}

impl StampStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: state_dir.into().join(STAMP_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stamp_path(&self, identity: &Identity) -> PathBuf {
        self.root.join(format!("{}.json", identity.digest()))
    }

    /// Timestamp of the last recorded result for `identity`.
    pub fn load(&self, identity: &Identity) -> Option<Timestamp> {
        let path = self.stamp_path(identity);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = ?path, error = %e, "failed to read stamp; treating as missing");
                return None;
            }
        };

        match serde_json::from_str::<StampRecord>(&contents) {
            Ok(record) if record.identity == *identity => {
                Some(UNIX_EPOCH + Duration::from_nanos(record.completed_at_ns))
            }
            Ok(_) => {
                warn!(path = ?path, "stamp belongs to a different identity; ignoring");
                None
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "corrupt stamp; treating as missing");
                None
            }
        }
    }

    /// Record that `identity` produced a result at `at`.
    pub fn save(&self, identity: &Identity, at: Timestamp) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating stamp directory {:?}", self.root))?;

        let since_epoch = at
            .duration_since(UNIX_EPOCH)
            .context("stamp time before UNIX epoch")?;
        let completed_at_ns =
            u64::try_from(since_epoch.as_nanos()).context("stamp time out of range")?;
        let record = StampRecord {
            identity: identity.clone(),
            completed_at_ns,
        };

        let path = self.stamp_path(identity);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&record)?)
            .with_context(|| format!("writing stamp {:?}", tmp))?;
        fs::rename(&tmp, &path).with_context(|| format!("renaming stamp into {:?}", path))?;

        debug!(task = %identity, path = ?path, "stored result stamp");
        Ok(())
    }

    /// Record a result produced now.
    pub fn touch(&self, identity: &Identity) -> Result<Timestamp> {
        let now = SystemTime::now();
        self.save(identity, now)?;
        Ok(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_stamp_is_none() {
        let dir = tempdir().unwrap();
        let store = StampStore::new(dir.path());
        assert_eq!(store.load(&Identity::new("command", "a")), None);
    }

    #[test]
    fn save_then_load_keeps_nanoseconds() {
        let dir = tempdir().unwrap();
        let store = StampStore::new(dir.path());
        let id = Identity::new("command", "a");
        let at = UNIX_EPOCH + Duration::from_nanos(1_700_000_000_123_456_789);

        store.save(&id, at).unwrap();

        assert_eq!(store.load(&id), Some(at));
        assert_eq!(store.load(&Identity::new("command", "b")), None);
    }

    #[test]
    fn corrupt_stamp_reads_as_missing() {
        let dir = tempdir().unwrap();
        let store = StampStore::new(dir.path());
        let id = Identity::new("command", "a");
        store.touch(&id).unwrap();
        fs::write(store.stamp_path(&id), "not json").unwrap();
        assert_eq!(store.load(&id), None);
    }

    #[test]
    fn source_written_just_before_stamp_is_not_newer() {
        let dir = tempdir().unwrap();
        let store = StampStore::new(dir.path());
        let id = Identity::new("command", "a");
        let source_mtime = UNIX_EPOCH + Duration::from_nanos(1_700_000_000_123_400_000);
        let stamped = source_mtime + Duration::from_nanos(500_000);

        store.save(&id, stamped).unwrap();

        let loaded = store.load(&id).unwrap();
        assert!(loaded > source_mtime);
        assert_eq!(loaded, stamped);
    }
}
