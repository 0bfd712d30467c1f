//! State Store (C1): one YAML file per workflow record under `.auto/state/`,
//! atomic writes, and a per-id exclusive lock held for the duration of save.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::workflow::WorkflowRecord;
use crate::{Error, Result};

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, issue_id: &str) -> PathBuf {
        self.dir.join(format!("{}.yaml", sanitize(issue_id)))
    }

    fn lock_path(&self, issue_id: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", sanitize(issue_id)))
    }

    pub fn load(&self, issue_id: &str) -> Result<WorkflowRecord> {
        let path = self.record_path(issue_id);
        if !path.exists() {
            return Err(Error::NotFound(format!("no workflow record for {issue_id}")));
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn try_load(&self, issue_id: &str) -> Result<Option<WorkflowRecord>> {
        match self.load(issue_id) {
            Ok(record) => Ok(Some(record)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persist `record` atomically (write-temp-then-rename), holding an
    /// exclusive create-only lock file for the duration of the write.
    pub fn save(&self, record: &WorkflowRecord) -> Result<()> {
        let lock_path = self.lock_path(&record.issue_id);
        let _lock = FileLock::acquire(&lock_path)?;

        let path = self.record_path(&record.issue_id);
        let tmp_path = path.with_extension("yaml.tmp");
        let serialized = serde_yaml::to_string(record)?;
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// List all parseable records, skipping and warning on any file that
    /// fails to parse.
    pub fn list(&self) -> Result<Vec<WorkflowRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            match fs::read_to_string(&path).map(|raw| serde_yaml::from_str::<WorkflowRecord>(&raw)) {
                Ok(Ok(record)) => records.push(record),
                Ok(Err(e)) => warn!(?path, error = %e, "skipping unparseable workflow record"),
                Err(e) => warn!(?path, error = %e, "skipping unreadable workflow record"),
            }
        }
        Ok(records)
    }

    pub fn delete(&self, issue_id: &str) -> Result<()> {
        let path = self.record_path(issue_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Remove all records in a terminal status; returns the count removed.
    pub fn purge_terminal(&self) -> Result<usize> {
        let mut removed = 0;
        for record in self.list()? {
            if record.status.is_terminal() {
                self.delete(&record.issue_id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn sanitize(issue_id: &str) -> String {
    issue_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// An exclusive, create-only lock file. Dropped (and removed) when the guard
/// goes out of scope.
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self> {
        std::fs::OpenOptions::new().write(true).create_new(true).open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Error::external(true, format!("workflow record is locked: {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(Self { path: path.to_path_buf() })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
