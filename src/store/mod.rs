use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::ledger::{Ledger, LedgerError, LedgerSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed snapshot: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("snapshot state root {stored} does not match recomputed {actual}")]
    RootMismatch { stored: String, actual: String },
    #[error("snapshot rejected: {0}")]
    Ledger(#[from] LedgerError),
}

/// JSON snapshot file holding one ledger.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reads the snapshot and checks its state root before rebuilding.
    pub fn load(&self) -> Result<Ledger, StoreError> {
        let bytes = fs::read(&self.path).map_err(|source| self.io(source))?;
        let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)?;
        let stored = snapshot.state_root;
        let ledger = Ledger::from_snapshot(snapshot)?;
        let actual = ledger.state_root();
        if stored != actual {
            return Err(StoreError::RootMismatch {
                stored: hex::encode(stored),
                actual: hex::encode(actual),
            });
        }
        debug!(path = %self.path.display(), height = ledger.meta().height, "snapshot loaded");
        Ok(ledger)
    }

    /// Writes to a sibling temp file first, then renames over the target.
    pub fn save(&self, ledger: &Ledger) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io(source))?;
        }
        let encoded = serde_json::to_vec_pretty(&ledger.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        if let Err(source) = write_then_rename(&tmp, &self.path, &encoded) {
            // best effort
            let _ = fs::remove_file(&tmp);
            return Err(self.io(source));
        }
        debug!(path = %self.path.display(), bytes = encoded.len(), "snapshot saved");
        Ok(())
    }

    fn io(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn write_then_rename(tmp: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp, target)
}
