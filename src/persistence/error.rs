//! Persistence-specific error helpers

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::persistence::{PersistenceError, PersistenceResult};

/// Helper trait for persistence-specific error contexts
pub trait PersistenceErrorContext<T> {
    fn persistence_context(self, context: &str) -> PersistenceResult<T>;
}

impl<T> PersistenceErrorContext<T> for Result<T, std::io::Error> {
    fn persistence_context(self, context: &str) -> PersistenceResult<T> {
        self.map_err(|e| PersistenceError::IoError(std::io::Error::new(e.kind(), format!("{}: {}", context, e))))
    }
}

/// Write `data` to `path` through a sibling temp file and a rename, so
/// readers never observe a partially written file.
pub fn atomic_write(path: impl AsRef<Path>, data: &[u8]) -> PersistenceResult<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("tmp");

    {
        let mut file = fs::File::create(&tmp_path)
            .persistence_context(&format!("create {}", tmp_path.display()))?;
        file.write_all(data)
            .persistence_context(&format!("write {}", tmp_path.display()))?;
        file.sync_all()
            .persistence_context(&format!("sync {}", tmp_path.display()))?;
    }

    fs::rename(&tmp_path, path).persistence_context(&format!("rename into {}", path.display()))
}

/// Create a corrupted data error
pub fn corrupted_data(reason: impl Into<String>) -> PersistenceError {
    PersistenceError::CorruptedData(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.0.0.chunk");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_context_keeps_error_kind() {
        let err: std::io::Result<()> = Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        match err.persistence_context("open") {
            Err(PersistenceError::IoError(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::NotFound);
                assert!(e.to_string().starts_with("open: "));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
