use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{atomic_write, PersistenceBackend, PersistenceErrorContext, PersistenceResult};
use crate::world::ChunkPos;

/// One file per chunk, `c.{x}.{z}.chunk`, under a root directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (and create if needed) the chunk directory
    pub fn open(root: impl AsRef<Path>) -> PersistenceResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).persistence_context(&format!("create {}", root.display()))?;
        log::info!("[FileBackend] Using chunk directory {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, pos: ChunkPos) -> PathBuf {
        self.root.join(format!("c.{}.{}.chunk", pos.x, pos.z))
    }
}

impl PersistenceBackend for FileBackend {
    fn save(&self, pos: ChunkPos, data: &[u8]) -> PersistenceResult<()> {
        atomic_write(self.chunk_path(pos), data)
    }

    fn load(&self, pos: ChunkPos) -> PersistenceResult<Option<Vec<u8>>> {
        let path = self.chunk_path(pos);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).persistence_context(&format!("read {}", path.display())),
        }
    }

    fn remove(&self, pos: ChunkPos) -> PersistenceResult<()> {
        let path = self.chunk_path(pos);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).persistence_context(&format!("remove {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path().join("region")).unwrap();
        let pos = ChunkPos::new(-4, 9);

        assert_eq!(backend.load(pos).unwrap(), None);
        backend.save(pos, b"payload").unwrap();
        assert_eq!(backend.load(pos).unwrap().as_deref(), Some(&b"payload"[..]));
        assert!(backend.root().join("c.-4.9.chunk").exists());

        backend.remove(pos).unwrap();
        assert_eq!(backend.load(pos).unwrap(), None);
        backend.remove(pos).unwrap();
    }
}
