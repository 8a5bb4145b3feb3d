//! Document storage collaborator
//!
//! The bridge only needs `path → bytes`; the filesystem implementation resolves paths
//! against a root folder and refuses anything that would escape it.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::BridgeError;

#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Read the full contents of a stored document
    async fn read(&self, path: &str) -> Result<Vec<u8>, BridgeError>;
}

/// Documents stored under a local root folder
#[derive(Debug, Clone)]
pub struct FsDocumentStorage {
    root: PathBuf,
}

impl FsDocumentStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BridgeError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(BridgeError::Storage(format!(
                "Document path must be relative to the storage root: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStorage for FsDocumentStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>, BridgeError> {
        let full_path = self.resolve(path)?;
        tokio::fs::read(&full_path)
            .await
            .map_err(|e| BridgeError::Storage(format!("{}: {}", full_path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_relative_path() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("user-1")).unwrap();
        std::fs::write(temp_dir.path().join("user-1/iso.pdf"), b"%PDF-1.7").unwrap();

        let storage = FsDocumentStorage::new(temp_dir.path());
        assert_eq!(storage.read("user-1/iso.pdf").await.unwrap(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let storage = FsDocumentStorage::new("/srv/docs");
        assert!(matches!(
            storage.read("../etc/passwd").await,
            Err(BridgeError::Storage(_))
        ));
        assert!(matches!(
            storage.read("/etc/passwd").await,
            Err(BridgeError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_storage_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let storage = FsDocumentStorage::new(temp_dir.path());
        assert!(matches!(
            storage.read("absent.pdf").await,
            Err(BridgeError::Storage(_))
        ));
    }
}
