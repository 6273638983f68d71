//! Local disk store used while the primary is unreachable.

use std::path::{Component, Path, PathBuf};

use crate::error::BackendError;

/// Files under a root directory, one file per key.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path under the root. Keys may contain `/` but never
    /// escape the root.
    pub fn resolve(&self, key: &str) -> Result<PathBuf, BackendError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(BackendError::Operation(format!("invalid storage key '{key}'")));
        }
        Ok(self.root.join(relative))
    }

    pub async fn ensure_root(&self) -> Result<(), BackendError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Write through a temp file and rename, so readers never see a
    /// partial payload.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, BackendError> {
        let path = self.resolve(key)?;
        let parent = path.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(path)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_escaping_keys() {
        let store = LocalStore::new("/tmp/fallback");
        for key in ["", "../etc/passwd", "/etc/passwd", "a/../../b", "./a", "a\\b"] {
            assert!(store.resolve(key).is_err(), "accepted {key:?}");
        }
        assert_eq!(
            store.resolve("attachments/2024/cv.pdf").unwrap(),
            PathBuf::from("/tmp/fallback/attachments/2024/cv.pdf")
        );
    }

    #[tokio::test]
    async fn test_put_then_get_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        let path = store.put("attachments/cv.pdf", b"%PDF-1.7").await.unwrap();
        assert!(path.starts_with(dir.path()));
        assert_eq!(store.get("attachments/cv.pdf").await.unwrap().unwrap(), b"%PDF-1.7");

        let mut entries = tokio::fs::read_dir(dir.path().join("attachments")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["cv.pdf".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(store.get("nothing-here").await.unwrap().is_none());
    }
}
