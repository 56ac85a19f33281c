use crate::store::{ObjectStore, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Filesystem-backed bucket: each key is a relative path under `root`.
///
/// Used for local development and tests; a remote bucket implementation is
/// deployment glue with the same contract. `put` writes through a temp file
/// and fsyncs before renaming, so a checkpoint that `put` returned for
/// survives a process kill.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsObjectStore { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.starts_with('/') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        // Reject traversal segments so a key can never escape the root.
        if Path::new(key)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn collect_keys(
        dir: &Path,
        base: &Path,
        out: &mut Vec<String>,
    ) -> Result<(), std::io::Error> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::collect_keys(&path, base, out)?;
            } else if let Ok(rel) = path.strip_prefix(base) {
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                // Skip in-flight temp files from interrupted writes.
                if !key.ends_with(".tmp") {
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        if !self.root.exists() {
            return Err(StoreError::Unavailable(format!(
                "bucket root {} does not exist",
                self.root.display()
            )));
        }

        let mut keys = Vec::new();
        Self::collect_keys(&self.root, &self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!(
            "{}.tmp",
            path.extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("state/processed.json", b"[]").await.unwrap();
        let bytes = store.get("state/processed.json").await.unwrap();
        assert_eq!(bytes.as_deref(), Some(b"[]".as_slice()));
    }

    #[tokio::test]
    async fn get_absent_key_is_none() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.get("missing.csv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_sorts() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("delta_b.csv", b"x").await.unwrap();
        store.put("delta_a.csv", b"x").await.unwrap();
        store.put("state/lease.json", b"x").await.unwrap();

        let keys = store.list("delta_").await.unwrap();
        assert_eq!(keys, vec!["delta_a.csv", "delta_b.csv"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("a.csv", b"x").await.unwrap();
        store.delete("a.csv").await.unwrap();
        store.delete("a.csv").await.unwrap();
        assert!(store.get("a.csv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store.get("../outside").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn list_fails_when_root_missing() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("nope"));
        assert!(matches!(
            store.list("").await.unwrap_err(),
            StoreError::Unavailable(_)
        ));
    }
}
