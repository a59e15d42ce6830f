//! Control-plane key/value store used for the interdomain handshake.
use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::{fs, sync::Mutex};

/// The caller's own domain, resolved once at startup.
///
/// Every key this plugin writes lives under the domain's prefix, so the
/// backend can find it by domain id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainContext {
    domid: u32,
}

impl DomainContext {
    pub fn new(domid: u32) -> Self {
        Self { domid }
    }

    pub fn prefix(&self) -> String {
        format!("/local/domain/{}", self.domid)
    }

    /// Directory holding the handshake keys of plugin `uid`.
    pub fn plugin_path(&self, uid: &str) -> String {
        format!("{}/rrd-plugin/{}", self.prefix(), uid)
    }
}

/// Hierarchical key/value store shared between domains.
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Writes all pairs atomically: either every key is written or none is.
    async fn transaction(&self, writes: Vec<(String, String)>) -> Result<()>;

    /// Single best-effort write outside any transaction.
    async fn write_immediate(&self, key: &str, value: &str) -> Result<()>;
}

/// Store backed by a directory tree, one file per key.
///
/// Transactions are serialized through a lock and roll back the keys they
/// created or changed when a later write fails.
pub struct FsStore {
    root: PathBuf,
    txn: Mutex<()>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            txn: Mutex::new(()),
        }
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        ensure!(
            relative
                .components()
                .all(|c| matches!(c, Component::Normal(_))),
            "Invalid store key: {}",
            key
        );
        Ok(self.root.join(relative))
    }

    async fn write_key(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create store node for {}", key))?;
        }
        fs::write(&path, value)
            .await
            .with_context(|| format!("Failed to write store key {}", key))
    }

    /// Reads a key, returning `None` when it does not exist.
    pub async fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read store key {}", key)),
        }
    }

    async fn apply(
        &self,
        writes: &[(String, String)],
        undo: &mut Vec<(String, Option<String>)>,
    ) -> Result<()> {
        for (key, value) in writes {
            let previous = self.read(key).await?;
            self.write_key(key, value).await?;
            undo.push((key.clone(), previous));
        }
        Ok(())
    }

    async fn roll_back(&self, undo: Vec<(String, Option<String>)>) {
        for (key, previous) in undo.into_iter().rev() {
            let restored = match previous {
                Some(value) => self.write_key(&key, &value).await,
                None => match self.key_path(&key) {
                    Ok(path) => fs::remove_file(path).await.map_err(Into::into),
                    Err(e) => Err(e),
                },
            };
            if let Err(e) = restored {
                tracing::warn!("Failed to roll back store key {}: {:#}", key, e);
            }
        }
    }
}

#[async_trait]
impl ControlStore for FsStore {
    async fn transaction(&self, writes: Vec<(String, String)>) -> Result<()> {
        let _guard = self.txn.lock().await;
        let mut undo = Vec::with_capacity(writes.len());
        if let Err(e) = self.apply(&writes, &mut undo).await {
            self.roll_back(undo).await;
            return Err(e.context("Store transaction aborted"));
        }
        Ok(())
    }

    async fn write_immediate(&self, key: &str, value: &str) -> Result<()> {
        self.write_key(key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plugin_path_is_namespaced_by_domain() {
        let domain = DomainContext::new(7);
        assert_eq!(domain.prefix(), "/local/domain/7");
        assert_eq!(domain.plugin_path("vcpu"), "/local/domain/7/rrd-plugin/vcpu");
    }

    #[tokio::test]
    async fn test_transaction_writes_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store
            .transaction(vec![
                ("/a/b/x".to_string(), "1".to_string()),
                ("/a/b/y".to_string(), "2".to_string()),
            ])
            .await
            .unwrap();

        assert_eq!(store.read("/a/b/x").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.read("/a/b/y").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.read("/a/b/z").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.write_immediate("/a/x", "old").await.unwrap();

        // "/a/x" is a file, so nothing can be created beneath it.
        let result = store
            .transaction(vec![
                ("/a/x".to_string(), "new".to_string()),
                ("/a/y".to_string(), "1".to_string()),
                ("/a/x/z".to_string(), "1".to_string()),
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(store.read("/a/x").await.unwrap().as_deref(), Some("old"));
        assert_eq!(store.read("/a/y").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("store"));
        assert!(store.write_immediate("/../outside", "x").await.is_err());
        assert!(!dir.path().join("outside").exists());
    }
}
