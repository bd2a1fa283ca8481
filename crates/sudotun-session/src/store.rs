//! Profile persistence.
//!
//! The session consumes storage as a simple asynchronous list/get/put store;
//! [`FileStore`] keeps the whole profile list plus the active selection in a
//! single JSON or TOML document (picked by extension), and [`MemoryStore`]
//! backs tests and ephemeral runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use sudotun_proto::{LinkError, NodeProfile, ProfileError, decode};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store parse error: {0}")]
    Parse(String),

    #[error("unsupported store format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Asynchronous profile store.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn list(&self) -> Result<Vec<NodeProfile>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<NodeProfile>, StoreError>;

    /// Insert or replace by id.
    async fn put(&self, node: NodeProfile) -> Result<(), StoreError>;

    /// Remove by id. The active selection moves to the first remaining
    /// profile when it pointed at the removed one.
    async fn remove(&self, id: &str) -> Result<(), StoreError>;

    async fn active_id(&self) -> Result<Option<String>, StoreError>;

    async fn set_active_id(&self, id: Option<&str>) -> Result<(), StoreError>;

    /// Decode a short link, persist the profile and make it active.
    async fn import_link(
        &self,
        link: &str,
        name_override: Option<&str>,
    ) -> Result<NodeProfile, StoreError> {
        let mut node = decode(link)?;
        if let Some(name) = name_override {
            node.name = name.to_string();
        }
        let node = node.validate()?;
        self.put(node.clone()).await?;
        self.set_active_id(Some(&node.id)).await?;
        info!(node = %node.display_name(), "imported short link");
        Ok(node)
    }
}

/// On-disk document shape.
///
/// `active_id` precedes the node array so the TOML form stays valid (values
/// before tables).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    active_id: Option<String>,
    #[serde(default)]
    nodes: Vec<NodeProfile>,
}

impl StoreDocument {
    fn upsert(&mut self, node: NodeProfile) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(slot) => *slot = node,
            None => self.nodes.push(node),
        }
    }

    fn remove(&mut self, id: &str) {
        self.nodes.retain(|n| n.id != id);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.nodes.first().map(|n| n.id.clone());
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StoreFormat {
    Json,
    Toml,
}

fn format_for(path: &Path) -> Result<StoreFormat, StoreError> {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "json" => Ok(StoreFormat::Json),
        "toml" => Ok(StoreFormat::Toml),
        other => Err(StoreError::UnsupportedFormat(other.to_string())),
    }
}

/// File-backed store.
///
/// Every operation reads and rewrites the whole document; the internal lock
/// serializes writers within this process.
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StoreDocument, StoreError> {
        let format = format_for(&self.path)?;
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreDocument::default());
            }
            Err(e) => return Err(e.into()),
        };
        match format {
            StoreFormat::Json => {
                serde_json::from_str(&content).map_err(|e| StoreError::Parse(e.to_string()))
            }
            StoreFormat::Toml => {
                toml::from_str(&content).map_err(|e| StoreError::Parse(e.to_string()))
            }
        }
    }

    async fn persist(&self, document: &StoreDocument) -> Result<(), StoreError> {
        let content = match format_for(&self.path)? {
            StoreFormat::Json => serde_json::to_string_pretty(document)
                .map_err(|e| StoreError::Parse(e.to_string()))?,
            StoreFormat::Toml => {
                toml::to_string_pretty(document).map_err(|e| StoreError::Parse(e.to_string()))?
            }
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl NodeStore for FileStore {
    async fn list(&self) -> Result<Vec<NodeProfile>, StoreError> {
        let _lock = self.guard.lock().await;
        Ok(self.load().await?.nodes)
    }

    async fn get(&self, id: &str) -> Result<Option<NodeProfile>, StoreError> {
        let _lock = self.guard.lock().await;
        Ok(self.load().await?.nodes.into_iter().find(|n| n.id == id))
    }

    async fn put(&self, node: NodeProfile) -> Result<(), StoreError> {
        let _lock = self.guard.lock().await;
        let mut document = self.load().await?;
        document.upsert(node);
        self.persist(&document).await
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let _lock = self.guard.lock().await;
        let mut document = self.load().await?;
        document.remove(id);
        self.persist(&document).await
    }

    async fn active_id(&self) -> Result<Option<String>, StoreError> {
        let _lock = self.guard.lock().await;
        Ok(self.load().await?.active_id)
    }

    async fn set_active_id(&self, id: Option<&str>) -> Result<(), StoreError> {
        let _lock = self.guard.lock().await;
        let mut document = self.load().await?;
        document.active_id = id.map(str::to_owned);
        self.persist(&document).await
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, handy for wiring up tests.
    pub fn with_nodes(nodes: Vec<NodeProfile>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(StoreDocument {
                active_id: nodes.first().map(|n| n.id.clone()),
                nodes,
            }),
        })
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn list(&self) -> Result<Vec<NodeProfile>, StoreError> {
        Ok(self.inner.lock().await.nodes.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<NodeProfile>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .nodes
            .iter()
            .find(|n| n.id == id)
            .cloned())
    }

    async fn put(&self, node: NodeProfile) -> Result<(), StoreError> {
        self.inner.lock().await.upsert(node);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.inner.lock().await.remove(id);
        Ok(())
    }

    async fn active_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().await.active_id.clone())
    }

    async fn set_active_id(&self, id: Option<&str>) -> Result<(), StoreError> {
        self.inner.lock().await.active_id = id.map(str::to_owned);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sudotun_proto::encode;

    fn scratch_path(ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sudotun-store-{}.{ext}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryStore::new();
        let node = NodeProfile::new("relay.example.net", 8443, "secret");
        let id = node.id.clone();

        store.put(node.clone()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(store.get(&id).await.unwrap().unwrap().host, node.host);

        let mut renamed = node.clone();
        renamed.name = "renamed".to_string();
        store.put(renamed).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "renamed");

        store.remove(&id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_removing_active_node_moves_selection() {
        let a = NodeProfile::new("a.example", 1, "k");
        let b = NodeProfile::new("b.example", 2, "k");
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        let store = MemoryStore::with_nodes(vec![a, b]);

        assert_eq!(store.active_id().await.unwrap(), Some(a_id.clone()));
        store.remove(&a_id).await.unwrap();
        assert_eq!(store.active_id().await.unwrap(), Some(b_id));
    }

    #[tokio::test]
    async fn test_file_store_json_roundtrip() {
        let path = scratch_path("json");
        let store = FileStore::new(&path);
        let node = NodeProfile::new("relay.example.net", 8443, "secret");
        let id = node.id.clone();

        store.put(node).await.unwrap();
        store.set_active_id(Some(&id)).await.unwrap();

        // A second store over the same file sees everything.
        let reopened = FileStore::new(&path);
        assert_eq!(reopened.list().await.unwrap().len(), 1);
        assert_eq!(reopened.active_id().await.unwrap(), Some(id));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_toml_roundtrip() {
        let path = scratch_path("toml");
        let store = FileStore::new(&path);
        let node = NodeProfile::new("relay.example.net", 8443, "secret");
        let id = node.id.clone();

        store.put(node).await.unwrap();
        let read = store.get(&id).await.unwrap().unwrap();
        assert_eq!(read.host, "relay.example.net");

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let store = FileStore::new(scratch_path("json"));
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.active_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_rejects_unknown_extension() {
        let store = FileStore::new(scratch_path("yaml"));
        assert!(matches!(
            store.list().await.unwrap_err(),
            StoreError::UnsupportedFormat(_)
        ));
    }

    #[tokio::test]
    async fn test_import_link_persists_and_activates() {
        let store = MemoryStore::new();
        let link = encode(&NodeProfile::new("relay.example.net", 8443, "secret"), None);

        let imported = store.import_link(&link, Some("mine")).await.unwrap();
        assert_eq!(imported.name, "mine");
        assert_eq!(store.active_id().await.unwrap(), Some(imported.id.clone()));
        assert!(store.get(&imported.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_import_bad_link_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.import_link("sudoku://???", None).await.unwrap_err(),
            StoreError::Link(_)
        ));
    }
}
