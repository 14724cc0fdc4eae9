//! Template store collaborator.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::CollaboratorError;

/// Named text templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Read a template. `Ok(None)` when it does not exist.
    async fn read(&self, name: &str) -> Result<Option<String>, CollaboratorError>;

    /// Create or replace a template.
    async fn write(&self, name: &str, text: &str) -> Result<(), CollaboratorError>;
}

/// Templates stored as files directly under a base directory.
///
/// Names containing path separators or `..` never touch the filesystem:
/// reads report not found and writes fail.
#[derive(Clone, Debug)]
pub struct FsTemplateStore {
    base: PathBuf,
}

impl FsTemplateStore {
    /// Store rooted at `base`. The directory is created on first write.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let bad = name.is_empty()
            || name.contains(['/', '\\', '\0'])
            || name == "."
            || name.contains("..");
        (!bad).then(|| self.base.join(name))
    }
}

#[async_trait]
impl TemplateStore for FsTemplateStore {
    async fn read(&self, name: &str) -> Result<Option<String>, CollaboratorError> {
        let Some(path) = self.path_for(name) else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, name: &str, text: &str) -> Result<(), CollaboratorError> {
        let path = self
            .path_for(name)
            .ok_or_else(|| CollaboratorError::Backend(format!("invalid template name '{name}'")))?;
        tokio::fs::create_dir_all(&self.base).await?;
        tokio::fs::write(&path, text).await?;
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<String, String>>,
}

impl MemoryTemplateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn read(&self, name: &str) -> Result<Option<String>, CollaboratorError> {
        Ok(self.templates.read().get(name).cloned())
    }

    async fn write(&self, name: &str, text: &str) -> Result<(), CollaboratorError> {
        let _ = self.templates.write().insert(name.to_owned(), text.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTemplateStore::new(dir.path().join("templates"));
        store.write("index.html", "<h1>hi</h1>").await.unwrap();
        assert_eq!(
            store.read("index.html").await.unwrap().as_deref(),
            Some("<h1>hi</h1>")
        );
    }

    #[tokio::test]
    async fn fs_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTemplateStore::new(dir.path());
        assert!(store.read("nope.html").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fs_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTemplateStore::new(dir.path());
        store.write("t", "one").await.unwrap();
        store.write("t", "two").await.unwrap();
        assert_eq!(store.read("t").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn fs_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTemplateStore::new(dir.path().join("inner"));
        std::fs::write(dir.path().join("secret"), "x").unwrap();

        assert!(store.read("../secret").await.unwrap().is_none());
        assert!(store.read("a/b").await.unwrap().is_none());
        assert!(store.read("a\\b").await.unwrap().is_none());
        assert!(store.read("").await.unwrap().is_none());

        let err = store.write("../escape", "x").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Backend(_)));
        assert!(!dir.path().join("escape").exists());
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryTemplateStore::new();
        assert!(store.read("t").await.unwrap().is_none());
        store.write("t", "body").await.unwrap();
        assert_eq!(store.read("t").await.unwrap().as_deref(), Some("body"));
    }
}
