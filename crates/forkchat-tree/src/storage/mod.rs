//! Session persistence.
//!
//! One JSON document per session under a base directory, named after the
//! session id. Writes go to a temp file first and are renamed into place.

pub mod codec;

pub use codec::{SessionDocument, SessionInfo, TreeDocument, SESSION_FORMAT_VERSION};

use crate::TreeError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Storage options.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Directory holding one `<id>.json` per session
    pub base_dir: PathBuf,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            base_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".forkchat")
                .join("sessions"),
        }
    }
}

/// Listing entry for a stored session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub updated_at: DateTime<Utc>,
    pub total_nodes: usize,
    pub path: PathBuf,
}

/// Reads and writes session documents on disk.
#[derive(Debug, Clone)]
pub struct SessionStorage {
    options: StorageOptions,
}

impl SessionStorage {
    /// Create storage rooted at `base_dir`.
    pub fn new(base_dir: PathBuf) -> Self {
        Self::with_options(StorageOptions { base_dir })
    }

    pub fn with_options(options: StorageOptions) -> Self {
        Self { options }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.options.base_dir
    }

    /// Path of the document for `id`.
    pub fn session_path(&self, id: &str) -> Result<PathBuf, TreeError> {
        validate_session_id(id)?;
        Ok(self.options.base_dir.join(format!("{}.json", id)))
    }

    /// Write a document atomically. Returns the final path.
    pub async fn save(&self, document: &SessionDocument) -> Result<PathBuf, TreeError> {
        let path = self.session_path(&document.session.id)?;
        tokio::fs::create_dir_all(&self.options.base_dir).await?;

        let json = codec::to_json(document)?;

        let temp_path = self
            .options
            .base_dir
            .join(format!(".{}.json.tmp", document.session.id));
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        debug!(path = ?path, size = json.len(), "Saved session");

        Ok(path)
    }

    /// Load and check the document for `id`.
    pub async fn load(&self, id: &str) -> Result<SessionDocument, TreeError> {
        let path = self.session_path(id)?;

        if !path.exists() {
            return Err(TreeError::SessionNotFound(id.to_string()));
        }

        let json = tokio::fs::read_to_string(&path).await?;
        let document = codec::from_json(&json)?;

        debug!(path = ?path, nodes = document.tree.nodes.len(), "Loaded session");

        Ok(document)
    }

    /// Every readable session, most recently updated first.
    ///
    /// Files that fail to parse are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<SessionSummary>, TreeError> {
        let mut summaries = Vec::new();

        if !self.options.base_dir.exists() {
            return Ok(summaries);
        }

        let mut entries = tokio::fs::read_dir(&self.options.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_document = path.extension().map(|e| e == "json").unwrap_or(false)
                && !path
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with('.'))
                    .unwrap_or(true);
            if !is_document {
                continue;
            }

            let document = match tokio::fs::read_to_string(&path).await {
                Ok(json) => codec::from_json(&json),
                Err(e) => Err(e.into()),
            };
            match document {
                Ok(document) => summaries.push(SessionSummary {
                    id: document.session.id,
                    name: document.session.name,
                    updated_at: document.session.updated_at,
                    total_nodes: document.tree.nodes.len(),
                    path,
                }),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable session file"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    /// Remove the document for `id`.
    pub async fn delete(&self, id: &str) -> Result<(), TreeError> {
        let path = self.session_path(id)?;
        if !path.exists() {
            return Err(TreeError::SessionNotFound(id.to_string()));
        }
        tokio::fs::remove_file(&path).await?;
        info!(session = %id, "Deleted session");
        Ok(())
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.session_path(id).map(|p| p.exists()).unwrap_or(false)
    }
}

impl Default for SessionStorage {
    fn default() -> Self {
        Self::with_options(StorageOptions::default())
    }
}

/// Session ids become file names, so path syntax is refused.
fn validate_session_id(id: &str) -> Result<(), TreeError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(TreeError::Validation(format!("invalid session id: {:?}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ConversationNode, TreeStore};
    use std::path::Path;
    use tempfile::tempdir;

    fn test_storage(temp_dir: &Path) -> SessionStorage {
        SessionStorage::new(temp_dir.to_path_buf())
    }

    fn test_document(id: &str, name: &str) -> SessionDocument {
        let mut store = TreeStore::new();
        store
            .add_node(ConversationNode::new("root").with_question("Hi?"))
            .unwrap();
        codec::serialize(store.tree(), name, id)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let storage = test_storage(temp_dir.path());
        let document = test_document("abc123", "First");

        let path = storage.save(&document).await.unwrap();
        assert!(path.ends_with("abc123.json"));

        let loaded = storage.load("abc123").await.unwrap();
        assert_eq!(loaded, document);
    }

    #[tokio::test]
    async fn test_no_temp_file_left() {
        let temp_dir = tempdir().unwrap();
        let storage = test_storage(temp_dir.path());
        storage.save(&test_document("s1", "x")).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["s1.json".to_string()]);
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let temp_dir = tempdir().unwrap();
        let storage = test_storage(temp_dir.path());

        assert!(!storage.exists("gone").await);
        storage.save(&test_document("gone", "x")).await.unwrap();
        assert!(storage.exists("gone").await);

        storage.delete("gone").await.unwrap();
        assert!(!storage.exists("gone").await);
        assert!(matches!(
            storage.delete("gone").await,
            Err(TreeError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_load_not_found() {
        let temp_dir = tempdir().unwrap();
        let storage = test_storage(temp_dir.path());

        let result = storage.load("nonexistent").await;
        assert!(matches!(result, Err(TreeError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_newest_first_skips_garbage() {
        let temp_dir = tempdir().unwrap();
        let storage = test_storage(temp_dir.path());

        let mut older = test_document("older", "Older");
        older.session.updated_at = Utc::now() - chrono::Duration::hours(1);
        storage.save(&older).await.unwrap();
        storage.save(&test_document("newer", "Newer")).await.unwrap();
        std::fs::write(temp_dir.path().join("broken.json"), "{ nope").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let summaries = storage.list().await.unwrap();
        let ids: Vec<_> = summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(summaries[0].total_nodes, 1);
    }

    #[tokio::test]
    async fn test_list_missing_dir() {
        let temp_dir = tempdir().unwrap();
        let storage = test_storage(&temp_dir.path().join("missing"));
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let storage = SessionStorage::new(PathBuf::from("/tmp/sessions"));
        assert!(storage.session_path("../escape").is_err());
        assert!(storage.session_path("a/b").is_err());
        assert!(storage.session_path("").is_err());
        assert!(storage.session_path("3f2a-11_b").is_ok());
    }
}
