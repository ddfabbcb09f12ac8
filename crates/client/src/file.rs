//! File-backed Notion client
//!
//! Wraps the in-memory client with JSON-file persistence: the store is
//! loaded when a session is opened and atomically rewritten when the
//! session ends, on every exit path. The file holds the store as a plain
//! list of page/database objects.

use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use serde_json::Value;

use notiondb_common::{Error, Result};

use crate::{InMemoryNotionClient, NotionClient};

pub struct FileNotionClient {
    inner: InMemoryNotionClient,
    path: PathBuf,
}

impl FileNotionClient {
    pub fn new(path: impl Into<PathBuf>) -> FileNotionClient {
        FileNotionClient {
            inner: InMemoryNotionClient::new(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds an object with a caller-chosen id, for deterministic fixtures
    /// and the system-catalog bootstrap.
    pub fn add_with_id(&self, kind: &str, id: &str, payload: Value) -> Result<Value> {
        self.inner.add_with_id(kind, id, payload)
    }

    /// Opens a session: loads the store from the file if it exists, leaves
    /// the freshly seeded store otherwise. The session dumps the store back
    /// to the file when dropped.
    pub fn session(&self) -> Result<FileSession<'_>> {
        if self.path.exists() {
            self.load()?;
        }
        Ok(FileSession { client: self })
    }

    /// Loads the store content from the underlying file.
    pub fn load(&self) -> Result<()> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| Error::Operational(format!("cannot read {}: {e}", self.path.display())))?;
        let objects: Vec<Value> = serde_json::from_str(&raw)
            .map_err(|e| Error::Operational(format!("corrupt store file {}: {e}", self.path.display())))?;
        self.inner.replace(objects);
        Ok(())
    }

    /// Dumps the store to the underlying file. The write is atomic: a
    /// temporary file is written and renamed over the target.
    pub fn dump(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.inner.objects())
            .map_err(|e| Error::Internal(format!("store serialization failed: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)
            .map_err(|e| Error::Operational(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Operational(format!("cannot replace {}: {e}", self.path.display())))?;
        Ok(())
    }
}

impl NotionClient for FileNotionClient {
    fn pages_create(&self, payload: Value) -> Result<Value> {
        self.inner.pages_create(payload)
    }

    fn pages_retrieve(&self, payload: Value) -> Result<Value> {
        self.inner.pages_retrieve(payload)
    }

    fn pages_update(&self, payload: Value) -> Result<Value> {
        self.inner.pages_update(payload)
    }

    fn databases_create(&self, payload: Value) -> Result<Value> {
        self.inner.databases_create(payload)
    }

    fn databases_retrieve(&self, payload: Value) -> Result<Value> {
        self.inner.databases_retrieve(payload)
    }

    fn databases_query(&self, payload: Value) -> Result<Value> {
        self.inner.databases_query(payload)
    }

    fn blocks_children_append(&self, payload: Value) -> Result<Value> {
        self.inner.blocks_children_append(payload)
    }
}

/// A scoped session over a file-backed client. Dropping the session dumps
/// the store, so persistence happens on error paths too.
pub struct FileSession<'a> {
    client: &'a FileNotionClient,
}

impl FileSession<'_> {
    /// Dumps eagerly, surfacing write errors that Drop would swallow.
    pub fn close(self) -> Result<()> {
        let result = self.client.dump();
        std::mem::forget(self);
        result
    }
}

impl Deref for FileSession<'_> {
    type Target = FileNotionClient;

    fn deref(&self) -> &FileNotionClient {
        self.client
    }
}

impl Drop for FileSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.client.dump() {
            tracing::error!("failed to persist notion store: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(name: &str) -> Value {
        json!({
            "parent": {"type": "database_id", "database_id": "db"},
            "properties": {"name": {"title": [{"text": {"content": name}}]}},
        })
    }

    #[test]
    fn test_session_persists_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let client = FileNotionClient::new(&path);
        {
            let session = client.session().unwrap();
            session.pages_create(payload("persisted")).unwrap();
            session.close().unwrap();
        }
        assert!(path.exists());

        let reopened = FileNotionClient::new(&path);
        let session = reopened.session().unwrap();
        // root page plus the created one
        assert_eq!(session.inner.len(), 2);
        drop(session);
    }

    #[test]
    fn test_session_persists_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let client = FileNotionClient::new(&path);
        {
            let session = client.session().unwrap();
            session.pages_create(payload("dropped")).unwrap();
            // no close(): Drop must still dump
        }
        let raw = fs::read_to_string(&path).unwrap();
        let objects: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn test_file_holds_a_plain_object_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let client = FileNotionClient::new(&path);
        client.session().unwrap().close().unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let objects: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(objects[0]["id"], json!(crate::ROOT_PAGE_ID));
    }
}
