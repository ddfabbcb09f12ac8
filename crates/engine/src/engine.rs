//! Engine construction and system-catalog bootstrap
//!
//! The engine owns the client, the shared transaction manager and the
//! schema registry. On first contact with a store it creates the
//! management structures every deployment relies on: the
//! `information_schema` page, the `tables` catalog database (with its own
//! self-describing row), and the page representing the database itself.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use uuid::Uuid;

use notiondb_client::{FileNotionClient, InMemoryNotionClient, NotionClient, ROOT_PAGE_ID};
use notiondb_common::{Error, Result};
use notiondb_coordinator::{CatalogConfig, Connection, OperationContext, TransactionManager};
use notiondb_sql::MetaData;

use crate::reflect::Inspector;
use crate::uri::NotionUri;

/// Stable id of the `information_schema` page.
pub const ISCHEMA_PAGE_ID: &str = "66666666-6666-6666-6666-666666666666";
/// Stable id of the `tables` catalog database.
pub const TABLES_DATABASE_ID: &str = "11111111-1111-1111-1111-111111111111";

/// Catalog name for the management structures themselves.
pub(crate) const SYSTEM_CATALOG: &str = "notiondb";

/// Creates an engine for the integration the URI denotes.
///
/// Only the simulated integrations are constructible; auth URIs parse but
/// are rejected here.
pub fn create_engine(uri: &str) -> Result<Engine> {
    Engine::from_uri(NotionUri::parse(uri)?)
}

pub struct Engine {
    client: Arc<dyn NotionClient>,
    /// Kept alongside the erased client for persistence control
    file_client: Option<Arc<FileNotionClient>>,
    manager: Arc<TransactionManager>,
    metadata: Arc<RwLock<MetaData>>,
    catalog: CatalogConfig,
    database: String,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Engine {
    fn from_uri(uri: NotionUri) -> Result<Engine> {
        let (client, file_client, database): (Arc<dyn NotionClient>, _, String) = match uri {
            NotionUri::Memory => {
                let client = InMemoryNotionClient::new();
                bootstrap(&|kind, id, payload| client.add_with_id(kind, id, payload), "memory")?;
                (Arc::new(client), None, "memory".to_owned())
            }
            NotionUri::File { path } => {
                let database = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "database".to_owned());
                let client = Arc::new(FileNotionClient::new(&path));
                if path.exists() {
                    client.load()?;
                }
                let seeded = client
                    .databases_retrieve(json!({"id": TABLES_DATABASE_ID}))?
                    .as_object()
                    .map(|o| !o.is_empty())
                    .unwrap_or(false);
                if !seeded {
                    bootstrap(
                        &|kind, id, payload| client.add_with_id(kind, id, payload),
                        &database,
                    )?;
                }
                (client.clone(), Some(client), database)
            }
            NotionUri::Internal { .. } | NotionUri::External { .. } => {
                return Err(Error::InvalidRequest(
                    "internal and external integrations are not supported yet (simulated only)"
                        .into(),
                ))
            }
        };

        let catalog = CatalogConfig {
            root_page_id: Uuid::parse_str(ROOT_PAGE_ID)
                .map_err(|e| Error::Internal(format!("bad root page id: {e}")))?,
            tables_database_id: Uuid::parse_str(TABLES_DATABASE_ID)
                .map_err(|e| Error::Internal(format!("bad tables database id: {e}")))?,
            catalog_name: database.clone(),
        };

        Ok(Engine {
            client,
            file_client,
            manager: Arc::new(TransactionManager::new()),
            metadata: Arc::new(RwLock::new(MetaData::new())),
            catalog,
            database,
        })
    }

    /// The database name this engine is connected to.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn client(&self) -> &Arc<dyn NotionClient> {
        &self.client
    }

    pub fn metadata(&self) -> &Arc<RwLock<MetaData>> {
        &self.metadata
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn catalog(&self) -> &CatalogConfig {
        &self.catalog
    }

    /// The operation context connections and proxies run with.
    pub fn operation_context(&self) -> OperationContext {
        OperationContext {
            client: Arc::clone(&self.client),
            metadata: Arc::clone(&self.metadata),
            catalog: self.catalog.clone(),
        }
    }

    /// Opens a connection sharing this engine's transaction manager.
    pub fn connect(&self) -> Connection {
        Connection::new(Arc::clone(&self.manager), self.operation_context())
    }

    /// Returns an inspector over this engine's store.
    pub fn inspect(&self) -> Inspector<'_> {
        Inspector::new(self)
    }

    /// Reflects every registered, unpopulated table in the registry.
    pub fn reflect(&self) -> Result<()> {
        let inspector = self.inspect();
        let mut metadata = self.metadata.write();
        inspector.reflect(&mut metadata)
    }

    /// Persists the store for file-backed engines; a no-op otherwise.
    pub fn checkpoint(&self) -> Result<()> {
        match &self.file_client {
            Some(client) => client.dump(),
            None => Ok(()),
        }
    }
}

/// Seeds the management structures through the client's deterministic-id
/// path, mirroring what a real workspace would be provisioned with.
fn bootstrap(
    add: &dyn Fn(&str, &str, serde_json::Value) -> Result<serde_json::Value>,
    database: &str,
) -> Result<()> {
    // the information_schema page under the workspace root
    add(
        "page",
        ISCHEMA_PAGE_ID,
        json!({
            "parent": {"type": "page_id", "page_id": ROOT_PAGE_ID},
            "properties": {
                "Name": {"title": [{"text": {"content": "information_schema"}}]}
            },
        }),
    )?;

    // the tables catalog database
    add(
        "database",
        TABLES_DATABASE_ID,
        json!({
            "parent": {"type": "page_id", "page_id": ISCHEMA_PAGE_ID},
            "title": [{"type": "text", "text": {"content": "tables"}}],
            "properties": {
                "table_name": {"title": {}},
                "table_schema": {"rich_text": {}},
                "table_catalog": {"rich_text": {}},
                "table_id": {"rich_text": {}},
            },
        }),
    )?;

    // the catalog describes itself
    add(
        "page",
        &Uuid::new_v4().to_string(),
        json!({
            "parent": {"type": "database_id", "database_id": TABLES_DATABASE_ID},
            "properties": {
                "table_name": {"title": [{"text": {"content": "tables"}}]},
                "table_schema": {"rich_text": [{"text": {"content": "information"}}]},
                "table_catalog": {"rich_text": [{"text": {"content": SYSTEM_CATALOG}}]},
                "table_id": {"rich_text": [{"text": {"content": TABLES_DATABASE_ID}}]},
            },
        }),
    )?;

    // the page representing the database itself
    add(
        "page",
        &Uuid::new_v4().to_string(),
        json!({
            "parent": {"type": "page_id", "page_id": ROOT_PAGE_ID},
            "properties": {
                "Name": {"title": [{"text": {"content": database}}]}
            },
        }),
    )?;

    tracing::info!(database, "bootstrapped system catalog");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_engine_bootstraps_catalog() {
        let engine = create_engine("normlite:///:memory:").unwrap();
        let tables = engine
            .client()
            .databases_retrieve(json!({"id": TABLES_DATABASE_ID}))
            .unwrap();
        assert_eq!(tables["object"], json!("database"));

        let rows = engine
            .client()
            .databases_query(json!({"database_id": TABLES_DATABASE_ID}))
            .unwrap();
        // the catalog lists itself
        assert_eq!(rows["results"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_auth_uris_are_rejected_at_construction() {
        let err = create_engine("normlite+auth://internal?token=t").unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_file_engine_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("school.db");
        let uri = format!("normlite:///{}", path.display());

        let engine = create_engine(&uri).unwrap();
        assert_eq!(engine.database(), "school");
        engine.checkpoint().unwrap();

        let reopened = create_engine(&uri).unwrap();
        let rows = reopened
            .client()
            .databases_query(json!({"database_id": TABLES_DATABASE_ID}))
            .unwrap();
        // bootstrap must not have run twice
        assert_eq!(rows["results"].as_array().unwrap().len(), 1);
    }
}
