//! Reflection primitives
//!
//! Table reflection decomposes into two single-call executables: `HasTable`
//! checks the system catalog for a table's row, `ReflectTable` retrieves
//! the backing database object. Each compiles to exactly one API call.

use serde_json::json;
use uuid::Uuid;

use crate::compile::{CallDescriptor, Endpoint, Request};

/// Checks whether a table exists by querying the `tables` catalog database
/// for a row matching the table name and catalog.
#[derive(Debug, Clone)]
pub struct HasTable {
    pub table_name: String,
    pub tables_database_id: Uuid,
    pub catalog: String,
}

impl HasTable {
    pub fn compile(&self) -> CallDescriptor {
        let payload = json!({
            "database_id": ":database_id",
            "filter": {
                "and": [
                    {"property": "table_name", "title": {"equals": ":table_name"}},
                    {"property": "table_catalog", "rich_text": {"equals": ":table_catalog"}},
                ]
            }
        });
        let mut params = serde_json::Map::new();
        params.insert(
            "database_id".into(),
            json!(self.tables_database_id.to_string()),
        );
        params.insert("table_name".into(), json!(self.table_name));
        params.insert("table_catalog".into(), json!(self.catalog));
        CallDescriptor {
            endpoint: Endpoint::Databases,
            request: Request::Query,
            payload,
            params,
            // the found row carries the backing database id
            result_columns: vec!["table_id".into()],
            returns_rows: true,
        }
    }
}

/// Retrieves the Notion database object backing a table, whose property
/// descriptors yield the reflected columns.
#[derive(Debug, Clone)]
pub struct ReflectTable {
    pub database_id: Uuid,
}

impl ReflectTable {
    pub fn compile(&self) -> CallDescriptor {
        let mut params = serde_json::Map::new();
        params.insert("id".into(), json!(self.database_id.to_string()));
        CallDescriptor {
            endpoint: Endpoint::Databases,
            request: Request::Retrieve,
            payload: json!({"id": ":id"}),
            params,
            result_columns: Vec::new(),
            returns_rows: true,
        }
    }
}
