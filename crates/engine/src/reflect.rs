//! Reflection: rebuilding schema from the remote store
//!
//! Reflection runs on two single-call primitives: `HasTable` (one catalog
//! query) and `ReflectTable` (one database retrieve). The retrieved
//! property descriptors become `(name, type_engine_tag, column_id, value)`
//! rows, validated by `ReflectedTableInfo` and merged into `Column`
//! instances.

use std::sync::Arc;

use serde_json::Value as Json;
use uuid::Uuid;

use notiondb_common::{Error, Result};
use notiondb_driver::{Cursor, NotionObject};
use notiondb_sql::ddl::{HasTable, ReflectTable};
use notiondb_sql::schema::{ARCHIVED_COLUMN, OBJECT_ID_COLUMN};
use notiondb_sql::{Column, MetaData, Table, TypeEngine};

use crate::engine::Engine;

/// One reflected column: the `information_schema.columns`-like row shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectedColumn {
    pub name: String,
    pub engine: TypeEngine,
    pub column_id: Option<String>,
    pub value: Json,
}

/// The reflected shape of one table, validated before it is merged into
/// the registry.
#[derive(Debug, Clone)]
pub struct ReflectedTableInfo {
    pub table: String,
    pub database_id: Uuid,
    pub columns: Vec<ReflectedColumn>,
}

impl ReflectedTableInfo {
    /// Builds the column rows from a retrieved database object. The
    /// implicit columns are synthesized: Notion carries them on the object
    /// itself, not among the properties.
    pub fn from_database(table: &str, object: &Json) -> Result<ReflectedTableInfo> {
        let parsed = NotionObject::parse(object)?;
        let NotionObject::Database { id, properties, .. } = &parsed else {
            return Err(Error::InvalidRequest(format!(
                "reflection of {table} retrieved a non-database object"
            )));
        };
        let database_id = Uuid::parse_str(id)
            .map_err(|e| Error::Internal(format!("reflected database has a bad id: {e}")))?;

        let mut columns = Vec::with_capacity(properties.len() + 2);
        for property in properties {
            let mut spec = serde_json::Map::new();
            spec.insert(property.kind.clone(), property.value.clone());
            let spec = Json::Object(spec);
            let engine =
                TypeEngine::from_notion_property(&property.kind, &spec).map_err(|_| {
                    Error::InvalidRequest(format!(
                        "cannot reflect column {} of table {table}: unknown type {}",
                        property.name, property.kind
                    ))
                })?;
            columns.push(ReflectedColumn {
                name: property.name.clone(),
                engine,
                column_id: property.id.clone(),
                value: property.value.clone(),
            });
        }
        columns.push(ReflectedColumn {
            name: OBJECT_ID_COLUMN.into(),
            engine: TypeEngine::ObjectId,
            column_id: None,
            value: Json::Null,
        });
        columns.push(ReflectedColumn {
            name: ARCHIVED_COLUMN.into(),
            engine: TypeEngine::ArchivalFlag,
            column_id: None,
            value: Json::Null,
        });

        let info = ReflectedTableInfo {
            table: table.to_owned(),
            database_id,
            columns,
        };
        info.validate()?;
        Ok(info)
    }

    /// Every table carries the implicit columns; their absence means the
    /// reflection result is unusable.
    pub fn validate(&self) -> Result<()> {
        for required in [OBJECT_ID_COLUMN, ARCHIVED_COLUMN] {
            if !self.columns.iter().any(|c| c.name == required) {
                return Err(Error::InvalidRequest(format!(
                    "reflected table {} is missing implicit column {required}",
                    self.table
                )));
            }
        }
        Ok(())
    }
}

/// Inspects a store: table existence, column reflection, registry
/// population.
pub struct Inspector<'a> {
    engine: &'a Engine,
}

impl<'a> Inspector<'a> {
    pub fn new(engine: &'a Engine) -> Inspector<'a> {
        Inspector { engine }
    }

    fn catalog_for(&self, table: &str) -> String {
        // the catalog database registers itself under the system catalog
        if table == "tables" {
            crate::engine::SYSTEM_CATALOG.to_owned()
        } else {
            self.engine.database().to_owned()
        }
    }

    fn has_table_rows(&self, table: &str) -> Result<Vec<notiondb_driver::DbRow>> {
        let descriptor = HasTable {
            table_name: table.to_owned(),
            tables_database_id: self.engine.catalog().tables_database_id,
            catalog: self.catalog_for(table),
        }
        .compile();
        let mut cursor = Cursor::new(Arc::clone(self.engine.client()));
        cursor.execute(&descriptor)?;
        cursor.fetchall()
    }

    /// Whether the table exists in the inspected database.
    pub fn has_table(&self, table: &str) -> Result<bool> {
        let rows = self.has_table_rows(table)?;
        if rows.len() > 1 {
            return Err(Error::Internal(format!(
                "found {} catalog rows for table {table}",
                rows.len()
            )));
        }
        Ok(!rows.is_empty())
    }

    /// The backing database id of a table, resolved through the catalog.
    pub fn table_database_id(&self, table: &str) -> Result<Option<Uuid>> {
        let rows = self.has_table_rows(table)?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        // the catalog row's table_id property holds the database id
        let table_id = row
            .chunks_exact(4)
            .find(|quad| quad[0] == Json::String("table_id".into()))
            .and_then(|quad| quad[3].pointer("/0/text/content"))
            .and_then(Json::as_str)
            .ok_or_else(|| {
                Error::Internal(format!("catalog row for {table} has no table_id"))
            })?;
        let id = Uuid::parse_str(table_id)
            .map_err(|e| Error::Internal(format!("catalog row for {table} has a bad id: {e}")))?;
        Ok(Some(id))
    }

    /// The reflected column descriptors of a table: the user declaration
    /// plus the two implicit columns.
    pub fn get_columns(&self, table: &str) -> Result<Vec<ReflectedColumn>> {
        Ok(self.reflect_info(table)?.columns)
    }

    fn reflect_info(&self, table: &str) -> Result<ReflectedTableInfo> {
        let database_id = self.table_database_id(table)?.ok_or_else(|| {
            Error::InvalidRequest(format!("cannot reflect unknown table {table}"))
        })?;
        let descriptor = ReflectTable { database_id }.compile();
        let object = self
            .engine
            .client()
            .call("databases", "retrieve", descriptor.bound_payload()?)?;
        ReflectedTableInfo::from_database(table, &object)
    }

    /// Populates a table shell from the store.
    pub fn reflect_table(&self, table: &mut Table) -> Result<()> {
        let info = self.reflect_info(table.name())?;
        for column in &info.columns {
            if column.name == OBJECT_ID_COLUMN || column.name == ARCHIVED_COLUMN {
                continue;
            }
            table.append_column(Column::new(column.name.clone(), column.engine))?;
        }
        table.set_database_id(info.database_id);
        table.finish_population()?;
        tracing::debug!(table = table.name(), "reflected table");
        Ok(())
    }

    /// Reflects every registered, unpopulated table in the registry.
    pub fn reflect(&self, metadata: &mut MetaData) -> Result<()> {
        for name in metadata.unpopulated_tables() {
            if !self.has_table(&name)? {
                return Err(Error::InvalidRequest(format!(
                    "table {name} is registered but does not exist in the store"
                )));
            }
            let table = metadata
                .get_mut(&name)
                .ok_or_else(|| Error::Internal(format!("table {name} vanished mid-reflect")))?;
            self.reflect_table(table)?;
        }
        Ok(())
    }
}
