//! Staged operations
//!
//! Every statement a connection executes becomes an operation staged inside
//! a transaction. Operations follow a fixed protocol: `stage` validates and
//! prepares, `do_commit` performs the client call (idempotently within the
//! transaction), `do_rollback` reverts a previously committed call, and
//! `result` exposes what the client returned.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use uuid::Uuid;

use notiondb_client::NotionClient;
use notiondb_common::{Error, Result};
use notiondb_sql::{CallDescriptor, MetaData, Table};

/// Where the system catalog lives: the database ids and names the engine
/// bootstrapped, threaded through to the operations that need them.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// The page new databases are created under
    pub root_page_id: Uuid,
    /// The `tables` catalog database
    pub tables_database_id: Uuid,
    /// The catalog name user tables are registered under
    pub catalog_name: String,
}

/// Shared state handed to every staged operation.
#[derive(Clone)]
pub struct OperationContext {
    pub client: Arc<dyn NotionClient>,
    pub metadata: Arc<RwLock<MetaData>>,
    pub catalog: CatalogConfig,
}

impl OperationContext {
    /// Resolve the `database_id` binding for a table whose backing database
    /// may only have come into existence earlier in the same transaction.
    fn resolve_database_id(&self, table: &str, descriptor: &mut CallDescriptor) -> Result<()> {
        if !has_placeholder(&descriptor.payload, ":database_id")
            || descriptor.params.contains_key("database_id")
        {
            return Ok(());
        }
        let metadata = self.metadata.read();
        let database_id = metadata
            .get(table)
            .and_then(Table::database_id)
            .ok_or_else(|| {
                Error::Operational(format!(
                    "table {table} has no backing database yet; create or reflect it first"
                ))
            })?;
        descriptor.bind_param("database_id", json!(database_id.to_string()));
        Ok(())
    }
}

/// Whether the payload still contains the given `:name` placeholder.
fn has_placeholder(payload: &Value, placeholder: &str) -> bool {
    match payload {
        Value::String(s) => s == placeholder,
        Value::Array(items) => items.iter().any(|v| has_placeholder(v, placeholder)),
        Value::Object(map) => map.values().any(|v| has_placeholder(v, placeholder)),
        _ => false,
    }
}

/// One result set produced by a committed operation.
#[derive(Debug, Clone)]
pub struct ResultSet {
    /// The raw object the client returned
    pub object: Value,
    /// Column projection for the rows
    pub result_columns: Vec<String>,
    pub returns_rows: bool,
    /// The table the statement ran against, when there is one
    pub table: Option<String>,
}

/// A change request processed in the context of a transaction.
pub trait Operation: Send {
    /// Pre-commit validation and preparation.
    fn stage(&mut self) -> Result<()>;

    /// Perform the committing client call. Must be idempotent within the
    /// transaction.
    fn do_commit(&mut self) -> Result<()>;

    /// Revert a previously committed call. Only invoked for operations
    /// whose `do_commit` succeeded.
    fn do_rollback(&mut self) -> Result<()>;

    /// The result of the committed call, if any.
    fn result(&self) -> Option<ResultSet>;
}

/// Creates a new page in a table's database (`pages.create`).
pub struct StagedInsert {
    ctx: OperationContext,
    table: String,
    descriptor: CallDescriptor,
    bound: Option<Value>,
    page_id: Option<String>,
    committed: bool,
    result: Option<Value>,
}

impl StagedInsert {
    pub fn new(ctx: OperationContext, table: String, descriptor: CallDescriptor) -> StagedInsert {
        StagedInsert {
            ctx,
            table,
            descriptor,
            bound: None,
            page_id: None,
            committed: false,
            result: None,
        }
    }
}

impl Operation for StagedInsert {
    fn stage(&mut self) -> Result<()> {
        self.ctx
            .resolve_database_id(&self.table, &mut self.descriptor)?;
        let payload = self.descriptor.bound_payload()?;
        if payload.get("parent").is_none() {
            return Err(Error::Interface(format!(
                "invalid pages.create payload: missing \"parent\": {payload}"
            )));
        }
        if payload.get("properties").is_none() {
            return Err(Error::Interface(format!(
                "invalid pages.create payload: missing \"properties\": {payload}"
            )));
        }
        self.bound = Some(payload);
        Ok(())
    }

    fn do_commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        let payload = self
            .bound
            .clone()
            .ok_or_else(|| Error::Internal("insert committed before staging".into()))?;
        let page = self.ctx.client.pages_create(payload)?;
        self.page_id = page.get("id").and_then(Value::as_str).map(str::to_owned);
        self.result = Some(page);
        self.committed = true;
        Ok(())
    }

    fn do_rollback(&mut self) -> Result<()> {
        // undo by archiving the page that was created
        if let Some(page_id) = &self.page_id {
            self.ctx.client.pages_update(json!({
                "id": page_id,
                "data": {"archived": true},
            }))?;
            tracing::debug!(page_id, "rolled back staged insert");
        }
        Ok(())
    }

    fn result(&self) -> Option<ResultSet> {
        self.result.clone().map(|object| ResultSet {
            object,
            result_columns: self.descriptor.result_columns.clone(),
            returns_rows: self.descriptor.returns_rows,
            table: Some(self.table.clone()),
        })
    }
}

/// Queries a table's database (`databases.query`). Non-mutating; execution
/// is still deferred to commit so the read sees committed state.
pub struct StagedSelect {
    ctx: OperationContext,
    table: String,
    descriptor: CallDescriptor,
    bound: Option<Value>,
    result: Option<Value>,
}

impl StagedSelect {
    pub fn new(ctx: OperationContext, table: String, descriptor: CallDescriptor) -> StagedSelect {
        StagedSelect {
            ctx,
            table,
            descriptor,
            bound: None,
            result: None,
        }
    }
}

impl Operation for StagedSelect {
    fn stage(&mut self) -> Result<()> {
        self.ctx
            .resolve_database_id(&self.table, &mut self.descriptor)?;
        let payload = self.descriptor.bound_payload()?;
        if payload.get("database_id").is_none() {
            return Err(Error::Interface(format!(
                "invalid databases.query payload: missing \"database_id\": {payload}"
            )));
        }
        self.bound = Some(payload);
        Ok(())
    }

    fn do_commit(&mut self) -> Result<()> {
        if self.result.is_some() {
            return Ok(());
        }
        let payload = self
            .bound
            .clone()
            .ok_or_else(|| Error::Internal("select committed before staging".into()))?;
        self.result = Some(self.ctx.client.databases_query(payload)?);
        Ok(())
    }

    fn do_rollback(&mut self) -> Result<()> {
        // nothing to revert, SELECT is non-mutating
        Ok(())
    }

    fn result(&self) -> Option<ResultSet> {
        self.result.clone().map(|object| ResultSet {
            object,
            result_columns: self.descriptor.result_columns.clone(),
            returns_rows: self.descriptor.returns_rows,
            table: Some(self.table.clone()),
        })
    }
}

/// Creates a table: the backing database (`databases.create`) plus its
/// registration row in the system catalog.
pub struct StagedCreateTable {
    ctx: OperationContext,
    table: String,
    descriptor: CallDescriptor,
    bound: Option<Value>,
    database_id: Option<Uuid>,
    catalog_page_id: Option<String>,
    committed: bool,
    result: Option<Value>,
}

impl StagedCreateTable {
    pub fn new(
        ctx: OperationContext,
        table: String,
        descriptor: CallDescriptor,
    ) -> StagedCreateTable {
        StagedCreateTable {
            ctx,
            table,
            descriptor,
            bound: None,
            database_id: None,
            catalog_page_id: None,
            committed: false,
            result: None,
        }
    }
}

impl Operation for StagedCreateTable {
    fn stage(&mut self) -> Result<()> {
        if !self.descriptor.params.contains_key("page_id") {
            self.descriptor.bind_param(
                "page_id",
                json!(self.ctx.catalog.root_page_id.to_string()),
            );
        }
        let payload = self.descriptor.bound_payload()?;
        if payload.get("properties").is_none() {
            return Err(Error::Interface(format!(
                "invalid databases.create payload: missing \"properties\": {payload}"
            )));
        }
        self.bound = Some(payload);
        Ok(())
    }

    fn do_commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        let payload = self
            .bound
            .clone()
            .ok_or_else(|| Error::Internal("create table committed before staging".into()))?;
        let database = self.ctx.client.databases_create(payload)?;
        let id = database
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal(format!("databases.create returned no id: {database}")))?;
        let database_id = Uuid::parse_str(id)
            .map_err(|e| Error::Internal(format!("databases.create returned a bad id: {e}")))?;

        // register in the system catalog
        let catalog_row = self.ctx.client.pages_create(json!({
            "parent": {
                "type": "database_id",
                "database_id": self.ctx.catalog.tables_database_id.to_string(),
            },
            "properties": {
                "table_name": {"title": [{"text": {"content": self.table}}]},
                "table_schema": {"rich_text": [{"text": {"content": ""}}]},
                "table_catalog": {"rich_text": [{"text": {"content": self.ctx.catalog.catalog_name}}]},
                "table_id": {"rich_text": [{"text": {"content": id}}]},
            },
        }))?;
        self.catalog_page_id = catalog_row
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned);

        if let Some(table) = self.ctx.metadata.write().get_mut(&self.table) {
            table.set_database_id(database_id);
        }
        tracing::info!(table = %self.table, %database_id, "created table");

        self.database_id = Some(database_id);
        self.result = Some(database);
        self.committed = true;
        Ok(())
    }

    fn do_rollback(&mut self) -> Result<()> {
        // the catalog row is what makes the table visible; archive it
        if let Some(page_id) = &self.catalog_page_id {
            self.ctx.client.pages_update(json!({
                "id": page_id,
                "data": {"archived": true},
            }))?;
        }
        self.ctx.metadata.write().remove(&self.table);
        tracing::debug!(table = %self.table, "rolled back create table");
        Ok(())
    }

    fn result(&self) -> Option<ResultSet> {
        self.result.clone().map(|object| ResultSet {
            object,
            result_columns: self.descriptor.result_columns.clone(),
            returns_rows: self.descriptor.returns_rows,
            table: Some(self.table.clone()),
        })
    }
}

/// Rewrites properties of every page matching the statement's filter:
/// one `databases.query` followed by a `pages.update` per match.
pub struct StagedUpdate {
    ctx: OperationContext,
    table: String,
    descriptor: CallDescriptor,
    bound: Option<Value>,
    /// `(page id, previous property values)` for rollback, in commit order
    updated: Vec<(String, Value)>,
    committed: bool,
    result: Option<Value>,
}

impl StagedUpdate {
    pub fn new(ctx: OperationContext, table: String, descriptor: CallDescriptor) -> StagedUpdate {
        StagedUpdate {
            ctx,
            table,
            descriptor,
            bound: None,
            updated: Vec::new(),
            committed: false,
            result: None,
        }
    }

    fn query_payload(bound: &Value) -> Value {
        let mut query = serde_json::Map::new();
        query.insert("database_id".into(), bound["database_id"].clone());
        if let Some(filter) = bound.get("filter") {
            query.insert("filter".into(), filter.clone());
        }
        Value::Object(query)
    }
}

impl Operation for StagedUpdate {
    fn stage(&mut self) -> Result<()> {
        self.ctx
            .resolve_database_id(&self.table, &mut self.descriptor)?;
        let payload = self.descriptor.bound_payload()?;
        if payload.pointer("/data/properties").is_none() {
            return Err(Error::Interface(format!(
                "invalid update payload: missing \"data.properties\": {payload}"
            )));
        }
        self.bound = Some(payload);
        Ok(())
    }

    fn do_commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        let bound = self
            .bound
            .clone()
            .ok_or_else(|| Error::Internal("update committed before staging".into()))?;
        let matches = self
            .ctx
            .client
            .databases_query(Self::query_payload(&bound))?;
        let new_properties = bound.pointer("/data/properties").cloned().unwrap_or(json!({}));

        let mut results = Vec::new();
        for page in matches.get("results").and_then(Value::as_array).into_iter().flatten() {
            let Some(page_id) = page.get("id").and_then(Value::as_str) else {
                continue;
            };
            // keep the previous values of just the properties being rewritten
            let mut previous = serde_json::Map::new();
            if let Some(names) = new_properties.as_object() {
                for name in names.keys() {
                    if let Some(old) = page.pointer(&format!("/properties/{name}")) {
                        previous.insert(name.clone(), old.clone());
                    }
                }
            }
            let updated = self.ctx.client.pages_update(json!({
                "id": page_id,
                "data": {"properties": new_properties},
            }))?;
            self.updated
                .push((page_id.to_owned(), Value::Object(previous)));
            results.push(updated);
        }
        self.result = Some(json!({"object": "list", "results": results}));
        self.committed = true;
        Ok(())
    }

    fn do_rollback(&mut self) -> Result<()> {
        for (page_id, previous) in self.updated.iter().rev() {
            self.ctx.client.pages_update(json!({
                "id": page_id,
                "data": {"properties": previous},
            }))?;
        }
        Ok(())
    }

    fn result(&self) -> Option<ResultSet> {
        self.result.clone().map(|object| ResultSet {
            object,
            result_columns: self.descriptor.result_columns.clone(),
            returns_rows: self.descriptor.returns_rows,
            table: Some(self.table.clone()),
        })
    }
}

/// Archives every page matching the statement's filter. Rollback restores
/// the archival flag.
pub struct StagedDelete {
    ctx: OperationContext,
    table: String,
    descriptor: CallDescriptor,
    bound: Option<Value>,
    archived: Vec<String>,
    committed: bool,
    result: Option<Value>,
}

impl StagedDelete {
    pub fn new(ctx: OperationContext, table: String, descriptor: CallDescriptor) -> StagedDelete {
        StagedDelete {
            ctx,
            table,
            descriptor,
            bound: None,
            archived: Vec::new(),
            committed: false,
            result: None,
        }
    }
}

impl Operation for StagedDelete {
    fn stage(&mut self) -> Result<()> {
        self.ctx
            .resolve_database_id(&self.table, &mut self.descriptor)?;
        self.bound = Some(self.descriptor.bound_payload()?);
        Ok(())
    }

    fn do_commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        let bound = self
            .bound
            .clone()
            .ok_or_else(|| Error::Internal("delete committed before staging".into()))?;
        let matches = self
            .ctx
            .client
            .databases_query(StagedUpdate::query_payload(&bound))?;

        let mut results = Vec::new();
        for page in matches.get("results").and_then(Value::as_array).into_iter().flatten() {
            let Some(page_id) = page.get("id").and_then(Value::as_str) else {
                continue;
            };
            let archived = self.ctx.client.pages_update(json!({
                "id": page_id,
                "data": {"archived": true},
            }))?;
            self.archived.push(page_id.to_owned());
            results.push(archived);
        }
        self.result = Some(json!({"object": "list", "results": results}));
        self.committed = true;
        Ok(())
    }

    fn do_rollback(&mut self) -> Result<()> {
        for page_id in self.archived.iter().rev() {
            self.ctx.client.pages_update(json!({
                "id": page_id,
                "data": {"archived": false},
            }))?;
        }
        Ok(())
    }

    fn result(&self) -> Option<ResultSet> {
        self.result.clone().map(|object| ResultSet {
            object,
            result_columns: self.descriptor.result_columns.clone(),
            returns_rows: self.descriptor.returns_rows,
            table: Some(self.table.clone()),
        })
    }
}

/// Drops a table by archiving its system-catalog row and unregistering it
/// from the schema registry. The backing database object stays behind,
/// unreachable through the catalog.
pub struct StagedDropTable {
    ctx: OperationContext,
    table: String,
    descriptor: CallDescriptor,
    catalog_page_id: Option<String>,
    removed: Option<Table>,
    committed: bool,
}

impl StagedDropTable {
    pub fn new(
        ctx: OperationContext,
        table: String,
        descriptor: CallDescriptor,
    ) -> StagedDropTable {
        StagedDropTable {
            ctx,
            table,
            descriptor,
            catalog_page_id: None,
            removed: None,
            committed: false,
        }
    }
}

impl Operation for StagedDropTable {
    fn stage(&mut self) -> Result<()> {
        let found = self.ctx.client.databases_query(json!({
            "database_id": self.ctx.catalog.tables_database_id.to_string(),
            "filter": {
                "and": [
                    {"property": "table_name", "title": {"equals": self.table}},
                    {"property": "table_catalog",
                     "rich_text": {"equals": self.ctx.catalog.catalog_name}},
                ]
            },
        }))?;
        let results = found.get("results").and_then(Value::as_array);
        let row = results.and_then(|r| r.first()).ok_or_else(|| {
            Error::InvalidRequest(format!("cannot drop unknown table {}", self.table))
        })?;
        let page_id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal(format!("catalog row for {} has no id", self.table)))?;
        self.descriptor.bind_param("page_id", json!(page_id));
        self.catalog_page_id = Some(page_id.to_owned());
        Ok(())
    }

    fn do_commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        if self.catalog_page_id.is_none() {
            return Err(Error::Internal("drop table committed before staging".into()));
        }
        self.ctx.client.pages_update(self.descriptor.bound_payload()?)?;
        self.removed = self.ctx.metadata.write().remove(&self.table);
        tracing::info!(table = %self.table, "dropped table");
        self.committed = true;
        Ok(())
    }

    fn do_rollback(&mut self) -> Result<()> {
        if let Some(page_id) = &self.catalog_page_id {
            if self.committed {
                self.ctx.client.pages_update(json!({
                    "id": page_id,
                    "data": {"archived": false},
                }))?;
            }
        }
        if let Some(table) = self.removed.take() {
            if let Err(e) = self.ctx.metadata.write().add(table) {
                tracing::warn!(
                    table = %self.table,
                    error = %e,
                    "failed to re-register table on rollback"
                );
            }
        }
        Ok(())
    }

    fn result(&self) -> Option<ResultSet> {
        None
    }
}
