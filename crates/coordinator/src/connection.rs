//! Connection and composite cursor
//!
//! The connection is the high-level execute/commit/rollback API. Statements
//! do not touch the client when executed: they are compiled, wrapped in a
//! staged operation, and appended to the connection's transaction. Commit
//! runs the two-phase protocol and exposes the per-operation result sets
//! through a composite cursor. A connection serializes its own statements
//! and is not thread-safe; the transaction manager underneath is shared.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use notiondb_common::{Error, Result};
use notiondb_driver::{ColumnDescription, Cursor, CursorResult, DbRow};
use notiondb_sql::parsing::Statement;
use notiondb_sql::{NotionCompiler, Params, Parser, TypeEngine};

use crate::lock::LockMode;
use crate::operation::{
    OperationContext, ResultSet, StagedCreateTable, StagedDelete, StagedDropTable, StagedInsert,
    StagedSelect, StagedUpdate,
};
use crate::transaction::TransactionManager;

/// Resource id under which DDL serializes.
const SCHEMA_RESOURCE: &str = "schema";

pub struct Connection {
    manager: Arc<TransactionManager>,
    ctx: OperationContext,
    tid: Option<Uuid>,
    /// Tables registered by CREATE TABLE statements of the open transaction
    created_tables: Vec<String>,
    /// Result sets of the last committed transaction
    results: Vec<ResultSet>,
    last_cursor: Option<Arc<Mutex<CompositeCursor>>>,
}

impl Connection {
    pub fn new(manager: Arc<TransactionManager>, ctx: OperationContext) -> Connection {
        Connection {
            manager,
            ctx,
            tid: None,
            created_tables: Vec::new(),
            results: Vec::new(),
            last_cursor: None,
        }
    }

    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.tid.is_some()
    }

    /// The id of the open transaction, if any.
    pub fn transaction_id(&self) -> Option<Uuid> {
        self.tid
    }

    /// Parses and executes a SQL string. See [`execute`](Self::execute).
    pub fn execute_sql(&mut self, sql: &str, params: &Params) -> Result<CursorResult> {
        let statement = Parser::parse(sql)?;
        self.execute(&statement, params)
    }

    /// Executes a statement inside the connection's transaction, opening
    /// one first if needed. The statement is compiled and staged; the
    /// client is not called until `commit`. Both mutating and non-mutating
    /// statements therefore return an empty result here.
    pub fn execute(&mut self, statement: &Statement, params: &Params) -> Result<CursorResult> {
        let tid = match self.tid {
            Some(tid) => tid,
            None => {
                let tid = self.manager.begin();
                self.tid = Some(tid);
                tid
            }
        };

        let descriptor = {
            let metadata = self.ctx.metadata.read();
            NotionCompiler::new(&metadata)
                .with_parent_page(self.ctx.catalog.root_page_id)
                .compile(statement, params)?
        };

        if let Statement::CreateTable { name, .. } = statement {
            if self.ctx.metadata.read().contains(name) {
                return Err(Error::InvalidRequest(format!(
                    "table {name} is already registered"
                )));
            }
        }

        let (resource, mode, operation): (String, LockMode, Box<dyn crate::Operation>) =
            match statement {
                Statement::CreateTable { name, .. } => (
                    SCHEMA_RESOURCE.to_owned(),
                    LockMode::Exclusive,
                    Box::new(StagedCreateTable::new(
                        self.ctx.clone(),
                        name.clone(),
                        descriptor,
                    )),
                ),
                Statement::DropTable { name } => (
                    SCHEMA_RESOURCE.to_owned(),
                    LockMode::Exclusive,
                    Box::new(StagedDropTable::new(
                        self.ctx.clone(),
                        name.clone(),
                        descriptor,
                    )),
                ),
                Statement::Insert { table, .. } => (
                    table.clone(),
                    LockMode::Exclusive,
                    Box::new(StagedInsert::new(self.ctx.clone(), table.clone(), descriptor)),
                ),
                Statement::Update { table, .. } => (
                    table.clone(),
                    LockMode::Exclusive,
                    Box::new(StagedUpdate::new(self.ctx.clone(), table.clone(), descriptor)),
                ),
                Statement::Delete { table, .. } => (
                    table.clone(),
                    LockMode::Exclusive,
                    Box::new(StagedDelete::new(self.ctx.clone(), table.clone(), descriptor)),
                ),
                Statement::Select { table, .. } => (
                    table.clone(),
                    LockMode::Shared,
                    Box::new(StagedSelect::new(self.ctx.clone(), table.clone(), descriptor)),
                ),
            };

        self.manager.add_change(tid, &resource, mode, operation)?;

        // With the schema lock held, a CREATE TABLE's table is registered
        // so later statements of the same transaction compile against it.
        // Concurrent creates are serialized by the lock, never by racing
        // the registry itself.
        if let Statement::CreateTable { name, columns } = statement {
            let table = notiondb_sql::Table::new(
                name.clone(),
                columns
                    .iter()
                    .map(|c| notiondb_sql::Column::new(c.name.clone(), TypeEngine::from(c.datatype)))
                    .collect(),
            )?;
            self.ctx.metadata.write().add(table)?;
            self.created_tables.push(name.clone());
        }

        // execution is deferred to commit
        Ok(CursorResult::empty())
    }

    /// Commits the open transaction: runs the two-phase protocol and
    /// builds the composite cursor over the per-operation result sets.
    pub fn commit(&mut self) -> Result<()> {
        let tid = self
            .tid
            .take()
            .ok_or_else(|| Error::InvalidRequest("no transaction is open".into()))?;

        match self.manager.commit(tid) {
            Ok(results) => {
                self.created_tables.clear();
                let children = results
                    .iter()
                    .map(|rs| {
                        Cursor::from_result(
                            &rs.object,
                            rs.result_columns.clone(),
                            rs.returns_rows,
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.results = results;
                self.last_cursor = Some(Arc::new(Mutex::new(CompositeCursor::new(children))));
                Ok(())
            }
            Err(e) => {
                self.forget_created_tables();
                Err(e)
            }
        }
    }

    /// Rolls back the open transaction. A composite cursor built by an
    /// earlier commit stays accessible, but its cursors are closed.
    pub fn rollback(&mut self) -> Result<()> {
        let tid = self
            .tid
            .take()
            .ok_or_else(|| Error::InvalidRequest("no transaction is open".into()))?;
        self.manager.rollback(tid)?;
        self.forget_created_tables();
        if let Some(cursor) = &self.last_cursor {
            cursor.lock().close_all();
        }
        Ok(())
    }

    /// The composite cursor over the last committed transaction's result
    /// sets.
    pub fn cursor(&self) -> Result<Arc<Mutex<CompositeCursor>>> {
        self.last_cursor
            .clone()
            .ok_or_else(|| Error::InvalidRequest("no committed transaction".into()))
    }

    /// Typed results of the last committed transaction, one `CursorResult`
    /// per operation that produced rows, in commit order.
    pub fn results(&self) -> Result<Vec<CursorResult>> {
        let metadata = self.ctx.metadata.read();
        self.results
            .iter()
            .filter(|rs| rs.returns_rows)
            .map(|rs| {
                let engines: BTreeMap<String, TypeEngine> = rs
                    .table
                    .as_deref()
                    .and_then(|name| metadata.get(name))
                    .map(|table| table.engines())
                    .unwrap_or_default();
                let mut cursor =
                    Cursor::from_result(&rs.object, rs.result_columns.clone(), rs.returns_rows)?;
                CursorResult::from_cursor(&mut cursor, &engines)
            })
            .collect()
    }

    /// Tables registered by an uncommitted CREATE TABLE never made it to
    /// the store; unregister them so the names are reusable.
    fn forget_created_tables(&mut self) {
        let mut metadata = self.ctx.metadata.write();
        for name in self.created_tables.drain(..) {
            let never_created = metadata
                .get(&name)
                .map(|t| t.database_id().is_none())
                .unwrap_or(false);
            if never_created {
                metadata.remove(&name);
            }
        }
    }
}

/// A cursor over the ordered result sets of a committed transaction. Only
/// `nextset` advances; it discards whatever remains of the current set.
pub struct CompositeCursor {
    children: Vec<Cursor>,
    current: usize,
}

impl CompositeCursor {
    pub fn new(children: Vec<Cursor>) -> CompositeCursor {
        CompositeCursor {
            children,
            current: 0,
        }
    }

    /// Number of result sets.
    pub fn sets(&self) -> usize {
        self.children.len()
    }

    /// Advances to the next result set, closing the current one and
    /// discarding its remaining rows. Returns false when no sets remain.
    pub fn nextset(&mut self) -> bool {
        if self.current + 1 < self.children.len() {
            self.children[self.current].close();
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn child(&self) -> Result<&Cursor> {
        self.children
            .get(self.current)
            .ok_or_else(|| Error::Interface("composite cursor has no result sets".into()))
    }

    fn child_mut(&mut self) -> Result<&mut Cursor> {
        let current = self.current;
        self.children
            .get_mut(current)
            .ok_or_else(|| Error::Interface("composite cursor has no result sets".into()))
    }

    /// The current child cursor.
    pub fn current(&mut self) -> Result<&mut Cursor> {
        self.child_mut()
    }

    pub fn rowcount(&self) -> i64 {
        self.child().map(Cursor::rowcount).unwrap_or(-1)
    }

    pub fn lastrowid(&self) -> Option<u128> {
        self.child().ok().and_then(Cursor::lastrowid)
    }

    pub fn description(&self) -> Option<&[ColumnDescription]> {
        self.child().ok().and_then(Cursor::description)
    }

    pub fn paramstyle(&self) -> &'static str {
        notiondb_driver::PARAMSTYLE
    }

    pub fn fetchone(&mut self) -> Result<Option<DbRow>> {
        self.child_mut()?.fetchone()
    }

    pub fn fetchall(&mut self) -> Result<Vec<DbRow>> {
        self.child_mut()?.fetchall()
    }

    /// Closes every child cursor.
    pub fn close_all(&mut self) {
        for child in &mut self.children {
            child.close();
        }
    }
}
