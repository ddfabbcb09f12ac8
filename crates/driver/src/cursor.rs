//! DBAPI cursor
//!
//! Stateful executor of one call descriptor: binds the named placeholders,
//! invokes the client, and parses the returned object into a result set of
//! flattened rows. Fetching is forward-only and non-restartable.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use notiondb_client::NotionClient;
use notiondb_common::{Error, Result};
use notiondb_sql::{CallDescriptor, Endpoint, Request};

use crate::model::{flatten, NotionObject};

/// The placeholder convention used throughout: `:name`.
pub const PARAMSTYLE: &str = "named";

/// A low-level result row: the flattened positional tuple.
pub type DbRow = Vec<Value>;

/// One entry of the cursor description. The DBAPI description is a 7-tuple
/// per column; only name and type code carry information here, the
/// remaining five slots are always absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescription {
    pub name: String,
    pub type_code: String,
}

impl ColumnDescription {
    /// The full 7-tuple form.
    pub fn as_tuple(
        &self,
    ) -> (
        &str,
        &str,
        Option<u32>,
        Option<u32>,
        Option<u32>,
        Option<u32>,
        Option<u32>,
    ) {
        (&self.name, &self.type_code, None, None, None, None, None)
    }
}

pub struct Cursor {
    client: Option<Arc<dyn NotionClient>>,
    result_set: Option<VecDeque<DbRow>>,
    description: Option<Vec<ColumnDescription>>,
    result_columns: Vec<String>,
    returns_rows: bool,
    rowcount: i64,
    lastrowid: Option<u128>,
    closed: bool,
}

impl Cursor {
    pub fn new(client: Arc<dyn NotionClient>) -> Cursor {
        Cursor {
            client: Some(client),
            result_set: None,
            description: None,
            result_columns: Vec::new(),
            returns_rows: true,
            rowcount: -1,
            lastrowid: None,
            closed: false,
        }
    }

    /// Builds a cursor directly over a result object, without a client.
    /// Used for the per-operation result sets a committed transaction
    /// hands back.
    pub fn from_result(
        object: &Value,
        result_columns: Vec<String>,
        returns_rows: bool,
    ) -> Result<Cursor> {
        let mut cursor = Cursor {
            client: None,
            result_set: None,
            description: None,
            result_columns,
            returns_rows,
            rowcount: -1,
            lastrowid: None,
            closed: false,
        };
        cursor.parse_result_set(object)?;
        Ok(cursor)
    }

    /// Sequence of column descriptions for the current result set, or None
    /// when the statement does not return rows.
    pub fn description(&self) -> Option<&[ColumnDescription]> {
        if !self.returns_rows {
            return None;
        }
        self.description.as_deref()
    }

    /// Rows produced by the last execute; -1 before any execute.
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    /// 128-bit integer form of the id of the last object the client
    /// returned; None when the last execute returned no objects.
    pub fn lastrowid(&self) -> Option<u128> {
        self.lastrowid
    }

    pub fn paramstyle(&self) -> &'static str {
        PARAMSTYLE
    }

    pub fn result_columns(&self) -> &[String] {
        &self.result_columns
    }

    pub fn returns_rows(&self) -> bool {
        self.returns_rows
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::ResourceClosed(
                "cannot fetch rows or execute operations on a closed cursor".into(),
            ));
        }
        Ok(())
    }

    /// Prepares and executes one call descriptor: binds `:name`
    /// placeholders, validates the payload, invokes the client, and parses
    /// the response into the result set.
    pub fn execute(&mut self, descriptor: &CallDescriptor) -> Result<&mut Cursor> {
        self.check_open()?;
        let client = self
            .client
            .clone()
            .ok_or_else(|| Error::Interface("cursor has no client to execute on".into()))?;

        let payload = descriptor.bound_payload()?;
        if descriptor.endpoint == Endpoint::Pages && descriptor.request == Request::Create {
            if payload.get("properties").is_none() {
                return Err(Error::Interface(format!(
                    "missing \"properties\" object in payload: {payload}"
                )));
            }
            if payload.get("parent").is_none() {
                return Err(Error::Interface(format!(
                    "missing \"parent\" object in payload: {payload}"
                )));
            }
        }

        tracing::debug!(
            endpoint = descriptor.endpoint.as_str(),
            request = descriptor.request.as_str(),
            "executing call descriptor"
        );
        let object = client.call(
            descriptor.endpoint.as_str(),
            descriptor.request.as_str(),
            payload,
        )?;

        self.result_columns = descriptor.result_columns.clone();
        self.returns_rows = descriptor.returns_rows;
        self.parse_result_set(&object)?;
        Ok(self)
    }

    /// Reserved by the DBAPI surface; not implemented.
    pub fn executemany(&mut self, _descriptors: &[CallDescriptor]) -> Result<&mut Cursor> {
        Err(Error::Interface("executemany is not implemented".into()))
    }

    fn parse_result_set(&mut self, object: &Value) -> Result<()> {
        let results: Vec<&Value> = if object.get("object") == Some(&Value::String("list".into()))
        {
            object
                .get("results")
                .and_then(Value::as_array)
                .map(|items| items.iter().collect())
                .unwrap_or_default()
        } else if object.as_object().map(|m| m.is_empty()).unwrap_or(false) {
            Vec::new()
        } else {
            vec![object]
        };

        let mut rows = VecDeque::with_capacity(results.len());
        self.description = None;
        self.lastrowid = None;
        for result in results {
            let parsed = NotionObject::parse(result)?;
            if self.description.is_none() {
                self.description = Some(
                    parsed
                        .properties()
                        .iter()
                        .map(|p| ColumnDescription {
                            name: p.name.clone(),
                            type_code: p.kind.clone(),
                        })
                        .collect(),
                );
            }
            self.lastrowid = Uuid::parse_str(parsed.id()).ok().map(|u| u.as_u128());
            rows.push_back(flatten(&parsed));
        }
        self.rowcount = rows.len() as i64;
        self.result_set = Some(rows);
        Ok(())
    }

    /// Fetches the next row, or None once the set is exhausted.
    pub fn fetchone(&mut self) -> Result<Option<DbRow>> {
        self.check_open()?;
        let result_set = self.result_set.as_mut().ok_or_else(|| {
            Error::Interface(
                "no result set: call execute() before fetching rows".into(),
            )
        })?;
        Ok(result_set.pop_front())
    }

    /// Fetches all remaining rows. The set is exhausted afterwards, so a
    /// second call returns an empty sequence.
    pub fn fetchall(&mut self) -> Result<Vec<DbRow>> {
        self.check_open()?;
        let result_set = self.result_set.as_mut().ok_or_else(|| {
            Error::Interface(
                "no result set: call execute() before fetching rows".into(),
            )
        })?;
        Ok(result_set.drain(..).collect())
    }

    /// Closes the cursor. Every later operation fails.
    pub fn close(&mut self) {
        self.description = None;
        self.result_set = None;
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notiondb_client::InMemoryNotionClient;
    use notiondb_sql::{CallDescriptor, Endpoint, Request};
    use serde_json::json;

    fn insert_descriptor(database_id: &str, name: &str) -> CallDescriptor {
        CallDescriptor {
            endpoint: Endpoint::Pages,
            request: Request::Create,
            payload: json!({
                "parent": {"type": "database_id", "database_id": database_id},
                "properties": {
                    "name": {"title": [{"text": {"content": ":name"}}]},
                },
            }),
            params: {
                let mut params = serde_json::Map::new();
                params.insert("name".into(), json!(name));
                params
            },
            result_columns: vec!["_no_id".into(), "_no_archived".into()],
            returns_rows: true,
        }
    }

    fn query_descriptor(database_id: &str) -> CallDescriptor {
        CallDescriptor {
            endpoint: Endpoint::Databases,
            request: Request::Query,
            payload: json!({"database_id": database_id}),
            params: serde_json::Map::new(),
            result_columns: vec!["name".into()],
            returns_rows: true,
        }
    }

    #[test]
    fn test_execute_and_fetch() {
        let client = Arc::new(InMemoryNotionClient::new());
        let mut cursor = Cursor::new(client.clone());
        cursor.execute(&insert_descriptor("db", "Isaac Newton")).unwrap();
        assert_eq!(cursor.rowcount(), 1);
        assert!(cursor.lastrowid().is_some());

        let row = cursor.fetchone().unwrap().unwrap();
        assert_eq!(row[0], json!("page"));
        assert!(cursor.fetchone().unwrap().is_none());
    }

    #[test]
    fn test_fetchall_exhausts_the_set() {
        let client = Arc::new(InMemoryNotionClient::new());
        let mut cursor = Cursor::new(client.clone());
        cursor.execute(&insert_descriptor("db", "a")).unwrap();
        cursor.execute(&insert_descriptor("db", "b")).unwrap();

        let mut cursor = Cursor::new(client);
        cursor.execute(&query_descriptor("db")).unwrap();
        assert_eq!(cursor.rowcount(), 2);
        assert_eq!(cursor.fetchall().unwrap().len(), 2);
        assert!(cursor.fetchall().unwrap().is_empty());
        // rowcount keeps reporting what the execute produced
        assert_eq!(cursor.rowcount(), 2);
    }

    #[test]
    fn test_rowcount_before_execute_is_minus_one() {
        let client = Arc::new(InMemoryNotionClient::new());
        let cursor = Cursor::new(client);
        assert_eq!(cursor.rowcount(), -1);
    }

    #[test]
    fn test_fetch_before_execute_fails() {
        let client = Arc::new(InMemoryNotionClient::new());
        let mut cursor = Cursor::new(client);
        assert!(matches!(cursor.fetchone(), Err(Error::Interface(_))));
    }

    #[test]
    fn test_closed_cursor_rejects_everything() {
        let client = Arc::new(InMemoryNotionClient::new());
        let mut cursor = Cursor::new(client);
        cursor.execute(&insert_descriptor("db", "x")).unwrap();
        cursor.close();
        assert!(matches!(cursor.fetchone(), Err(Error::ResourceClosed(_))));
        assert!(matches!(
            cursor.execute(&insert_descriptor("db", "y")),
            Err(Error::ResourceClosed(_))
        ));
    }

    #[test]
    fn test_missing_binding_fails() {
        let client = Arc::new(InMemoryNotionClient::new());
        let mut cursor = Cursor::new(client);
        let mut descriptor = insert_descriptor("db", "x");
        descriptor.params.clear();
        assert!(matches!(
            cursor.execute(&descriptor),
            Err(Error::Interface(_))
        ));
    }

    #[test]
    fn test_lastrowid_is_the_last_returned_object() {
        let client = Arc::new(InMemoryNotionClient::new());
        let mut cursor = Cursor::new(client.clone());
        cursor.execute(&insert_descriptor("db", "a")).unwrap();
        cursor.execute(&insert_descriptor("db", "b")).unwrap();
        let last = cursor.lastrowid().unwrap();

        let mut query = Cursor::new(client);
        query.execute(&query_descriptor("db")).unwrap();
        assert_eq!(query.lastrowid().unwrap(), last);
    }

    #[test]
    fn test_executemany_is_reserved() {
        let client = Arc::new(InMemoryNotionClient::new());
        let mut cursor = Cursor::new(client);
        assert!(matches!(
            cursor.executemany(&[]),
            Err(Error::Interface(_))
        ));
    }

    #[test]
    fn test_description_follows_property_order() {
        let client = Arc::new(InMemoryNotionClient::new());
        let mut cursor = Cursor::new(client);
        let descriptor = CallDescriptor {
            endpoint: Endpoint::Pages,
            request: Request::Create,
            payload: json!({
                "parent": {"type": "database_id", "database_id": "db"},
                "properties": {
                    "zeta": {"number": 1},
                    "alpha": {"rich_text": [{"text": {"content": "x"}}]},
                },
            }),
            params: serde_json::Map::new(),
            result_columns: vec![],
            returns_rows: true,
        };
        cursor.execute(&descriptor).unwrap();
        let description = cursor.description().unwrap();
        assert_eq!(description[0].name, "zeta");
        assert_eq!(description[1].name, "alpha");
        assert_eq!(description[0].type_code, "number");
    }
}
