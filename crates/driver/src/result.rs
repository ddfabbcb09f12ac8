//! Typed result layer
//!
//! `ResultMetadata` describes the columns of a result set, `Row` is a
//! read-only typed row decoded through the columns' type engines, and
//! `CursorResult` is the high-level fetch interface over a cursor.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde_json::Value as Json;
use uuid::Uuid;

use notiondb_common::{Error, Result};
use notiondb_sql::schema::{ARCHIVED_COLUMN, OBJECT_ID_COLUMN};
use notiondb_sql::{TypeEngine, Value};

use crate::cursor::{Cursor, DbRow};

/// Column metadata of a result set: ordered keys with both lookup
/// directions. The no-rows sentinel answers `returns_rows = false` and
/// fails on any accessor use.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMetadata {
    keys: Vec<String>,
    key_to_index: BTreeMap<String, usize>,
    returns_rows: bool,
}

impl ResultMetadata {
    pub fn new(keys: Vec<String>) -> ResultMetadata {
        let key_to_index = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        ResultMetadata {
            keys,
            key_to_index,
            returns_rows: true,
        }
    }

    /// The sentinel for statements that do not return rows.
    pub fn no_rows() -> ResultMetadata {
        ResultMetadata {
            keys: Vec::new(),
            key_to_index: BTreeMap::new(),
            returns_rows: false,
        }
    }

    pub fn returns_rows(&self) -> bool {
        self.returns_rows
    }

    fn check_returns_rows(&self) -> Result<()> {
        if !self.returns_rows {
            return Err(Error::ResourceClosed(
                "this result object does not return rows; it has been closed automatically"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn keys(&self) -> Result<&[String]> {
        self.check_returns_rows()?;
        Ok(&self.keys)
    }

    pub fn index_of(&self, key: &str) -> Result<Option<usize>> {
        self.check_returns_rows()?;
        Ok(self.key_to_index.get(key).copied())
    }

    pub fn key_at(&self, index: usize) -> Result<Option<&str>> {
        self.check_returns_rows()?;
        Ok(self.keys.get(index).map(String::as_str))
    }
}

/// A single typed result row. Read-only: there is no way to assign or
/// remove values after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    metadata: Arc<ResultMetadata>,
    values: Vec<Value>,
}

impl Row {
    /// Keyed access by column name.
    pub fn get(&self, key: &str) -> Result<&Value> {
        match self.metadata.index_of(key)? {
            Some(index) => Ok(&self.values[index]),
            None => Err(Error::Argument(format!("row has no column named {key}"))),
        }
    }

    /// Indexed access by ordinal.
    pub fn get_at(&self, index: usize) -> Result<&Value> {
        self.metadata.check_returns_rows()?;
        self.values
            .get(index)
            .ok_or_else(|| Error::Argument(format!("row index out of range: {index}")))
    }

    pub fn keys(&self) -> Result<&[String]> {
        self.metadata.keys()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// A name-to-value view of the row.
    pub fn mapping(&self) -> BTreeMap<&str, &Value> {
        self.metadata
            .keys
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
            .collect()
    }
}

/// Decodes one flattened row into a typed `Row`.
///
/// The implicit `_no_id` and `_no_archived` columns come from the row
/// preamble; every other key is resolved against the property quads, with
/// the column's engine (or, failing that, the property's own type tag)
/// driving the decode.
pub(crate) fn build_row(
    db_row: &DbRow,
    metadata: &Arc<ResultMetadata>,
    engines: &BTreeMap<String, TypeEngine>,
) -> Result<Row> {
    let kind = db_row
        .first()
        .and_then(Json::as_str)
        .ok_or_else(|| Error::Internal(format!("malformed result row: {db_row:?}")))?;
    // pages: (kind, id, archived, in_trash, quads*)
    // databases: (kind, id, title, archived, in_trash, quads*)
    let (archived_at, quads_from) = match kind {
        "page" => (2, 4),
        "database" => (3, 5),
        other => {
            return Err(Error::Internal(format!(
                "unexpected row object kind: {other}"
            )))
        }
    };
    let id = db_row
        .get(1)
        .and_then(Json::as_str)
        .ok_or_else(|| Error::Internal(format!("result row has no object id: {db_row:?}")))?;
    let archived = db_row.get(archived_at).and_then(Json::as_bool);

    let mut properties: BTreeMap<&str, (&str, &Json)> = BTreeMap::new();
    for quad in db_row[quads_from..].chunks_exact(4) {
        let (Some(name), Some(kind)) = (quad[0].as_str(), quad[2].as_str()) else {
            return Err(Error::Internal(format!("malformed property quad: {quad:?}")));
        };
        properties.insert(name, (kind, &quad[3]));
    }

    let mut values = Vec::with_capacity(metadata.keys.len());
    for key in &metadata.keys {
        let value = match key.as_str() {
            OBJECT_ID_COLUMN => match Uuid::parse_str(id) {
                Ok(uuid) => Value::Uuid(uuid),
                Err(_) => Value::String(id.to_owned()),
            },
            ARCHIVED_COLUMN => archived.map(Value::Boolean).unwrap_or(Value::Null),
            name => match properties.get(name) {
                Some(&(kind, fragment)) => {
                    let engine = match engines.get(name) {
                        Some(engine) => *engine,
                        None => TypeEngine::from_notion_property(kind, &Json::Null)?,
                    };
                    engine.result_scalar(fragment)?
                }
                None => Value::Null,
            },
        };
        values.push(value);
    }

    Ok(Row {
        metadata: Arc::clone(metadata),
        values,
    })
}

/// High-level result of one executed statement.
#[derive(Debug)]
pub struct CursorResult {
    metadata: Arc<ResultMetadata>,
    rows: VecDeque<Row>,
}

impl CursorResult {
    /// Drains a cursor into typed rows. `engines` maps column names to
    /// their declared type engines; columns without one fall back to the
    /// property's own type tag.
    pub fn from_cursor(
        cursor: &mut Cursor,
        engines: &BTreeMap<String, TypeEngine>,
    ) -> Result<CursorResult> {
        if !cursor.returns_rows() {
            return Ok(CursorResult::empty());
        }
        let keys: Vec<String> = if cursor.result_columns().is_empty() {
            cursor
                .description()
                .map(|desc| desc.iter().map(|d| d.name.clone()).collect())
                .unwrap_or_default()
        } else {
            cursor.result_columns().to_vec()
        };
        let metadata = Arc::new(ResultMetadata::new(keys));
        let mut rows = VecDeque::new();
        for db_row in cursor.fetchall()? {
            rows.push_back(build_row(&db_row, &metadata, engines)?);
        }
        Ok(CursorResult { metadata, rows })
    }

    /// An empty result with the no-rows sentinel metadata, as returned by
    /// mutating statements before their transaction commits.
    pub fn empty() -> CursorResult {
        CursorResult {
            metadata: Arc::new(ResultMetadata::no_rows()),
            rows: VecDeque::new(),
        }
    }

    pub fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }

    /// The first remaining row, if any. Never fails on an empty result.
    pub fn first(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    /// All remaining rows. A second call returns an empty vector.
    pub fn all(&mut self) -> Vec<Row> {
        self.rows.drain(..).collect()
    }

    /// Exactly one row.
    pub fn one(&mut self) -> Result<Row> {
        let row = self.rows.pop_front().ok_or(Error::NoResultFound)?;
        if !self.rows.is_empty() {
            return Err(Error::MultipleResultsFound);
        }
        Ok(row)
    }

    /// Name-to-value views of all remaining rows.
    pub fn mappings(&mut self) -> Vec<BTreeMap<String, Value>> {
        self.all()
            .into_iter()
            .map(|row| {
                row.mapping()
                    .into_iter()
                    .map(|(k, v)| (k.to_owned(), v.clone()))
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Iterator for CursorResult {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> Arc<ResultMetadata> {
        Arc::new(ResultMetadata::new(vec![
            "id".into(),
            "name".into(),
            OBJECT_ID_COLUMN.into(),
            ARCHIVED_COLUMN.into(),
        ]))
    }

    fn engines() -> BTreeMap<String, TypeEngine> {
        let mut engines = BTreeMap::new();
        engines.insert("id".to_owned(), TypeEngine::Integer);
        engines.insert("name".to_owned(), TypeEngine::String { is_title: true });
        engines
    }

    fn sample_row() -> DbRow {
        vec![
            json!("page"),
            json!("59833787-2cf9-4fdf-8782-e53db20768a5"),
            json!(false),
            json!(false),
            json!("id"),
            json!(null),
            json!("number"),
            json!(1),
            json!("name"),
            json!(null),
            json!("title"),
            json!([{"text": {"content": "Isaac Newton"}}]),
        ]
    }

    #[test]
    fn test_build_row_decodes_through_engines() {
        let metadata = metadata();
        let row = build_row(&sample_row(), &metadata, &engines()).unwrap();
        assert_eq!(row.get("id").unwrap(), &Value::Integer(1));
        assert_eq!(row.get("name").unwrap(), &Value::from("Isaac Newton"));
        assert_eq!(row.get(ARCHIVED_COLUMN).unwrap(), &Value::Boolean(false));
        assert!(matches!(
            row.get(OBJECT_ID_COLUMN).unwrap(),
            Value::Uuid(_)
        ));
    }

    #[test]
    fn test_row_keyed_and_indexed_access_agree() {
        let metadata = metadata();
        let row = build_row(&sample_row(), &metadata, &engines()).unwrap();
        assert_eq!(row.get("name").unwrap(), row.get_at(1).unwrap());
        assert!(row.get("missing").is_err());
        assert!(row.get_at(9).is_err());
    }

    #[test]
    fn test_no_rows_metadata_raises_on_access() {
        let metadata = ResultMetadata::no_rows();
        assert!(!metadata.returns_rows());
        assert!(matches!(metadata.keys(), Err(Error::ResourceClosed(_))));
        assert!(matches!(
            metadata.index_of("x"),
            Err(Error::ResourceClosed(_))
        ));
    }

    #[test]
    fn test_one_cardinality() {
        let metadata = metadata();
        let engines = engines();
        let row = build_row(&sample_row(), &metadata, &engines).unwrap();

        let mut empty = CursorResult::empty();
        assert!(matches!(empty.one(), Err(Error::NoResultFound)));
        assert!(empty.first().is_none());

        let mut single = CursorResult {
            metadata: Arc::clone(&metadata),
            rows: VecDeque::from([row.clone()]),
        };
        assert!(single.one().is_ok());

        let mut double = CursorResult {
            metadata,
            rows: VecDeque::from([row.clone(), row]),
        };
        assert!(matches!(double.one(), Err(Error::MultipleResultsFound)));
    }

    #[test]
    fn test_all_is_non_restartable() {
        let metadata = metadata();
        let row = build_row(&sample_row(), &metadata, &engines()).unwrap();
        let mut result = CursorResult {
            metadata,
            rows: VecDeque::from([row]),
        };
        assert_eq!(result.all().len(), 1);
        assert!(result.all().is_empty());
    }

    #[test]
    fn test_mapping_view() {
        let metadata = metadata();
        let row = build_row(&sample_row(), &metadata, &engines()).unwrap();
        let mapping = row.mapping();
        assert_eq!(mapping["id"], &Value::Integer(1));
        assert_eq!(mapping["name"], &Value::from("Isaac Newton"));
    }
}
