//! Cross-compilation of SQL statements into Notion API call descriptors
//!
//! The compiler lowers an AST plus the schema registry and bound parameters
//! into a `CallDescriptor`: the endpoint/request pair and a payload
//! template with `:name` placeholders that are substituted at stage time.
//! Compilation is a pure function of its inputs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use notiondb_common::{Error, Result};

use crate::parsing::{Expression, Literal, Operator, SelectColumns, Statement};
use crate::schema::{MetaData, Table, ARCHIVED_COLUMN, OBJECT_ID_COLUMN};
use crate::types::{TypeEngine, Value};

/// Notion API endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    Pages,
    Databases,
    Blocks,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Pages => "pages",
            Endpoint::Databases => "databases",
            Endpoint::Blocks => "blocks",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notion API requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Create,
    Retrieve,
    Update,
    Query,
}

impl Request {
    pub fn as_str(&self) -> &'static str {
        match self {
            Request::Create => "create",
            Request::Retrieve => "retrieve",
            Request::Update => "update",
            Request::Query => "query",
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled Notion API call: where to send it, the payload template, and
/// the parameter bindings to substitute into the template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDescriptor {
    pub endpoint: Endpoint,
    pub request: Request,
    /// Payload with `:name` placeholder strings at the bind points
    pub payload: serde_json::Value,
    /// Placeholder name to substituted JSON scalar
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Column projection for the produced result rows
    pub result_columns: Vec<String>,
    pub returns_rows: bool,
}

impl CallDescriptor {
    /// Adds or overrides a parameter binding.
    pub fn bind_param(&mut self, name: &str, value: serde_json::Value) {
        self.params.insert(name.to_owned(), value);
    }

    /// Resolves every `:name` placeholder in the payload template from the
    /// parameter map. Fails `Interface` on a placeholder with no binding.
    pub fn bound_payload(&self) -> Result<serde_json::Value> {
        fn substitute(
            value: &serde_json::Value,
            params: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<serde_json::Value> {
            match value {
                serde_json::Value::String(s) if s.starts_with(':') && s.len() > 1 => {
                    let name = &s[1..];
                    params.get(name).cloned().ok_or_else(|| {
                        Error::Interface(format!("missing binding parameter for '{name}'"))
                    })
                }
                serde_json::Value::Array(items) => items
                    .iter()
                    .map(|item| substitute(item, params))
                    .collect::<Result<Vec<_>>>()
                    .map(serde_json::Value::Array),
                serde_json::Value::Object(map) => {
                    let mut out = serde_json::Map::new();
                    for (key, item) in map {
                        out.insert(key.clone(), substitute(item, params)?);
                    }
                    Ok(serde_json::Value::Object(out))
                }
                other => Ok(other.clone()),
            }
        }
        substitute(&self.payload, &self.params)
    }
}

/// Named parameter bindings handed to the compiler, `:name` style.
pub type Params = BTreeMap<String, Value>;

/// Compiles SQL statements for the Notion backend.
pub struct NotionCompiler<'a> {
    metadata: &'a MetaData,
    /// The page new databases are created under
    parent_page_id: Option<Uuid>,
}

impl<'a> NotionCompiler<'a> {
    pub fn new(metadata: &'a MetaData) -> NotionCompiler<'a> {
        NotionCompiler {
            metadata,
            parent_page_id: None,
        }
    }

    pub fn with_parent_page(mut self, page_id: Uuid) -> NotionCompiler<'a> {
        self.parent_page_id = Some(page_id);
        self
    }

    /// Compiles a statement into a call descriptor. Identifier resolution
    /// against the registry happens here, not in the parser.
    pub fn compile(&self, statement: &Statement, params: &Params) -> Result<CallDescriptor> {
        match statement {
            Statement::CreateTable { name, columns } => self.compile_create_table(name, columns),
            Statement::DropTable { name } => self.compile_drop_table(name),
            Statement::Insert {
                table,
                columns,
                values,
                returning,
            } => self.compile_insert(table, columns, values, returning, params),
            Statement::Select {
                table,
                columns,
                filter,
                order,
            } => self.compile_select(table, columns, filter.as_ref(), order, params),
            Statement::Update { table, set, filter } => {
                self.compile_update(table, set, filter.as_ref(), params)
            }
            Statement::Delete { table, filter } => {
                self.compile_delete(table, filter.as_ref(), params)
            }
        }
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.metadata
            .get(name)
            .ok_or_else(|| Error::Argument(format!("unknown table: {name}")))
    }

    fn compile_create_table(
        &self,
        name: &str,
        columns: &[crate::parsing::ColumnDef],
    ) -> Result<CallDescriptor> {
        let mut properties = serde_json::Map::new();
        for column in columns {
            let engine = TypeEngine::from(column.datatype);
            properties.insert(column.name.clone(), engine.col_spec());
        }

        let payload = json!({
            "parent": {"type": "page_id", "page_id": ":page_id"},
            "title": [{"type": "text", "text": {"content": name}}],
            "properties": properties,
        });

        let mut params = serde_json::Map::new();
        if let Some(page_id) = self.parent_page_id {
            params.insert("page_id".into(), json!(page_id.to_string()));
        }

        Ok(CallDescriptor {
            endpoint: Endpoint::Databases,
            request: Request::Create,
            payload,
            params,
            // the result row is the created database object; its property
            // values are schema descriptors, so only the implicit columns
            // are surfaced as data
            result_columns: vec![OBJECT_ID_COLUMN.to_owned(), ARCHIVED_COLUMN.to_owned()],
            returns_rows: true,
        })
    }

    fn compile_drop_table(&self, name: &str) -> Result<CallDescriptor> {
        // archive the catalog row; the page id is resolved at stage time
        self.table(name)?;
        Ok(CallDescriptor {
            endpoint: Endpoint::Pages,
            request: Request::Update,
            payload: json!({
                "id": ":page_id",
                "data": {"archived": true},
            }),
            params: serde_json::Map::new(),
            result_columns: Vec::new(),
            returns_rows: false,
        })
    }

    fn compile_insert(
        &self,
        table_name: &str,
        columns: &[String],
        values: &[Expression],
        returning: &[String],
        params: &Params,
    ) -> Result<CallDescriptor> {
        let table = self.table(table_name)?;

        let mut properties = serde_json::Map::new();
        let mut bound = serde_json::Map::new();
        for (column_name, value) in columns.iter().zip(values) {
            let column = table.columns().get(column_name).ok_or_else(|| {
                Error::Argument(format!(
                    "column {column_name} does not belong to table {table_name}"
                ))
            })?;
            properties.insert(
                column_name.clone(),
                column.engine.bind_template(&format!(":{column_name}")),
            );
            match value {
                Expression::Literal(literal) => {
                    let native = literal_value(literal);
                    bound.insert(
                        column_name.clone(),
                        column.engine.scalar_json(&native)?,
                    );
                }
                Expression::Parameter(name) => {
                    // leave unbound parameters for stage time
                    if let Some(native) = params.get(name) {
                        bound.insert(
                            column_name.clone(),
                            column.engine.scalar_json(native)?,
                        );
                    }
                }
                other => {
                    return Err(Error::Argument(format!(
                        "unsupported VALUES expression: {other}"
                    )))
                }
            }
        }

        let mut result_columns = vec![OBJECT_ID_COLUMN.to_owned(), ARCHIVED_COLUMN.to_owned()];
        for column_name in returning {
            if !table.columns().contains(column_name) {
                return Err(Error::Argument(format!(
                    "column {column_name} does not belong to table {table_name}"
                )));
            }
            result_columns.push(column_name.clone());
        }

        let payload = json!({
            "parent": {"type": "database_id", "database_id": ":database_id"},
            "properties": properties,
        });

        let mut descriptor_params = bound;
        if let Some(database_id) = table.database_id() {
            descriptor_params.insert("database_id".into(), json!(database_id.to_string()));
        }

        Ok(CallDescriptor {
            endpoint: Endpoint::Pages,
            request: Request::Create,
            payload,
            params: descriptor_params,
            result_columns,
            returns_rows: true,
        })
    }

    fn compile_select(
        &self,
        table_name: &str,
        columns: &SelectColumns,
        filter: Option<&Expression>,
        order: &[crate::parsing::OrderItem],
        params: &Params,
    ) -> Result<CallDescriptor> {
        let table = self.table(table_name)?;

        let mut payload = serde_json::Map::new();
        payload.insert("database_id".into(), json!(":database_id"));
        if let Some(filter) = filter {
            payload.insert(
                "filter".into(),
                self.compile_filter(table, filter, params)?,
            );
        }
        if !order.is_empty() {
            let sorts: Vec<serde_json::Value> = order
                .iter()
                .map(|item| {
                    json!({
                        "property": item.column,
                        "direction": if item.descending { "descending" } else { "ascending" },
                    })
                })
                .collect();
            payload.insert("sorts".into(), json!(sorts));
        }

        let result_columns = match columns {
            SelectColumns::All => table.columns().names().map(str::to_owned).collect(),
            SelectColumns::Named(names) => {
                for name in names {
                    if !table.columns().contains(name) {
                        return Err(Error::Argument(format!(
                            "column {name} does not belong to table {table_name}"
                        )));
                    }
                }
                names.clone()
            }
        };

        let mut descriptor_params = serde_json::Map::new();
        if let Some(database_id) = table.database_id() {
            descriptor_params.insert("database_id".into(), json!(database_id.to_string()));
        }

        Ok(CallDescriptor {
            endpoint: Endpoint::Databases,
            request: Request::Query,
            payload: serde_json::Value::Object(payload),
            params: descriptor_params,
            result_columns,
            returns_rows: true,
        })
    }

    fn compile_update(
        &self,
        table_name: &str,
        set: &[(String, Expression)],
        filter: Option<&Expression>,
        params: &Params,
    ) -> Result<CallDescriptor> {
        let table = self.table(table_name)?;

        let mut properties = serde_json::Map::new();
        for (column_name, value) in set {
            let column = table.columns().get(column_name).ok_or_else(|| {
                Error::Argument(format!(
                    "column {column_name} does not belong to table {table_name}"
                ))
            })?;
            let fragment = match value {
                Expression::Literal(literal) => column.engine.bind(&literal_value(literal))?,
                Expression::Parameter(name) => match params.get(name) {
                    Some(native) => column.engine.bind(native)?,
                    None => {
                        return Err(Error::Interface(format!(
                            "missing binding parameter for '{name}'"
                        )))
                    }
                },
                other => {
                    return Err(Error::Argument(format!(
                        "unsupported SET expression: {other}"
                    )))
                }
            };
            properties.insert(column_name.clone(), fragment);
        }

        let mut payload = serde_json::Map::new();
        payload.insert("database_id".into(), json!(":database_id"));
        if let Some(filter) = filter {
            payload.insert(
                "filter".into(),
                self.compile_filter(table, filter, params)?,
            );
        }
        payload.insert("data".into(), json!({"properties": properties}));

        let mut descriptor_params = serde_json::Map::new();
        if let Some(database_id) = table.database_id() {
            descriptor_params.insert("database_id".into(), json!(database_id.to_string()));
        }

        Ok(CallDescriptor {
            endpoint: Endpoint::Pages,
            request: Request::Update,
            payload: serde_json::Value::Object(payload),
            params: descriptor_params,
            result_columns: vec![OBJECT_ID_COLUMN.to_owned(), ARCHIVED_COLUMN.to_owned()],
            returns_rows: true,
        })
    }

    fn compile_delete(
        &self,
        table_name: &str,
        filter: Option<&Expression>,
        params: &Params,
    ) -> Result<CallDescriptor> {
        let table = self.table(table_name)?;

        let mut payload = serde_json::Map::new();
        payload.insert("database_id".into(), json!(":database_id"));
        if let Some(filter) = filter {
            payload.insert(
                "filter".into(),
                self.compile_filter(table, filter, params)?,
            );
        }
        payload.insert("data".into(), json!({"archived": true}));

        let mut descriptor_params = serde_json::Map::new();
        if let Some(database_id) = table.database_id() {
            descriptor_params.insert("database_id".into(), json!(database_id.to_string()));
        }

        Ok(CallDescriptor {
            endpoint: Endpoint::Pages,
            request: Request::Update,
            payload: serde_json::Value::Object(payload),
            params: descriptor_params,
            result_columns: vec![OBJECT_ID_COLUMN.to_owned(), ARCHIVED_COLUMN.to_owned()],
            returns_rows: true,
        })
    }

    /// Lowers a WHERE expression into a Notion filter object.
    fn compile_filter(
        &self,
        table: &Table,
        expression: &Expression,
        params: &Params,
    ) -> Result<serde_json::Value> {
        match expression {
            Expression::Operator(Operator::And(lhs, rhs)) => Ok(json!({
                "and": [
                    self.compile_filter(table, lhs, params)?,
                    self.compile_filter(table, rhs, params)?,
                ]
            })),
            Expression::Operator(Operator::Or(lhs, rhs)) => Ok(json!({
                "or": [
                    self.compile_filter(table, lhs, params)?,
                    self.compile_filter(table, rhs, params)?,
                ]
            })),
            Expression::Operator(Operator::Not(inner)) => {
                self.compile_filter(table, &negate(inner)?, params)
            }
            Expression::Operator(op) => {
                let (verb, lhs, rhs) = comparison_parts(op)?;
                let Expression::Column(column_name) = lhs else {
                    return Err(Error::Argument(format!(
                        "left side of a comparison must be a column, found {lhs}"
                    )));
                };
                let column = table.columns().get(column_name).ok_or_else(|| {
                    Error::Argument(format!(
                        "column {column_name} does not belong to table {}",
                        table.name()
                    ))
                })?;
                let scalar = match rhs {
                    Expression::Literal(literal) => {
                        column.engine.scalar_json(&literal_value(literal))?
                    }
                    Expression::Parameter(name) => match params.get(name) {
                        Some(native) => column.engine.scalar_json(native)?,
                        // leave the placeholder for stage-time substitution
                        None => json!(format!(":{name}")),
                    },
                    other => {
                        return Err(Error::Argument(format!(
                            "right side of a comparison must be a literal or parameter, found {other}"
                        )))
                    }
                };
                let mut condition = serde_json::Map::new();
                condition.insert(verb.to_owned(), scalar);
                let mut filter = serde_json::Map::new();
                filter.insert("property".into(), json!(column_name));
                filter.insert(
                    column.engine.notion_type().to_owned(),
                    serde_json::Value::Object(condition),
                );
                Ok(serde_json::Value::Object(filter))
            }
            other => Err(Error::Argument(format!(
                "unsupported WHERE expression: {other}"
            ))),
        }
    }
}

/// The Notion filter verb for a comparison operator, with its operands.
fn comparison_parts(op: &Operator) -> Result<(&'static str, &Expression, &Expression)> {
    Ok(match op {
        Operator::Equal(l, r) => ("equals", l, r),
        Operator::NotEqual(l, r) => ("does_not_equal", l, r),
        Operator::LessThan(l, r) => ("less_than", l, r),
        Operator::LessThanOrEqual(l, r) => ("less_than_or_equal_to", l, r),
        Operator::GreaterThan(l, r) => ("greater_than", l, r),
        Operator::GreaterThanOrEqual(l, r) => ("greater_than_or_equal_to", l, r),
        other => {
            return Err(Error::Argument(format!(
                "expected a comparison operator, found {other:?}"
            )))
        }
    })
}

/// Push a NOT down through the expression: De Morgan over AND/OR, verb
/// inversion at the comparisons. Notion filters have no negation verb.
fn negate(expression: &Expression) -> Result<Expression> {
    let negated = match expression {
        Expression::Operator(Operator::And(lhs, rhs)) => Operator::Or(
            Box::new(negate(lhs)?),
            Box::new(negate(rhs)?),
        ),
        Expression::Operator(Operator::Or(lhs, rhs)) => Operator::And(
            Box::new(negate(lhs)?),
            Box::new(negate(rhs)?),
        ),
        Expression::Operator(Operator::Not(inner)) => return Ok((**inner).clone()),
        Expression::Operator(Operator::Equal(l, r)) => Operator::NotEqual(l.clone(), r.clone()),
        Expression::Operator(Operator::NotEqual(l, r)) => Operator::Equal(l.clone(), r.clone()),
        Expression::Operator(Operator::LessThan(l, r)) => {
            Operator::GreaterThanOrEqual(l.clone(), r.clone())
        }
        Expression::Operator(Operator::LessThanOrEqual(l, r)) => {
            Operator::GreaterThan(l.clone(), r.clone())
        }
        Expression::Operator(Operator::GreaterThan(l, r)) => {
            Operator::LessThanOrEqual(l.clone(), r.clone())
        }
        Expression::Operator(Operator::GreaterThanOrEqual(l, r)) => {
            Operator::LessThan(l.clone(), r.clone())
        }
        other => {
            return Err(Error::Argument(format!(
                "NOT is not supported over {other}"
            )))
        }
    };
    Ok(negated.into())
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Integer(i) => Value::Integer(*i),
        Literal::String(s) => Value::String(s.clone()),
    }
}
