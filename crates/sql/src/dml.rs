//! Generative DML builders
//!
//! `insert(&table).values(..).returning(..)` builds an INSERT without going
//! through SQL text. The builder validates against the table's schema and
//! lowers to the same AST + parameter pair the parser produces, so the
//! compiler treats both paths identically.

use std::collections::BTreeMap;

use notiondb_common::{Error, Result};

use crate::compile::Params;
use crate::parsing::{Expression, Statement};
use crate::schema::{Column, Table};
use crate::types::Value;

/// The VALUES clause input: named or positional, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuesSource {
    Named(Vec<(String, Value)>),
    Positional(Vec<Value>),
}

impl From<Vec<(String, Value)>> for ValuesSource {
    fn from(named: Vec<(String, Value)>) -> Self {
        ValuesSource::Named(named)
    }
}

impl From<Vec<Value>> for ValuesSource {
    fn from(positional: Vec<Value>) -> Self {
        ValuesSource::Positional(positional)
    }
}

/// A generative INSERT statement builder bound to a table.
#[derive(Debug, Clone)]
pub struct Insert {
    table: String,
    /// User-declared column names in declaration order
    user_columns: Vec<String>,
    values: Option<BTreeMap<String, Value>>,
    named_source: Option<bool>,
    returning: Vec<String>,
}

/// Start building an INSERT for the given table.
pub fn insert(table: &Table) -> Insert {
    Insert {
        table: table.name().to_owned(),
        user_columns: table
            .columns()
            .iter()
            .filter(|c| !c.is_implicit())
            .map(|c| c.name.clone())
            .collect(),
        values: None,
        named_source: None,
        returning: Vec::new(),
    }
}

impl Insert {
    /// Sets the VALUES clause. Named values must cover every user column;
    /// positional values must match the user column count. Mixing named and
    /// positional calls on one statement is rejected.
    pub fn values(mut self, source: impl Into<ValuesSource>) -> Result<Insert> {
        let source = source.into();
        let named = matches!(source, ValuesSource::Named(_));
        if let Some(previous) = self.named_source {
            if previous != named {
                return Err(Error::Argument(
                    "cannot mix named and positional values in one INSERT".into(),
                ));
            }
        }
        self.named_source = Some(named);

        let mut values = BTreeMap::new();
        match source {
            ValuesSource::Named(pairs) => {
                let provided: BTreeMap<String, Value> = pairs.into_iter().collect();
                for column in &self.user_columns {
                    let value = provided.get(column).cloned().ok_or_else(|| {
                        Error::Argument(format!("missing value for column {column}"))
                    })?;
                    values.insert(column.clone(), value);
                }
            }
            ValuesSource::Positional(items) => {
                if items.len() != self.user_columns.len() {
                    return Err(Error::Argument(format!(
                        "not enough values supplied for all columns: required {}, supplied {}",
                        self.user_columns.len(),
                        items.len()
                    )));
                }
                for (column, value) in self.user_columns.iter().zip(items) {
                    values.insert(column.clone(), value);
                }
            }
        }
        self.values = Some(values);
        Ok(self)
    }

    /// Appends columns to the default `(_no_id, _no_archived)` returning
    /// tuple. Columns must belong to this statement's table.
    pub fn returning(mut self, columns: &[&Column]) -> Result<Insert> {
        for column in columns {
            if column.table() != Some(self.table.as_str()) {
                return Err(Error::Argument(format!(
                    "column {} does not belong to table {}",
                    column.name, self.table
                )));
            }
            self.returning.push(column.name.clone());
        }
        Ok(self)
    }

    /// Lowers to the AST form: every user column becomes a `:column`
    /// placeholder, with the builder's values as its parameter bindings.
    pub fn to_statement(&self) -> Statement {
        Statement::Insert {
            table: self.table.clone(),
            columns: self.user_columns.clone(),
            values: self
                .user_columns
                .iter()
                .map(|c| Expression::Parameter(c.clone()))
                .collect(),
            returning: self.returning.clone(),
        }
    }

    /// The parameter bindings collected by `values`.
    pub fn params(&self) -> Params {
        self.values.clone().unwrap_or_default()
    }
}
