//! SQL front end for notiondb
//!
//! This crate parses a restricted SQL dialect into an AST, keeps the table
//! metadata registry, and cross-compiles statements into Notion API call
//! descriptors. It knows nothing about transactions or the wire client;
//! compilation is a pure function of statement, schema and bound parameters.

pub mod compile;
pub mod ddl;
pub mod dml;
pub mod parsing;
pub mod schema;
pub mod types;

use notiondb_common::Result;

pub use compile::{CallDescriptor, Endpoint, NotionCompiler, Params, Request};
pub use parsing::{Keyword, Lexer, Parser, Statement, Token};
pub use schema::{Column, ColumnCollection, MetaData, Table};
pub use types::{Currency, TypeEngine, Value};

/// Parse a SQL statement string into an AST.
pub fn parse_sql(sql: &str) -> Result<Statement> {
    Parser::parse(sql)
}
