//! DBAPI driver layer
//!
//! Parses the JSON objects a Notion client returns into a small object
//! model, flattens them into positional rows, and exposes them through a
//! DBAPI-style cursor plus a typed result layer (`Row`, `CursorResult`).

mod cursor;
mod model;
mod result;

pub use cursor::{ColumnDescription, Cursor, DbRow, PARAMSTYLE};
pub use model::{flatten, NotionObject, NotionProperty};
pub use result::{CursorResult, ResultMetadata, Row};
