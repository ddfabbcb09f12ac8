//! Notion API clients
//!
//! The `NotionClient` trait is the only seam through which remote state is
//! mutated; everything above it is a pure function of schema, AST and
//! parameters. Two implementations are provided for testing: an in-memory
//! client holding the simulated Notion store, and a file-backed client that
//! persists the store as a JSON file.

mod file;
mod memory;

use serde_json::Value;

use notiondb_common::{Error, Result};

pub use file::{FileNotionClient, FileSession};
pub use memory::{InMemoryNotionClient, ROOT_PAGE_ID};

/// A client to the Notion API.
///
/// Implementations provide the capability set; `call` is the uniform
/// dispatch used by cursors and staged operations. Unknown endpoint/request
/// pairs fail with `Error::Notion`.
pub trait NotionClient: Send + Sync {
    /// pages.create: create a page as a child of a page or database.
    fn pages_create(&self, payload: Value) -> Result<Value>;

    /// pages.retrieve: fetch a page object by id.
    fn pages_retrieve(&self, payload: Value) -> Result<Value>;

    /// pages.update: patch a page's archived/in_trash flags or properties.
    fn pages_update(&self, payload: Value) -> Result<Value>;

    /// databases.create: create a database under a parent page.
    fn databases_create(&self, payload: Value) -> Result<Value>;

    /// databases.retrieve: fetch a database object by id.
    fn databases_retrieve(&self, payload: Value) -> Result<Value>;

    /// databases.query: list the pages of a database matching a filter.
    fn databases_query(&self, payload: Value) -> Result<Value>;

    /// blocks.children.append: append child blocks to a block or page.
    fn blocks_children_append(&self, payload: Value) -> Result<Value>;

    /// Dispatch an `(endpoint, request, payload)` triple.
    fn call(&self, endpoint: &str, request: &str, payload: Value) -> Result<Value> {
        match (endpoint, request) {
            ("pages", "create") => self.pages_create(payload),
            ("pages", "retrieve") => self.pages_retrieve(payload),
            ("pages", "update") => self.pages_update(payload),
            ("databases", "create") => self.databases_create(payload),
            ("databases", "retrieve") => self.databases_retrieve(payload),
            ("databases", "query") => self.databases_query(payload),
            ("blocks", "children.append") => self.blocks_children_append(payload),
            _ => Err(Error::Notion(format!(
                "unknown or unsupported operation: {endpoint}.{request}"
            ))),
        }
    }
}
