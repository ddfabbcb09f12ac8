//! The notiondb type system
//!
//! `DataType` is the declared SQL surface (what the parser produces),
//! `TypeEngine` is the backend-facing engine that converts between native
//! values and Notion JSON payload fragments.

mod engine;
mod value;

pub use engine::{Currency, DataType, TypeEngine};
pub use value::Value;
