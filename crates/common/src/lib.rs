//! Shared error taxonomy for the notiondb workspace

mod error;

pub use error::{Error, Result};
