//! Engine: the entry point to a notiondb deployment
//!
//! `create_engine("normlite:///:memory:")` parses the URI, builds the
//! matching client, bootstraps the system catalog, and hands out
//! connections and inspectors.

mod engine;
mod reflect;
mod uri;

pub use engine::{create_engine, Engine, ISCHEMA_PAGE_ID, TABLES_DATABASE_ID};
pub use reflect::{Inspector, ReflectedColumn, ReflectedTableInfo};
pub use uri::NotionUri;
