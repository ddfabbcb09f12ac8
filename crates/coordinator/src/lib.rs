//! Transaction core
//!
//! Serializes mutating work against the Notion store: a fail-fast lock
//! manager, a transaction manager running a two-phase stage/commit/rollback
//! protocol over staged operations, the connection that batches statements
//! under a transaction, and the composite cursor exposing the per-operation
//! result sets of a committed transaction.

mod connection;
mod lock;
mod operation;
pub mod proxy;
mod transaction;

pub use connection::{CompositeCursor, Connection};
pub use lock::{LockManager, LockMode};
pub use operation::{
    CatalogConfig, Operation, OperationContext, ResultSet, StagedCreateTable, StagedDelete,
    StagedDropTable, StagedInsert, StagedSelect, StagedUpdate,
};
pub use transaction::{TransactionManager, TransactionState};
