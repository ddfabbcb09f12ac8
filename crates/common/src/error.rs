//! Error types shared across the workspace

use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

/// Every error the database surface can produce.
///
/// Parse and bind errors reach the caller unchanged. Stage and commit
/// failures trigger an automatic rollback and are then re-surfaced wrapped
/// with the owning transaction id, except lock conflicts which are passed
/// through verbatim so clients can retry.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    // SQL front end
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    // DBAPI contract violations: missing payload keys, unsupported
    // paramstyle, operations on a closed cursor, unsupported bind types
    #[error("interface error: {0}")]
    Interface(String),

    #[error("internal error: {0}")]
    Internal(String),

    // General failures reported by the Notion client
    #[error("database error: {0}")]
    Database(String),

    // Transient failures: stage or commit could not proceed
    #[error("operational error: {0}")]
    Operational(String),

    #[error("transaction {tid}: {message}")]
    Transaction { tid: Uuid, message: String },

    #[error("failed to acquire lock on {resource}: held by {holders:?}")]
    AcquireLockFailed { resource: String, holders: Vec<Uuid> },

    #[error("no result found when exactly one was required")]
    NoResultFound,

    #[error("multiple results found when exactly one was required")]
    MultipleResultsFound,

    #[error("resource closed: {0}")]
    ResourceClosed(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("argument error: {0}")]
    Argument(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Unknown or unsupported Notion API operations
    #[error("notion client error: {0}")]
    Notion(String),
}

impl Error {
    /// Wrap a stage/commit failure with the transaction it happened in.
    /// Lock conflicts pass through untouched so callers can retry them.
    pub fn in_transaction(self, tid: Uuid) -> Error {
        match self {
            Error::AcquireLockFailed { .. } => self,
            other => Error::Transaction {
                tid,
                message: other.to_string(),
            },
        }
    }
}
