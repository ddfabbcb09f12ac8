//! Transactions and the transaction manager
//!
//! A transaction batches staged operations under a v4 UUID id and runs the
//! two-phase commit protocol: stage and commit every operation in insertion
//! order, rolling back the already-committed prefix in reverse on any
//! failure. Locks are acquired when an operation is added (conflicts
//! surface synchronously at execute time), re-acquired idempotently during
//! commit, and released exactly once on reaching a terminal state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use notiondb_common::{Error, Result};

use crate::lock::{LockManager, LockMode};
use crate::operation::{Operation, ResultSet};

/// Transaction lifecycle states. `Committed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Accepting operations
    Active,
    /// Every operation staged, changes not yet saved
    PartiallyCommitted,
    /// All operations committed successfully
    Committed,
    /// A commit-phase failure occurred; rollback is in progress
    Failed,
    /// Rollback completed
    Aborted,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Active => "ACTIVE",
            TransactionState::PartiallyCommitted => "PARTIALLY_COMMITTED",
            TransactionState::Committed => "COMMITTED",
            TransactionState::Failed => "FAILED",
            TransactionState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

struct StagedChange {
    resource: String,
    mode: LockMode,
    operation: Box<dyn Operation>,
}

/// A transaction: its id, state, and ordered staged operations.
pub struct Transaction {
    tid: Uuid,
    state: TransactionState,
    changes: Vec<StagedChange>,
    /// Indices of operations whose `do_commit` succeeded
    committed: Vec<usize>,
}

impl Transaction {
    fn new(tid: Uuid) -> Transaction {
        Transaction {
            tid,
            state: TransactionState::Active,
            changes: Vec::new(),
            committed: Vec::new(),
        }
    }

    pub fn tid(&self) -> Uuid {
        self.tid
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Mints transactions, tracks the active ones, and drives the two-phase
/// commit protocol. The internal map is guarded by a single mutex held only
/// while it is read or written, never across client calls.
pub struct TransactionManager {
    lock_manager: Arc<LockManager>,
    transactions: Mutex<HashMap<Uuid, Transaction>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> TransactionManager {
        TransactionManager {
            lock_manager: Arc::new(LockManager::new()),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begins a new transaction and returns its id.
    pub fn begin(&self) -> Uuid {
        let tid = Uuid::new_v4();
        self.transactions.lock().insert(tid, Transaction::new(tid));
        tracing::debug!(%tid, "transaction started");
        tid
    }

    pub fn state(&self, tid: Uuid) -> Option<TransactionState> {
        self.transactions.lock().get(&tid).map(Transaction::state)
    }

    /// Ids of transactions currently in a non-terminal state.
    pub fn active(&self) -> Vec<Uuid> {
        self.transactions
            .lock()
            .values()
            .filter(|t| {
                matches!(
                    t.state,
                    TransactionState::Active | TransactionState::PartiallyCommitted
                )
            })
            .map(Transaction::tid)
            .collect()
    }

    /// Appends an operation to an active transaction, acquiring its lock
    /// synchronously. A lock conflict surfaces immediately and leaves the
    /// transaction active.
    pub fn add_change(
        &self,
        tid: Uuid,
        resource: &str,
        mode: LockMode,
        operation: Box<dyn Operation>,
    ) -> Result<()> {
        let mut transactions = self.transactions.lock();
        let transaction = transactions
            .get_mut(&tid)
            .ok_or_else(|| transaction_error(tid, "unknown transaction"))?;
        if transaction.state != TransactionState::Active {
            return Err(transaction_error(
                tid,
                format!("cannot add operations in state {}", transaction.state),
            ));
        }
        self.lock_manager.acquire(resource, tid, mode)?;
        transaction.changes.push(StagedChange {
            resource: resource.to_owned(),
            mode,
            operation,
        });
        Ok(())
    }

    /// Runs the two-phase commit protocol and returns the per-operation
    /// result sets in insertion order.
    pub fn commit(&self, tid: Uuid) -> Result<Vec<ResultSet>> {
        let mut transaction = self.take_in_state(tid, TransactionState::Active, "commit")?;
        transaction.state = TransactionState::PartiallyCommitted;

        let outcome = self.commit_changes(&mut transaction);
        match outcome {
            Ok(()) => {
                let results = transaction
                    .changes
                    .iter()
                    .filter_map(|change| change.operation.result())
                    .collect();
                transaction.state = TransactionState::Committed;
                self.lock_manager.release(tid);
                tracing::info!(%tid, operations = transaction.changes.len(), "transaction committed");
                self.store(transaction);
                Ok(results)
            }
            Err(e) => {
                transaction.state = TransactionState::Failed;
                tracing::warn!(%tid, error = %e, "commit failed, rolling back");
                self.rollback_committed(&mut transaction);
                self.lock_manager.release(tid);
                transaction.state = TransactionState::Aborted;
                self.store(transaction);
                Err(e.in_transaction(tid))
            }
        }
    }

    fn commit_changes(&self, transaction: &mut Transaction) -> Result<()> {
        for index in 0..transaction.changes.len() {
            let change = &mut transaction.changes[index];
            // idempotent re-acquire; the lock is normally taken at add time
            self.lock_manager
                .acquire(&change.resource, transaction.tid, change.mode)?;
            change.operation.stage()?;
            change.operation.do_commit()?;
            transaction.committed.push(index);
        }
        Ok(())
    }

    /// Rolls back an active transaction: any committed operations are
    /// reverted in reverse order, locks are released, the transaction ends
    /// `Aborted`.
    pub fn rollback(&self, tid: Uuid) -> Result<()> {
        let mut transaction = self.take_in_state(tid, TransactionState::Active, "rollback")?;
        transaction.state = TransactionState::Failed;
        self.rollback_committed(&mut transaction);
        self.lock_manager.release(tid);
        transaction.state = TransactionState::Aborted;
        tracing::info!(%tid, "transaction rolled back");
        self.store(transaction);
        Ok(())
    }

    /// Reverts the committed prefix in reverse commit order. Rollback is
    /// best-effort: a failing revert is logged, not propagated.
    fn rollback_committed(&self, transaction: &mut Transaction) {
        for &index in transaction.committed.iter().rev() {
            if let Err(e) = transaction.changes[index].operation.do_rollback() {
                tracing::warn!(
                    tid = %transaction.tid,
                    resource = %transaction.changes[index].resource,
                    error = %e,
                    "rollback of operation failed"
                );
            }
        }
        transaction.committed.clear();
    }

    fn take_in_state(
        &self,
        tid: Uuid,
        expected: TransactionState,
        action: &str,
    ) -> Result<Transaction> {
        let mut transactions = self.transactions.lock();
        match transactions.get(&tid).map(Transaction::state) {
            None => Err(transaction_error(tid, "unknown transaction")),
            Some(state) if state != expected => Err(transaction_error(
                tid,
                format!("cannot {action} a transaction in state {state}"),
            )),
            Some(_) => Ok(transactions.remove(&tid).expect("present while locked")),
        }
    }

    fn store(&self, transaction: Transaction) {
        self.transactions
            .lock()
            .insert(transaction.tid, transaction);
    }
}

fn transaction_error(tid: Uuid, message: impl Into<String>) -> Error {
    Error::Transaction {
        tid,
        message: message.into(),
    }
}
