//! Transactional proxy handlers
//!
//! The route-handler layer of the HTTP proxy surface. Transport is out of
//! scope: these handlers take parsed inputs and produce the
//! `{transaction_id, state, data, error}` response envelope as typed,
//! serializable values, so any HTTP framework can mount them as thin
//! routes.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use notiondb_sql::{CallDescriptor, Endpoint, Request};

use crate::lock::LockMode;
use crate::operation::{OperationContext, StagedInsert};
use crate::transaction::{TransactionManager, TransactionState};

/// The response envelope every proxy route answers with.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProxyResponse {
    fn new(state: impl ToString) -> ProxyResponse {
        ProxyResponse {
            transaction_id: None,
            state: state.to_string(),
            data: None,
            error: None,
        }
    }

    fn with_tid(mut self, tid: Uuid) -> ProxyResponse {
        self.transaction_id = Some(tid.to_string());
        self
    }

    fn with_error(mut self, error: impl ToString) -> ProxyResponse {
        self.error = Some(error.to_string());
        self
    }
}

/// Shared state behind the proxy routes: the transaction manager and the
/// operation context used to build staged operations.
#[derive(Clone)]
pub struct ProxyState {
    pub manager: Arc<TransactionManager>,
    pub ctx: OperationContext,
}

impl ProxyState {
    pub fn new(manager: Arc<TransactionManager>, ctx: OperationContext) -> ProxyState {
        ProxyState { manager, ctx }
    }

    /// POST /transactions
    pub fn begin(&self) -> ProxyResponse {
        let tid = self.manager.begin();
        ProxyResponse::new(TransactionState::Active).with_tid(tid)
    }

    /// POST /transactions/{tid}/insert
    ///
    /// `parameters` carries `{"payload": {...}, "params": {...}}` with the
    /// usual `:name` placeholders in the payload.
    pub fn stage_insert(&self, tid: &str, parameters: Value) -> ProxyResponse {
        let tid = match Uuid::parse_str(tid) {
            Ok(tid) => tid,
            Err(e) => {
                return ProxyResponse::new("UNKNOWN").with_error(format!("bad transaction id: {e}"))
            }
        };
        let Some(payload) = parameters.get("payload").cloned() else {
            return ProxyResponse::new(TransactionState::Active)
                .with_tid(tid)
                .with_error("missing \"payload\" object in parameters");
        };
        let params = match parameters.get("params") {
            Some(Value::Object(params)) => params.clone(),
            _ => serde_json::Map::new(),
        };

        let table = payload
            .pointer("/parent/database_id")
            .and_then(Value::as_str)
            .unwrap_or("pages")
            .to_owned();
        let descriptor = CallDescriptor {
            endpoint: Endpoint::Pages,
            request: Request::Create,
            payload,
            params,
            result_columns: vec!["_no_id".into(), "_no_archived".into()],
            returns_rows: true,
        };
        let operation = StagedInsert::new(self.ctx.clone(), table.clone(), descriptor);

        match self
            .manager
            .add_change(tid, &table, LockMode::Exclusive, Box::new(operation))
        {
            Ok(()) => self.state_response(tid),
            Err(e) => self.state_response(tid).with_error(e),
        }
    }

    /// POST /transactions/{tid}/commit
    pub fn commit(&self, tid: &str) -> ProxyResponse {
        let tid = match Uuid::parse_str(tid) {
            Ok(tid) => tid,
            Err(e) => {
                return ProxyResponse::new("UNKNOWN").with_error(format!("bad transaction id: {e}"))
            }
        };
        match self.manager.commit(tid) {
            Ok(results) => {
                let data = results.into_iter().map(|rs| rs.object).collect();
                let mut response = self.state_response(tid);
                response.data = Some(data);
                response
            }
            Err(e) => self.state_response(tid).with_error(e),
        }
    }

    /// POST /transactions/{tid}/rollback
    pub fn rollback(&self, tid: &str) -> ProxyResponse {
        let tid = match Uuid::parse_str(tid) {
            Ok(tid) => tid,
            Err(e) => {
                return ProxyResponse::new("UNKNOWN").with_error(format!("bad transaction id: {e}"))
            }
        };
        match self.manager.rollback(tid) {
            Ok(()) => self.state_response(tid),
            Err(e) => self.state_response(tid).with_error(e),
        }
    }

    /// GET /health
    pub fn health(&self) -> Value {
        json!({"status": "ok", "active_transactions": self.manager.active().len()})
    }

    fn state_response(&self, tid: Uuid) -> ProxyResponse {
        let state = self
            .manager
            .state(tid)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_owned());
        ProxyResponse::new(state).with_tid(tid)
    }
}
