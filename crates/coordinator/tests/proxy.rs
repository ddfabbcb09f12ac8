//! Proxy handler surface: begin / stage insert / commit / rollback over
//! the shared transaction manager, with the response envelope contract.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use uuid::Uuid;

use notiondb_client::InMemoryNotionClient;
use notiondb_coordinator::proxy::ProxyState;
use notiondb_coordinator::{CatalogConfig, OperationContext, TransactionManager};
use notiondb_sql::MetaData;

fn proxy() -> (ProxyState, Arc<InMemoryNotionClient>) {
    let client = Arc::new(InMemoryNotionClient::new());
    let ctx = OperationContext {
        client: client.clone(),
        metadata: Arc::new(RwLock::new(MetaData::new())),
        catalog: CatalogConfig {
            root_page_id: Uuid::nil(),
            tables_database_id: Uuid::nil(),
            catalog_name: "memory".into(),
        },
    };
    (ProxyState::new(Arc::new(TransactionManager::new()), ctx), client)
}

fn insert_parameters(name: &str) -> serde_json::Value {
    json!({
        "payload": {
            "parent": {"type": "database_id", "database_id": "db-1"},
            "properties": {
                "Name": {"title": [{"text": {"content": ":name"}}]},
            },
        },
        "params": {"name": name},
    })
}

#[test]
fn test_begin_returns_active_transaction() {
    let (proxy, _) = proxy();
    let response = proxy.begin();
    assert_eq!(response.state, "ACTIVE");
    assert!(response.transaction_id.is_some());
    assert!(response.error.is_none());
}

#[test]
fn test_stage_commit_roundtrip() {
    let (proxy, client) = proxy();
    let tid = proxy.begin().transaction_id.unwrap();

    let staged = proxy.stage_insert(&tid, insert_parameters("Isaac Newton"));
    assert_eq!(staged.state, "ACTIVE");
    assert!(staged.error.is_none());

    let committed = proxy.commit(&tid);
    assert_eq!(committed.state, "COMMITTED");
    let data = committed.data.unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["object"], json!("page"));

    // the page landed in the store (root page + the insert)
    assert_eq!(client.len(), 2);
}

#[test]
fn test_rollback_aborts_and_keeps_store_clean() {
    let (proxy, client) = proxy();
    let tid = proxy.begin().transaction_id.unwrap();
    proxy.stage_insert(&tid, insert_parameters("ghost"));

    let rolled_back = proxy.rollback(&tid);
    assert_eq!(rolled_back.state, "ABORTED");
    assert_eq!(client.len(), 1);
}

#[test]
fn test_commit_unknown_transaction_reports_error() {
    let (proxy, _) = proxy();
    let response = proxy.commit(&Uuid::new_v4().to_string());
    assert_eq!(response.state, "UNKNOWN");
    assert!(response.error.is_some());
}

#[test]
fn test_stage_insert_requires_payload() {
    let (proxy, _) = proxy();
    let tid = proxy.begin().transaction_id.unwrap();
    let response = proxy.stage_insert(&tid, json!({"params": {}}));
    assert!(response.error.is_some());
}

#[test]
fn test_envelope_serialization() {
    let (proxy, _) = proxy();
    let response = proxy.begin();
    let envelope = serde_json::to_value(&response).unwrap();
    assert_eq!(envelope["state"], json!("ACTIVE"));
    assert!(envelope.get("transaction_id").is_some());
    // absent fields are omitted from the envelope
    assert!(envelope.get("data").is_none());
    assert!(envelope.get("error").is_none());
}

#[test]
fn test_health_reports_active_transactions() {
    let (proxy, _) = proxy();
    proxy.begin();
    let health = proxy.health();
    assert_eq!(health["status"], json!("ok"));
    assert_eq!(health["active_transactions"], json!(1));
}
