//! In-memory Notion client
//!
//! Simulates the Notion store for deterministic tests: a single list of
//! page/database objects behind a mutex. The store always contains a root
//! workspace page whose id is stable across resets; everything else hangs
//! off it through `parent` references.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use notiondb_common::{Error, Result};

use crate::NotionClient;

/// The id of the root workspace page. Stable across resets.
pub const ROOT_PAGE_ID: &str = "00000000-0000-0000-0000-000000000000";

/// An in-memory Notion store client.
///
/// Cloning shares the underlying store, so connections, staged operations
/// and assertions in tests all observe the same state.
#[derive(Clone)]
pub struct InMemoryNotionClient {
    store: Arc<Mutex<Vec<Value>>>,
}

impl Default for InMemoryNotionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNotionClient {
    pub fn new() -> InMemoryNotionClient {
        let client = InMemoryNotionClient {
            store: Arc::new(Mutex::new(Vec::new())),
        };
        client.reset();
        client
    }

    /// Restores the store to its initial state: just the root page.
    pub fn reset(&self) {
        let mut store = self.store.lock();
        store.clear();
        store.push(json!({
            "object": "page",
            "id": ROOT_PAGE_ID,
            "created_time": now(),
            "archived": false,
            "in_trash": false,
            "parent": {"type": "workspace", "workspace": true},
            "properties": {
                "Name": {"type": "title", "title": [{"text": {"content": "root"}}]}
            },
        }));
    }

    /// Number of objects currently in the store.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// A snapshot of the store contents.
    pub fn objects(&self) -> Vec<Value> {
        self.store.lock().clone()
    }

    /// Replaces the store contents wholesale (file-backed load path).
    pub(crate) fn replace(&self, objects: Vec<Value>) {
        *self.store.lock() = objects;
    }

    /// Fetch an object by id.
    pub fn get(&self, id: &str) -> Option<Value> {
        self.store
            .lock()
            .iter()
            .find(|o| o.get("id").and_then(Value::as_str) == Some(id))
            .cloned()
    }

    /// Adds an object with a caller-chosen id, for deterministic fixtures.
    /// The same validation and type tagging as the API path applies.
    pub fn add_with_id(&self, kind: &str, id: &str, payload: Value) -> Result<Value> {
        self.create_object(kind, payload, Some(id.to_owned()))
    }

    fn create_object(&self, kind: &str, payload: Value, id: Option<String>) -> Result<Value> {
        if payload.get("parent").is_none() {
            return Err(Error::Notion(format!(
                "missing \"parent\" object in payload: {payload}"
            )));
        }

        let mut object = serde_json::Map::new();
        object.insert("object".into(), json!(kind));
        object.insert(
            "id".into(),
            json!(id.unwrap_or_else(|| Uuid::new_v4().to_string())),
        );
        object.insert("created_time".into(), json!(now()));
        object.insert("archived".into(), json!(false));
        object.insert("in_trash".into(), json!(false));
        if let Value::Object(payload) = payload {
            for (key, value) in payload {
                object.insert(key, value);
            }
        }
        if kind == "database" {
            object.insert("is_inline".into(), json!(false));
        }

        // tag each property with its type at the property level
        if let Some(Value::Object(properties)) = object.get_mut("properties") {
            for property in properties.values_mut() {
                tag_property_type(property);
            }
        }

        let object = Value::Object(object);
        self.store.lock().push(object.clone());
        tracing::debug!(kind, "created object in simulated store");
        Ok(object)
    }
}

/// The property's type is its first non-"type" key; Notion carries the tag
/// at the property level.
fn tag_property_type(property: &mut Value) {
    let Value::Object(map) = property else {
        return;
    };
    let kind = map.keys().find(|k| *k != "type").cloned();
    if let Some(kind) = kind {
        map.insert("type".into(), json!(kind));
    }
}

fn now() -> String {
    chrono::Utc::now()
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string()
}

impl NotionClient for InMemoryNotionClient {
    fn pages_create(&self, payload: Value) -> Result<Value> {
        self.create_object("page", payload, None)
    }

    fn pages_retrieve(&self, payload: Value) -> Result<Value> {
        let id = required_str(&payload, "id")?;
        match self.get(id) {
            Some(object) if object["object"] == "page" => Ok(object),
            _ => Ok(json!({})),
        }
    }

    fn pages_update(&self, payload: Value) -> Result<Value> {
        let id = required_str(&payload, "id")?.to_owned();
        let data = payload
            .get("data")
            .cloned()
            .ok_or_else(|| Error::Notion(format!("missing \"data\" object in payload for page {id}")))?;

        let mut store = self.store.lock();
        let page = store
            .iter_mut()
            .find(|o| o["object"] == "page" && o["id"] == json!(id))
            .ok_or_else(|| {
                Error::Notion(format!("object with id {id} not found or not a page"))
            })?;

        if let Some(archived) = data.get("archived") {
            page["archived"] = archived.clone();
        } else if let Some(in_trash) = data.get("in_trash") {
            page["in_trash"] = in_trash.clone();
        } else if let Some(Value::Object(updates)) = data.get("properties") {
            for (name, value) in updates {
                let mut value = value.clone();
                tag_property_type(&mut value);
                page["properties"][name] = value;
            }
        } else {
            return Err(Error::Notion(format!(
                "cannot update page {id} with data: {data}"
            )));
        }
        Ok(page.clone())
    }

    fn databases_create(&self, payload: Value) -> Result<Value> {
        self.create_object("database", payload, None)
    }

    fn databases_retrieve(&self, payload: Value) -> Result<Value> {
        let id = required_str(&payload, "id")?;
        Ok(self.get(id).unwrap_or_else(|| json!({})))
    }

    fn databases_query(&self, payload: Value) -> Result<Value> {
        let database_id = required_str(&payload, "database_id")?;
        let filter = payload.get("filter");

        let store = self.store.lock();
        let mut results = Vec::new();
        for object in store.iter() {
            if object["object"] != "page" {
                continue;
            }
            if object.pointer("/parent/database_id").and_then(Value::as_str) != Some(database_id)
            {
                continue;
            }
            // archived pages have left the visible database
            if object["archived"] == json!(true) || object["in_trash"] == json!(true) {
                continue;
            }
            let selected = match filter {
                Some(filter) => eval_filter(object, filter)?,
                None => true,
            };
            if selected {
                results.push(object.clone());
            }
        }
        Ok(json!({"object": "list", "results": results}))
    }

    fn blocks_children_append(&self, payload: Value) -> Result<Value> {
        let id = required_str(&payload, "block_id")?;
        let children = payload
            .get("children")
            .cloned()
            .unwrap_or_else(|| json!([]));
        if self.get(id).is_none() && id != ROOT_PAGE_ID {
            return Err(Error::Notion(format!("block {id} not found")));
        }
        Ok(json!({"object": "list", "results": children}))
    }
}

fn required_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Notion(format!("bad payload provided, missing \"{key}\"")))
}

/// Evaluate a Notion filter object against a page. Composite `and`/`or`
/// conditions may nest.
fn eval_filter(page: &Value, filter: &Value) -> Result<bool> {
    if let Some(conditions) = filter.get("and").and_then(Value::as_array) {
        for condition in conditions {
            if !eval_filter(page, condition)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }
    if let Some(conditions) = filter.get("or").and_then(Value::as_array) {
        for condition in conditions {
            if eval_filter(page, condition)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    let property = filter
        .get("property")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Notion(format!("filter condition missing \"property\": {filter}")))?;
    let (kind, condition) = filter
        .as_object()
        .and_then(|map| map.iter().find(|(key, _)| *key != "property"))
        .ok_or_else(|| Error::Notion(format!("filter condition missing a type: {filter}")))?;

    let property_object = page
        .pointer(&format!("/properties/{property}"))
        .ok_or_else(|| Error::Notion(format!("page has no property \"{property}\"")))?;
    let operand = extract_operand(property_object, kind);

    let (verb, expected) = condition
        .as_object()
        .and_then(|map| map.iter().next())
        .ok_or_else(|| Error::Notion(format!("empty filter condition: {condition}")))?;

    Ok(match verb.as_str() {
        "equals" => &operand == expected,
        "does_not_equal" => &operand != expected,
        "contains" => match (operand.as_str(), expected.as_str()) {
            (Some(haystack), Some(needle)) => haystack.contains(needle),
            _ => false,
        },
        "less_than" => compare(&operand, expected, |ord| ord.is_lt()),
        "less_than_or_equal_to" => compare(&operand, expected, |ord| ord.is_le()),
        "greater_than" => compare(&operand, expected, |ord| ord.is_gt()),
        "greater_than_or_equal_to" => compare(&operand, expected, |ord| ord.is_ge()),
        other => {
            return Err(Error::Notion(format!(
                "operator {other} not supported or unknown"
            )))
        }
    })
}

/// The comparable value of a property: text content for title/rich_text,
/// the raw scalar otherwise.
fn extract_operand(property: &Value, kind: &str) -> Value {
    match kind {
        "title" | "rich_text" => property
            .pointer(&format!("/{kind}/0/text/content"))
            .cloned()
            .unwrap_or(Value::Null),
        _ => property.get(kind).cloned().unwrap_or(Value::Null),
    }
}

fn compare(lhs: &Value, rhs: &Value, check: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(l), Some(r)) => l.partial_cmp(&r).map(&check).unwrap_or(false),
        _ => match (lhs.as_str(), rhs.as_str()) {
            (Some(l), Some(r)) => check(l.cmp(r)),
            _ => false,
        },
    }
}
