//! Notion object model
//!
//! Pages and databases come back from the client as JSON; this module
//! parses them into a tagged model and flattens them into the positional
//! row shape the cursor serves:
//!
//! - page:     `("page", id, archived, in_trash, (name, pid, type, value)*)`
//! - database: `("database", id, title, archived, in_trash, (name, pid, type, value)*)`
//!
//! Property order follows the JSON object's declared order.

use serde_json::{json, Value};

use notiondb_common::{Error, Result};

/// One property of a page or database: its name, underlying property id,
/// type tag, and value (the raw fragment under the type key; `null` for
/// database schema properties).
#[derive(Debug, Clone, PartialEq)]
pub struct NotionProperty {
    pub name: String,
    pub id: Option<String>,
    pub kind: String,
    pub value: Value,
}

/// A parsed Notion object.
#[derive(Debug, Clone, PartialEq)]
pub enum NotionObject {
    Page {
        id: String,
        archived: Option<bool>,
        in_trash: Option<bool>,
        properties: Vec<NotionProperty>,
    },
    Database {
        id: String,
        title: String,
        archived: Option<bool>,
        in_trash: Option<bool>,
        properties: Vec<NotionProperty>,
    },
}

impl NotionObject {
    /// Parses a page or database JSON object. Anything else is an
    /// interface error.
    pub fn parse(object: &Value) -> Result<NotionObject> {
        let kind = object
            .get("object")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Interface(format!("missing \"object\" tag in: {object}")))?;
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Interface(format!("missing object id in: {object}")))?
            .to_owned();
        let archived = object.get("archived").and_then(Value::as_bool);
        let in_trash = object.get("in_trash").and_then(Value::as_bool);
        let properties = parse_properties(object)?;

        match kind {
            "page" => Ok(NotionObject::Page {
                id,
                archived,
                in_trash,
                properties,
            }),
            "database" => {
                let title = object
                    .pointer("/title/0/text/content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                Ok(NotionObject::Database {
                    id,
                    title,
                    archived,
                    in_trash,
                    properties,
                })
            }
            other => Err(Error::Interface(format!(
                "expected \"page\" or \"database\", received \"{other}\""
            ))),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            NotionObject::Page { id, .. } | NotionObject::Database { id, .. } => id,
        }
    }

    pub fn properties(&self) -> &[NotionProperty] {
        match self {
            NotionObject::Page { properties, .. }
            | NotionObject::Database { properties, .. } => properties,
        }
    }
}

fn parse_properties(object: &Value) -> Result<Vec<NotionProperty>> {
    let Some(Value::Object(properties)) = object.get("properties") else {
        return Ok(Vec::new());
    };
    let mut parsed = Vec::with_capacity(properties.len());
    for (name, property) in properties {
        let kind = property
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| {
                // untagged objects carry the type as their only key
                property
                    .as_object()
                    .and_then(|map| map.keys().find(|k| *k != "type" && *k != "id").cloned())
            })
            .ok_or_else(|| {
                Error::Interface(format!("property \"{name}\" has no type: {property}"))
            })?;
        let id = property
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let value = property.get(&kind).cloned().unwrap_or(Value::Null);
        parsed.push(NotionProperty {
            name: name.clone(),
            id,
            kind,
            value,
        });
    }
    Ok(parsed)
}

/// Flattens a parsed object into the positional row tuple. Single dispatch
/// on the object tag; property quads keep declared order.
pub fn flatten(object: &NotionObject) -> Vec<Value> {
    let mut row = Vec::new();
    match object {
        NotionObject::Page {
            id,
            archived,
            in_trash,
            properties,
        } => {
            row.push(json!("page"));
            row.push(json!(id));
            row.push(json!(archived));
            row.push(json!(in_trash));
            flatten_properties(properties, &mut row);
        }
        NotionObject::Database {
            id,
            title,
            archived,
            in_trash,
            properties,
        } => {
            row.push(json!("database"));
            row.push(json!(id));
            row.push(json!(title));
            row.push(json!(archived));
            row.push(json!(in_trash));
            flatten_properties(properties, &mut row);
        }
    }
    row
}

fn flatten_properties(properties: &[NotionProperty], row: &mut Vec<Value>) {
    for property in properties {
        row.push(json!(property.name));
        row.push(json!(property.id));
        row.push(json!(property.kind));
        row.push(property.value.clone());
    }
}
