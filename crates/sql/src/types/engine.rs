//! Type engines: bidirectional value <-> Notion payload conversion
//!
//! Every engine defines three things: the property descriptor used in DDL
//! (`col_spec`), the native-to-payload conversion (`bind`) and its inverse
//! (`result`). `result(bind(v))` must round-trip every value in the
//! engine's domain.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use notiondb_common::{Error, Result};

use super::Value;

/// Notion currency formats for the `money(<currency>)` SQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    Dollar,
    Euro,
    Franc,
    Krona,
    Pound,
    Yuan,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Dollar => "dollar",
            Currency::Euro => "euro",
            Currency::Franc => "franc",
            Currency::Krona => "krona",
            Currency::Pound => "pound",
            Currency::Yuan => "yuan",
        }
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dollar" => Ok(Currency::Dollar),
            "euro" => Ok(Currency::Euro),
            "franc" => Ok(Currency::Franc),
            "krona" => Ok(Currency::Krona),
            "pound" => Ok(Currency::Pound),
            "yuan" => Ok(Currency::Yuan),
            other => Err(Error::Argument(format!("unknown currency: {other}"))),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The declared SQL type surface, as produced by the parser. Lengths are
/// kept for canonical SQL emission; Notion has no length constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Number,
    Money(Currency),
    Varchar(u32),
    TitleVarchar(u32),
    Bool,
    Date,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int => write!(f, "int"),
            DataType::Number => write!(f, "number"),
            DataType::Money(currency) => write!(f, "money({})", currency),
            DataType::Varchar(n) => write!(f, "varchar({})", n),
            DataType::TitleVarchar(n) => write!(f, "title_varchar({})", n),
            DataType::Bool => write!(f, "bool"),
            DataType::Date => write!(f, "date"),
        }
    }
}

/// A column's backend type engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeEngine {
    /// Notion number with format "number"
    Integer,
    /// Notion number with format "number_with_commas"
    Numeric,
    /// Notion number with a currency format
    Money(Currency),
    /// Notion title (is_title) or rich_text property
    String { is_title: bool },
    /// Notion checkbox
    Boolean,
    /// Notion date with optional end
    Date,
    /// A plain object id
    Uuid,
    /// The Notion object id of the row itself (implicit `_no_id` column)
    ObjectId,
    /// The Notion archived flag (implicit `_no_archived` column)
    ArchivalFlag,
}

impl From<DataType> for TypeEngine {
    fn from(datatype: DataType) -> Self {
        match datatype {
            DataType::Int => TypeEngine::Integer,
            DataType::Number => TypeEngine::Numeric,
            DataType::Money(currency) => TypeEngine::Money(currency),
            DataType::Varchar(_) => TypeEngine::String { is_title: false },
            DataType::TitleVarchar(_) => TypeEngine::String { is_title: true },
            DataType::Bool => TypeEngine::Boolean,
            DataType::Date => TypeEngine::Date,
        }
    }
}

impl TypeEngine {
    /// The Notion property-level type tag for this engine. This is where
    /// the type name lives on the wire; `col_spec` never repeats it.
    pub fn notion_type(&self) -> &'static str {
        match self {
            TypeEngine::Integer | TypeEngine::Numeric | TypeEngine::Money(_) => "number",
            TypeEngine::String { is_title: true } => "title",
            TypeEngine::String { is_title: false } => "rich_text",
            TypeEngine::Boolean => "checkbox",
            TypeEngine::Date => "date",
            TypeEngine::Uuid | TypeEngine::ObjectId => "id",
            TypeEngine::ArchivalFlag => "archived",
        }
    }

    /// A short tag identifying the engine, used in reflection rows and
    /// cursor descriptions.
    pub fn tag(&self) -> String {
        match self {
            TypeEngine::Integer => "integer".into(),
            TypeEngine::Numeric => "numeric".into(),
            TypeEngine::Money(currency) => format!("money({currency})"),
            TypeEngine::String { is_title: true } => "title_string".into(),
            TypeEngine::String { is_title: false } => "string".into(),
            TypeEngine::Boolean => "boolean".into(),
            TypeEngine::Date => "date".into(),
            TypeEngine::Uuid => "uuid".into(),
            TypeEngine::ObjectId => "object_id".into(),
            TypeEngine::ArchivalFlag => "archival_flag".into(),
        }
    }

    /// The property descriptor emitted in DDL payloads, e.g.
    /// `{"number": {"format": "number"}}`. The type tag is carried at the
    /// containing property level, never inside the descriptor.
    pub fn col_spec(&self) -> serde_json::Value {
        match self {
            TypeEngine::Integer => json!({"number": {"format": "number"}}),
            TypeEngine::Numeric => json!({"number": {"format": "number_with_commas"}}),
            TypeEngine::Money(currency) => json!({"number": {"format": currency.as_str()}}),
            TypeEngine::String { is_title: true } => json!({"title": {}}),
            TypeEngine::String { is_title: false } => json!({"rich_text": {}}),
            TypeEngine::Boolean => json!({"checkbox": {}}),
            TypeEngine::Date => json!({"date": {}}),
            TypeEngine::Uuid | TypeEngine::ObjectId => json!({"id": {}}),
            TypeEngine::ArchivalFlag => json!({"archived": {}}),
        }
    }

    /// Rebuild an engine from a reflected Notion property descriptor.
    pub fn from_notion_property(kind: &str, spec: &serde_json::Value) -> Result<TypeEngine> {
        match kind {
            "title" => Ok(TypeEngine::String { is_title: true }),
            "rich_text" => Ok(TypeEngine::String { is_title: false }),
            "checkbox" => Ok(TypeEngine::Boolean),
            "date" => Ok(TypeEngine::Date),
            "id" => Ok(TypeEngine::ObjectId),
            "archived" => Ok(TypeEngine::ArchivalFlag),
            "number" => {
                let format = spec
                    .get("number")
                    .and_then(|n| n.get("format"))
                    .and_then(|f| f.as_str())
                    .unwrap_or("number");
                match format {
                    "number" => Ok(TypeEngine::Integer),
                    "number_with_commas" => Ok(TypeEngine::Numeric),
                    currency => Ok(TypeEngine::Money(currency.parse()?)),
                }
            }
            other => Err(Error::InvalidRequest(format!(
                "unsupported Notion property type: {other}"
            ))),
        }
    }

    /// Convert a native value into a Notion payload fragment, e.g.
    /// `Integer.bind(2)` -> `{"number": 2}`.
    pub fn bind(&self, value: &Value) -> Result<serde_json::Value> {
        if value.is_null() {
            return Ok(serde_json::Value::Null);
        }
        Ok(self.wrap(self.scalar_json(value)?))
    }

    /// The inverse of [`bind`](Self::bind).
    pub fn result(&self, fragment: &serde_json::Value) -> Result<Value> {
        if fragment.is_null() {
            return Ok(Value::Null);
        }
        self.parse_scalar(self.unwrap(fragment)?)
    }

    /// Build the bind fragment shape around a placeholder string instead of
    /// a real value, for compiled payload templates (`:name` style).
    pub fn bind_template(&self, placeholder: &str) -> serde_json::Value {
        self.wrap(json!(placeholder))
    }

    /// The inner scalar of a bind fragment: the JSON value sitting at the
    /// substitution point. Fails `Interface` on a value outside the
    /// engine's domain.
    pub fn scalar_json(&self, value: &Value) -> Result<serde_json::Value> {
        match (self, value) {
            (TypeEngine::Integer, Value::Integer(i)) => Ok(json!(i)),
            (TypeEngine::Numeric | TypeEngine::Money(_), Value::Decimal(d)) => {
                let f = d.to_f64().ok_or_else(|| {
                    Error::Interface(format!("decimal out of range: {d}"))
                })?;
                let n = serde_json::Number::from_f64(f).ok_or_else(|| {
                    Error::Interface(format!("decimal not representable: {d}"))
                })?;
                Ok(serde_json::Value::Number(n))
            }
            (TypeEngine::Numeric | TypeEngine::Money(_), Value::Integer(i)) => Ok(json!(i)),
            (TypeEngine::String { .. }, Value::String(s)) => Ok(json!(s)),
            (TypeEngine::Boolean, Value::Boolean(b)) => Ok(json!(b)),
            (TypeEngine::ArchivalFlag, Value::Boolean(b)) => Ok(json!(b)),
            (TypeEngine::Date, Value::Date { start, end }) => Ok(json!({
                "start": start.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "end": end.map(|e| e.format("%Y-%m-%dT%H:%M:%S").to_string()),
            })),
            (TypeEngine::Uuid | TypeEngine::ObjectId, Value::Uuid(u)) => {
                Ok(json!(u.to_string()))
            }
            (TypeEngine::Uuid | TypeEngine::ObjectId, Value::String(s)) => Ok(json!(s)),
            (engine, value) => Err(Error::Interface(format!(
                "cannot bind {} value to {} column",
                value.type_name(),
                engine.tag()
            ))),
        }
    }

    /// Wrap an inner scalar in the engine's payload fragment shape.
    fn wrap(&self, inner: serde_json::Value) -> serde_json::Value {
        match self {
            TypeEngine::Integer | TypeEngine::Numeric | TypeEngine::Money(_) => {
                json!({"number": inner})
            }
            TypeEngine::String { is_title: true } => {
                json!({"title": [{"text": {"content": inner}}]})
            }
            TypeEngine::String { is_title: false } => {
                json!({"rich_text": [{"text": {"content": inner}}]})
            }
            TypeEngine::Boolean => json!({"checkbox": inner}),
            TypeEngine::Date => json!({"date": inner}),
            TypeEngine::Uuid | TypeEngine::ObjectId => json!({"id": inner}),
            TypeEngine::ArchivalFlag => json!({"archived": inner}),
        }
    }

    /// Extract the inner scalar from a payload fragment.
    fn unwrap<'a>(&self, fragment: &'a serde_json::Value) -> Result<&'a serde_json::Value> {
        let missing = |key: &str| {
            Error::Interface(format!(
                "expected '{key}' key in {} fragment: {fragment}",
                self.tag()
            ))
        };
        match self {
            TypeEngine::Integer | TypeEngine::Numeric | TypeEngine::Money(_) => {
                fragment.get("number").ok_or_else(|| missing("number"))
            }
            TypeEngine::String { is_title } => {
                let key = if *is_title { "title" } else { "rich_text" };
                fragment.get(key).ok_or_else(|| missing(key))
            }
            TypeEngine::Boolean => fragment.get("checkbox").ok_or_else(|| missing("checkbox")),
            TypeEngine::Date => {
                // accept both the wrapped form and a bare {start, end}
                Ok(fragment.get("date").unwrap_or(fragment))
            }
            TypeEngine::Uuid | TypeEngine::ObjectId => {
                fragment.get("id").ok_or_else(|| missing("id"))
            }
            TypeEngine::ArchivalFlag => {
                fragment.get("archived").ok_or_else(|| missing("archived"))
            }
        }
    }

    /// Parse an inner scalar (a property value with the type-key wrapper
    /// already stripped, as it appears in flattened result rows) back into
    /// a native value.
    pub fn result_scalar(&self, scalar: &serde_json::Value) -> Result<Value> {
        self.parse_scalar(scalar)
    }

    fn parse_scalar(&self, scalar: &serde_json::Value) -> Result<Value> {
        if scalar.is_null() {
            return Ok(Value::Null);
        }
        let malformed = || {
            Error::Interface(format!(
                "malformed {} result fragment: {scalar}",
                self.tag()
            ))
        };
        match self {
            TypeEngine::Integer => scalar
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(malformed),
            TypeEngine::Numeric | TypeEngine::Money(_) => {
                if let Some(i) = scalar.as_i64() {
                    return Ok(Value::Decimal(Decimal::from(i)));
                }
                let f = scalar.as_f64().ok_or_else(malformed)?;
                // shortest-float printing keeps e.g. 2.5 exact
                Decimal::from_str(&f.to_string())
                    .map(Value::Decimal)
                    .map_err(|_| malformed())
            }
            TypeEngine::String { .. } => {
                let blocks = scalar.as_array().ok_or_else(malformed)?;
                let mut content = String::new();
                for block in blocks {
                    if let Some(text) = block.pointer("/text/content").and_then(|v| v.as_str()) {
                        content.push_str(text);
                    } else if let Some(text) =
                        block.get("plain_text").and_then(|v| v.as_str())
                    {
                        content.push_str(text);
                    }
                }
                Ok(Value::String(content))
            }
            TypeEngine::Boolean | TypeEngine::ArchivalFlag => scalar
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(malformed),
            TypeEngine::Date => {
                let start = scalar
                    .get("start")
                    .and_then(|v| v.as_str())
                    .ok_or_else(malformed)?;
                let start = parse_datetime(start)?;
                let end = match scalar.get("end") {
                    None | Some(serde_json::Value::Null) => None,
                    Some(end) => Some(parse_datetime(
                        end.as_str().ok_or_else(malformed)?,
                    )?),
                };
                Ok(Value::Date { start, end })
            }
            TypeEngine::Uuid | TypeEngine::ObjectId => {
                let s = scalar.as_str().ok_or_else(malformed)?;
                match Uuid::parse_str(s) {
                    Ok(u) => Ok(Value::Uuid(u)),
                    Err(_) => Ok(Value::String(s.to_owned())),
                }
            }
        }
    }
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|e| Error::Interface(format!("invalid datetime '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_integer_bind_exemplar() {
        let fragment = TypeEngine::Integer.bind(&Value::Integer(2)).unwrap();
        assert_eq!(fragment, json!({"number": 2}));
    }

    #[test]
    fn test_title_bind_exemplar() {
        let engine = TypeEngine::String { is_title: true };
        let fragment = engine.bind(&Value::from("Tuscan kale")).unwrap();
        assert_eq!(
            fragment,
            json!({"title": [{"text": {"content": "Tuscan kale"}}]})
        );
    }

    #[test]
    fn test_boolean_bind_exemplar() {
        let fragment = TypeEngine::Boolean.bind(&Value::Boolean(false)).unwrap();
        assert_eq!(fragment, json!({"checkbox": false}));
    }

    #[test]
    fn test_round_trip_all_engines() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(9, 26, 53)
            .unwrap();
        let cases = vec![
            (TypeEngine::Integer, Value::Integer(42)),
            (TypeEngine::Integer, Value::Integer(-7)),
            (
                TypeEngine::Numeric,
                Value::Decimal(Decimal::from_str("2.5").unwrap()),
            ),
            (
                TypeEngine::Money(Currency::Euro),
                Value::Decimal(Decimal::from_str("19.99").unwrap()),
            ),
            (
                TypeEngine::String { is_title: true },
                Value::from("Isaac Newton"),
            ),
            (
                TypeEngine::String { is_title: false },
                Value::from("grade B"),
            ),
            (TypeEngine::Boolean, Value::Boolean(true)),
            (TypeEngine::Date, Value::Date { start: date, end: None }),
            (
                TypeEngine::Date,
                Value::Date {
                    start: date,
                    end: Some(date + chrono::Duration::days(1)),
                },
            ),
            (TypeEngine::Uuid, Value::Uuid(Uuid::new_v4())),
            (TypeEngine::ObjectId, Value::Uuid(Uuid::new_v4())),
            (TypeEngine::ArchivalFlag, Value::Boolean(false)),
        ];
        for (engine, value) in cases {
            let fragment = engine.bind(&value).unwrap();
            assert_eq!(
                engine.result(&fragment).unwrap(),
                value,
                "round trip failed for {}",
                engine.tag()
            );
        }
    }

    #[test]
    fn test_unsupported_bind_fails_at_bind_time() {
        let err = TypeEngine::Integer.bind(&Value::from("nope")).unwrap_err();
        assert!(matches!(err, Error::Interface(_)));
    }

    #[test]
    fn test_col_spec_has_no_type_key() {
        for engine in [
            TypeEngine::Integer,
            TypeEngine::Numeric,
            TypeEngine::Money(Currency::Dollar),
            TypeEngine::String { is_title: true },
            TypeEngine::String { is_title: false },
            TypeEngine::Boolean,
            TypeEngine::Date,
        ] {
            let spec = engine.col_spec();
            assert!(spec.get("type").is_none(), "spec leaked a type key: {spec}");
        }
    }

    #[test]
    fn test_number_col_spec_format() {
        assert_eq!(
            TypeEngine::Integer.col_spec(),
            json!({"number": {"format": "number"}})
        );
        assert_eq!(
            TypeEngine::Money(Currency::Yuan).col_spec(),
            json!({"number": {"format": "yuan"}})
        );
    }

    #[test]
    fn test_reflection_recovers_engines() {
        let spec = json!({"number": {"format": "number_with_commas"}});
        assert_eq!(
            TypeEngine::from_notion_property("number", &spec).unwrap(),
            TypeEngine::Numeric
        );
        assert_eq!(
            TypeEngine::from_notion_property("title", &json!({})).unwrap(),
            TypeEngine::String { is_title: true }
        );
        assert!(TypeEngine::from_notion_property("rollup", &json!({})).is_err());
    }
}
