//! Declarative description of how URL parameters map onto a target type.

use std::collections::HashSet;
use std::fmt;

use serde_json::{Map, Number, Value, json};

use crate::duration::{parse_bool, parse_duration};
use crate::validate::FieldErrors;

/// Message for values of a known key that do not convert to its kind.
pub(crate) fn conversion_message(kind: Kind) -> String {
    format!("Unable to convert value to expected type {kind}")
}

pub(crate) const UNKNOWN_KEY_MESSAGE: &str = "Unknown conversion error, invalid value";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("key `{0}` is declared twice")]
    DuplicateKey(String),
    #[error("field `{0}` is filled by two keys")]
    DuplicateField(String),
    #[error("default `{value}` of key `{key}` is not a valid {kind}")]
    InvalidDefault {
        key: String,
        kind: Kind,
        value: String,
    },
}

/// Type a parameter converts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    String,
    Int,
    Uint,
    Float,
    /// `1 t T TRUE true True` and their `false` counterparts.
    Bool,
    /// `"1h30m"`, `"300ms"`. Produces the serde form of `std::time::Duration`.
    Duration,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "i64",
            Self::Uint => "u64",
            Self::Float => "f64",
            Self::Bool => "bool",
            Self::Duration => "duration",
        }
    }

    fn convert(self, raw: &str) -> Option<Value> {
        match self {
            Self::String => Some(Value::String(raw.to_owned())),
            Self::Int => raw.parse::<i64>().ok().map(Value::from),
            Self::Uint => raw.parse::<u64>().ok().map(Value::from),
            Self::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            Self::Bool => parse_bool(raw).map(Value::Bool),
            Self::Duration => parse_duration(raw)
                .ok()
                .map(|d| json!({ "secs": d.as_secs(), "nanos": d.subsec_nanos() })),
        }
    }

    fn zero(self) -> Value {
        match self {
            Self::String => Value::String(String::new()),
            Self::Int | Self::Uint => Value::from(0),
            Self::Float => Value::from(0.0),
            Self::Bool => Value::Bool(false),
            Self::Duration => json!({ "secs": 0, "nanos": 0 }),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parameter of a [`Schema`].
#[derive(Clone, Debug)]
pub struct Field {
    key: String,
    name: String,
    kind: Kind,
    default: Option<String>,
    repeated: bool,
    optional: bool,
}

impl Field {
    /// Parameter `key` filling the field of the same name.
    pub fn new(key: impl Into<String>, kind: Kind) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            kind,
            default: None,
            repeated: false,
            optional: false,
        }
    }

    pub fn string(key: impl Into<String>) -> Self { Self::new(key, Kind::String) }
    pub fn int(key: impl Into<String>) -> Self { Self::new(key, Kind::Int) }
    pub fn uint(key: impl Into<String>) -> Self { Self::new(key, Kind::Uint) }
    pub fn float(key: impl Into<String>) -> Self { Self::new(key, Kind::Float) }
    pub fn bool(key: impl Into<String>) -> Self { Self::new(key, Kind::Bool) }
    pub fn duration(key: impl Into<String>) -> Self { Self::new(key, Kind::Duration) }

    /// Fills the (serialized) field `name` instead of the one named like the key.
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Raw value used when the key is absent from the request.
    pub fn default_value(mut self, raw: impl Into<String>) -> Self {
        self.default = Some(raw.into());
        self
    }

    /// Keeps every value of the key, producing an array.
    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    /// Leaves the field out instead of zero-filling it, for `Option` targets.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<Field>,
    ignore_unknown_keys: bool,
}

impl SchemaBuilder {
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Silently drops parameters no field declares.
    pub fn ignore_unknown_keys(mut self) -> Self {
        self.ignore_unknown_keys = true;
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut keys = HashSet::new();
        let mut names = HashSet::new();

        for field in &self.fields {
            if !keys.insert(field.key.as_str()) {
                return Err(SchemaError::DuplicateKey(field.key.clone()));
            }
            if !names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            if let Some(raw) = &field.default {
                if field.kind.convert(raw).is_none() {
                    return Err(SchemaError::InvalidDefault {
                        key: field.key.clone(),
                        kind: field.kind,
                        value: raw.clone(),
                    });
                }
            }
        }

        let aliases = self
            .fields
            .iter()
            .map(|f| (f.key.clone(), f.name.clone()))
            .collect();

        Ok(Schema {
            fields: self.fields,
            aliases,
            ignore_unknown_keys: self.ignore_unknown_keys,
        })
    }
}

/// How URL parameters decode into a target type.
///
/// ```rust
/// use plumb::extract::{Field, Schema};
///
/// let schema = Schema::builder()
///     .field(Field::string("prefix"))
///     .field(Field::int("count").default_value("10"))
///     .field(Field::duration("timeout").optional())
///     .build()?;
/// # Ok::<(), plumb::extract::SchemaError>(())
/// ```
#[derive(Clone, Debug)]
pub struct Schema {
    fields: Vec<Field>,
    aliases: Vec<(String, String)>,
    ignore_unknown_keys: bool,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Parameter key to field name, for every declared field.
    pub fn aliases(&self) -> &[(String, String)] {
        &self.aliases
    }

    /// Converts raw parameters into an object keyed by field name.
    ///
    /// Scalar fields take the last value of their key, repeated fields keep
    /// all of them in order. An empty value leaves a non-string field unset.
    /// Every failing key is reported.
    pub fn decode(&self, params: &[(String, String)]) -> Result<Map<String, Value>, FieldErrors> {
        let mut errors = FieldErrors::new();

        if !self.ignore_unknown_keys {
            for (key, _) in params {
                let known = self.fields.iter().any(|f| f.key == *key);
                if !known && errors.get(key).is_none() {
                    errors.add(key.as_str(), UNKNOWN_KEY_MESSAGE);
                }
            }
        }

        let mut object = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            let mut raw: Vec<&str> = params
                .iter()
                .filter(|(k, _)| *k == field.key)
                .map(|(_, v)| v.as_str())
                .collect();
            if raw.is_empty() {
                raw.extend(field.default.as_deref());
            }
            if field.kind != Kind::String {
                raw.retain(|v| !v.is_empty());
            }

            let mut converted = Vec::with_capacity(raw.len());
            let mut failed = false;
            for value in raw {
                match field.kind.convert(value) {
                    Some(v) => converted.push(v),
                    None => failed = true,
                }
            }
            if failed {
                errors.add(field.key.as_str(), conversion_message(field.kind));
                continue;
            }

            let value = if field.repeated {
                Value::Array(converted)
            } else {
                match converted.pop() {
                    Some(v) => v,
                    None if field.optional => continue,
                    None => field.kind.zero(),
                }
            };
            object.insert(field.name.clone(), value);
        }

        if errors.is_empty() { Ok(object) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn build_rejects_bad_declarations() {
        let dup = Schema::builder()
            .field(Field::string("a"))
            .field(Field::int("a"))
            .build();
        assert!(matches!(dup, Err(SchemaError::DuplicateKey(k)) if k == "a"));

        let dup = Schema::builder()
            .field(Field::string("a").rename("x"))
            .field(Field::string("b").rename("x"))
            .build();
        assert!(matches!(dup, Err(SchemaError::DuplicateField(_))));

        let bad = Schema::builder()
            .field(Field::duration("timeout").default_value("soon"))
            .build();
        assert!(matches!(bad, Err(SchemaError::InvalidDefault { .. })));
    }

    #[test]
    fn decodes_scalars_defaults_and_zero_values() {
        let schema = Schema::builder()
            .field(Field::string("prefix"))
            .field(Field::int("count").default_value("10"))
            .field(Field::bool("json"))
            .field(Field::duration("timeout"))
            .field(Field::float("ratio").optional())
            .build()
            .unwrap();

        let object = schema
            .decode(&params(&[("prefix", "a"), ("prefix", "b"), ("timeout", "1h30m")]))
            .unwrap();

        assert_eq!(
            Value::Object(object),
            json!({
                "prefix": "b",
                "count": 10,
                "json": false,
                "timeout": { "secs": 5400, "nanos": 0 },
            })
        );
    }

    #[test]
    fn repeated_keys_keep_every_value() {
        let schema = Schema::builder()
            .field(Field::string("id").repeated())
            .build()
            .unwrap();

        let object = schema.decode(&params(&[("id", "1"), ("id", "2")])).unwrap();
        assert_eq!(object["id"], json!(["1", "2"]));
    }

    #[test]
    fn empty_value_leaves_non_string_unset() {
        let schema = Schema::builder()
            .field(Field::int("count"))
            .field(Field::string("name"))
            .build()
            .unwrap();

        let object = schema.decode(&params(&[("count", ""), ("name", "")])).unwrap();
        assert_eq!(object["count"], json!(0));
        assert_eq!(object["name"], json!(""));
    }

    #[test]
    fn reports_every_failing_key() {
        let schema = Schema::builder()
            .field(Field::int("count"))
            .field(Field::bool("json"))
            .build()
            .unwrap();

        let errors = schema
            .decode(&params(&[("count", "many"), ("json", "yes"), ("extra", "1")]))
            .unwrap_err();

        assert_eq!(
            errors.get("count"),
            Some(&["Unable to convert value to expected type i64".to_owned()][..])
        );
        assert_eq!(
            errors.get("json"),
            Some(&["Unable to convert value to expected type bool".to_owned()][..])
        );
        assert_eq!(errors.get("extra"), Some(&[UNKNOWN_KEY_MESSAGE.to_owned()][..]));
    }

    #[test]
    fn unknown_keys_can_be_ignored() {
        let schema = Schema::builder()
            .field(Field::int("count"))
            .ignore_unknown_keys()
            .build()
            .unwrap();

        assert!(schema.decode(&params(&[("count", "1"), ("page", "2")])).is_ok());
    }
}
