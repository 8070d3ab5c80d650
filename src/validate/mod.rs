//! Validation of decoded request targets.
//!
//! A [`Validator`] looks at the decoded data and reports every failing field
//! at once. [`NoValidation`] accepts everything; [`RuleValidator`] runs a
//! [`Rules`] set built at route registration time.
//!
//! ```rust
//! use plumb::validate::{RuleValidator, Rules};
//!
//! let validator = RuleValidator::new(
//!     Rules::new()
//!         .field("prefix", ["required"])?
//!         .field("count", ["min:4"])?,
//! );
//! # Ok::<(), plumb::validate::RuleError>(())
//! ```

mod rules;

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::request::Request;

pub use rules::{Rule, RuleError, Rules};

/// Field name to the ordered messages describing why it is invalid.
///
/// Empty means valid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failing fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldErrors {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut errors = Self::new();
        for (field, message) in iter {
            errors.add(field, message);
        }
        errors
    }
}

/// Which naming a rule set uses to address fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    /// URL parameter keys, as declared in the extraction
    /// [`Schema`](crate::extract::Schema).
    Schema,
    /// Serialized (serde) field names.
    Json,
}

/// The decoded request target as a validator sees it.
pub struct View<'a> {
    value: &'a Value,
    aliases: &'a [(String, String)],
}

impl<'a> View<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value, aliases: &[] }
    }

    /// `aliases` maps URL parameter keys to the field names they fill.
    pub fn with_aliases(value: &'a Value, aliases: &'a [(String, String)]) -> Self {
        Self { value, aliases }
    }

    pub fn value(&self) -> &'a Value {
        self.value
    }

    /// Looks a field up by the name it carries under `tag`.
    ///
    /// Keys without an alias fall back to the field name.
    pub fn field(&self, tag: Tag, key: &str) -> Option<&'a Value> {
        let name = match tag {
            Tag::Json => key,
            Tag::Schema => self
                .aliases
                .iter()
                .find(|(k, _)| k == key)
                .map_or(key, |(_, field)| field.as_str()),
        };
        self.value.get(name)
    }
}

/// Validates decoded request data.
pub trait Validator: Send + Sync {
    fn validate(&self, req: &Request, data: &View<'_>) -> FieldErrors;
}

/// Accepts everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoValidation;

impl Validator for NoValidation {
    fn validate(&self, _req: &Request, _data: &View<'_>) -> FieldErrors {
        FieldErrors::new()
    }
}

/// Runs a [`Rules`] set against the decoded data.
#[derive(Clone, Debug)]
pub struct RuleValidator {
    rules: Rules,
    tag: Tag,
    messages: HashMap<(String, &'static str), String>,
}

impl RuleValidator {
    /// Validator for data extracted from URL parameters ([`Tag::Schema`]).
    pub fn new(rules: Rules) -> Self {
        Self {
            rules,
            tag: Tag::Schema,
            messages: HashMap::new(),
        }
    }

    /// Validator for data extracted from a JSON body ([`Tag::Json`]).
    pub fn json(rules: Rules) -> Self {
        Self::new(rules).tag(Tag::Json)
    }

    pub fn tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    /// Replaces the message reported when `rule` fails on `field`.
    ///
    /// `rule` is the rule name without arguments, e.g. `"min"`.
    pub fn message(mut self, field: &str, rule: &str, message: impl Into<String>) -> Self {
        if let Some(name) = rules::canonical_name(rule) {
            self.messages.insert((field.to_owned(), name), message.into());
        }
        self
    }
}

impl Validator for RuleValidator {
    fn validate(&self, _req: &Request, data: &View<'_>) -> FieldErrors {
        self.rules.evaluate(data, self.tag, &self.messages)
    }
}
