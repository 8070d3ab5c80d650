//! Rule sets: parsing and evaluation.

use std::collections::HashMap;
use std::fmt::Display;

use regex::Regex;
use serde_json::Value;

use super::{FieldErrors, Tag, View};

/// A rule failed to parse.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("unknown rule `{0}`")]
    Unknown(String),
    #[error("rule `{0}` requires an argument")]
    MissingArgument(String),
    #[error("rule `{rule}` has an invalid argument `{arg}`")]
    InvalidArgument { rule: String, arg: String },
    #[error("rule `regex` has an invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

/// A numeric rule argument, kept verbatim for messages.
#[derive(Clone, Debug)]
pub struct Bound {
    value: f64,
    raw: String,
}

impl Bound {
    fn parse(rule: &str, raw: &str) -> Result<Self, RuleError> {
        let raw = raw.trim();
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Self { value, raw: raw.to_owned() }),
            _ => Err(RuleError::InvalidArgument {
                rule: rule.to_owned(),
                arg: raw.to_owned(),
            }),
        }
    }
}

impl Display for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One parsed rule expression.
#[derive(Clone, Debug)]
pub enum Rule {
    Required,
    Min(Bound),
    Max(Bound),
    Between(Bound, Bound),
    Len(usize),
    In(Vec<String>),
    NotIn(Vec<String>),
    Numeric,
    Bool,
    Alpha,
    AlphaNum,
    AlphaDash,
    Email,
    Regex(Regex),
}

const NAMES: &[&str] = &[
    "required", "min", "max", "between", "len", "in", "not_in", "numeric", "bool", "alpha",
    "alpha_num", "alpha_dash", "email", "regex",
];

pub(super) fn canonical_name(name: &str) -> Option<&'static str> {
    NAMES.iter().copied().find(|n| *n == name)
}

impl Rule {
    /// Parses `name` or `name:argument`.
    pub fn parse(expr: &str) -> Result<Self, RuleError> {
        let (name, arg) = match expr.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg)),
            None => (expr.trim(), None),
        };
        let required_arg =
            |name: &str| arg.ok_or_else(|| RuleError::MissingArgument(name.to_owned()));
        let list = |raw: &str| raw.split(',').map(|s| s.trim().to_owned()).collect::<Vec<_>>();

        Ok(match name {
            "required" => Self::Required,
            "min" => Self::Min(Bound::parse(name, required_arg(name)?)?),
            "max" => Self::Max(Bound::parse(name, required_arg(name)?)?),
            "between" => {
                let raw = required_arg(name)?;
                let (low, high) = raw.split_once(',').ok_or_else(|| RuleError::InvalidArgument {
                    rule: name.to_owned(),
                    arg: raw.to_owned(),
                })?;
                Self::Between(Bound::parse(name, low)?, Bound::parse(name, high)?)
            }
            "len" => {
                let raw = required_arg(name)?;
                Self::Len(raw.trim().parse().map_err(|_| RuleError::InvalidArgument {
                    rule: name.to_owned(),
                    arg: raw.to_owned(),
                })?)
            }
            "in" => Self::In(list(required_arg(name)?)),
            "not_in" => Self::NotIn(list(required_arg(name)?)),
            "numeric" => Self::Numeric,
            "bool" => Self::Bool,
            "alpha" => Self::Alpha,
            "alpha_num" => Self::AlphaNum,
            "alpha_dash" => Self::AlphaDash,
            "email" => Self::Email,
            "regex" => Self::Regex(Regex::new(required_arg(name)?)?),
            other => return Err(RuleError::Unknown(other.to_owned())),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::Between(..) => "between",
            Self::Len(_) => "len",
            Self::In(_) => "in",
            Self::NotIn(_) => "not_in",
            Self::Numeric => "numeric",
            Self::Bool => "bool",
            Self::Alpha => "alpha",
            Self::AlphaNum => "alpha_num",
            Self::AlphaDash => "alpha_dash",
            Self::Email => "email",
            Self::Regex(_) => "regex",
        }
    }

    /// `None` when `value` satisfies the rule, the failure message otherwise.
    fn check(&self, field: &str, value: &Value) -> Option<String> {
        match self {
            Self::Required => is_empty(value).then(|| format!("The {field} field is required")),
            Self::Min(min) => match measure(value) {
                Some(Measure::Number(n)) if n < min.value => {
                    Some(format!("The {field} field value can not be less than {min}"))
                }
                Some(Measure::Chars(n)) if (n as f64) < min.value => {
                    Some(format!("The {field} field must be minimum {min} char"))
                }
                Some(Measure::Items(n)) if (n as f64) < min.value => {
                    Some(format!("The {field} field must be minimum {min} in length"))
                }
                _ => None,
            },
            Self::Max(max) => match measure(value) {
                Some(Measure::Number(n)) if n > max.value => {
                    Some(format!("The {field} field value can not be greater than {max}"))
                }
                Some(Measure::Chars(n)) if (n as f64) > max.value => {
                    Some(format!("The {field} field must be maximum {max} char"))
                }
                Some(Measure::Items(n)) if (n as f64) > max.value => {
                    Some(format!("The {field} field must be maximum {max} in length"))
                }
                _ => None,
            },
            Self::Between(low, high) => {
                let outside = |n: f64| n < low.value || n > high.value;
                match measure(value) {
                    Some(Measure::Number(n)) if outside(n) => {
                        Some(format!("The {field} field must be between {low} and {high}"))
                    }
                    Some(Measure::Chars(n)) if outside(n as f64) => {
                        Some(format!("The {field} field must be between {low} and {high} char"))
                    }
                    Some(Measure::Items(n)) if outside(n as f64) => Some(format!(
                        "The {field} field must be between {low} and {high} in length"
                    )),
                    _ => None,
                }
            }
            Self::Len(len) => {
                let (actual, unit) = match value {
                    Value::Array(items) => (items.len(), "in length"),
                    Value::Object(map) => (map.len(), "in length"),
                    other => (text(other).chars().count(), "char"),
                };
                (actual != *len).then(|| format!("The {field} field must be exactly {len} {unit}"))
            }
            Self::In(allowed) => each_text(value)
                .any(|v| !allowed.contains(&v))
                .then(|| format!("The {field} field must be one of {}", allowed.join(","))),
            Self::NotIn(denied) => each_text(value)
                .any(|v| denied.contains(&v))
                .then(|| format!("The {field} field must not be any of {}", denied.join(","))),
            Self::Numeric => match value {
                Value::Number(_) => None,
                other => (!text(other).trim().parse::<f64>().is_ok_and(f64::is_finite))
                    .then(|| format!("The {field} field must be numeric")),
            },
            Self::Bool => match value {
                Value::Bool(_) => None,
                other => crate::duration::parse_bool(&text(other))
                    .is_none()
                    .then(|| format!("The {field} field must be a boolean")),
            },
            Self::Alpha => each_text(value)
                .any(|v| !v.chars().all(char::is_alphabetic))
                .then(|| format!("The {field} field may only contain letters")),
            Self::AlphaNum => each_text(value)
                .any(|v| !v.chars().all(char::is_alphanumeric))
                .then(|| format!("The {field} field may only contain letters and numbers")),
            Self::AlphaDash => each_text(value)
                .any(|v| !v.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_'))
                .then(|| {
                    format!("The {field} field may only contain letters, numbers, dashes and underscores")
                }),
            Self::Email => each_text(value)
                .any(|v| !is_email(&v))
                .then(|| format!("The {field} field must be a valid email address")),
            Self::Regex(re) => each_text(value)
                .any(|v| !re.is_match(&v))
                .then(|| format!("The {field} field format is invalid")),
        }
    }
}

/// Field identifier to its ordered rules. Immutable once built.
#[derive(Clone, Debug, Default)]
pub struct Rules {
    fields: Vec<(String, Vec<Rule>)>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds rules for `field`, parsing each expression.
    ///
    /// Rules for a field that was already added are appended.
    pub fn field<I, S>(mut self, field: impl Into<String>, exprs: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed = exprs
            .into_iter()
            .map(|expr| Rule::parse(expr.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let field = field.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, rules)) => rules.extend(parsed),
            None => self.fields.push((field, parsed)),
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Checks every field and collects all failures.
    ///
    /// A field without `required` whose value is empty is skipped entirely.
    /// A failed `required` skips the remaining rules of that field.
    pub(super) fn evaluate(
        &self,
        data: &View<'_>,
        tag: Tag,
        messages: &HashMap<(String, &'static str), String>,
    ) -> FieldErrors {
        let mut errors = FieldErrors::new();

        for (field, rules) in &self.fields {
            let value = data.field(tag, field).unwrap_or(&Value::Null);
            let required = rules.iter().any(|r| matches!(r, Rule::Required));

            if is_empty(value) {
                if required {
                    errors.add(field, message(messages, field, &Rule::Required, value));
                }
                continue;
            }

            for rule in rules {
                if let Some(default) = rule.check(field, value) {
                    let custom = messages.get(&(field.clone(), rule.name()));
                    errors.add(field, custom.cloned().unwrap_or(default));
                }
            }
        }

        errors
    }
}

fn message(
    messages: &HashMap<(String, &'static str), String>,
    field: &str,
    rule: &Rule,
    value: &Value,
) -> String {
    messages
        .get(&(field.to_owned(), rule.name()))
        .cloned()
        .or_else(|| rule.check(field, value))
        .unwrap_or_default()
}

enum Measure {
    Number(f64),
    Chars(usize),
    Items(usize),
}

fn measure(value: &Value) -> Option<Measure> {
    match value {
        Value::Number(n) => n.as_f64().map(Measure::Number),
        Value::String(s) => Some(Measure::Chars(s.chars().count())),
        Value::Array(items) => Some(Measure::Items(items.len())),
        Value::Object(map) => Some(Measure::Items(map.len())),
        Value::Bool(_) | Value::Null => None,
    }
}

/// Zero values count as empty: null, `""`, `0`, `false`, `[]`, `{}`.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Scalars yield themselves, arrays yield each element.
fn each_text(value: &Value) -> Box<dyn Iterator<Item = String> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter().map(text)),
        other => Box::new(std::iter::once(text(other))),
    }
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !s.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}
