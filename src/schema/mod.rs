use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FieldError;

/// Declared type of a resource field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    /// Calendar date, YYYY-MM-DD
    Date,
    /// RFC 3339 timestamp
    Timestamp,
    Array,
    Object,
}

impl FieldType {
    /// Parse a raw query-parameter string into a value of this type.
    /// None means the text cannot represent the type.
    pub fn parse_query_param(&self, raw: &str) -> Option<Value> {
        match self {
            FieldType::Integer => raw.parse::<i64>().ok().map(Value::from),
            FieldType::Number => raw.parse::<f64>().ok().map(Value::from),
            FieldType::Boolean => raw.parse::<bool>().ok().map(Value::from),
            FieldType::String | FieldType::Date | FieldType::Timestamp => {
                Some(Value::String(raw.to_string()))
            }
            // Structured types are not addressable from the query string
            FieldType::Array | FieldType::Object => None,
        }
    }
}

/// Validation rule for one field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub enum_values: Option<Vec<String>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    /// Item rule for array fields
    pub items: Option<Box<FieldRule>>,
}

impl FieldRule {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            min_length: None,
            max_length: None,
            enum_values: None,
            minimum: None,
            maximum: None,
            items: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn date() -> Self {
        Self::new(FieldType::Date)
    }

    pub fn timestamp() -> Self {
        Self::new(FieldType::Timestamp)
    }

    pub fn array_of(items: FieldRule) -> Self {
        let mut rule = Self::new(FieldType::Array);
        rule.items = Some(Box::new(items));
        rule
    }

    pub fn object() -> Self {
        Self::new(FieldType::Object)
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn minimum(mut self, n: f64) -> Self {
        self.minimum = Some(n);
        self
    }

    pub fn maximum(mut self, n: f64) -> Self {
        self.maximum = Some(n);
        self
    }
}

/// Validation mode: create runs the full rule set, update treats every field
/// as optional while still applying the full rule to anything present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Full,
    Partial,
}

/// Declarative schema for one resource. Pure and synchronous: no I/O.
/// validate() returns either the normalized record or the complete list of
/// field errors - it never stops at the first failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSchema {
    fields: Vec<(String, FieldRule)>,
    required: Vec<String>,
}

impl ValidationSchema {
    pub fn new() -> Self {
        Self {
            fields: vec![],
            required: vec![],
        }
    }

    pub fn field(mut self, name: &str, rule: FieldRule) -> Self {
        self.fields.push((name.to_string(), rule));
        self
    }

    pub fn require(mut self, names: &[&str]) -> Self {
        self.required = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, rule)| rule.field_type)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Validate and normalize a candidate record. Unknown fields are dropped;
    /// date and timestamp strings are re-emitted in canonical form. The
    /// returned map is the only thing that may ever be persisted.
    pub fn validate(
        &self,
        candidate: &Map<String, Value>,
        mode: Mode,
    ) -> Result<Map<String, Value>, Vec<FieldError>> {
        let mut normalized = Map::new();
        let mut errors = vec![];

        for (name, rule) in &self.fields {
            match candidate.get(name) {
                Some(Value::Null) | None => {
                    if mode == Mode::Full && self.required.iter().any(|r| r == name) {
                        errors.push(FieldError::field(name, "This field is required"));
                    }
                }
                Some(value) => match check_value(rule, value, &[name.clone()]) {
                    Ok(value) => {
                        normalized.insert(name.clone(), value);
                    }
                    Err(mut errs) => errors.append(&mut errs),
                },
            }
        }

        if errors.is_empty() {
            Ok(normalized)
        } else {
            Err(errors)
        }
    }
}

impl Default for ValidationSchema {
    fn default() -> Self {
        Self::new()
    }
}

fn check_value(rule: &FieldRule, value: &Value, path: &[String]) -> Result<Value, Vec<FieldError>> {
    let err = |message: &str| vec![FieldError::new(path.to_vec(), message.to_string())];

    match rule.field_type {
        FieldType::String => {
            let Some(s) = value.as_str() else {
                return Err(err("must be a string"));
            };
            if let Some(min) = rule.min_length {
                if s.chars().count() < min {
                    return Err(err(&format!("must be at least {} characters", min)));
                }
            }
            if let Some(max) = rule.max_length {
                if s.chars().count() > max {
                    return Err(err(&format!("must be at most {} characters", max)));
                }
            }
            if let Some(allowed) = &rule.enum_values {
                if !allowed.iter().any(|v| v == s) {
                    return Err(err(&format!("must be one of: {}", allowed.join(", "))));
                }
            }
            Ok(value.clone())
        }
        FieldType::Integer => {
            // Integral floats are accepted and normalized to integers
            let n = match value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Some(i)
                    } else {
                        n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)
                    }
                }
                _ => None,
            };
            let Some(i) = n else {
                return Err(err("must be an integer"));
            };
            check_bounds(rule, i as f64, path)?;
            Ok(Value::from(i))
        }
        FieldType::Number => {
            let Some(f) = value.as_f64() else {
                return Err(err("must be a number"));
            };
            check_bounds(rule, f, path)?;
            Ok(value.clone())
        }
        FieldType::Boolean => {
            if value.is_boolean() {
                Ok(value.clone())
            } else {
                Err(err("must be a boolean"))
            }
        }
        FieldType::Date => {
            let parsed = value
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
            match parsed {
                Some(date) => Ok(Value::String(date.format("%Y-%m-%d").to_string())),
                None => Err(err("must be a date in YYYY-MM-DD format")),
            }
        }
        FieldType::Timestamp => {
            let parsed = value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
            match parsed {
                Some(ts) => Ok(Value::String(ts.with_timezone(&Utc).to_rfc3339())),
                None => Err(err("must be an RFC 3339 timestamp")),
            }
        }
        FieldType::Array => {
            let Some(items) = value.as_array() else {
                return Err(err("must be an array"));
            };
            let Some(item_rule) = &rule.items else {
                return Ok(value.clone());
            };
            let mut out = vec![];
            let mut errors = vec![];
            for (index, item) in items.iter().enumerate() {
                let mut item_path = path.to_vec();
                item_path.push(index.to_string());
                match check_value(item_rule, item, &item_path) {
                    Ok(v) => out.push(v),
                    Err(mut errs) => errors.append(&mut errs),
                }
            }
            if errors.is_empty() {
                Ok(Value::Array(out))
            } else {
                Err(errors)
            }
        }
        FieldType::Object => {
            if value.is_object() {
                Ok(value.clone())
            } else {
                Err(err("must be an object"))
            }
        }
    }
}

fn check_bounds(rule: &FieldRule, n: f64, path: &[String]) -> Result<(), Vec<FieldError>> {
    if let Some(min) = rule.minimum {
        if n < min {
            return Err(vec![FieldError::new(
                path.to_vec(),
                format!("must be at least {}", min),
            )]);
        }
    }
    if let Some(max) = rule.maximum {
        if n > max {
            return Err(vec![FieldError::new(
                path.to_vec(),
                format!("must be at most {}", max),
            )]);
        }
    }
    Ok(())
}
