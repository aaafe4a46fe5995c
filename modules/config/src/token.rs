//! Navigable views over a parsed configuration document

use std::sync::Arc;

use serde_json::Value;

/// One node of a parsed document.
///
/// Accessors are total: asking a token for a type it does not hold yields
/// that type's default, which lets callers probe a parameter under every
/// scalar accessor without caring which one the author used.
#[derive(Clone, Debug)]
pub struct Token {
    value: Arc<Value>,
}

impl Token {
    pub fn new(value: Value) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    /// A token over nothing; every lookup misses and every accessor yields
    /// its default.
    pub fn null() -> Self {
        Self::new(Value::Null)
    }

    /// Look up a child by key.
    pub fn get(&self, key: &str) -> Option<Token> {
        self.value.get(key).cloned().map(Token::new)
    }

    pub fn has(&self, key: &str) -> bool {
        self.value.get(key).is_some()
    }

    /// The keyed children of an object token, in document order.
    pub fn entries(&self) -> Vec<(String, Token)> {
        match self.value.as_ref() {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), Token::new(v.clone())))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_array(&self) -> bool {
        self.value.is_array()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// The element count of an array token, otherwise 0.
    pub fn size(&self) -> usize {
        self.value.as_array().map(Vec::len).unwrap_or(0)
    }

    /// The string form of this token: strings verbatim, scalars printed.
    pub fn string(&self) -> String {
        scalar_string(&self.value)
    }

    /// The unsigned integer form of this token, or 0.
    pub fn number(&self) -> u32 {
        scalar_number(&self.value)
    }

    /// The floating-point form of this token, or 0.0.
    pub fn decimal(&self) -> f64 {
        scalar_decimal(&self.value)
    }

    /// The boolean form of this token, or false.
    pub fn boolean(&self) -> bool {
        scalar_boolean(&self.value)
    }

    pub fn string_at(&self, index: usize) -> String {
        self.element(index).map(|t| t.string()).unwrap_or_default()
    }

    pub fn number_at(&self, index: usize) -> u32 {
        self.element(index).map(|t| t.number()).unwrap_or_default()
    }

    pub fn decimal_at(&self, index: usize) -> f64 {
        self.element(index).map(|t| t.decimal()).unwrap_or_default()
    }

    pub fn boolean_at(&self, index: usize) -> bool {
        self.element(index).map(|t| t.boolean()).unwrap_or_default()
    }

    /// An array element as a token. An element that is a one-member object
    /// collapses to that member's value, so arrays of `{"x": 0.2}`-shaped
    /// entries read as arrays of scalars.
    pub fn element(&self, index: usize) -> Option<Token> {
        let element = self.value.as_array()?.get(index)?;
        Some(Token::new(collapse_singleton(element).clone()))
    }
}

fn collapse_singleton(value: &Value) -> &Value {
    match value {
        Value::Object(map) if map.len() == 1 => {
            collapse_singleton(map.values().next().expect("len checked"))
        }
        other => other,
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn scalar_number(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f as u64))
            .unwrap_or(0) as u32,
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn scalar_decimal(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn scalar_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}
