//! Run parameters
//!
//! An immutable, ordered mapping from parameter name to a tagged value.

use regex::{Captures, Regex};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::warn;

/// Matches `$$name$$` wildcard tokens, capturing `name`.
static WILDCARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\$(.*?)\$\$").expect("constant regex pattern is valid"));

/// A single parameter value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamValue {
    Int(i64),
    /// Exact decimal, so generated steps such as 0.1 compare exactly
    Float(Decimal),
    Bool(bool),
    Str(String),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// Renders the value as JSON
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Int(i) => serde_json::Value::from(*i),
            ParamValue::Float(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(d.to_string())),
            ParamValue::Bool(b) => serde_json::Value::Bool(*b),
            ParamValue::Str(s) => serde_json::Value::String(s.clone()),
            ParamValue::List(items) => {
                serde_json::Value::Array(items.iter().map(ParamValue::to_json).collect())
            }
            ParamValue::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Reads a value back from JSON
    ///
    /// Integral numbers become `Int`, other numbers `Float`. Returns `None`
    /// for `null` and for numbers that do not fit a decimal.
    pub fn from_json(value: &serde_json::Value) -> Option<ParamValue> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(ParamValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ParamValue::Int(i)),
                None => {
                    let text = n.to_string();
                    Decimal::from_str(&text)
                        .or_else(|_| Decimal::from_scientific(&text))
                        .ok()
                        .map(ParamValue::Float)
                }
            },
            serde_json::Value::String(s) => Some(ParamValue::Str(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(ParamValue::from_json)
                .collect::<Option<Vec<_>>>()
                .map(ParamValue::List),
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| ParamValue::from_json(v).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(ParamValue::Map),
        }
    }

    fn replace_wildcards(&self, wildcards: &HashMap<String, String>) -> ParamValue {
        match self {
            ParamValue::Str(s) => ParamValue::Str(replace_in_str(s, wildcards)),
            ParamValue::List(items) => ParamValue::List(
                items
                    .iter()
                    .map(|item| item.replace_wildcards(wildcards))
                    .collect(),
            ),
            ParamValue::Map(map) => ParamValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.replace_wildcards(wildcards)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Replaces every known `$$name$$` token in one pass.
///
/// Replacement text is inserted literally and never rescanned, so values
/// containing `$` or `\` are not mistaken for tokens or back-references.
fn replace_in_str(value: &str, wildcards: &HashMap<String, String>) -> String {
    WILDCARD
        .replace_all(value, |caps: &Captures<'_>| match wildcards.get(&caps[1]) {
            Some(replacement) => replacement.clone(),
            None => {
                warn!(wildcard = &caps[1], "Found unmatched wildcard in parameters");
                caps[0].to_string()
            }
        })
        .into_owned()
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(d) => write!(f, "{}", d),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Str(s) => write!(f, "{}", s),
            ParamValue::List(_) | ParamValue::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<Decimal> for ParamValue {
    fn from(value: Decimal) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<Vec<ParamValue>> for ParamValue {
    fn from(value: Vec<ParamValue>) -> Self {
        ParamValue::List(value)
    }
}

/// Parameter set for a run
///
/// Keys are unique. Every operation returns a new set; inputs are never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Parameters {
    values: BTreeMap<String, ParamValue>,
}

impl Parameters {
    /// Creates an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    /// Returns a copy with one extra (or replaced) entry
    pub fn with(&self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let mut values = self.values.clone();
        values.insert(key.into(), value.into());
        Self { values }
    }

    /// Union of both key sets; on collision the override's value wins
    pub fn merge(&self, overrides: &Parameters) -> Parameters {
        let mut values = self.values.clone();
        values.extend(
            overrides
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Parameters { values }
    }

    /// Rewrites `$$name$$` tokens in string values (including inside lists
    /// and maps) using the substitution map.
    ///
    /// Unmatched tokens are left verbatim and logged.
    pub fn replace_wildcards(&self, wildcards: &HashMap<String, String>) -> Parameters {
        Parameters {
            values: self
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.replace_wildcards(wildcards)))
                .collect(),
        }
    }

    /// Renders the parameters as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl<K, V> FromIterator<(K, V)> for Parameters
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Parameters {
    type Item = (String, ParamValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, ParamValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl Serialize for Parameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.values.iter())
    }
}
