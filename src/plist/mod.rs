//! Typed property-list tree.
//!
//! Dictionaries are `BTreeMap`s so iteration, and therefore serialization,
//! is always in key order. Paths use dotted keys with `[i]` array indices:
//! `ACPI.Add[0].Path`.

pub mod xml;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub use xml::to_xml;

pub type Dict = BTreeMap<String, Value>;

/// A property-list value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    String(String),
    Data(DataBlob),
    Array(Vec<Value>),
    Dict(Dict),
}

/// Raw bytes. In JSON templates this is `{"#data": "<hex>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataBlob {
    #[serde(rename = "#data", serialize_with = "hex_out", deserialize_with = "hex_in")]
    pub bytes: Vec<u8>,
}

fn hex_out<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&to_hex(bytes))
}

fn hex_in<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(d)?;
    from_hex(&text).ok_or_else(|| serde::de::Error::custom(format!("invalid hex data: {}", text)))
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if clean.len() % 2 != 0 {
        return None;
    }
    (0..clean.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&clean[i..i + 2], 16).ok())
        .collect()
}

/// Path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    for part in path.split('.').filter(|p| !p.is_empty()) {
        let (key, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_string()));
        }
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            segments.push(Segment::Index(stripped[..close].parse().ok()?));
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
    }
    Some(segments)
}

impl Value {
    pub fn dict() -> Value {
        Value::Dict(Dict::new())
    }

    pub fn data(bytes: impl Into<Vec<u8>>) -> Value {
        Value::Data(DataBlob { bytes: bytes.into() })
    }

    pub fn string(text: impl Into<String>) -> Value {
        Value::String(text.into())
    }

    /// Build a dictionary from key/value pairs.
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Dict(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Value::Data(d) => Some(&d.bytes),
            _ => None,
        }
    }

    /// Look up a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in parse_path(path)? {
            current = match (segment, current) {
                (Segment::Key(k), Value::Dict(d)) => d.get(&k)?,
                (Segment::Index(i), Value::Array(a)) => a.get(i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut current = self;
        for segment in parse_path(path)? {
            current = match (segment, current) {
                (Segment::Key(k), Value::Dict(d)) => d.get_mut(&k)?,
                (Segment::Index(i), Value::Array(a)) => a.get_mut(i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set a value at a dotted path, creating missing dictionaries.
    ///
    /// Array indices must already exist. Returns `false` when the path
    /// crosses a non-container.
    pub fn set(&mut self, path: &str, value: Value) -> bool {
        let segments = match parse_path(path) {
            Some(s) if !s.is_empty() => s,
            _ => return false,
        };
        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return false,
        };
        let mut current = self;
        for segment in parents {
            current = match (segment, current) {
                (Segment::Key(k), Value::Dict(d)) => d.entry(k.clone()).or_insert_with(Value::dict),
                (Segment::Index(i), Value::Array(a)) => match a.get_mut(*i) {
                    Some(v) => v,
                    None => return false,
                },
                _ => return false,
            };
        }
        match (last, current) {
            (Segment::Key(k), Value::Dict(d)) => {
                d.insert(k.clone(), value);
                true
            }
            (Segment::Index(i), Value::Array(a)) if *i < a.len() => {
                a[*i] = value;
                true
            }
            _ => false,
        }
    }

    /// Append to the array at `path`, creating it when missing.
    pub fn push(&mut self, path: &str, value: Value) -> bool {
        if self.get(path).is_none() && !self.set(path, Value::Array(Vec::new())) {
            return false;
        }
        match self.get_mut(path).and_then(Value::as_array_mut) {
            Some(array) => {
                array.push(value);
                true
            }
            None => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::String(s) => write!(f, "{}", s),
            Value::Data(d) => write!(f, "<{}>", to_hex(&d.bytes)),
            Value::Array(a) => write!(f, "[{} item(s)]", a.len()),
            Value::Dict(d) => write!(f, "{{{} key(s)}}", d.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_get_and_set() {
        let mut root = Value::dict();
        assert!(root.set("Misc.Boot.Timeout", Value::Integer(5)));
        assert!(root.push("ACPI.Add", Value::from_pairs([("Path", Value::from("SSDT-EC.aml"))])));
        assert_eq!(root.get("Misc.Boot.Timeout"), Some(&Value::Integer(5)));
        assert_eq!(root.get("ACPI.Add[0].Path").and_then(Value::as_str), Some("SSDT-EC.aml"));
        assert!(root.set("ACPI.Add[0].Enabled", Value::Bool(true)));
        assert!(!root.set("ACPI.Add[3].Enabled", Value::Bool(true)));
        assert!(!root.set("Misc.Boot.Timeout.Nested", Value::Bool(true)));
        assert!(root.get("ACPI.Add[x]").is_none());
    }

    #[test]
    fn test_json_round_trip_keeps_data() {
        let value = Value::from_pairs([
            ("Blob", Value::data(vec![0x07, 0x00, 0x9B, 0x3E])),
            ("Flag", Value::Bool(false)),
            ("Count", Value::Integer(3)),
            ("List", Value::Array(vec![Value::from("a")])),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("\"#data\":\"07009B3E\""));
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(from_hex("0A ff"), Some(vec![0x0A, 0xFF]));
        assert_eq!(from_hex("abc"), None);
        assert_eq!(to_hex(&[0xDE, 0xAD]), "DEAD");
    }
}
