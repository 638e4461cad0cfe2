//! Loosely-typed values crossing the network boundary.
//!
//! Exchange responses and stream frames arrive as arbitrary JSON. They are
//! decoded into [`Variant`], a closed set of shapes, so that adapters can
//! convert them into their own typed models. Bodies that are not JSON fall
//! back to [`Variant::String`] instead of failing.

use std::collections::HashMap;

use serde::Serialize;

/// A decoded payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Variant {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Variant>),
    Map(HashMap<String, Variant>),
}

impl Variant {
    /// Decode raw bytes, falling back to (lossy) text when they are not JSON.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(value) => value.into(),
            Err(_) => Self::String(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Variant]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&HashMap<String, Variant>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key when this value is a map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Variant> {
        self.as_map().and_then(|m| m.get(key))
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<serde_json::Value> for Variant {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            // Every JSON number has an f64 approximation; u64/i64 beyond 2^53 lose precision.
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<Variant> for serde_json::Value {
    fn from(value: Variant) -> Self {
        match value {
            Variant::Null => Self::Null,
            Variant::Bool(b) => Self::Bool(b),
            Variant::Number(n) => serde_json::Number::from_f64(n).map_or(Self::Null, Self::Number),
            Variant::String(s) => Self::String(s),
            Variant::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Variant::Map(map) => Self::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<&str> for Variant {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Variant {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Variant {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Variant {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Variant {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl<T: Into<Variant>> From<Vec<T>> for Variant {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_json_object() {
        let value = Variant::decode(br#"{"ping":true,"n":3,"tags":["a","b"],"none":null}"#);

        assert_eq!(value.get("ping"), Some(&Variant::Bool(true)));
        assert_eq!(value.get("n").and_then(Variant::as_f64), Some(3.0));
        assert_eq!(
            value.get("tags").and_then(Variant::as_list).map(<[_]>::len),
            Some(2)
        );
        assert!(value.get("none").is_some_and(Variant::is_null));
    }

    #[test]
    fn test_decode_falls_back_to_text() {
        let value = Variant::decode(b"pong");
        assert_eq!(value, Variant::String("pong".into()));
    }

    #[test]
    fn test_decode_empty_body_is_empty_string() {
        assert_eq!(Variant::decode(b""), Variant::String(String::new()));
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let value = Variant::decode(&[0x66, 0x6f, 0xff]);
        assert_eq!(value.as_str(), Some("fo\u{fffd}"));
    }

    #[test]
    fn test_json_conversion_preserves_structure() {
        let original = json!({"symbol": "BTC/USDT", "bids": [[1.5, 2.0]], "live": false});
        let variant = Variant::from(original.clone());
        let back: serde_json::Value = variant.into();
        assert_eq!(back, original);
    }

    #[test]
    fn test_serializes_untagged() {
        let value = Variant::from(vec![Variant::from("a"), Variant::Null, Variant::from(1.5)]);
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"["a",null,1.5]"#);
    }
}
