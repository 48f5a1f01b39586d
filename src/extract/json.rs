//! Typed access into loosely-shaped JSON.
//!
//! Every accessor answers `None` (or a [`PathMiss`]) when the key is absent,
//! null, or of the wrong shape, so callers can chain fallbacks explicitly.

use std::borrow::Cow;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no value at `{path}` (stopped at `{segment}`)")]
pub struct PathMiss {
    pub path: String,
    pub segment: String,
}

pub trait JsonExt {
    /// Non-empty string at `key`.
    fn str_at(&self, key: &str) -> Option<&str>;
    fn obj_at(&self, key: &str) -> Option<&Map<String, Value>>;
    fn arr_at(&self, key: &str) -> Option<&Vec<Value>>;
    /// Number at `key`, accepting numeric strings such as `"-35.28"`.
    fn f64_at(&self, key: &str) -> Option<f64>;
    fn u32_at(&self, key: &str) -> Option<u32>;
    /// Identifier that may be encoded as a number or a string.
    fn id_at(&self, key: &str) -> Option<String>;
    /// First key in `keys` that yields a string.
    fn first_str(&self, keys: &[&str]) -> Option<&str>;
}

impl JsonExt for Value {
    fn str_at(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn obj_at(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }

    fn arr_at(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key).and_then(Value::as_array)
    }

    fn f64_at(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(as_f64)
    }

    fn u32_at(&self, key: &str) -> Option<u32> {
        let value = self.f64_at(key)?;
        (value >= 0.0 && value <= u32::MAX as f64).then(|| value.round() as u32)
    }

    fn id_at(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.str_at(key))
    }
}

/// Reads a JSON number or a numeric string as `f64`.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Parses a string that itself holds JSON (an object or array), which several
/// sites use to nest payloads inside their page state.
pub fn decode_embedded<'a>(value: Cow<'a, Value>) -> Cow<'a, Value> {
    if let Value::String(s) = value.as_ref() {
        let trimmed = s.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                return Cow::Owned(parsed);
            }
        }
    }
    value
}

fn child<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    let found = match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }?;
    (!found.is_null()).then_some(found)
}

/// Follows a dotted path (`props.pageProps.componentProps`), decoding
/// JSON-in-string values on the way.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Result<Cow<'a, Value>, PathMiss> {
    let mut current = Cow::Borrowed(root);
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let miss = || PathMiss {
            path: path.to_string(),
            segment: segment.to_string(),
        };
        current = match decode_embedded(current) {
            Cow::Borrowed(value) => Cow::Borrowed(child(value, segment).ok_or_else(miss)?),
            Cow::Owned(value) => Cow::Owned(child(&value, segment).cloned().ok_or_else(miss)?),
        };
    }
    Ok(decode_embedded(current))
}

/// The first of `paths` that resolves to a non-empty array or object.
pub fn resolve_first<'a>(root: &'a Value, paths: &[&str]) -> Option<Cow<'a, Value>> {
    paths.iter().find_map(|path| {
        resolve(root, path).ok().filter(|value| match value.as_ref() {
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            _ => false,
        })
    })
}

/// Items of an array, or the values of a map keyed by id.
pub fn collection_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_report_missing_and_mistyped() {
        let value = json!({
            "id": 12345,
            "slug": "abc",
            "blank": "  ",
            "lat": "-35.28",
            "beds": 3,
            "nested": {"a": 1},
            "list": [1, 2]
        });

        assert_eq!(value.id_at("id").as_deref(), Some("12345"));
        assert_eq!(value.id_at("slug").as_deref(), Some("abc"));
        assert_eq!(value.str_at("blank"), None);
        assert_eq!(value.str_at("id"), None);
        assert_eq!(value.f64_at("lat"), Some(-35.28));
        assert_eq!(value.u32_at("beds"), Some(3));
        assert!(value.obj_at("nested").is_some());
        assert!(value.obj_at("list").is_none());
        assert_eq!(value.arr_at("list").map(Vec::len), Some(2));
        assert_eq!(value.first_str(&["missing", "slug"]), Some("abc"));
    }

    #[test]
    fn resolve_walks_objects_arrays_and_embedded_strings() {
        let inner = json!({"results": {"items": [{"id": "a"}, {"id": "b"}]}}).to_string();
        let root = json!({"outer": {"payload": inner}});

        let items = resolve(&root, "outer.payload.results.items").unwrap();
        assert_eq!(items.as_array().map(Vec::len), Some(2));

        let second = resolve(&root, "outer.payload.results.items.1.id").unwrap();
        assert_eq!(second.as_str(), Some("b"));
    }

    #[test]
    fn resolve_names_the_missing_segment() {
        let root = json!({"props": {"pageProps": null}});
        let miss = resolve(&root, "props.pageProps.componentProps").unwrap_err();
        assert_eq!(miss.segment, "pageProps");
    }

    #[test]
    fn resolve_first_skips_empty_collections() {
        let root = json!({"listings": [], "results": {"x": {"id": 1}}});
        let found = resolve_first(&root, &["listings", "results"]).unwrap();
        assert_eq!(collection_items(&found).len(), 1);
    }
}
