use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::Value;

static LD_JSON_SCRIPT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// Every schema.org node on the page, with arrays and `@graph` flattened.
pub fn nodes(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let mut out = Vec::new();
    for script in document.select(&LD_JSON_SCRIPT) {
        // Script bodies are raw text; some sites still entity-encode them.
        let raw = script.text().collect::<String>().replace("&amp;", "&");
        if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
            flatten(value, &mut out);
        }
    }
    out
}

fn flatten(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|item| flatten(item, out)),
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten(graph, out);
            }
            if !map.is_empty() {
                out.push(Value::Object(map));
            }
        }
        _ => {}
    }
}

fn has_type(node: &Value, wanted: &str) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t == wanted,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}

/// First node whose `@type` is one of `types`, in the order given.
pub fn find_by_type(html: &str, types: &[&str]) -> Option<Value> {
    let nodes = nodes(html);
    types
        .iter()
        .find_map(|wanted| nodes.iter().find(|node| has_type(node, wanted)).cloned())
}
