use std::borrow::Cow;

use scraper::{Html, Selector};
use serde_json::Value;

/// Where a page keeps its global data blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobLocator {
    /// `<script id="..." type="application/json">{...}</script>`
    ScriptId(&'static str),
    /// `window.Name = {...};`
    WindowAssign(&'static str),
}

impl BlobLocator {
    /// Raw JSON text of the blob, if the page has one.
    pub fn locate_raw<'h>(&self, html: &'h str) -> Option<Cow<'h, str>> {
        match self {
            BlobLocator::ScriptId(id) => script_by_id(html, id).map(Cow::Owned),
            BlobLocator::WindowAssign(name) => window_assignment(html, name).map(Cow::Borrowed),
        }
    }

    pub fn locate(&self, html: &str) -> Option<Value> {
        serde_json::from_str(&self.locate_raw(html)?).ok()
    }
}

/// Tries each locator in order and returns the first blob that parses.
pub fn locate_first(html: &str, locators: &[BlobLocator]) -> Option<(BlobLocator, Value)> {
    locators
        .iter()
        .find_map(|locator| locator.locate(html).map(|value| (*locator, value)))
}

fn script_by_id(html: &str, id: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"script[id="{}"]"#, id)).ok()?;
    let document = Html::parse_document(html);
    let script = document.select(&selector).next()?;
    let text: String = script.text().collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn window_assignment<'h>(html: &'h str, name: &str) -> Option<&'h str> {
    let mut from = 0;
    while let Some(offset) = html[from..].find(name) {
        let after = from + offset + name.len();
        let rest = html[after..].trim_start();
        if let Some(value) = rest.strip_prefix('=') {
            let value = value.trim_start();
            let start = html.len() - value.len();
            if let Some(end) = balanced_end(&html[start..]) {
                return Some(&html[start..start + end]);
            }
        }
        from = after;
    }
    None
}

/// Length of the bracketed JSON value at the start of `text`, honouring
/// string literals and escapes.
pub fn balanced_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let (open, close) = match bytes.first()? {
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &byte) in bytes.iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
