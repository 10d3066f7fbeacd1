//! Normalization of datastore payloads into the shape stored in ConfigMaps.

use cmaas_controller_core::{RootKind, YangModel};
use serde_json::{Map, Value};

/// Converts a payload read from the schema gateway into the configuration
/// stored in a ConfigMap.
///
/// List-rooted models are returned wrapped in a `collection` envelope, which
/// is removed. Module qualifiers (`<module>:`) of every model in `models` are
/// stripped from member names and string values. An absent payload is an
/// empty object.
pub fn transform(payload: Option<Value>, kind: RootKind, models: &[YangModel]) -> Value {
    let Some(mut payload) = payload else {
        return Value::Object(Map::new());
    };
    if kind == RootKind::List {
        payload = match payload {
            Value::Object(mut obj) => obj.remove("collection").unwrap_or(Value::Object(obj)),
            other => other,
        };
    }
    let qualifiers = models
        .iter()
        .map(|m| format!("{}:", m.module))
        .collect::<Vec<_>>();
    strip(payload, &qualifiers)
}

/// Converts an XML document read from the schema gateway into the document
/// stored beside the JSON configuration.
///
/// The `collection` element wrapping list-rooted models is dropped along with
/// the `:<nfId>` suffix of every namespace. An absent document is empty.
pub fn transform_xml(document: Option<String>, kind: RootKind, nf_id: &str) -> String {
    let Some(document) = document else {
        return String::new();
    };
    let document = document.replace(&format!(":{nf_id}"), "");
    if kind == RootKind::Container {
        return document;
    }
    let mut out = String::with_capacity(document.len());
    for line in document.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("<collection") || trimmed == "</collection>" {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn strip(value: Value, qualifiers: &[String]) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .map(|(k, v)| (unqualify(&k, qualifiers), strip(v, qualifiers)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| strip(v, qualifiers)).collect()),
        Value::String(s) => Value::String(unqualify(&s, qualifiers)),
        other => other,
    }
}

fn unqualify(s: &str, qualifiers: &[String]) -> String {
    let mut out = s.to_string();
    for q in qualifiers {
        if out.contains(q.as_str()) {
            out = out.replace(q.as_str(), "");
        }
    }
    out
}
