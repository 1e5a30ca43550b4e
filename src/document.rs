//! Document helpers
//!
//! Documents are JSON objects. MongoDB scalar types that JSON cannot express
//! natively use Extended JSON wrappers (`{"$date": millis}`, `{"$oid": hex}`),
//! and those wrappers are treated as single scalar values throughout.

use serde_json::{Map, Value};

/// A structured document (JSON object, insertion ordered)
pub type Document = Map<String, Value>;

/// Replacement for `.` in escaped keys
pub const ESCAPED_DOT: &str = "::";

const EXTENDED_JSON_SCALARS: [&str; 4] = ["$date", "$oid", "$numberLong", "$numberDecimal"];

/// Returns true if the document is an Extended JSON scalar wrapper such as `{"$date": 0}`.
pub fn is_extended_scalar(doc: &Document) -> bool {
    doc.len() == 1
        && doc
            .keys()
            .next()
            .map_or(false, |k| EXTENDED_JSON_SCALARS.contains(&k.as_str()))
}

/// Builds a datetime value from epoch milliseconds.
pub fn date_value(millis: i64) -> Value {
    let mut doc = Document::new();
    doc.insert("$date".to_string(), Value::from(millis));
    Value::Object(doc)
}

/// Current time as epoch milliseconds, truncated to whole seconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp() * 1000
}

/// Returns true for values that can be rendered as a single literal:
/// null, booleans, numbers, strings and Extended JSON scalars.
pub fn is_primitive(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
        Value::Object(doc) => is_extended_scalar(doc),
        Value::Array(_) => false,
    }
}

/// Textual rendering of a primitive value, `None` for documents and arrays.
pub fn primitive_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Object(doc) if is_extended_scalar(doc) => doc.values().next().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        _ => None,
    }
}

/// Escapes every key of a document so that it holds neither a leading `$`
/// nor a `.`. Values are left untouched.
///
/// A key made of underscores followed by `$` gains one more underscore
/// (`$gt` becomes `_$gt`, `_$x` becomes `__$x`). Each `.` becomes `::` and
/// each literal `:` becomes `:_`, so [`unescape_keys`] restores any key.
pub fn escape_keys(value: &Value) -> Value {
    match value {
        Value::Object(doc) => {
            let mut ret = Document::new();
            for (k, v) in doc {
                ret.insert(escape_key(k), escape_keys(v));
            }
            Value::Object(ret)
        }
        Value::Array(items) => Value::Array(items.iter().map(escape_keys).collect()),
        other => other.clone(),
    }
}

/// Reverses [`escape_keys`].
pub fn unescape_keys(value: &Value) -> Value {
    match value {
        Value::Object(doc) => {
            let mut ret = Document::new();
            for (k, v) in doc {
                ret.insert(unescape_key(k), unescape_keys(v));
            }
            Value::Object(ret)
        }
        Value::Array(items) => Value::Array(items.iter().map(unescape_keys).collect()),
        other => other.clone(),
    }
}

fn has_dollar_prefix(key: &str) -> bool {
    key.trim_start_matches('_').starts_with('$')
}

fn escape_key(key: &str) -> String {
    let mut ret = String::with_capacity(key.len() + 1);
    if has_dollar_prefix(key) {
        ret.push('_');
    }
    for c in key.chars() {
        match c {
            '.' => ret.push_str(ESCAPED_DOT),
            ':' => ret.push_str(":_"),
            c => ret.push(c),
        }
    }
    ret
}

fn unescape_key(key: &str) -> String {
    let key = if key.starts_with('_') && has_dollar_prefix(key) { &key[1..] } else { key };
    let mut ret = String::with_capacity(key.len());
    let mut chars = key.chars();
    while let Some(c) = chars.next() {
        if c != ':' {
            ret.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => ret.push('.'),
            Some('_') => ret.push(':'),
            // not produced by escape_key; kept as is
            Some(other) => {
                ret.push(':');
                ret.push(other);
            }
            None => ret.push(':'),
        }
    }
    ret
}

/// Flattens a document into dotted paths. Nested documents are traversed,
/// arrays and scalars (including Extended JSON scalars) are leaves.
pub fn flatten(doc: &Document) -> Vec<(String, Value)> {
    let mut ret = Vec::new();
    for (k, v) in doc {
        flatten_into(k, v, &mut ret);
    }
    ret
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(doc) if !is_extended_scalar(doc) && !doc.is_empty() => {
            for (k, v) in doc {
                flatten_into(&format!("{prefix}.{k}"), v, out);
            }
        }
        other => out.push((prefix.to_string(), other.clone())),
    }
}

/// Looks up a dotted path. Segments traverse objects by key and arrays by
/// numeric index. An empty path returns the value itself.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(doc) => doc.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

/// Returns true if the path exists in the value. Arrays without a numeric
/// segment match when any of their elements contains the remaining path.
pub fn contains_path(value: &Value, path: &str) -> bool {
    let (head, rest) = match path.split_once('.') {
        Some((h, r)) => (h, Some(r)),
        None => (path, None),
    };

    match value {
        Value::Object(doc) => {
            if doc.contains_key(path) {
                return true;
            }
            match (doc.get(head), rest) {
                (Some(_), None) => true,
                (Some(child), Some(rest)) => contains_path(child, rest),
                (None, _) => false,
            }
        }
        Value::Array(items) => match head.parse::<usize>() {
            Ok(idx) => match (items.get(idx), rest) {
                (Some(_), None) => true,
                (Some(child), Some(rest)) => contains_path(child, rest),
                (None, _) => false,
            },
            Err(_) => items.iter().any(|item| contains_path(item, path)),
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_then_unescape_is_lossless() {
        let filter = json!({"a.b": 1, "$gt": 2, "nested": {"$in": [{"x.y": 1}]}});
        let escaped = escape_keys(&filter);
        assert_eq!(
            escaped,
            json!({"a::b": 1, "_$gt": 2, "nested": {"_$in": [{"x::y": 1}]}})
        );
        assert_eq!(unescape_keys(&escaped), filter);
    }

    #[test]
    fn test_escape_is_reversible_for_keys_that_look_escaped() {
        let filter = json!({"a::b": 1, "_$x": 2, "__$y": 3, "c:d.e": 4, "x:": 5});
        let escaped = escape_keys(&filter);
        assert_eq!(
            escaped,
            json!({"a:_:_b": 1, "__$x": 2, "___$y": 3, "c:_d::e": 4, "x:_": 5})
        );
        assert_eq!(unescape_keys(&escaped), filter);
    }

    #[test]
    fn test_escape_leaves_values_alone() {
        let doc = json!({"owner": "$user.name"});
        assert_eq!(escape_keys(&doc), doc);
    }

    #[test]
    fn test_flatten() {
        let doc = json!({"a": {"b": 1, "c": {"d": "x"}}, "arr": [1, 2], "ts": {"$date": 1000}});
        let flat = flatten(doc.as_object().unwrap());
        assert_eq!(
            flat,
            vec![
                ("a.b".to_string(), json!(1)),
                ("a.c.d".to_string(), json!("x")),
                ("arr".to_string(), json!([1, 2])),
                ("ts".to_string(), json!({"$date": 1000})),
            ]
        );
    }

    #[test]
    fn test_lookup() {
        let doc = json!({"a": {"b": [10, {"c": "deep"}]}});
        assert_eq!(lookup(&doc, "a.b.0"), Some(&json!(10)));
        assert_eq!(lookup(&doc, "a.b.1.c"), Some(&json!("deep")));
        assert_eq!(lookup(&doc, "a.b.x"), None);
        assert_eq!(lookup(&doc, "missing"), None);
        assert_eq!(lookup(&doc, ""), Some(&doc));
    }

    #[test]
    fn test_contains_path() {
        let body = json!({"foo": {"bar": 1}, "array": [{"b": 1}, 2]});
        assert!(contains_path(&body, "foo.bar"));
        assert!(contains_path(&body, "array.b"));
        assert!(!contains_path(&body, "array.a"));
        assert!(!contains_path(&body, "bar"));
        assert!(contains_path(&json!({"a.b": 1}), "a.b"));
    }

    #[test]
    fn test_primitive_text() {
        assert_eq!(primitive_text(&json!("IT")), Some("IT".to_string()));
        assert_eq!(primitive_text(&json!(3)), Some("3".to_string()));
        assert_eq!(primitive_text(&json!(null)), Some("null".to_string()));
        assert_eq!(primitive_text(&json!({"$date": 1000})), Some("1000".to_string()));
        assert_eq!(primitive_text(&json!({"$oid": "abc"})), Some("abc".to_string()));
        assert_eq!(primitive_text(&json!({"a": 1})), None);
        assert_eq!(primitive_text(&json!([1])), None);
    }

    #[test]
    fn test_now_millis_truncated_to_seconds() {
        assert_eq!(now_millis() % 1000, 0);
    }
}
