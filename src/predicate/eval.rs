//! Evaluation of parsed predicates against a request.

use super::ast::{Builtin, Expression, Operand};
use crate::document::{contains_path, lookup, Document};
use crate::error::AclResult;
use crate::request::AclRequest;
use serde_json::Value;

impl Expression {
    /// Evaluates the expression; `and`/`or` short-circuit.
    pub fn evaluate(&self, request: &AclRequest) -> AclResult<bool> {
        match self {
            Expression::Literal(b) => Ok(*b),
            Expression::Not(e) => Ok(!e.evaluate(request)?),
            Expression::And(l, r) => Ok(l.evaluate(request)? && r.evaluate(request)?),
            Expression::Or(l, r) => Ok(l.evaluate(request)? || r.evaluate(request)?),
            Expression::Builtin(b) => Ok(b.evaluate(request)),
            Expression::Custom { args, function, .. } => function.evaluate(args, request),
        }
    }
}

impl Builtin {
    pub fn evaluate(&self, request: &AclRequest) -> bool {
        let path = request.path();

        match self {
            Builtin::Path(paths) => resolved(paths, request)
                .any(|p| normalize_path(&p) == normalize_path(path)),
            Builtin::PathPrefix(prefixes) => resolved(prefixes, request).any(|p| has_prefix(path, &p)),
            Builtin::PathSuffix(suffixes) => resolved(suffixes, request).any(|s| path.ends_with(s.as_str())),
            Builtin::Method(methods) => methods.iter().any(|m| m == request.method()),
            Builtin::Equals(values) => {
                let mut values = values.iter().map(|v| v.resolve(request));
                match values.next() {
                    Some(Some(first)) => values.all(|v| v.as_deref() == Some(first.as_str())),
                    _ => false,
                }
            }
            Builtin::In { value, array } => match value.resolve(request) {
                Some(v) => resolved(array, request).any(|a| a == v),
                None => false,
            },
            Builtin::Contains { value, search } => match value.resolve(request) {
                Some(v) => resolved(search, request).any(|s| v.contains(s.as_str())),
                None => false,
            },
            Builtin::Regex { value, pattern } => value
                .resolve(request)
                .map(|v| pattern.is_match(&v))
                .unwrap_or(false),
            Builtin::QParamsContain(keys) => keys.iter().all(|k| request.query().contains_key(k)),
            Builtin::QParamsBlacklist(keys) => keys.iter().all(|k| !request.query().contains_key(k)),
            Builtin::QParamsWhitelist(keys) => request.query().keys().all(|k| keys.contains(k)),
            Builtin::QParamsSize(size) => request.query().len() == *size,
            Builtin::BsonRequestContains(keys) => match request.body() {
                Some(body) => for_each_document(body, |doc| keys.iter().all(|k| document_contains(doc, k))),
                None => false,
            },
            Builtin::BsonRequestWhitelist(keys) => match request.body() {
                Some(body) => for_each_document(body, |doc| {
                    body_paths(doc)
                        .iter()
                        .all(|p| keys.iter().any(|w| covers(w, p)))
                }),
                None => true,
            },
            Builtin::BsonRequestBlacklist(keys) => match request.body() {
                Some(body) => for_each_document(body, |doc| {
                    body_paths(doc)
                        .iter()
                        .all(|p| !keys.iter().any(|b| covers(b, p) || covers(p, b)))
                }),
                None => true,
            },
            Builtin::BsonRequestPropEquals { key, value } => match request.body() {
                Some(Value::Object(doc)) => lookup_with_operators(doc, key) == Some(value),
                _ => false,
            },
        }
    }
}

fn resolved<'a>(operands: &'a [Operand], request: &'a AclRequest) -> impl Iterator<Item = String> + 'a {
    operands.iter().filter_map(move |op| op.resolve(request))
}

fn normalize_path(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Segment-aware prefix match: `/db` matches `/db` and `/db/coll` but not `/dbx`.
fn has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix || path.strip_prefix(prefix).map_or(false, |rest| rest.starts_with('/'))
}

/// True if `path` is `key` or lies beneath it.
fn covers(key: &str, path: &str) -> bool {
    path == key || path.strip_prefix(key).map_or(false, |rest| rest.starts_with('.'))
}

/// Applies `check` to the body document, or to every document of an array
/// body. Non-document payloads never pass.
fn for_each_document(body: &Value, check: impl Fn(&Document) -> bool) -> bool {
    match body {
        Value::Object(doc) => check(doc),
        Value::Array(items) => {
            !items.is_empty()
                && items.iter().all(|item| match item {
                    Value::Object(doc) => check(doc),
                    _ => false,
                })
        }
        _ => false,
    }
}

fn is_update_operator(key: &str, value: &Value) -> bool {
    key.starts_with('$') && value.is_object()
}

/// Key lookup that also looks inside update operators such as `$set`.
fn document_contains(doc: &Document, key: &str) -> bool {
    let root = Value::Object(doc.clone());
    contains_path(&root, key)
        || doc
            .iter()
            .filter(|(k, v)| is_update_operator(k, v))
            .any(|(_, v)| v.get(key).is_some() || contains_path(v, key))
}

fn lookup_with_operators<'a>(doc: &'a Document, key: &str) -> Option<&'a Value> {
    if let Some(v) = doc.get(key) {
        return Some(v);
    }
    for (k, v) in doc {
        if is_update_operator(k, v) {
            if let Some(found) = v.get(key).or_else(|| lookup(v, key)) {
                return Some(found);
            }
        }
    }
    doc.iter().find_map(|(k, v)| {
        key.strip_prefix(k.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|rest| lookup(v, rest))
    })
}

/// Dotted paths of every leaf in the document. Update operators are
/// transparent, and documents inside arrays extend the array's path without
/// an index.
fn body_paths(doc: &Document) -> Vec<String> {
    let mut paths = Vec::new();
    for (k, v) in doc {
        if is_update_operator(k, v) {
            if let Value::Object(inner) = v {
                collect_paths(inner, "", &mut paths);
            }
        } else {
            collect_value(v, k, &mut paths);
        }
    }
    paths
}

fn collect_paths(doc: &Document, prefix: &str, paths: &mut Vec<String>) {
    for (k, v) in doc {
        let path = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        collect_value(v, &path, paths);
    }
}

fn collect_value(value: &Value, path: &str, paths: &mut Vec<String>) {
    match value {
        Value::Object(inner) if !inner.is_empty() => collect_paths(inner, path, paths),
        Value::Array(items) if items.iter().any(Value::is_object) => {
            for item in items {
                match item {
                    Value::Object(inner) if !inner.is_empty() => collect_paths(inner, path, paths),
                    _ => paths.push(path.to_string()),
                }
            }
        }
        _ => paths.push(path.to_string()),
    }
}
