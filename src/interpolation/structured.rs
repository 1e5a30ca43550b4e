//! Structured-value interpolation.
//!
//! Rebuilds a document tree, replacing every string that is exactly a
//! variable token with the value it resolves to.

use crate::document::{date_value, lookup, now_millis, Document};
use crate::log_interpolation_debug;
use crate::log_interpolation_warn;
use crate::permissions::MongoPermissions;
use crate::request::AclRequest;
use serde_json::Value;

const USER: &str = "@user";
const USER_PROPERTY: &str = "@user.";
const REQUEST: &str = "@request";
const REQUEST_PROPERTY: &str = "@request.";
const REQUEST_BODY: &str = "@request.body";
const REQUEST_BODY_PROPERTY: &str = "@request.body.";
const MONGO_PERMISSIONS: &str = "@mongoPermissions";
const MONGO_PERMISSIONS_PROPERTY: &str = "@mongoPermissions.";
const FILTER: &str = "@filter";
const NOW: &str = "@now";
const LEGACY_NOW: &str = "%NOW";
const LEGACY_USER: &str = "%USER";
const LEGACY_ROLES: &str = "%ROLES";

/// Format of the `dateTime` request property
const COMMON_LOG_DATE_FORMAT: &str = "[%d/%b/%Y:%H:%M:%S %z]";

/// Returns a copy of `value` with every token string resolved.
pub fn interpolate_value(request: &AclRequest, value: &Value) -> Value {
    match value {
        Value::Object(doc) => Value::Object(interpolate_document(request, doc)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_value(request, v)).collect()),
        Value::String(s) => resolve_token(request, s),
        other => other.clone(),
    }
}

/// Returns a copy of `doc` with every token string resolved.
pub fn interpolate_document(request: &AclRequest, doc: &Document) -> Document {
    doc.iter()
        .map(|(k, v)| (k.clone(), interpolate_value(request, v)))
        .collect()
}

/// Resolves a single string. Anything that is not a token is returned
/// unchanged as a string value.
pub fn resolve_token(request: &AclRequest, token: &str) -> Value {
    match token {
        LEGACY_USER => Value::String(request.user_name().unwrap_or_default().to_string()),
        LEGACY_ROLES => Value::Array(
            request
                .account()
                .map(|a| a.roles().iter().cloned().map(Value::String).collect())
                .unwrap_or_default(),
        ),
        NOW | LEGACY_NOW => date_value(now_millis()),
        USER => request
            .account()
            .map(|a| Value::Object(a.properties_as_document()))
            .unwrap_or(Value::Null),
        REQUEST => Value::Object(request_document(request)),
        REQUEST_BODY => request.body().cloned().unwrap_or(Value::Null),
        MONGO_PERMISSIONS => mongo_permissions_document(request)
            .map(Value::Object)
            .unwrap_or(Value::Null),
        FILTER => request
            .mongo()
            .and_then(|m| m.filter.clone())
            .map(Value::Object)
            .unwrap_or(Value::Null),
        _ => {
            if let Some(path) = token.strip_prefix(REQUEST_BODY_PROPERTY) {
                body_property(request, path)
            } else if let Some(path) = token.strip_prefix(REQUEST_PROPERTY) {
                let doc = Value::Object(request_document(request));
                lookup(&doc, path).cloned().unwrap_or(Value::Null)
            } else if let Some(path) = token.strip_prefix(MONGO_PERMISSIONS_PROPERTY) {
                mongo_permissions_document(request)
                    .and_then(|doc| lookup(&Value::Object(doc), path).cloned())
                    .unwrap_or(Value::Null)
            } else if let Some(path) = token.strip_prefix(USER_PROPERTY) {
                request
                    .account()
                    .and_then(|a| lookup(&Value::Object(a.properties_as_document()), path).cloned())
                    .unwrap_or(Value::Null)
            } else {
                Value::String(token.to_string())
            }
        }
    }
}

fn body_property(request: &AclRequest, path: &str) -> Value {
    match request.body() {
        Some(body @ Value::Object(_)) => lookup(body, path).cloned().unwrap_or(Value::Null),
        Some(_) => {
            log_interpolation_warn!(
                "cannot interpolate {}{}: the request content is not a document",
                REQUEST_BODY_PROPERTY,
                path
            );
            Value::Null
        }
        None => Value::Null,
    }
}

fn mongo_permissions_document(request: &AclRequest) -> Option<Document> {
    match MongoPermissions::from_request(request) {
        Ok(permissions) => permissions.map(|p| p.as_document()),
        Err(e) => {
            log_interpolation_warn!("cannot interpolate {}: {}", MONGO_PERMISSIONS, e);
            None
        }
    }
}

fn string_or_null(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.to_string()))
}

/// The synthetic document `@request` resolves to.
pub fn request_document(request: &AclRequest) -> Document {
    let mongo = request.mongo();
    let connection = request.connection();

    let mut doc = Document::new();
    doc.insert("db".into(), string_or_null(mongo.and_then(|m| m.db.as_deref())));
    doc.insert(
        "collection".into(),
        string_or_null(mongo.and_then(|m| m.collection.as_deref())),
    );
    doc.insert(
        "_id".into(),
        mongo.and_then(|m| m.document_id.clone()).unwrap_or(Value::Null),
    );
    doc.insert(
        "resourceType".into(),
        Value::String(
            mongo
                .map(|m| m.resource_type.as_str())
                .unwrap_or("INVALID")
                .to_string(),
        ),
    );
    doc.insert("userName".into(), string_or_null(request.user_name()));
    doc.insert("epochTimeStamp".into(), date_value(now_millis()));
    doc.insert(
        "dateTime".into(),
        Value::String(request.received_at().format(COMMON_LOG_DATE_FORMAT).to_string()),
    );
    doc.insert("localIp".into(), Value::String(connection.local_ip.clone()));
    doc.insert("localPort".into(), Value::String(connection.local_port.to_string()));
    doc.insert(
        "localServerName".into(),
        Value::String(connection.local_server_name.clone()),
    );
    doc.insert("queryString".into(), Value::String(request.query_string()));
    doc.insert("relativePath".into(), Value::String(request.path().to_string()));
    doc.insert("remoteIp".into(), Value::String(connection.remote_ip.clone()));
    doc.insert("method".into(), Value::String(request.method().to_string()));
    doc.insert("protocol".into(), Value::String(connection.protocol.clone()));

    log_interpolation_debug!("request document: {}", Value::Object(doc.clone()));

    doc
}
