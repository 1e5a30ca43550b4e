//! MongoDB-specific restrictions of a permission
//!
//! The optional `mongo` object of a permission definition restricts what a
//! matched request may do:
//!
//! ```json
//! "mongo": {
//!   "allowManagementRequests": false,
//!   "allowBulkPatch": false,
//!   "allowBulkDelete": false,
//!   "allowWriteMode": false,
//!   "readFilter": { "owner": "@user._id" },
//!   "writeFilter": { "owner": "@user._id" },
//!   "mergeRequest": { "owner": "@user._id" },
//!   "projectResponse": { "password": 0 }
//! }
//! ```
//!
//! Filter keys are stored escaped (see [`crate::document::escape_keys`]) and
//! unescaped when read back.

use super::permission::{Permission, RawPermission};
use crate::document::{escape_keys, lookup, unescape_keys, Document};
use crate::error::{AclError, AclResult};
use crate::interpolation::interpolate_document;
use crate::log_permissions_debug;
use crate::request::AclRequest;
use once_cell::sync::Lazy;
use serde_json::Value;

const ALLOW_MANAGEMENT_REQUESTS: &str = "allowManagementRequests";
const ALLOW_BULK_PATCH: &str = "allowBulkPatch";
const ALLOW_BULK_DELETE: &str = "allowBulkDelete";
const ALLOW_WRITE_MODE: &str = "allowWriteMode";
const READ_FILTER: &str = "readFilter";
const WRITE_FILTER: &str = "writeFilter";
const MERGE_REQUEST: &str = "mergeRequest";
const PROJECT_RESPONSE: &str = "projectResponse";

/// Every flag set and no filters, for fully trusted roles
pub static ALLOW_ALL: Lazy<MongoPermissions> = Lazy::new(|| MongoPermissions {
    allow_management_requests: true,
    allow_bulk_patch: true,
    allow_bulk_delete: true,
    allow_write_mode: true,
    ..MongoPermissions::default()
});

/// MongoDB restrictions derived from a permission.
///
/// The default value is the most restrictive one: every flag false, no
/// filters, no request merging and no response projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MongoPermissions {
    allow_management_requests: bool,
    allow_bulk_patch: bool,
    allow_bulk_delete: bool,
    allow_write_mode: bool,
    read_filter: Option<Document>,
    write_filter: Option<Document>,
    merge_request: Option<Document>,
    project_response: Option<Document>,
}

impl MongoPermissions {
    /// Builds the restrictions of a raw permission definition.
    pub fn from_raw(raw: Option<&RawPermission>) -> AclResult<Self> {
        let (doc, strings_hold_json) = match raw {
            None => return Ok(Self::default()),
            Some(RawPermission::Document(doc)) => (doc, false),
            Some(RawPermission::ConfigMap(map)) => (map, true),
        };

        let mongo = match doc.get("mongo") {
            Some(Value::Object(mongo)) if !mongo.is_empty() => mongo,
            _ => return Ok(Self::default()),
        };

        let read_filter = document_arg(mongo, READ_FILTER, strings_hold_json)?;
        let write_filter = document_arg(mongo, WRITE_FILTER, strings_hold_json)?;
        let merge_request = document_arg(mongo, MERGE_REQUEST, strings_hold_json)?;
        let project_response = document_arg(mongo, PROJECT_RESPONSE, strings_hold_json)?;

        if let Some(projection) = &project_response {
            validate_projection(projection)?;
        }

        Ok(Self {
            allow_management_requests: bool_arg(mongo, ALLOW_MANAGEMENT_REQUESTS)?,
            allow_bulk_patch: bool_arg(mongo, ALLOW_BULK_PATCH)?,
            allow_bulk_delete: bool_arg(mongo, ALLOW_BULK_DELETE)?,
            allow_write_mode: bool_arg(mongo, ALLOW_WRITE_MODE)?,
            read_filter: read_filter.map(escape_document),
            write_filter: write_filter.map(escape_document),
            merge_request,
            project_response,
        })
    }

    /// Builds the restrictions of a permission.
    pub fn from_permission(permission: &Permission) -> AclResult<Self> {
        Self::from_raw(permission.raw())
    }

    /// Builds the restrictions of the permission attached to the request,
    /// `None` when no permission is attached.
    pub fn from_request(request: &AclRequest) -> AclResult<Option<Self>> {
        request
            .attached_permission()
            .map(|p| Self::from_permission(p))
            .transpose()
    }

    pub fn allow_management_requests(&self) -> bool {
        self.allow_management_requests
    }

    pub fn allow_bulk_patch(&self) -> bool {
        self.allow_bulk_patch
    }

    pub fn allow_bulk_delete(&self) -> bool {
        self.allow_bulk_delete
    }

    pub fn allow_write_mode(&self) -> bool {
        self.allow_write_mode
    }

    /// The read filter with its original keys
    pub fn read_filter(&self) -> Option<Document> {
        self.read_filter.as_ref().map(unescape_document)
    }

    /// The write filter with its original keys
    pub fn write_filter(&self) -> Option<Document> {
        self.write_filter.as_ref().map(unescape_document)
    }

    pub fn merge_request(&self) -> Option<&Document> {
        self.merge_request.as_ref()
    }

    pub fn project_response(&self) -> Option<&Document> {
        self.project_response.as_ref()
    }

    /// Serialized form, as exposed to `@mongoPermissions`.
    pub fn as_document(&self) -> Document {
        let filter = |f: Option<Document>| f.map(Value::Object).unwrap_or(Value::Null);

        let mut doc = Document::new();
        doc.insert(ALLOW_MANAGEMENT_REQUESTS.into(), Value::Bool(self.allow_management_requests));
        doc.insert(ALLOW_BULK_PATCH.into(), Value::Bool(self.allow_bulk_patch));
        doc.insert(ALLOW_BULK_DELETE.into(), Value::Bool(self.allow_bulk_delete));
        doc.insert(ALLOW_WRITE_MODE.into(), Value::Bool(self.allow_write_mode));
        doc.insert(READ_FILTER.into(), filter(self.read_filter()));
        doc.insert(WRITE_FILTER.into(), filter(self.write_filter()));
        doc
    }

    /// The filter a read request must apply: the interpolated read filter
    /// combined with the request's own filter.
    pub fn effective_read_filter(&self, request: &AclRequest) -> Option<Document> {
        combine_filters(request, self.read_filter())
    }

    /// The filter a write request must apply: the interpolated write filter
    /// combined with the request's own filter.
    pub fn effective_write_filter(&self, request: &AclRequest) -> Option<Document> {
        combine_filters(request, self.write_filter())
    }

    /// Merges the interpolated `mergeRequest` into the request body. Array
    /// bodies get it merged into every document. Returns true if the body
    /// was changed.
    pub fn apply_merge_request(&self, request: &mut AclRequest) -> bool {
        let Some(merge) = &self.merge_request else {
            return false;
        };

        let merge = interpolate_document(request, merge);
        let Some(mongo) = request.mongo_mut() else {
            return false;
        };

        match mongo.body.as_mut() {
            Some(Value::Object(body)) => merge_into(body, &merge),
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    if let Value::Object(body) = item {
                        merge_into(body, &merge);
                    }
                }
            }
            Some(_) => return false,
            None => {}
        }

        if mongo.body.is_none() {
            mongo.body = Some(Value::Object(merge));
        }

        log_permissions_debug!("merged request body: {:?}", mongo.body);
        true
    }

    /// Applies `projectResponse` to a response document.
    ///
    /// An inclusion projection keeps `_id` and the listed paths, an
    /// exclusion projection removes the listed paths.
    pub fn apply_project_response(&self, doc: &Document) -> Document {
        let Some(projection) = &self.project_response else {
            return doc.clone();
        };

        let inclusion = projection.values().any(|v| v.as_i64() == Some(1));

        if inclusion {
            let mut ret = Document::new();
            if let Some(id) = doc.get("_id") {
                ret.insert("_id".into(), id.clone());
            }
            let source = Value::Object(doc.clone());
            for path in projection.keys() {
                if let Some(value) = lookup(&source, path) {
                    set_path(&mut ret, path, value.clone());
                }
            }
            ret
        } else {
            let mut ret = doc.clone();
            for path in projection.keys() {
                remove_path(&mut ret, path);
            }
            ret
        }
    }
}

fn escape_document(doc: Document) -> Document {
    match escape_keys(&Value::Object(doc)) {
        Value::Object(escaped) => escaped,
        _ => Document::new(),
    }
}

fn unescape_document(doc: &Document) -> Document {
    match unescape_keys(&Value::Object(doc.clone())) {
        Value::Object(unescaped) => unescaped,
        _ => Document::new(),
    }
}

/// Reads an optional document argument. With `strings_hold_json` a string
/// value is parsed as JSON first.
fn document_arg(mongo: &Document, key: &str, strings_hold_json: bool) -> AclResult<Option<Document>> {
    let value = match mongo.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) if strings_hold_json => serde_json::from_str::<Value>(text).map_err(|e| {
            AclError::configuration(format!(
                "Wrong permission: the {key} is not a string containing a JSON Object: {e}"
            ))
        })?,
        Some(other) => other.clone(),
    };

    match value {
        Value::Null => Ok(None),
        Value::Object(doc) => Ok(Some(doc)),
        _ => Err(AclError::configuration(format!(
            "Wrong permission: {key} must be a JSON object or null"
        ))),
    }
}

fn bool_arg(mongo: &Document, key: &str) -> AclResult<bool> {
    match mongo.get(key) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(AclError::configuration(format!(
            "Wrong permission: mongo.{key} must be a boolean"
        ))),
    }
}

fn validate_projection(projection: &Document) -> AclResult<()> {
    let mut zeros = false;
    let mut ones = false;

    for value in projection.values() {
        match value.as_i64() {
            Some(0) => zeros = true,
            Some(1) => ones = true,
            _ => {
                return Err(AclError::configuration(
                    "Wrong permission: the projectResponse contains invalid projection options, valid values are 0 and 1",
                ))
            }
        }

        if zeros && ones {
            return Err(AclError::configuration(
                "Wrong permission: the projectResponse contains invalid projection options, cannot have a mix of inclusion and exclusion",
            ));
        }
    }

    Ok(())
}

fn combine_filters(request: &AclRequest, permission_filter: Option<Document>) -> Option<Document> {
    let request_filter = request.mongo().and_then(|m| m.filter.clone());
    let permission_filter = permission_filter.map(|f| interpolate_document(request, &f));

    match (request_filter, permission_filter) {
        (Some(request_filter), Some(permission_filter)) => {
            let mut ret = Document::new();
            ret.insert(
                "$and".into(),
                Value::Array(vec![Value::Object(request_filter), Value::Object(permission_filter)]),
            );
            Some(ret)
        }
        (None, Some(permission_filter)) => Some(permission_filter),
        (request_filter, None) => request_filter,
    }
}

fn merge_into(body: &mut Document, merge: &Document) {
    for (k, v) in merge {
        body.insert(k.clone(), v.clone());
    }
}

fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if let Value::Object(child) = child {
                set_path(child, rest, value);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = doc.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}
