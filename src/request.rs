//! Request abstraction consumed by the ACL engine
//!
//! [`AclRequest`] carries everything predicates and interpolation read:
//! path, method, query, headers, the authenticated account, MongoDB
//! addressing information and connection metadata. It also owns the single
//! attachment slot where the registry stores the permission that authorized
//! the request.

use crate::account::Account;
use crate::document::Document;
use crate::permissions::Permission;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Role assigned to requests without an authenticated account
pub const UNAUTHENTICATED_ROLE: &str = "$unauthenticated";

/// Kind of MongoDB resource addressed by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Invalid,
    Root,
    Db,
    DbMeta,
    Collection,
    CollectionMeta,
    CollectionIndexes,
    Index,
    Document,
    FilesBucket,
    File,
    FileBinary,
    Aggregation,
    Schema,
    SchemaStore,
    BulkDocuments,
    ChangeStream,
    Session,
    Transaction,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Invalid => "INVALID",
            ResourceType::Root => "ROOT",
            ResourceType::Db => "DB",
            ResourceType::DbMeta => "DB_META",
            ResourceType::Collection => "COLLECTION",
            ResourceType::CollectionMeta => "COLLECTION_META",
            ResourceType::CollectionIndexes => "COLLECTION_INDEXES",
            ResourceType::Index => "INDEX",
            ResourceType::Document => "DOCUMENT",
            ResourceType::FilesBucket => "FILES_BUCKET",
            ResourceType::File => "FILE",
            ResourceType::FileBinary => "FILE_BINARY",
            ResourceType::Aggregation => "AGGREGATION",
            ResourceType::Schema => "SCHEMA",
            ResourceType::SchemaStore => "SCHEMA_STORE",
            ResourceType::BulkDocuments => "BULK_DOCUMENTS",
            ResourceType::ChangeStream => "CHANGE_STREAM",
            ResourceType::Session => "SESSION",
            ResourceType::Transaction => "TRANSACTION",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MongoDB-specific part of a request
#[derive(Debug, Clone, PartialEq)]
pub struct MongoRequestInfo {
    pub db: Option<String>,
    pub collection: Option<String>,
    pub document_id: Option<Value>,
    pub resource_type: ResourceType,
    /// Request payload, usually a document or an array of documents
    pub body: Option<Value>,
    /// Filter currently applied to the request (e.g. the `filter` query parameter)
    pub filter: Option<Document>,
}

impl MongoRequestInfo {
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            db: None,
            collection: None,
            document_id: None,
            resource_type,
            body: None,
            filter: None,
        }
    }

    pub fn with_db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_document_id(mut self, id: Value) -> Self {
        self.document_id = Some(id);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Connection metadata of the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub local_ip: String,
    pub local_port: u16,
    pub local_server_name: String,
    pub remote_ip: String,
    pub protocol: String,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            local_ip: "127.0.0.1".to_string(),
            local_port: 8080,
            local_server_name: "localhost".to_string(),
            remote_ip: "127.0.0.1".to_string(),
            protocol: "HTTP/1.1".to_string(),
        }
    }
}

/// A request under authorization
#[derive(Debug, Clone)]
pub struct AclRequest {
    method: String,
    path: String,
    query: BTreeMap<String, Vec<String>>,
    headers: BTreeMap<String, String>,
    account: Option<Account>,
    mongo: Option<MongoRequestInfo>,
    connection: ConnectionInfo,
    received_at: DateTime<Utc>,
    permission: Option<Arc<Permission>>,
}

impl AclRequest {
    /// Creates a request; the method is normalized to upper case.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            account: None,
            mongo: None,
            connection: ConnectionInfo::default(),
            received_at: Utc::now(),
            permission: None,
        }
    }

    /// Adds a query parameter value.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Adds every `key=value` pair of a raw query string.
    pub fn with_query_string(mut self, query: &str) -> Self {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            self.query.entry(k.to_string()).or_default().push(v.to_string());
        }
        self
    }

    /// Adds a header; names are case-insensitive.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_lowercase(), value.into());
        self
    }

    pub fn with_account(mut self, account: Account) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_mongo(mut self, mongo: MongoRequestInfo) -> Self {
        self.mongo = Some(mongo);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionInfo) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_options(&self) -> bool {
        self.method == "OPTIONS"
    }

    pub fn query(&self) -> &BTreeMap<String, Vec<String>> {
        &self.query
    }

    /// Reassembles the query string, parameters in key order.
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| format!("{k}={v}")))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }

    /// Name of the authenticated principal, if any
    pub fn user_name(&self) -> Option<&str> {
        self.account.as_ref().map(Account::name)
    }

    /// Roles of the authenticated principal, or `$unauthenticated`.
    pub fn roles(&self) -> Vec<String> {
        match &self.account {
            Some(account) => account.roles().to_vec(),
            None => vec![UNAUTHENTICATED_ROLE.to_string()],
        }
    }

    pub fn mongo(&self) -> Option<&MongoRequestInfo> {
        self.mongo.as_ref()
    }

    pub fn mongo_mut(&mut self) -> Option<&mut MongoRequestInfo> {
        self.mongo.as_mut()
    }

    /// The request payload, when this is a MongoDB request carrying one
    pub fn body(&self) -> Option<&Value> {
        self.mongo.as_ref().and_then(|m| m.body.as_ref())
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Stores the permission that authorized this request, replacing any
    /// previously attached one.
    pub fn attach_permission(&mut self, permission: Arc<Permission>) {
        self.permission = Some(permission);
    }

    /// The permission that authorized this request
    pub fn attached_permission(&self) -> Option<&Arc<Permission>> {
        self.permission.as_ref()
    }
}
