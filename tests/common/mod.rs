//! Shared fixtures for the integration tests

#![allow(dead_code)]

use mongo_acl::{Account, AclRequest, Document, MongoRequestInfo, ResourceType};
use serde_json::Value;

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(doc) => doc,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn user(name: &str, roles: &[&str], properties: Value) -> Account {
    Account::mongo(name, roles.iter().map(|r| r.to_string()).collect(), doc(properties))
}

/// A request on `/<db>/<collection>` carrying MongoDB details
pub fn collection_request(method: &str, db: &str, collection: &str) -> AclRequest {
    AclRequest::new(method, format!("/{db}/{collection}")).with_mongo(
        MongoRequestInfo::new(ResourceType::Collection)
            .with_db(db)
            .with_collection(collection),
    )
}
