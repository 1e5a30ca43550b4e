mod common;

use common::{doc, user};
use mongo_acl::interpolation::{interpolate_predicate, interpolate_predicate_with, interpolate_value, USER_PREFIX};
use mongo_acl::permissions::{Permission, RawPermission};
use mongo_acl::{AclRequest, CompiledPredicate, MongoPermissions, MongoRequestInfo, PredicateContext, ResourceType};
use serde_json::{json, Value};
use std::sync::Arc;

#[test]
fn test_user_document_is_interpolated() {
    let request = AclRequest::new("GET", "/").with_account(user("u1", &["user"], json!({"_id": "u1"})));
    assert_eq!(
        interpolate_value(&request, &json!({"owner": "@user"})),
        json!({"owner": {"_id": "u1"}})
    );
}

#[test]
fn test_missing_values_become_null() {
    let request = AclRequest::new("GET", "/");
    assert_eq!(
        interpolate_value(&request, &json!({"a": "@user", "b": "@user.x", "c": ["@request.body.y", "plain"]})),
        json!({"a": null, "b": null, "c": [null, "plain"]})
    );
}

#[test]
fn test_request_and_legacy_tokens() {
    let request = AclRequest::new("PATCH", "/db/coll")
        .with_account(user("bob", &["editor", "user"], json!({"dept": "IT"})))
        .with_mongo(
            MongoRequestInfo::new(ResourceType::Collection)
                .with_db("db")
                .with_collection("coll")
                .with_body(json!({"n": 5})),
        );

    let value = interpolate_value(
        &request,
        &json!({
            "who": "%USER",
            "roles": "%ROLES",
            "method": "@request.method",
            "db": "@request.db",
            "n": "@request.body.n",
            "dept": "@user.dept"
        }),
    );

    assert_eq!(value["who"], json!("bob"));
    assert_eq!(value["roles"], json!(["editor", "user"]));
    assert_eq!(value["method"], json!("PATCH"));
    assert_eq!(value["db"], json!("db"));
    assert_eq!(value["n"], json!(5));
    assert_eq!(value["dept"], json!("IT"));

    let now = interpolate_value(&request, &json!("@now"));
    assert!(now.get("$date").and_then(Value::as_i64).is_some());
}

#[test]
fn test_predicate_text_interpolation() {
    let values = doc(json!({"dept": "IT"}));
    let text = interpolate_predicate_with("equals(@user.dept,'IT')", USER_PREFIX, Some(&values));
    assert_eq!(text, "equals('IT','IT')");
    assert!(CompiledPredicate::parse(&text).is_ok());

    let text = interpolate_predicate_with("@user.missing", USER_PREFIX, Some(&doc(json!({}))));
    assert!(!text.contains("@user.missing"));
}

#[test]
fn test_interpolated_predicate_matches_own_documents() {
    let context = Arc::new(PredicateContext::default());
    let permission = Permission::from_predicate(
        "path-prefix('/db/coll') and equals(@user.dept, @request.body.dept)",
        vec!["user".into()],
        1,
        context,
    )
    .unwrap();

    let request = |dept: &str| {
        AclRequest::new("POST", "/db/coll")
            .with_account(user("bob", &["user"], json!({"dept": "IT"})))
            .with_mongo(MongoRequestInfo::new(ResourceType::Collection).with_body(json!({"dept": dept})))
    };

    assert!(permission.resolve(&request("IT")).unwrap());
    assert!(!permission.resolve(&request("HR")).unwrap());
}

#[test]
fn test_quotes_in_values_do_not_break_the_predicate() {
    let request = AclRequest::new("GET", "/")
        .with_account(user("o'brien", &["user"], json!({"name": "o'brien \"jr\""})));

    let compiled = interpolate_predicate(
        &request,
        "equals(@user.name, 'o\\'brien \"jr\"')",
        &PredicateContext::default(),
    )
    .unwrap();
    assert!(compiled.resolve(&request).unwrap());
}

#[test]
fn test_unparseable_predicate_names_the_original_text() {
    let request = AclRequest::new("GET", "/").with_account(user("bob", &["user"], json!({"dept": "IT"})));
    let err = interpolate_predicate(&request, "equals(@user.dept", &PredicateContext::default()).unwrap_err();

    assert!(err.is_configuration());
    assert!(err.to_string().contains("equals(@user.dept"));
}

#[test]
fn test_filter_keys_survive_escaping() {
    let raw = RawPermission::Document(doc(json!({
        "mongo": {"readFilter": {"a.b": 1, "$gt": 2}}
    })));

    let mongo = MongoPermissions::from_raw(Some(&raw)).unwrap();
    assert_eq!(mongo.read_filter(), Some(doc(json!({"a.b": 1, "$gt": 2}))));
    assert_eq!(mongo.as_document()["readFilter"], json!({"a.b": 1, "$gt": 2}));
}

#[test]
fn test_projection_validation() {
    let projection = |p: Value| {
        MongoPermissions::from_raw(Some(&RawPermission::Document(doc(json!({"mongo": {"projectResponse": p}})))))
    };

    assert!(projection(json!({"a": 1, "b": 0})).unwrap_err().is_configuration());
    assert!(projection(json!({"a": 1, "b": 1})).is_ok());
    assert!(projection(json!({"a": 0})).is_ok());
    assert!(projection(json!({"a": 2})).is_err());
}
