//! Role-based ACL authorizer
//!
//! Holds the permissions loaded from configuration or from permission
//! documents and finds, for each request, the permission that authorizes it.

use super::mongo::MongoPermissions;
use super::permission::{Clause, Permission, RawPermission, Transformer};
use super::registry::{PermissionMatcher, PermissionRegistry};
use crate::config::AclSection;
use crate::document::Document;
use crate::error::AclResult;
use crate::predicate::PredicateContext;
use crate::request::{AclRequest, UNAUTHENTICATED_ROLE};
use crate::{log_permissions_debug, log_permissions_info, log_permissions_warn};
use serde_json::Value;
use std::sync::Arc;

/// Authorizes requests with role-based permissions.
///
/// For every role of the request, in the order the account lists them, the
/// permissions granted to that role are tried in priority order. The first
/// one whose predicate holds authorizes the request.
#[derive(Debug, Clone)]
pub struct AclAuthorizer {
    permissions: Vec<Arc<Permission>>,
    root_permission: Option<Arc<Permission>>,
    allow_options: bool,
}

impl AclAuthorizer {
    /// Creates an authorizer. Permissions are sorted by priority, keeping
    /// the given order among equal priorities.
    #[must_use]
    pub fn new(mut permissions: Vec<Permission>) -> Self {
        permissions.sort_by_key(Permission::priority);

        Self {
            permissions: permissions.into_iter().map(Arc::new).collect(),
            root_permission: None,
            allow_options: true,
        }
    }

    /// Builds the authorizer described by the `[acl]` configuration section.
    pub fn from_config(section: &AclSection, context: Arc<PredicateContext>) -> AclResult<Self> {
        let permissions = section
            .permissions
            .iter()
            .map(|entry| Permission::from_config(entry, Arc::clone(&context)))
            .collect::<AclResult<Vec<_>>>()?;

        log_permissions_info!("loaded {} permissions from configuration", permissions.len());

        let authorizer = Self::new(permissions).with_allow_options(section.allow_options);
        Ok(match &section.root_role {
            Some(role) => authorizer.with_root_role(role),
            None => authorizer,
        })
    }

    /// Builds the authorizer from permission documents.
    pub fn from_documents(documents: &[Document], context: Arc<PredicateContext>) -> AclResult<Self> {
        let permissions = documents
            .iter()
            .map(|doc| Permission::from_document(doc, Arc::clone(&context)))
            .collect::<AclResult<Vec<_>>>()?;

        log_permissions_info!("loaded {} permission documents", permissions.len());
        Ok(Self::new(permissions))
    }

    /// Grants every request of accounts with `role`, with unrestricted
    /// MongoDB permissions.
    #[must_use]
    pub fn with_root_role(mut self, role: &str) -> Self {
        let mut mongo = Document::new();
        for flag in ["allowManagementRequests", "allowBulkPatch", "allowBulkDelete", "allowWriteMode"] {
            mongo.insert(flag.to_string(), Value::Bool(true));
        }
        let mut raw = Document::new();
        raw.insert("mongo".to_string(), Value::Object(mongo));

        self.root_permission = Some(Arc::new(Permission::new(
            Clause::Function(Arc::new(|_: &Permission, _: &AclRequest| -> AclResult<bool> { Ok(true) })),
            vec![role.to_string()],
            i32::MIN,
            Some(RawPermission::Document(raw)),
        )));
        self
    }

    /// Whether OPTIONS requests are always authorized without authentication.
    #[must_use]
    pub fn with_allow_options(mut self, allow_options: bool) -> Self {
        self.allow_options = allow_options;
        self
    }

    /// Runs the transformers over every permission. Must be called before
    /// the authorizer is registered.
    pub fn apply_transformers(&mut self, transformers: &[Transformer]) {
        for permission in self.permissions.iter_mut() {
            let permission = Arc::make_mut(permission);
            for transformer in transformers {
                transformer.transform(permission);
            }
        }
    }

    /// Permissions in evaluation order
    pub fn permissions(&self) -> &[Arc<Permission>] {
        &self.permissions
    }

    pub fn root_permission(&self) -> Option<&Arc<Permission>> {
        self.root_permission.as_ref()
    }

    /// The permission authorizing the request, if any.
    ///
    /// A permission whose predicate fails is skipped with a warning.
    pub fn matching_permission(&self, request: &AclRequest) -> Option<Arc<Permission>> {
        if let (Some(root), Some(account)) = (&self.root_permission, request.account()) {
            if root.roles().iter().any(|role| account.has_role(role)) {
                log_permissions_debug!("{} has the root role", account.name());
                return Some(Arc::clone(root));
            }
        }

        for role in request.roles() {
            for permission in self.permissions.iter().filter(|p| p.has_role(&role)) {
                log_permissions_debug!(
                    "role {} priority {} evaluating {:?}",
                    role,
                    permission.priority(),
                    permission.clauses()
                );

                match permission.resolve(request) {
                    Ok(true) => return Some(Arc::clone(permission)),
                    Ok(false) => {}
                    Err(e) => log_permissions_warn!(
                        "error evaluating permission {:?} for role {}: {}",
                        permission.id(),
                        role,
                        e
                    ),
                }
            }
        }

        None
    }

    /// Returns true if the request has to be authenticated: anything but
    /// OPTIONS requests not allowed to `$unauthenticated`.
    pub fn is_authentication_required(&self, request: &AclRequest) -> bool {
        if request.is_options() {
            return false;
        }

        !self
            .permissions
            .iter()
            .filter(|p| p.has_role(UNAUTHENTICATED_ROLE))
            .any(|p| match p.resolve(request) {
                Ok(resolved) => resolved,
                Err(e) => {
                    log_permissions_warn!(
                        "error evaluating permission {:?} for role {}: {}",
                        p.id(),
                        UNAUTHENTICATED_ROLE,
                        e
                    );
                    false
                }
            })
    }

    /// The MongoDB permissions of the permission authorizing the request,
    /// the most restrictive ones when none does.
    pub fn mongo_permissions(&self, request: &AclRequest) -> AclResult<MongoPermissions> {
        match self.matching_permission(request) {
            Some(permission) => MongoPermissions::from_permission(&permission),
            None => Ok(MongoPermissions::default()),
        }
    }

    /// Registers the authorizer as an allow rule and its authentication
    /// check as an authentication requirement.
    pub fn register(self, registry: &PermissionRegistry) {
        let authorizer = Arc::new(self);

        if authorizer.allow_options {
            registry.register_allow(|request: &AclRequest| Ok(request.is_options()));
        }

        registry.register_authorizer(Arc::clone(&authorizer) as Arc<dyn PermissionMatcher>);

        let requirement = Arc::clone(&authorizer);
        registry.register_authentication_requirement(move |request: &AclRequest| {
            Ok(requirement.is_authentication_required(request))
        });
    }
}

impl PermissionMatcher for AclAuthorizer {
    fn matching_permission(&self, request: &AclRequest) -> AclResult<Option<Arc<Permission>>> {
        Ok(AclAuthorizer::matching_permission(self, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::permissions::mongo::ALLOW_ALL;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    fn authorizer(permissions: Value) -> AclAuthorizer {
        let docs: Vec<Document> = permissions
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_object().cloned()).collect())
            .unwrap_or_default();
        AclAuthorizer::from_documents(&docs, Arc::new(PredicateContext::default())).unwrap()
    }

    fn user(name: &str, roles: &[&str]) -> Account {
        Account::mongo(
            name,
            roles.iter().map(|r| r.to_string()).collect(),
            doc(json!({"_id": name})),
        )
    }

    #[test]
    fn test_permissions_are_sorted_by_priority() {
        let acl = authorizer(json!([
            {"_id": "c", "roles": ["user"], "priority": 30, "predicate": "true"},
            {"_id": "a", "roles": ["user"], "priority": 10, "predicate": "true"},
            {"_id": "b", "roles": ["user"], "priority": 10, "predicate": "true"}
        ]));
        let ids: Vec<_> = acl.permissions().iter().filter_map(|p| p.id().cloned()).collect();
        assert_eq!(ids, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn test_first_matching_permission_in_role_order() {
        let acl = authorizer(json!([
            {"_id": "editorWrite", "roles": ["editor"], "priority": 1, "predicate": "method(PUT)"},
            {"_id": "userRead", "roles": ["user"], "priority": 2, "predicate": "method(GET)"},
            {"_id": "editorRead", "roles": ["editor"], "priority": 3, "predicate": "method(GET)"}
        ]));

        let get = AclRequest::new("GET", "/").with_account(user("u", &["user", "editor"]));
        assert_eq!(acl.matching_permission(&get).and_then(|p| p.id().cloned()), Some(json!("userRead")));

        let get = AclRequest::new("GET", "/").with_account(user("u", &["editor", "user"]));
        assert_eq!(acl.matching_permission(&get).and_then(|p| p.id().cloned()), Some(json!("editorRead")));

        let delete = AclRequest::new("DELETE", "/").with_account(user("u", &["user", "editor"]));
        assert!(acl.matching_permission(&delete).is_none());
    }

    #[test]
    fn test_interpolated_permission() {
        let acl = authorizer(json!([
            {"roles": ["user"], "priority": 1, "predicate": "path-prefix('/users') and equals(@user._id, %u)"}
        ]));
        let own = AclRequest::new("GET", "/users/alice").with_account(user("alice", &["user"]));
        assert!(acl.matching_permission(&own).is_some());
    }

    #[test]
    fn test_authentication_requirement() {
        let acl = authorizer(json!([
            {"roles": ["$unauthenticated"], "priority": 1, "predicate": "path-prefix('/public')"}
        ]));
        assert!(!acl.is_authentication_required(&AclRequest::new("GET", "/public/a")));
        assert!(acl.is_authentication_required(&AclRequest::new("GET", "/private")));
        assert!(!acl.is_authentication_required(&AclRequest::new("OPTIONS", "/private")));
        assert!(acl.matching_permission(&AclRequest::new("GET", "/public/a")).is_some());
    }

    #[test]
    fn test_failing_unauthenticated_permission_is_skipped() {
        let acl = AclAuthorizer::new(vec![
            Permission::from_fn(
                |_| Err(crate::error::AclError::predicate("boom")),
                vec![UNAUTHENTICATED_ROLE.into()],
                1,
            ),
            Permission::from_fn(
                |r| Ok(r.path() == "/open"),
                vec![UNAUTHENTICATED_ROLE.into()],
                2,
            ),
        ]);
        assert!(!acl.is_authentication_required(&AclRequest::new("GET", "/open")));
        assert!(acl.is_authentication_required(&AclRequest::new("GET", "/closed")));
    }

    #[test]
    fn test_root_role() {
        let acl = authorizer(json!([])).with_root_role("admin");
        let request = AclRequest::new("DELETE", "/anything").with_account(user("root", &["admin"]));

        let permission = acl.matching_permission(&request).unwrap();
        assert_eq!(permission.priority(), i32::MIN);
        assert_eq!(acl.mongo_permissions(&request).unwrap(), *ALLOW_ALL);

        let other = AclRequest::new("DELETE", "/anything").with_account(user("u", &["user"]));
        assert!(acl.matching_permission(&other).is_none());
        assert_eq!(acl.mongo_permissions(&other).unwrap(), MongoPermissions::default());
    }

    #[test]
    fn test_apply_transformers() {
        let mut acl = authorizer(json!([
            {"_id": "p", "roles": ["user"], "priority": 1, "predicate": "method(GET)"}
        ]));
        acl.apply_transformers(&[Transformer::new(
            |p| p.id() == Some(&json!("p")),
            |_, request| request.path() != "/blocked",
        )]);

        let ok = AclRequest::new("GET", "/ok").with_account(user("u", &["user"]));
        let blocked = AclRequest::new("GET", "/blocked").with_account(user("u", &["user"]));
        assert!(acl.matching_permission(&ok).is_some());
        assert!(acl.matching_permission(&blocked).is_none());
    }

    #[test]
    fn test_register() {
        let acl = authorizer(json!([
            {"roles": ["user"], "priority": 1, "predicate": "method(GET)"},
            {"roles": ["$unauthenticated"], "priority": 1, "predicate": "path('/health')"}
        ]));
        let registry = PermissionRegistry::new();
        acl.register(&registry);

        let mut get = AclRequest::new("GET", "/data").with_account(user("u", &["user"]));
        assert!(registry.authorize(&mut get));
        assert!(get.attached_permission().is_some());

        let mut anonymous = AclRequest::new("GET", "/data");
        assert_eq!(
            registry.check(&mut anonymous),
            crate::permissions::AuthorizationDecision::Unauthenticated
        );

        assert!(registry.authorize(&mut AclRequest::new("GET", "/health")));
        assert!(registry.authorize(&mut AclRequest::new("OPTIONS", "/data")));
    }
}
