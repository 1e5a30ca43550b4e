//! Permission model
//!
//! A [`Permission`] grants the requests matched by its predicate to a set of
//! roles. Lower priorities are evaluated first. The predicate is an ordered
//! list of clauses combined with `and`: the first clause comes from the
//! permission definition and [`Transformer`]s append further clauses at load
//! time. Clauses are evaluated left to right and evaluation stops at the
//! first clause that does not hold.

use crate::document::Document;
use crate::error::{AclError, AclResult};
use crate::interpolation::{has_variables, interpolate_predicate};
use crate::log_permissions_debug;
use crate::log_permissions_warn;
use crate::predicate::{CompiledPredicate, PredicateContext, PredicateParser};
use crate::request::AclRequest;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Priority given to permissions that do not declare one
pub const DEFAULT_PRIORITY: i32 = i32::MAX;

/// A clause supplied as a function of the permission and the request
pub type ClauseFn = Arc<dyn Fn(&Permission, &AclRequest) -> AclResult<bool> + Send + Sync>;

/// The definition a permission was loaded from
#[derive(Debug, Clone, PartialEq)]
pub enum RawPermission {
    /// A permission document, e.g. from an ACL collection. Nested values are
    /// structured.
    Document(Document),
    /// A permission from a configuration file. Filters may be strings
    /// holding JSON.
    ConfigMap(Document),
}

impl RawPermission {
    pub fn as_document(&self) -> &Document {
        match self {
            RawPermission::Document(doc) | RawPermission::ConfigMap(doc) => doc,
        }
    }
}

/// One `and`-ed part of a permission predicate
#[derive(Clone)]
pub enum Clause {
    /// Predicate text without variables, parsed once at load time
    Compiled(CompiledPredicate),
    /// Predicate text interpolated with the request and parsed per request
    Interpolated {
        source: String,
        context: Arc<PredicateContext>,
    },
    /// A function clause
    Function(ClauseFn),
}

impl Clause {
    /// Builds the clause for predicate text, validating it.
    ///
    /// Text referencing `@user.` or `@request.body.` is validated by
    /// interpolating it against an anonymous request without a body.
    pub fn from_text(source: &str, context: Arc<PredicateContext>) -> AclResult<Self> {
        if has_variables(source) {
            interpolate_predicate(&AclRequest::new("GET", "/"), source, &context)?;
            Ok(Clause::Interpolated {
                source: source.to_string(),
                context,
            })
        } else {
            PredicateParser::parse_predicate(source, &context)
                .map(Clause::Compiled)
                .map_err(|e| AclError::configuration(format!("Wrong permission: invalid predicate {source}: {e}")))
        }
    }

    fn evaluate(&self, permission: &Permission, request: &AclRequest) -> AclResult<bool> {
        match self {
            Clause::Compiled(predicate) => predicate.resolve(request),
            Clause::Interpolated { source, context } => {
                interpolate_predicate(request, source, context)?.resolve(request)
            }
            Clause::Function(f) => f(permission, request),
        }
    }
}

impl fmt::Debug for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Compiled(p) => write!(f, "Compiled({})", p.source()),
            Clause::Interpolated { source, .. } => write!(f, "Interpolated({source})"),
            Clause::Function(_) => f.write_str("Function"),
        }
    }
}

/// A permission: predicate, roles, priority and the raw definition
#[derive(Clone)]
pub struct Permission {
    id: Option<Value>,
    roles: Vec<String>,
    priority: i32,
    clauses: Vec<Clause>,
    raw: Option<RawPermission>,
}

impl Permission {
    /// Creates a permission from its first clause.
    #[must_use]
    pub fn new(clause: Clause, roles: Vec<String>, priority: i32, raw: Option<RawPermission>) -> Self {
        let mut unique_roles: Vec<String> = Vec::with_capacity(roles.len());
        for role in roles {
            if !unique_roles.contains(&role) {
                unique_roles.push(role);
            }
        }

        Self {
            id: None,
            roles: unique_roles,
            priority,
            clauses: vec![clause],
            raw,
        }
    }

    /// Creates a permission whose predicate is a function of the request.
    pub fn from_fn<F>(predicate: F, roles: Vec<String>, priority: i32) -> Self
    where
        F: Fn(&AclRequest) -> AclResult<bool> + Send + Sync + 'static,
    {
        Self::new(
            Clause::Function(Arc::new(move |_: &Permission, request: &AclRequest| predicate(request))),
            roles,
            priority,
            None,
        )
    }

    /// Creates a permission from predicate text.
    pub fn from_predicate(
        predicate: &str,
        roles: Vec<String>,
        priority: i32,
        context: Arc<PredicateContext>,
    ) -> AclResult<Self> {
        Ok(Self::new(Clause::from_text(predicate, context)?, roles, priority, None))
    }

    /// Builds a permission from a permission document:
    ///
    /// ```json
    /// { "_id": "userCanReadOwn", "roles": ["user"], "priority": 100,
    ///   "predicate": "path-prefix('/db/coll') and method(GET)",
    ///   "mongo": { "readFilter": { "owner": "@user._id" } } }
    /// ```
    pub fn from_document(doc: &Document, context: Arc<PredicateContext>) -> AclResult<Self> {
        let id = doc.get("_id").cloned();
        let label = id.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "<no _id>".to_string());

        let roles = match doc.get("roles") {
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        AclError::configuration(format!(
                            "Wrong permission {label}: roles must be an array of strings"
                        ))
                    })
                })
                .collect::<AclResult<Vec<_>>>()?,
            _ => {
                return Err(AclError::configuration(format!(
                    "Wrong permission {label}: roles must be a non-empty array of strings"
                )))
            }
        };

        let predicate = required_predicate(doc, &label)?;
        let priority = priority_of(doc, &label)?;

        let mut permission = Self::new(
            Clause::from_text(predicate, context)?,
            roles,
            priority,
            Some(RawPermission::Document(doc.clone())),
        );
        permission.id = id;
        Ok(permission)
    }

    /// Builds a permission from a configuration entry. Exactly one of
    /// `roles` (list) and `role` (string) must be present.
    pub fn from_config(map: &Document, context: Arc<PredicateContext>) -> AclResult<Self> {
        let label = map
            .get("predicate")
            .and_then(Value::as_str)
            .unwrap_or("<no predicate>")
            .to_string();

        let roles = match (map.get("roles"), map.get("role")) {
            (Some(Value::Array(items)), None) if !items.is_empty() => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| AclError::configuration(format!("Wrong permission {label}: roles must be strings")))
                })
                .collect::<AclResult<Vec<_>>>()?,
            (None, Some(Value::String(role))) => vec![role.clone()],
            (Some(_), Some(_)) => {
                return Err(AclError::configuration(format!(
                    "Wrong permission {label}: define either roles or role, not both"
                )))
            }
            _ => {
                return Err(AclError::configuration(format!(
                    "Wrong permission {label}: roles must be a non-empty list of strings or role a string"
                )))
            }
        };

        let predicate = required_predicate(map, &label)?;
        let priority = priority_of(map, &label)?;

        Ok(Self::new(
            Clause::from_text(predicate, context)?,
            roles,
            priority,
            Some(RawPermission::ConfigMap(map.clone())),
        ))
    }

    /// Appends a clause; it is evaluated only when every earlier clause holds.
    pub fn and_then(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    /// Evaluates the clauses in order.
    pub fn resolve(&self, request: &AclRequest) -> AclResult<bool> {
        for clause in &self.clauses {
            if !clause.evaluate(self, request)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn raw(&self) -> Option<&RawPermission> {
        self.raw.as_ref()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// The raw definition of the permission attached to the request
    pub fn get_raw(request: &AclRequest) -> Option<&RawPermission> {
        request.attached_permission().and_then(|p| p.raw())
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permission")
            .field("id", &self.id)
            .field("roles", &self.roles)
            .field("priority", &self.priority)
            .field("clauses", &self.clauses)
            .finish()
    }
}

fn required_predicate<'a>(doc: &'a Document, label: &str) -> AclResult<&'a str> {
    doc.get("predicate")
        .and_then(Value::as_str)
        .ok_or_else(|| AclError::configuration(format!("Wrong permission {label}: predicate must be a string")))
}

fn priority_of(doc: &Document, label: &str) -> AclResult<i32> {
    match doc.get("priority") {
        None | Some(Value::Null) => {
            log_permissions_warn!(
                "permission {} has no priority, it will be evaluated last with priority {}",
                label,
                DEFAULT_PRIORITY
            );
            Ok(DEFAULT_PRIORITY)
        }
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|p| i32::try_from(p).ok())
            .ok_or_else(|| AclError::configuration(format!("Wrong permission {label}: priority must be a 32-bit integer"))),
        Some(_) => Err(AclError::configuration(format!(
            "Wrong permission {label}: priority must be a number"
        ))),
    }
}

/// Load-time rewriting of permissions.
///
/// When `resolve` accepts a permission, `extra` is appended to its predicate
/// as an `and` clause. Transformers run before the permissions are shared
/// with request threads.
#[derive(Clone)]
pub struct Transformer {
    resolve: Arc<dyn Fn(&Permission) -> bool + Send + Sync>,
    extra: Arc<dyn Fn(&Permission, &AclRequest) -> bool + Send + Sync>,
}

impl Transformer {
    pub fn new<R, E>(resolve: R, extra: E) -> Self
    where
        R: Fn(&Permission) -> bool + Send + Sync + 'static,
        E: Fn(&Permission, &AclRequest) -> bool + Send + Sync + 'static,
    {
        Self {
            resolve: Arc::new(resolve),
            extra: Arc::new(extra),
        }
    }

    /// Appends the extra clause if the permission is selected. Returns true
    /// when the permission was changed.
    pub fn transform(&self, permission: &mut Permission) -> bool {
        if !(self.resolve)(permission) {
            return false;
        }

        let extra = Arc::clone(&self.extra);
        permission.and_then(Clause::Function(Arc::new(
            move |p: &Permission, request: &AclRequest| -> AclResult<bool> { Ok(extra(p, request)) },
        )));
        log_permissions_debug!("transformed permission {:?}", permission);
        true
    }
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transformer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    fn context() -> Arc<PredicateContext> {
        Arc::new(PredicateContext::default())
    }

    #[test]
    fn test_from_document() {
        let raw = doc(json!({
            "_id": "canRead",
            "roles": ["user", "user"],
            "priority": 10,
            "predicate": "method(GET)",
            "mongo": {"allowWriteMode": false}
        }));
        let permission = Permission::from_document(&raw, context()).unwrap();
        assert_eq!(permission.id(), Some(&json!("canRead")));
        assert_eq!(permission.roles(), &["user".to_string()]);
        assert_eq!(permission.priority(), 10);
        assert!(matches!(permission.raw(), Some(RawPermission::Document(_))));
        assert!(permission.resolve(&AclRequest::new("GET", "/")).unwrap());
        assert!(!permission.resolve(&AclRequest::new("PUT", "/")).unwrap());
    }

    #[test]
    fn test_from_document_errors() {
        let ctx = context();
        assert!(Permission::from_document(&doc(json!({"roles": [], "predicate": "true"})), ctx.clone()).is_err());
        assert!(Permission::from_document(&doc(json!({"roles": [1], "predicate": "true"})), ctx.clone()).is_err());
        assert!(Permission::from_document(&doc(json!({"roles": ["a"]})), ctx.clone()).is_err());
        assert!(
            Permission::from_document(&doc(json!({"roles": ["a"], "predicate": "nope("})), ctx.clone())
                .unwrap_err()
                .is_configuration()
        );
        assert!(
            Permission::from_document(&doc(json!({"roles": ["a"], "predicate": "true", "priority": "x"})), ctx)
                .is_err()
        );
    }

    #[test]
    fn test_from_config_roles() {
        let ctx = context();
        let single = Permission::from_config(&doc(json!({"role": "admin", "predicate": "true"})), ctx.clone()).unwrap();
        assert_eq!(single.roles(), &["admin".to_string()]);
        assert_eq!(single.priority(), DEFAULT_PRIORITY);
        assert!(matches!(single.raw(), Some(RawPermission::ConfigMap(_))));

        let both = doc(json!({"role": "a", "roles": ["b"], "predicate": "true"}));
        assert!(Permission::from_config(&both, ctx).is_err());
    }

    #[test]
    fn test_interpolated_predicate() {
        let raw = doc(json!({"roles": ["user"], "priority": 1, "predicate": "path(@user.home)"}));
        let permission = Permission::from_document(&raw, context()).unwrap();
        assert!(matches!(permission.clauses()[0], Clause::Interpolated { .. }));

        let account = Account::mongo("u", vec!["user".into()], doc(json!({"home": "/home/u"})));
        let own = AclRequest::new("GET", "/home/u").with_account(account.clone());
        let other = AclRequest::new("GET", "/home/x").with_account(account);
        assert!(permission.resolve(&own).unwrap());
        assert!(!permission.resolve(&other).unwrap());
        assert!(!permission.resolve(&AclRequest::new("GET", "/home/u")).unwrap());
    }

    #[test]
    fn test_transformer_appends_clause_after_original() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut permission = Permission::from_predicate("method(GET)", vec!["user".into()], 1, context()).unwrap();
        let transformer = Transformer::new(
            |p| p.has_role("user"),
            move |_, request| {
                counter.fetch_add(1, Ordering::SeqCst);
                request.path().starts_with("/public")
            },
        );

        assert!(transformer.transform(&mut permission));
        assert_eq!(permission.clauses().len(), 2);

        assert!(permission.resolve(&AclRequest::new("GET", "/public/a")).unwrap());
        assert!(!permission.resolve(&AclRequest::new("GET", "/private")).unwrap());
        // original clause fails first, extra clause never runs
        assert!(!permission.resolve(&AclRequest::new("POST", "/public/a")).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let mut admin = Permission::from_predicate("true", vec!["admin".into()], 1, context()).unwrap();
        assert!(!transformer.transform(&mut admin));
        assert_eq!(admin.clauses().len(), 1);
    }

    #[test]
    fn test_get_raw_of_attached_permission() {
        let raw = doc(json!({"roles": ["user"], "priority": 1, "predicate": "true"}));
        let permission = Arc::new(Permission::from_document(&raw, context()).unwrap());

        let mut request = AclRequest::new("GET", "/");
        assert!(Permission::get_raw(&request).is_none());
        request.attach_permission(permission);
        assert_eq!(Permission::get_raw(&request).map(RawPermission::as_document), Some(&raw));
    }
}
