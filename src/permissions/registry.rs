//! Permission registry
//!
//! Collects veto, allow and authentication-requirement predicates and
//! combines them into one authorization decision. Registration happens while
//! the service starts; request threads read an immutable snapshot of the
//! registered rules without taking locks.

use super::permission::Permission;
use crate::error::AclResult;
use crate::request::AclRequest;
use crate::{log_registry_debug, log_registry_warn};
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

/// A predicate over requests
pub type RequestPredicate = Arc<dyn Fn(&AclRequest) -> AclResult<bool> + Send + Sync>;

/// Finds the permission that authorizes a request
pub trait PermissionMatcher: Send + Sync {
    fn matching_permission(&self, request: &AclRequest) -> AclResult<Option<Arc<Permission>>>;
}

/// Outcome of [`PermissionRegistry::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Allowed,
    /// Vetoed, or allowed by no rule
    Forbidden,
    /// Authentication is required and the request has no account
    Unauthenticated,
}

#[derive(Clone)]
enum AllowRule {
    Predicate(RequestPredicate),
    Matcher(Arc<dyn PermissionMatcher>),
    /// Every permission registered with `register_permission`, evaluated at
    /// the position the first one was registered
    Permissions,
}

#[derive(Clone, Default)]
struct Rules {
    vetoes: Vec<RequestPredicate>,
    allows: Vec<AllowRule>,
    /// Sorted by priority, stable among equal priorities
    permissions: Vec<Arc<Permission>>,
    authentication_requirements: Vec<RequestPredicate>,
}

/// Registry of authorization rules.
///
/// A request is authorized when no veto holds, authentication is either not
/// required or present, and at least one allow rule holds. A rule that fails
/// with an error does not match: a failing veto does not veto and a failing
/// allow rule does not allow.
pub struct PermissionRegistry {
    rules: ArcSwap<Rules>,
}

impl Default for PermissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PermissionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules = self.rules.load();
        f.debug_struct("PermissionRegistry")
            .field("vetoes", &rules.vetoes.len())
            .field("allows", &rules.allows.len())
            .field("permissions", &rules.permissions.len())
            .field("authentication_requirements", &rules.authentication_requirements.len())
            .finish()
    }
}

impl PermissionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: ArcSwap::from_pointee(Rules::default()),
        }
    }

    fn update(&self, f: impl Fn(&mut Rules)) {
        self.rules.rcu(|current| {
            let mut next = Rules::clone(current);
            f(&mut next);
            next
        });
    }

    /// Registers a predicate that denies every request it holds for.
    pub fn register_veto<F>(&self, predicate: F)
    where
        F: Fn(&AclRequest) -> AclResult<bool> + Send + Sync + 'static,
    {
        let predicate: RequestPredicate = Arc::new(predicate);
        self.update(|rules| rules.vetoes.push(Arc::clone(&predicate)));
    }

    /// Registers a predicate that grants every request it holds for.
    pub fn register_allow<F>(&self, predicate: F)
    where
        F: Fn(&AclRequest) -> AclResult<bool> + Send + Sync + 'static,
    {
        let predicate: RequestPredicate = Arc::new(predicate);
        self.update(|rules| rules.allows.push(AllowRule::Predicate(Arc::clone(&predicate))));
    }

    /// Registers an allow rule that attaches the permission it matched to
    /// the request.
    pub fn register_authorizer(&self, matcher: Arc<dyn PermissionMatcher>) {
        self.update(|rules| rules.allows.push(AllowRule::Matcher(Arc::clone(&matcher))));
    }

    /// Registers a single permission as an allow rule. Registered
    /// permissions are tried in priority order, lowest value first, whatever
    /// order they were registered in.
    pub fn register_permission(&self, permission: Permission) {
        let permission = Arc::new(permission);
        self.update(|rules| {
            if rules.permissions.is_empty() {
                rules.allows.push(AllowRule::Permissions);
            }
            let idx = rules
                .permissions
                .partition_point(|p| p.priority() <= permission.priority());
            rules.permissions.insert(idx, Arc::clone(&permission));
        });
    }

    /// Registers a predicate that, when it holds, requires the request to be
    /// authenticated.
    pub fn register_authentication_requirement<F>(&self, predicate: F)
    where
        F: Fn(&AclRequest) -> AclResult<bool> + Send + Sync + 'static,
    {
        let predicate: RequestPredicate = Arc::new(predicate);
        self.update(|rules| rules.authentication_requirements.push(Arc::clone(&predicate)));
    }

    /// Decides a request. On success the permission that allowed it, if the
    /// allow rule carries one, is attached to the request.
    pub fn check(&self, request: &mut AclRequest) -> AuthorizationDecision {
        let rules = self.rules.load();
        let permission = match Self::decide(&rules, request) {
            Ok(permission) => permission,
            Err(decision) => return decision,
        };

        if let Some(permission) = permission {
            request.attach_permission(permission);
        }
        AuthorizationDecision::Allowed
    }

    /// The permission of the allow rule that matched, or the denial.
    fn decide(rules: &Rules, request: &AclRequest) -> Result<Option<Arc<Permission>>, AuthorizationDecision> {
        if rules
            .vetoes
            .iter()
            .any(|veto| holds("veto", veto, request))
        {
            log_registry_debug!("{} {} vetoed", request.method(), request.path());
            return Err(AuthorizationDecision::Forbidden);
        }

        if !request.is_authenticated()
            && rules
                .authentication_requirements
                .iter()
                .any(|requirement| holds("authentication requirement", requirement, request))
        {
            log_registry_debug!("{} {} requires authentication", request.method(), request.path());
            return Err(AuthorizationDecision::Unauthenticated);
        }

        for rule in rules.allows.iter() {
            match rule {
                AllowRule::Predicate(predicate) => {
                    if holds("allow", predicate, request) {
                        return Ok(None);
                    }
                }
                AllowRule::Matcher(matcher) => match matcher.matching_permission(request) {
                    Ok(Some(permission)) => {
                        log_registry_debug!(
                            "{} {} allowed by {:?}",
                            request.method(),
                            request.path(),
                            permission
                        );
                        return Ok(Some(permission));
                    }
                    Ok(None) => {}
                    Err(e) => log_registry_warn!("error evaluating allow rule, not allowing: {}", e),
                },
                AllowRule::Permissions => {
                    for permission in rules.permissions.iter() {
                        match permission.resolve(request) {
                            Ok(true) => {
                                log_registry_debug!(
                                    "{} {} allowed by {:?}",
                                    request.method(),
                                    request.path(),
                                    permission
                                );
                                return Ok(Some(Arc::clone(permission)));
                            }
                            Ok(false) => {}
                            Err(e) => log_registry_warn!("error evaluating permission, not allowing: {}", e),
                        }
                    }
                }
            }
        }

        log_registry_debug!("{} {} not allowed by any rule", request.method(), request.path());
        Err(AuthorizationDecision::Forbidden)
    }

    /// Returns true if the request is authorized.
    pub fn authorize(&self, request: &mut AclRequest) -> bool {
        self.check(request) == AuthorizationDecision::Allowed
    }

    /// Returns true if some authentication requirement holds for the request.
    pub fn is_authentication_required(&self, request: &AclRequest) -> bool {
        self.rules
            .load()
            .authentication_requirements
            .iter()
            .any(|requirement| holds("authentication requirement", requirement, request))
    }
}

fn holds(kind: &str, predicate: &RequestPredicate, request: &AclRequest) -> bool {
    match predicate(request) {
        Ok(result) => result,
        Err(e) => {
            log_registry_warn!("error evaluating {} predicate, treating it as not matching: {}", kind, e);
            false
        }
    }
}
