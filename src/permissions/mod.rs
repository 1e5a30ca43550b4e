//! # Permissions
//!
//! Permission definitions, the registry combining veto, allow and
//! authentication rules, the role-based ACL authorizer and the MongoDB
//! restrictions a matched permission carries.

pub mod acl;
pub mod mongo;
pub mod permission;
pub mod registry;

pub use acl::AclAuthorizer;
pub use mongo::{MongoPermissions, ALLOW_ALL};
pub use permission::{Clause, ClauseFn, Permission, RawPermission, Transformer, DEFAULT_PRIORITY};
pub use registry::{AuthorizationDecision, PermissionMatcher, PermissionRegistry, RequestPredicate};
