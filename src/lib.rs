//! # MongoDB ACL engine
//!
//! Authorization for REST services that expose MongoDB: which requests are
//! allowed, and with which restrictions on the data they touch.
//!
//! ## Core Components
//!
//! * `permissions` - Permissions, the registry deciding requests, the
//!   role-based ACL authorizer and per-permission MongoDB restrictions
//! * `predicate` - The request predicate language permissions are written in
//! * `interpolation` - Resolution of `@user`, `@request` and other variables
//!   in filters and predicate text
//! * `security` - Aggregation pipeline validation
//! * `config` - TOML configuration
//! * `request`, `account`, `document` - The request model the engine reads
//!
//! ## Architecture
//!
//! A service builds an [`AclAuthorizer`] from its configuration and
//! registers it, together with any veto or allow rules of its own, in a
//! [`PermissionRegistry`]. Each request is then decided by the registry; the
//! permission that allowed it stays attached to the request, and
//! [`MongoPermissions`] derived from it restrict filters, request bodies and
//! responses. Aggregation pipelines are checked by a
//! [`PipelineSecurityValidator`] built from the same configuration.

pub mod account;
pub mod config;
pub mod document;
pub mod error;
pub mod interpolation;
pub mod logging;
pub mod permissions;
pub mod predicate;
pub mod request;
pub mod security;

// Re-export main types for convenience
pub use account::Account;
pub use config::{AclConfig, AclSection, AggregationSecurityConfig};
pub use document::Document;
pub use error::{AclError, AclResult};
pub use logging::{LogConfig, LoggingSystem};
pub use permissions::{
    AclAuthorizer, AuthorizationDecision, MongoPermissions, Permission, PermissionRegistry,
    Transformer, ALLOW_ALL,
};
pub use predicate::{CompiledPredicate, PredicateContext, PredicateFunction};
pub use request::{AclRequest, MongoRequestInfo, ResourceType};
pub use security::{PipelineSecurityValidator, SecurityPolicy, SecurityViolation, ViolationType};
