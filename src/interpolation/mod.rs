//! # Variable interpolation
//!
//! Permissions refer to runtime context through variables: `@user`,
//! `@request`, `@mongoPermissions`, `@filter`, `@now` and the legacy `%USER`,
//! `%ROLES` and `%NOW`. Two modes are supported:
//!
//! * structured mode rebuilds a document, resolving string values that are
//!   exactly a token ([`interpolate_value`]);
//! * predicate mode rewrites predicate text, replacing `@user.<path>` and
//!   `@request.body.<path>` with quoted literals ([`interpolate_predicate`]).
//!
//! Both are pure functions of their inputs.

pub mod predicate;
pub mod structured;
pub mod tokenizer;

pub use predicate::{
    has_variables, interpolate_predicate, interpolate_predicate_text, interpolate_predicate_with,
    VariableScope, REQUEST_BODY_PREFIX, USER_PREFIX,
};
pub use structured::{interpolate_document, interpolate_value, request_document, resolve_token};
pub use tokenizer::{normalize_quotes, tokenize, Segment};
