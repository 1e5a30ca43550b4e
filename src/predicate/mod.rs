//! # Request predicate language
//!
//! Permissions select the requests they apply to with a boolean predicate
//! written in a small expression language:
//!
//! ```text
//! path-prefix('/db/coll') and (method(GET) or method(OPTIONS))
//! not bson-request-blacklist(password, roles)
//! in(value=%u, array={'alice', 'bob'})
//! ```
//!
//! Predicates are parsed once into an [`Expression`] tree and then evaluated
//! against every [`AclRequest`]. Functions beyond the built-ins can be plugged
//! in through a [`PredicateContext`].

pub mod ast;
pub mod eval;
pub mod parser;

pub use ast::{ArgValue, Argument, Attribute, Builtin, Expression, Operand};
pub use parser::PredicateParser;

use crate::error::AclResult;
use crate::request::AclRequest;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Longest predicate accepted by the parser, in characters
pub const MAX_PREDICATE_LENGTH: usize = 4096;

/// Deepest nesting of parentheses and arrays accepted by the parser
pub const MAX_PREDICATE_DEPTH: usize = 32;

/// A predicate function supplied by the embedding application.
pub trait PredicateFunction: Send + Sync + fmt::Debug {
    fn evaluate(&self, args: &[Argument], request: &AclRequest) -> AclResult<bool>;
}

/// Custom predicate functions available to the parser, by name
#[derive(Debug, Clone, Default)]
pub struct PredicateContext {
    functions: HashMap<String, Arc<dyn PredicateFunction>>,
}

impl PredicateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function. Built-in names cannot be overridden.
    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn PredicateFunction>) {
        self.functions.insert(name.into(), function);
    }

    pub fn with_function(mut self, name: impl Into<String>, function: Arc<dyn PredicateFunction>) -> Self {
        self.register(name, function);
        self
    }

    pub fn function(&self, name: &str) -> Option<Arc<dyn PredicateFunction>> {
        self.functions.get(name).cloned()
    }
}

/// A parsed predicate together with the text it was parsed from
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    source: String,
    expression: Expression,
}

impl CompiledPredicate {
    pub fn new(source: impl Into<String>, expression: Expression) -> Self {
        Self {
            source: source.into(),
            expression,
        }
    }

    /// Parses a predicate with the built-in functions only.
    pub fn parse(source: &str) -> AclResult<Self> {
        PredicateParser::parse_predicate(source, &PredicateContext::default())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Evaluates the predicate against a request.
    pub fn resolve(&self, request: &AclRequest) -> AclResult<bool> {
        self.expression.evaluate(request)
    }
}

impl fmt::Display for CompiledPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
