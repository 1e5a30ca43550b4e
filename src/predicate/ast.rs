//! Abstract syntax tree of the request predicate language.

use crate::request::AclRequest;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::PredicateFunction;

/// Exchange attribute referenced with `%x` syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// `%u` authenticated user name
    UserName,
    /// `%U` and `%R` request path
    RequestPath,
    /// `%m` request method
    Method,
    /// `%q` query string
    QueryString,
}

impl Attribute {
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'u' => Some(Attribute::UserName),
            'U' | 'R' => Some(Attribute::RequestPath),
            'm' => Some(Attribute::Method),
            'q' => Some(Attribute::QueryString),
            _ => None,
        }
    }

    /// Reads the attribute from the request; an anonymous user name is `None`.
    pub fn read(&self, request: &AclRequest) -> Option<String> {
        match self {
            Attribute::UserName => request.user_name().map(str::to_string),
            Attribute::RequestPath => Some(request.path().to_string()),
            Attribute::Method => Some(request.method().to_string()),
            Attribute::QueryString => Some(request.query_string()),
        }
    }
}

/// A single argument value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Literal(String),
    Attribute(Attribute),
}

impl Operand {
    pub fn resolve(&self, request: &AclRequest) -> Option<String> {
        match self {
            Operand::Literal(s) => Some(s.clone()),
            Operand::Attribute(a) => a.read(request),
        }
    }

    /// The literal text, `None` for attributes
    pub fn literal(&self) -> Option<&str> {
        match self {
            Operand::Literal(s) => Some(s),
            Operand::Attribute(_) => None,
        }
    }
}

/// Value of an argument: a scalar operand or a `{...}` array of operands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Single(Operand),
    Array(Vec<Operand>),
}

impl ArgValue {
    /// The operands of the value, arrays expanded.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            ArgValue::Single(op) => vec![op],
            ArgValue::Array(ops) => ops.iter().collect(),
        }
    }
}

/// A call argument, positional when `name` is `None`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: Option<String>,
    pub value: ArgValue,
}

/// Built-in predicate functions with their arguments bound
#[derive(Debug, Clone)]
pub enum Builtin {
    Path(Vec<Operand>),
    PathPrefix(Vec<Operand>),
    PathSuffix(Vec<Operand>),
    Method(Vec<String>),
    Equals(Vec<Operand>),
    In { value: Operand, array: Vec<Operand> },
    Contains { value: Operand, search: Vec<Operand> },
    Regex { value: Operand, pattern: Regex },
    QParamsContain(Vec<String>),
    QParamsBlacklist(Vec<String>),
    QParamsWhitelist(Vec<String>),
    QParamsSize(usize),
    BsonRequestContains(Vec<String>),
    BsonRequestWhitelist(Vec<String>),
    BsonRequestBlacklist(Vec<String>),
    BsonRequestPropEquals { key: String, value: Value },
}

/// A parsed predicate expression
#[derive(Clone)]
pub enum Expression {
    Literal(bool),
    Not(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Builtin(Builtin),
    Custom {
        name: String,
        args: Vec<Argument>,
        function: Arc<dyn PredicateFunction>,
    },
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(b) => write!(f, "Literal({b})"),
            Expression::Not(e) => f.debug_tuple("Not").field(e).finish(),
            Expression::And(l, r) => f.debug_tuple("And").field(l).field(r).finish(),
            Expression::Or(l, r) => f.debug_tuple("Or").field(l).field(r).finish(),
            Expression::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            Expression::Custom { name, args, .. } => {
                f.debug_struct("Custom").field("name", name).field("args", args).finish()
            }
        }
    }
}
