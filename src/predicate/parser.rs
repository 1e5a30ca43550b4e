//! Parser for the request predicate language.
//!
//! The grammar lives in `grammar.pest`. Parsing produces an [`Expression`]
//! tree where built-in functions already have their arguments bound and
//! regular expressions compiled, so evaluation never fails on malformed input.

use super::ast::{ArgValue, Argument, Attribute, Builtin, Expression, Operand};
use super::{CompiledPredicate, PredicateContext, MAX_PREDICATE_DEPTH, MAX_PREDICATE_LENGTH};
use crate::error::{AclError, AclResult};
use crate::log_predicate_debug;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use regex::Regex;
use std::collections::HashMap;

/// Parser for request predicates.
#[derive(Parser)]
#[grammar = "predicate/grammar.pest"]
pub struct PredicateParser;

impl PredicateParser {
    /// Parses a fully interpolated predicate, resolving function names
    /// against the built-ins and the plugin context.
    pub fn parse_predicate(input: &str, context: &PredicateContext) -> AclResult<CompiledPredicate> {
        check_limits(input)?;

        let mut pairs = Self::parse(Rule::predicate, input)
            .map_err(|e| AclError::parse(format!("invalid predicate {input}: {e}")))?;

        let predicate_pair = pairs
            .next()
            .ok_or_else(|| AclError::parse("No predicate found in parse result"))?;

        let expr_pair = predicate_pair
            .into_inner()
            .next()
            .ok_or_else(|| AclError::parse("No expression found inside predicate"))?;

        let expression = build_expression(expr_pair, context)?;
        log_predicate_debug!("parsed predicate {} into {:?}", input, expression);

        Ok(CompiledPredicate::new(input, expression))
    }
}

/// Rejects inputs that are too long or nested too deeply before handing
/// them to the recursive descent parser. Brackets and every `not` applied to
/// an operand count as one level of nesting.
fn check_limits(input: &str) -> AclResult<()> {
    if input.chars().count() > MAX_PREDICATE_LENGTH {
        return Err(AclError::parse(format!(
            "predicate exceeds maximum length of {MAX_PREDICATE_LENGTH} characters"
        )));
    }

    // negations pending at each enclosing bracket
    let mut enclosing: Vec<usize> = Vec::new();
    let mut enclosing_nots = 0usize;
    let mut nots = 0usize;
    let mut word = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in input.chars().chain(std::iter::once(' ')) {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            if word.eq_ignore_ascii_case("not") {
                nots += 1;
            } else {
                nots = 0;
            }
            word.clear();
        }

        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '{' => {
                enclosing.push(nots);
                enclosing_nots += nots;
                nots = 0;
            }
            ')' | '}' => {
                enclosing_nots -= enclosing.pop().unwrap_or(0);
                nots = 0;
            }
            _ => {}
        }

        if enclosing.len() + enclosing_nots + nots > MAX_PREDICATE_DEPTH {
            return Err(AclError::parse(format!(
                "predicate exceeds maximum nesting depth of {MAX_PREDICATE_DEPTH}"
            )));
        }
    }

    Ok(())
}

fn build_expression(pair: Pair<Rule>, context: &PredicateContext) -> AclResult<Expression> {
    match pair.as_rule() {
        Rule::or_expr | Rule::and_expr => {
            let is_or = pair.as_rule() == Rule::or_expr;
            let mut pairs = pair.into_inner();

            let first = pairs
                .next()
                .ok_or_else(|| AclError::parse("No operand found in boolean expression"))?;
            let mut expr = build_expression(first, context)?;

            while let Some(op_pair) = pairs.next() {
                if matches!(op_pair.as_rule(), Rule::or_op | Rule::and_op) {
                    let right_pair = pairs
                        .next()
                        .ok_or_else(|| AclError::parse("No right operand found in boolean expression"))?;
                    let right = build_expression(right_pair, context)?;

                    expr = if is_or {
                        Expression::Or(Box::new(expr), Box::new(right))
                    } else {
                        Expression::And(Box::new(expr), Box::new(right))
                    };
                }
            }

            Ok(expr)
        }
        Rule::unary => {
            let mut pairs = pair.into_inner();
            let first = pairs
                .next()
                .ok_or_else(|| AclError::parse("Empty unary expression"))?;

            if first.as_rule() == Rule::not_op {
                let operand = pairs
                    .next()
                    .ok_or_else(|| AclError::parse("No operand found after not"))?;
                Ok(Expression::Not(Box::new(build_expression(operand, context)?)))
            } else {
                build_expression(first, context)
            }
        }
        Rule::boolean => Ok(Expression::Literal(pair.as_str() == "true")),
        Rule::call => build_call(pair, context),
        other => Err(AclError::parse(format!("Unexpected rule: {other:?}"))),
    }
}

fn build_call(pair: Pair<Rule>, context: &PredicateContext) -> AclResult<Expression> {
    let mut pairs = pair.into_inner();
    let name = pairs
        .next()
        .ok_or_else(|| AclError::parse("No function name found in call"))?
        .as_str()
        .to_string();

    let mut args = Vec::new();
    if let Some(arguments) = pairs.next() {
        for argument in arguments.into_inner() {
            args.push(build_argument(argument)?);
        }
    }

    if let Some(builtin) = bind_builtin(&name, &args)? {
        return Ok(Expression::Builtin(builtin));
    }

    match context.function(&name) {
        Some(function) => Ok(Expression::Custom { name, args, function }),
        None => Err(AclError::parse(format!("Unknown predicate function: {name}"))),
    }
}

fn build_argument(pair: Pair<Rule>) -> AclResult<Argument> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| AclError::parse("Empty argument"))?;

    match inner.as_rule() {
        Rule::named_argument => {
            let mut parts = inner.into_inner();
            let key = parts
                .next()
                .ok_or_else(|| AclError::parse("No key found in named argument"))?
                .as_str()
                .to_string();
            let value = parts
                .next()
                .ok_or_else(|| AclError::parse(format!("No value found for argument {key}")))?;
            Ok(Argument {
                name: Some(key),
                value: build_value(value)?,
            })
        }
        Rule::value => Ok(Argument {
            name: None,
            value: build_value(inner)?,
        }),
        other => Err(AclError::parse(format!("Unexpected rule in argument: {other:?}"))),
    }
}

fn build_value(pair: Pair<Rule>) -> AclResult<ArgValue> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| AclError::parse("Empty value"))?;

    if inner.as_rule() == Rule::array {
        let mut operands = Vec::new();
        for element in inner.into_inner() {
            let element = element
                .into_inner()
                .next()
                .ok_or_else(|| AclError::parse("Empty array element"))?;
            operands.push(build_operand(element)?);
        }
        Ok(ArgValue::Array(operands))
    } else {
        Ok(ArgValue::Single(build_operand(inner)?))
    }
}

fn build_operand(pair: Pair<Rule>) -> AclResult<Operand> {
    match pair.as_rule() {
        Rule::single_quoted | Rule::double_quoted => {
            let text = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Operand::Literal(unescape(text)))
        }
        Rule::attribute => {
            let code = pair.as_str().chars().nth(1).unwrap_or('?');
            Attribute::from_code(code)
                .map(Operand::Attribute)
                .ok_or_else(|| AclError::parse(format!("Unknown exchange attribute: {}", pair.as_str())))
        }
        Rule::bare => Ok(Operand::Literal(pair.as_str().to_string())),
        Rule::array => Err(AclError::parse("Nested arrays are not supported")),
        other => Err(AclError::parse(format!("Unexpected rule in value: {other:?}"))),
    }
}

/// A backslash escapes the character that follows it.
fn unescape(text: &str) -> String {
    let mut ret = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                ret.push(next);
            }
        } else {
            ret.push(c);
        }
    }
    ret
}

/// Positional and named arguments of a call
struct CallArgs<'a> {
    name: &'a str,
    positional: Vec<&'a ArgValue>,
    named: HashMap<&'a str, &'a ArgValue>,
}

impl<'a> CallArgs<'a> {
    fn new(name: &'a str, args: &'a [Argument]) -> Self {
        let mut positional = Vec::new();
        let mut named = HashMap::new();
        for arg in args {
            match &arg.name {
                Some(key) => {
                    named.insert(key.as_str(), &arg.value);
                }
                None => positional.push(&arg.value),
            }
        }
        Self { name, positional, named }
    }

    /// Operands of the named argument followed by every positional operand.
    fn collect(&self, key: &str) -> Vec<Operand> {
        let mut ret: Vec<Operand> = self
            .named
            .get(key)
            .map(|v| v.operands().into_iter().cloned().collect())
            .unwrap_or_default();
        for value in &self.positional {
            ret.extend(value.operands().into_iter().cloned());
        }
        ret
    }

    /// A single operand, by name or by position.
    fn single(&self, key: &str, position: usize) -> AclResult<Option<Operand>> {
        let value = self.named.get(key).copied().or_else(|| self.positional.get(position).copied());
        match value {
            None => Ok(None),
            Some(ArgValue::Single(op)) => Ok(Some(op.clone())),
            Some(ArgValue::Array(_)) => Err(AclError::parse(format!(
                "{}: argument {key} must be a single value",
                self.name
            ))),
        }
    }

    /// Operands by name, or every positional operand from `from` onwards.
    fn rest(&self, key: &str, from: usize) -> Vec<Operand> {
        match self.named.get(key) {
            Some(value) => value.operands().into_iter().cloned().collect(),
            None => self
                .positional
                .iter()
                .skip(from)
                .flat_map(|v| v.operands().into_iter().cloned())
                .collect(),
        }
    }

    fn literals(&self, key: &str) -> AclResult<Vec<String>> {
        self.collect(key)
            .into_iter()
            .map(|op| match op {
                Operand::Literal(s) => Ok(s),
                Operand::Attribute(_) => Err(AclError::parse(format!(
                    "{}: arguments must be literals",
                    self.name
                ))),
            })
            .collect()
    }

    fn required(&self, key: &str, position: usize) -> AclResult<Operand> {
        self.single(key, position)?
            .ok_or_else(|| AclError::parse(format!("{}: missing argument {key}", self.name)))
    }

    fn required_literal(&self, key: &str, position: usize) -> AclResult<String> {
        match self.required(key, position)? {
            Operand::Literal(s) => Ok(s),
            Operand::Attribute(_) => Err(AclError::parse(format!(
                "{}: argument {key} must be a literal",
                self.name
            ))),
        }
    }
}

fn bind_builtin(name: &str, args: &[Argument]) -> AclResult<Option<Builtin>> {
    let call = CallArgs::new(name, args);

    let builtin = match name {
        "path" | "path-prefix" | "path-suffix" => {
            let paths = call.collect("path");
            if paths.is_empty() {
                return Err(AclError::parse(format!("{name}: requires at least one path")));
            }
            match name {
                "path" => Builtin::Path(paths),
                "path-prefix" => Builtin::PathPrefix(paths),
                _ => Builtin::PathSuffix(paths),
            }
        }
        "method" => {
            let methods = call.literals("value")?;
            if methods.is_empty() {
                return Err(AclError::parse("method: requires at least one method"));
            }
            Builtin::Method(methods.into_iter().map(|m| m.to_uppercase()).collect())
        }
        "equals" => {
            let values = call.collect("value");
            if values.len() < 2 {
                return Err(AclError::parse("equals: requires at least two values"));
            }
            Builtin::Equals(values)
        }
        "in" => Builtin::In {
            value: call.required("value", 0)?,
            array: call.rest("array", 1),
        },
        "contains" => Builtin::Contains {
            value: call.required("value", 0)?,
            search: call.rest("search", 1),
        },
        "regex" => {
            let pattern = call.required_literal("pattern", 0)?;
            let value = call
                .single("value", 1)?
                .unwrap_or(Operand::Attribute(Attribute::RequestPath));
            let full_match = call
                .single("full-match", 2)?
                .and_then(|op| op.literal().map(|s| s.eq_ignore_ascii_case("true")))
                .unwrap_or(false);
            let pattern = if full_match {
                format!("^(?:{pattern})$")
            } else {
                pattern
            };
            let pattern = Regex::new(&pattern)
                .map_err(|e| AclError::parse(format!("regex: invalid pattern {pattern}: {e}")))?;
            Builtin::Regex { value, pattern }
        }
        "qparams-contain" => Builtin::QParamsContain(call.literals("keys")?),
        "qparams-blacklist" => Builtin::QParamsBlacklist(call.literals("keys")?),
        "qparams-whitelist" => Builtin::QParamsWhitelist(call.literals("keys")?),
        "qparams-size" => {
            let size = call.required_literal("size", 0)?;
            let size = size
                .parse::<usize>()
                .map_err(|_| AclError::parse(format!("qparams-size: invalid size {size}")))?;
            Builtin::QParamsSize(size)
        }
        "bson-request-contains" => Builtin::BsonRequestContains(call.literals("keys")?),
        "bson-request-whitelist" => Builtin::BsonRequestWhitelist(call.literals("keys")?),
        "bson-request-blacklist" => Builtin::BsonRequestBlacklist(call.literals("keys")?),
        "bson-request-prop-equals" => {
            let key = call.required_literal("key", 0)?;
            let text = call.required_literal("value", 1)?;
            let value = serde_json::from_str(&text).map_err(|e| {
                AclError::parse(format!("bson-request-prop-equals: value is not valid JSON {text}: {e}"))
            })?;
            Builtin::BsonRequestPropEquals { key, value }
        }
        _ => return Ok(None),
    };

    Ok(Some(builtin))
}
