//! Predicate-text interpolation.
//!
//! `@user.<path>` and `@request.body.<path>` variables are replaced with
//! quoted literals taken from the account properties and the request body.
//! Variables that cannot be bound are elided, together with the rest of the
//! argument they appear in, and replaced by an opaque literal that matches
//! nothing.

use super::tokenizer::{quote_literal, restore_quotes, tokenize, Segment};
use crate::document::{flatten, is_primitive, lookup, primitive_text, Document};
use crate::error::{AclError, AclResult};
use crate::log_interpolation_debug;
use crate::predicate::{CompiledPredicate, PredicateContext, PredicateParser};
use crate::request::AclRequest;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Prefix of account property variables
pub const USER_PREFIX: &str = "@user.";

/// Prefix of request body variables
pub const REQUEST_BODY_PREFIX: &str = "@request.body.";

/// Values bound to one variable prefix
#[derive(Debug, Clone)]
pub struct VariableScope<'a> {
    prefix: &'a str,
    values: Option<&'a Document>,
    flattened: HashMap<String, Value>,
}

impl<'a> VariableScope<'a> {
    pub fn new(prefix: &'a str, values: Option<&'a Document>) -> Self {
        let flattened = values
            .map(|doc| flatten(doc).into_iter().collect())
            .unwrap_or_default();
        Self {
            prefix,
            values,
            flattened,
        }
    }

    /// Renders the value at `path`, `None` when it is unbound or has no
    /// literal form.
    fn render(&self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }

        let value = match self.flattened.get(path) {
            Some(v) => v,
            None => {
                let doc = self.values?;
                let (head, rest) = path.split_once('.').unwrap_or((path, ""));
                lookup(doc.get(head)?, rest)?
            }
        };

        render_value(value)
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let elements: Vec<String> = items
                .iter()
                .filter(|item| is_primitive(item))
                .filter_map(primitive_text)
                .map(|text| quote_literal(&text))
                .collect();
            Some(format!("{{{}}}", elements.join(",")))
        }
        other => primitive_text(other).map(|text| quote_literal(&text)),
    }
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '$')
}

fn unbound_literal() -> String {
    quote_literal(&format!("unbound-{}", Uuid::new_v4()))
}

/// Substitutes variables in one run of unquoted text.
fn substitute(text: &str, scopes: &[VariableScope<'_>]) -> String {
    let mut ret = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        // earliest occurrence wins; on a tie the longer prefix does
        let next = scopes
            .iter()
            .filter_map(|scope| rest.find(scope.prefix).map(|idx| (idx, scope)))
            .min_by_key(|(idx, scope)| (*idx, std::cmp::Reverse(scope.prefix.len())));

        let Some((idx, scope)) = next else {
            ret.push_str(rest);
            break;
        };

        ret.push_str(&rest[..idx]);
        let after = &rest[idx + scope.prefix.len()..];
        let path_len = after.find(|c: char| !is_path_char(c)).unwrap_or(after.len());
        let path = &after[..path_len];

        match scope.render(path) {
            Some(rendered) => {
                ret.push_str(&rendered);
                rest = &after[path_len..];
            }
            None => {
                let end = after.find(|c: char| c == ',' || c == ')').unwrap_or(after.len());
                log_interpolation_debug!(
                    "eliding unbound variable {}{}",
                    scope.prefix,
                    after[..end].trim_end()
                );
                ret.push_str(&unbound_literal());
                rest = &after[end..];
            }
        }
    }

    ret
}

/// Interpolates variables of several prefixes into predicate text.
pub fn interpolate_predicate_text(predicate: &str, scopes: &[VariableScope<'_>]) -> String {
    let mut ret = String::with_capacity(predicate.len());

    for segment in tokenize(predicate) {
        match segment {
            Segment::Text(text) => ret.push_str(&substitute(&text, scopes)),
            Segment::Literal(content) => ret.push_str(&quote_literal(&content)),
        }
    }

    restore_quotes(&ret)
}

/// Interpolates the variables of a single prefix.
pub fn interpolate_predicate_with(predicate: &str, prefix: &str, values: Option<&Document>) -> String {
    interpolate_predicate_text(predicate, &[VariableScope::new(prefix, values)])
}

/// Returns true if the predicate references `@user.` or `@request.body.`
/// outside quoted literals.
pub fn has_variables(predicate: &str) -> bool {
    tokenize(predicate).iter().any(|segment| match segment {
        Segment::Text(text) => text.contains(USER_PREFIX) || text.contains(REQUEST_BODY_PREFIX),
        Segment::Literal(_) => false,
    })
}

/// Interpolates the request's account properties and body into the
/// predicate, then parses it.
///
/// A parse failure is a configuration error naming the original text.
pub fn interpolate_predicate(
    request: &AclRequest,
    predicate: &str,
    context: &PredicateContext,
) -> AclResult<CompiledPredicate> {
    let user = request.account().map(|a| a.properties_as_document());
    let body = match request.body() {
        Some(Value::Object(doc)) => Some(doc),
        _ => None,
    };

    let scopes = [
        VariableScope::new(USER_PREFIX, user.as_ref()),
        VariableScope::new(REQUEST_BODY_PREFIX, body),
    ];

    let interpolated = interpolate_predicate_text(predicate, &scopes);
    log_interpolation_debug!("interpolated predicate {} into {}", predicate, interpolated);

    PredicateParser::parse_predicate(&interpolated, context).map_err(|e| {
        AclError::configuration(format!("Wrong permission: invalid predicate {predicate}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_substitutes_user_properties() {
        let user = doc(json!({"dept": "IT"}));
        let text = interpolate_predicate_with("equals(@user.dept,'IT')", USER_PREFIX, Some(&user));
        assert_eq!(text, "equals('IT','IT')");
        assert!(CompiledPredicate::parse(&text).is_ok());
    }

    #[test]
    fn test_longest_path_wins() {
        let user = doc(json!({"_id": "u1", "_idx": "u2", "a": {"b": 1}}));
        let text = interpolate_predicate_with(
            "equals(@user._idx, @user._id) or equals(@user.a.b, '1')",
            USER_PREFIX,
            Some(&user),
        );
        assert_eq!(text, "equals('u2', 'u1') or equals('1', '1')");
    }

    #[test]
    fn test_arrays_render_as_brace_lists() {
        let user = doc(json!({"roles": ["a", {"x": 1}, 2], "nums": [[1]]}));
        let text = interpolate_predicate_with("in(%u, @user.roles)", USER_PREFIX, Some(&user));
        assert_eq!(text, "in(%u, {'a','2'})");
        assert!(CompiledPredicate::parse(&text).is_ok());
    }

    #[test]
    fn test_array_index_lookup() {
        let user = doc(json!({"tenants": ["t1", "t2"]}));
        let text = interpolate_predicate_with("equals(@user.tenants.1, 't2')", USER_PREFIX, Some(&user));
        assert_eq!(text, "equals('t2', 't2')");
    }

    #[test]
    fn test_unbound_variables_are_elided() {
        let text = interpolate_predicate_with("@user.missing", USER_PREFIX, Some(&Document::new()));
        assert!(!text.contains("@user.missing"));
        assert!(text.starts_with("'unbound-"));

        let text = interpolate_predicate_with("equals(@user.missing.x, 'a')", USER_PREFIX, None);
        assert!(!text.contains("@user"));
        assert!(CompiledPredicate::parse(&text).is_ok());
    }

    #[test]
    fn test_quoted_literals_are_not_substituted() {
        let user = doc(json!({"name": "x"}));
        let text = interpolate_predicate_with("equals('@user.name', \"@user.name\")", USER_PREFIX, Some(&user));
        assert_eq!(text, "equals('@user.name', '@user.name')");
    }

    #[test]
    fn test_values_with_quotes_stay_inside_literals() {
        let user = doc(json!({"name": "o'brien \"jr\""}));
        let text = interpolate_predicate_with("equals(@user.name, %u)", USER_PREFIX, Some(&user));
        assert_eq!(text, r#"equals('o\'brien "jr"', %u)"#);
        assert!(CompiledPredicate::parse(&text).is_ok());
    }

    #[test]
    fn test_extended_json_scalars_render_as_text() {
        let user = doc(json!({"_id": {"$oid": "5f1e"}, "since": {"$date": 1000}}));
        let text = interpolate_predicate_with("in(@user._id, {@user.since})", USER_PREFIX, Some(&user));
        assert_eq!(text, "in('5f1e', {'1000'})");
    }

    #[test]
    fn test_has_variables() {
        assert!(has_variables("equals(@user.a, 'x')"));
        assert!(has_variables("bson-request-prop-equals(key=a, value=@request.body.a)"));
        assert!(!has_variables("equals('@user.a', 'x')"));
        assert!(!has_variables("path('/a')"));
    }
}
