//! Aggregation pipeline validation
//!
//! Each document stage goes through, in order: the stage blacklist, the
//! cross-database check, the JavaScript check and a recursive scan for
//! blacklisted operators. The first violation found is returned.

use super::policy::SecurityPolicy;
use crate::config::AggregationSecurityConfig;
use crate::error::{AclError, AclResult};
use crate::{log_security_debug, log_security_warn};
use serde_json::Value;
use std::fmt;

/// Kind of a [`SecurityViolation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationType {
    BlacklistedStage,
    BlacklistedOperator,
    CrossDatabaseAccess,
    CrossDatabaseOutput,
    JavaScriptExecution,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::BlacklistedStage => "BLACKLISTED_STAGE",
            ViolationType::BlacklistedOperator => "BLACKLISTED_OPERATOR",
            ViolationType::CrossDatabaseAccess => "CROSS_DATABASE_ACCESS",
            ViolationType::CrossDatabaseOutput => "CROSS_DATABASE_OUTPUT",
            ViolationType::JavaScriptExecution => "JAVASCRIPT_EXECUTION",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline construct rejected by the security policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityViolation {
    pub violation_type: ViolationType,
    /// The stage or operator name, as written in the pipeline
    pub operator: String,
    /// Where it was found, e.g. `pipeline[1].$match.$expr`
    pub location: String,
    pub reason: String,
}

impl SecurityViolation {
    fn new(
        violation_type: ViolationType,
        operator: &str,
        location: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            violation_type,
            operator: operator.to_string(),
            location: location.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Security violation: {} operator '{}' at {} - {}",
            self.violation_type, self.operator, self.location, self.reason
        )
    }
}

/// Validates aggregation pipelines against a [`SecurityPolicy`].
///
/// Validation is a pure function of the policy and its inputs, so one
/// validator can be shared by every request thread.
#[derive(Debug, Clone, Default)]
pub struct PipelineSecurityValidator {
    policy: SecurityPolicy,
}

impl PipelineSecurityValidator {
    #[must_use]
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn from_config(config: &AggregationSecurityConfig) -> AclResult<Self> {
        Ok(Self::new(SecurityPolicy::from_config(config)?))
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Returns the first violation in the pipeline, if any. Stages that are
    /// not documents are skipped.
    pub fn validate_pipeline(&self, pipeline: &[Value], request_database: &str) -> Option<SecurityViolation> {
        if !self.policy.is_enabled() {
            return None;
        }

        log_security_debug!(
            "validating aggregation pipeline with {} stages for database '{}'",
            pipeline.len(),
            request_database
        );

        pipeline.iter().enumerate().find_map(|(i, stage)| match stage {
            Value::Object(stage) => self.validate_stage(stage, request_database, &format!("pipeline[{i}]")),
            _ => None,
        })
    }

    /// Like [`validate_pipeline`](Self::validate_pipeline), failing with
    /// [`AclError::Security`] on the first violation.
    pub fn validate_pipeline_or_throw(&self, pipeline: &[Value], request_database: &str) -> AclResult<()> {
        match self.validate_pipeline(pipeline, request_database) {
            Some(violation) => {
                log_security_warn!("aggregation pipeline rejected: {}", violation);
                Err(AclError::security(violation.to_string()))
            }
            None => Ok(()),
        }
    }

    fn validate_stage(
        &self,
        stage: &serde_json::Map<String, Value>,
        request_database: &str,
        location: &str,
    ) -> Option<SecurityViolation> {
        for (operator, value) in stage {
            log_security_debug!("checking stage {} at {}", operator, location);

            if self.policy.is_blacklisted_stage(operator) {
                return Some(SecurityViolation::new(
                    ViolationType::BlacklistedStage,
                    operator,
                    location,
                    "Pipeline stage is in security blacklist",
                ));
            }

            if !self.policy.allow_cross_database_operations() {
                if let Some(violation) = cross_database_violation(operator, value, request_database, location) {
                    return Some(violation);
                }
            }

            if !self.policy.allow_java_script_execution()
                && matches!(operator.to_lowercase().as_str(), "$where" | "$function" | "$accumulator")
            {
                return Some(SecurityViolation::new(
                    ViolationType::JavaScriptExecution,
                    operator,
                    location,
                    "JavaScript execution is disabled by security policy",
                ));
            }

            if let Some(violation) = self.scan_operators(value, &format!("{location}.{operator}")) {
                return Some(violation);
            }
        }

        None
    }

    /// Walks documents and arrays looking for blacklisted keys. A violation
    /// is located at the document holding the key.
    fn scan_operators(&self, value: &Value, location: &str) -> Option<SecurityViolation> {
        match value {
            Value::Object(doc) => doc.iter().find_map(|(key, nested)| {
                if self.policy.is_blacklisted_operator(key) {
                    Some(SecurityViolation::new(
                        ViolationType::BlacklistedOperator,
                        key,
                        location,
                        "Operator is in security blacklist",
                    ))
                } else {
                    self.scan_operators(nested, &format!("{location}.{key}"))
                }
            }),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .find_map(|(i, item)| self.scan_operators(item, &format!("{location}[{i}]"))),
            _ => None,
        }
    }
}

fn cross_database_violation(
    operator: &str,
    value: &Value,
    request_database: &str,
    location: &str,
) -> Option<SecurityViolation> {
    match operator.to_lowercase().as_str() {
        "$lookup" | "$graphlookup" | "$unionwith" => {
            let reference = value.get("from").or_else(|| value.get("coll"))?.as_str()?;
            let (database, _) = reference.split_once('.')?;
            (database != request_database).then(|| {
                SecurityViolation::new(
                    ViolationType::CrossDatabaseAccess,
                    operator,
                    location,
                    format!(
                        "Stage references database '{database}' but request is for database '{request_database}'"
                    ),
                )
            })
        }
        "$out" | "$merge" => {
            let (database, collection) = output_target(value);
            let qualifier = collection.and_then(|c| c.split_once('.')).map(|(db, _)| db);
            let referenced = [database, qualifier]
                .into_iter()
                .flatten()
                .find(|db| *db != request_database)?;
            Some(SecurityViolation::new(
                ViolationType::CrossDatabaseOutput,
                operator,
                location,
                format!("Stage outputs to database '{referenced}' but request is for database '{request_database}'"),
            ))
        }
        _ => None,
    }
}

/// Target database and collection of `$out`/`$merge`: a plain collection
/// name, `{into: <name>}`, `{into: {db, coll}}` or `{db, coll}`.
fn output_target(value: &Value) -> (Option<&str>, Option<&str>) {
    let target = match value {
        Value::String(collection) => return (None, Some(collection.as_str())),
        Value::Object(doc) => match doc.get("into") {
            Some(Value::String(collection)) => return (None, Some(collection)),
            Some(into) => into,
            None => value,
        },
        _ => return (None, None),
    };

    (
        target.get("db").and_then(Value::as_str),
        target.get("coll").and_then(Value::as_str),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(config: Value) -> PipelineSecurityValidator {
        let mut config: AggregationSecurityConfig = serde_json::from_value(config).unwrap();
        config.enabled = true;
        PipelineSecurityValidator::from_config(&config).unwrap()
    }

    fn check(validator: &PipelineSecurityValidator, pipeline: Value) -> Option<SecurityViolation> {
        validator.validate_pipeline(pipeline.as_array().unwrap(), "mydb")
    }

    #[test]
    fn test_cross_database_lookup() {
        let pipeline = json!([{"$lookup": {"from": "otherdb.coll", "as": "x"}}]);

        let violation = check(&validator(json!({})), pipeline.clone()).unwrap();
        assert_eq!(violation.violation_type, ViolationType::CrossDatabaseAccess);
        assert_eq!(violation.location, "pipeline[0]");
        assert_eq!(
            violation.reason,
            "Stage references database 'otherdb' but request is for database 'mydb'"
        );

        let allowing = validator(json!({"allowCrossDatabaseOperations": true}));
        assert!(check(&allowing, pipeline).is_none());
    }

    #[test]
    fn test_same_database_and_plain_references() {
        let v = validator(json!({}));
        assert!(check(&v, json!([{"$lookup": {"from": "mydb.coll"}}])).is_none());
        assert!(check(&v, json!([{"$lookup": {"from": "coll"}}])).is_none());
        assert!(check(&v, json!([{"$unionWith": {"coll": "a.b.c"}}])).is_some());
        assert!(check(&v, json!([{"$graphLookup": {"from": "mydb.a.b"}}])).is_none());
    }

    #[test]
    fn test_cross_database_output() {
        let v = validator(json!({}));
        for pipeline in [
            json!([{"$out": "other.coll"}]),
            json!([{"$merge": {"into": "other.coll"}}]),
            json!([{"$merge": {"into": {"db": "other", "coll": "c"}}}]),
            json!([{"$out": {"db": "other", "coll": "c"}}]),
        ] {
            let violation = check(&v, pipeline).unwrap();
            assert_eq!(violation.violation_type, ViolationType::CrossDatabaseOutput);
            assert_eq!(violation.reason, "Stage outputs to database 'other' but request is for database 'mydb'");
        }
        assert!(check(&v, json!([{"$out": "coll"}])).is_none());
        assert!(check(&v, json!([{"$merge": {"into": {"db": "mydb", "coll": "c"}}}])).is_none());
        assert!(check(&v, json!([{"$merge": {"into": {"db": "mydb", "coll": "other.c"}}}])).is_some());
    }

    #[test]
    fn test_javascript_execution() {
        let v = validator(json!({}));
        let violation = check(&v, json!([{"$match": {}}, {"$where": "this.a > 1"}])).unwrap();
        assert_eq!(violation.violation_type, ViolationType::JavaScriptExecution);
        assert_eq!(violation.operator, "$where");
        assert_eq!(violation.location, "pipeline[1]");

        let allowing = validator(json!({"allowJavaScriptExecution": true}));
        assert!(check(&allowing, json!([{"$where": "this.a > 1"}])).is_none());
    }

    #[test]
    fn test_blacklisted_stage_comes_first() {
        let v = validator(json!({"stageBlacklist": ["$merge"], "allowCrossDatabaseOperations": true}));
        let violation = check(&v, json!([{"$merge": {"into": "coll"}}])).unwrap();
        assert_eq!(violation.violation_type, ViolationType::BlacklistedStage);

        let v = validator(json!({"stageBlacklist": ["$lookup"]}));
        let violation = check(&v, json!([{"$LOOKUP": {"from": "other.coll"}}])).unwrap();
        assert_eq!(violation.violation_type, ViolationType::BlacklistedStage);
        assert_eq!(violation.operator, "$LOOKUP");
    }

    #[test]
    fn test_blacklisted_operator_location() {
        let v = validator(json!({"operatorBlacklist": ["$function"], "allowJavaScriptExecution": true}));
        let violation = check(
            &v,
            json!([
                {"$match": {"a": 1}},
                {"$project": {"x": {"$cond": [true, {"$function": {"body": "f"}}, 0]}}}
            ]),
        )
        .unwrap();

        assert_eq!(violation.violation_type, ViolationType::BlacklistedOperator);
        assert_eq!(violation.operator, "$function");
        assert_eq!(violation.location, "pipeline[1].$project.x.$cond[1]");
    }

    #[test]
    fn test_disabled_and_non_document_stages() {
        let disabled = PipelineSecurityValidator::default();
        assert!(check(&disabled, json!([{"$where": "1"}, {"$out": "x.y"}])).is_none());

        let v = validator(json!({"stageBlacklist": ["$out"]}));
        assert!(check(&v, json!(["$out", 1, null])).is_none());
    }

    #[test]
    fn test_validate_or_throw() {
        let v = validator(json!({"stageBlacklist": ["$out"]}));
        let pipeline = json!([{"$out": "coll"}]);
        let err = v
            .validate_pipeline_or_throw(pipeline.as_array().unwrap(), "mydb")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Security violation: BLACKLISTED_STAGE operator '$out' at pipeline[0] - Pipeline stage is in security blacklist"
        );
        assert!(v.validate_pipeline_or_throw(&[json!({"$match": {}})], "mydb").is_ok());
    }
}
