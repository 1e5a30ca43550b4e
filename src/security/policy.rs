//! Aggregation pipeline security policy

use crate::config::AggregationSecurityConfig;
use crate::error::{AclError, AclResult};
use crate::log_security_info;
use std::collections::BTreeSet;

/// Validated aggregation security settings.
///
/// Blacklist entries are stored lowercased; stage and operator names are
/// compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    enabled: bool,
    stage_blacklist: BTreeSet<String>,
    operator_blacklist: BTreeSet<String>,
    allow_cross_database_operations: bool,
    allow_java_script_execution: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl SecurityPolicy {
    /// A policy that accepts every pipeline
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            stage_blacklist: BTreeSet::new(),
            operator_blacklist: BTreeSet::new(),
            allow_cross_database_operations: true,
            allow_java_script_execution: true,
        }
    }

    /// Builds the policy from configuration. Every blacklist entry must
    /// start with `$`; a disabled configuration is not inspected.
    pub fn from_config(config: &AggregationSecurityConfig) -> AclResult<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let stage_blacklist = blacklist(
            &config.stage_blacklist,
            "All pipeline stage names in stageBlacklist must start with '$'",
        )?;
        let operator_blacklist = blacklist(
            &config.operator_blacklist,
            "All operator names in operatorBlacklist must start with '$'",
        )?;

        log_security_info!(
            "aggregation pipeline security enabled: stageBlacklist={:?}, operatorBlacklist={:?}, allowCrossDatabaseOperations={}, allowJavaScriptExecution={}",
            stage_blacklist,
            operator_blacklist,
            config.allow_cross_database_operations,
            config.allow_java_script_execution
        );

        Ok(Self {
            enabled: true,
            stage_blacklist,
            operator_blacklist,
            allow_cross_database_operations: config.allow_cross_database_operations,
            allow_java_script_execution: config.allow_java_script_execution,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stage_blacklist(&self) -> &BTreeSet<String> {
        &self.stage_blacklist
    }

    pub fn operator_blacklist(&self) -> &BTreeSet<String> {
        &self.operator_blacklist
    }

    pub fn allow_cross_database_operations(&self) -> bool {
        self.allow_cross_database_operations
    }

    pub fn allow_java_script_execution(&self) -> bool {
        self.allow_java_script_execution
    }

    pub(crate) fn is_blacklisted_stage(&self, stage: &str) -> bool {
        self.stage_blacklist.contains(&stage.to_lowercase())
    }

    pub(crate) fn is_blacklisted_operator(&self, operator: &str) -> bool {
        self.operator_blacklist.contains(&operator.to_lowercase())
    }
}

fn blacklist(entries: &[String], message: &str) -> AclResult<BTreeSet<String>> {
    entries
        .iter()
        .map(|entry| {
            if entry.starts_with('$') {
                Ok(entry.to_lowercase())
            } else {
                Err(AclError::configuration(format!("{message}: {entry}")))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(stages: &[&str], operators: &[&str]) -> AggregationSecurityConfig {
        AggregationSecurityConfig {
            enabled: true,
            stage_blacklist: stages.iter().map(|s| s.to_string()).collect(),
            operator_blacklist: operators.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_entries_are_case_folded() {
        let policy = SecurityPolicy::from_config(&config(&["$GraphLookup"], &["$Where"])).unwrap();
        assert!(policy.is_enabled());
        assert!(policy.stage_blacklist().contains("$graphlookup"));
        assert!(policy.is_blacklisted_stage("$GRAPHLOOKUP"));
        assert!(policy.is_blacklisted_operator("$where"));
        assert!(!policy.allow_cross_database_operations());
        assert!(!policy.allow_java_script_execution());
    }

    #[test]
    fn test_entries_must_start_with_dollar() {
        let err = SecurityPolicy::from_config(&config(&["out"], &[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: All pipeline stage names in stageBlacklist must start with '$': out"
        );

        let err = SecurityPolicy::from_config(&config(&[], &["$ok", "where"])).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().ends_with("operatorBlacklist must start with '$': where"));
    }

    #[test]
    fn test_disabled_config_is_not_validated() {
        let mut cfg = config(&["out"], &[]);
        cfg.enabled = false;
        let policy = SecurityPolicy::from_config(&cfg).unwrap();
        assert_eq!(policy, SecurityPolicy::disabled());
        assert!(policy.allow_cross_database_operations());
    }
}
