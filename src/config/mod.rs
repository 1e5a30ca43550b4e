//! Configuration module
//!
//! One TOML file configures logging, the ACL permissions and the
//! aggregation pipeline security policy:
//!
//! ```toml
//! [logging.general]
//! default_level = "INFO"
//!
//! [acl]
//! root_role = "admin"
//!
//! [[acl.permissions]]
//! roles = ["user"]
//! predicate = "path-prefix('/mydb/coll') and method(GET)"
//! priority = 100
//!
//! [aggregation_security]
//! enabled = true
//! stageBlacklist = ["$out"]
//! ```

use crate::document::Document;
use crate::error::AclResult;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AclConfig {
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub acl: AclSection,
    /// Missing section means no pipeline validation
    #[serde(default)]
    pub aggregation_security: Option<AggregationSecurityConfig>,
}

/// The `[acl]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclSection {
    /// Accounts with this role are granted every request
    #[serde(default)]
    pub root_role: Option<String>,
    /// OPTIONS requests are always authorized and never require authentication
    #[serde(default = "default_allow_options")]
    pub allow_options: bool,
    /// Permission definitions, see [`crate::permissions::Permission::from_config`]
    #[serde(default)]
    pub permissions: Vec<Document>,
}

fn default_allow_options() -> bool {
    true
}

impl Default for AclSection {
    fn default() -> Self {
        Self {
            root_role: None,
            allow_options: default_allow_options(),
            permissions: Vec::new(),
        }
    }
}

/// The `[aggregation_security]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregationSecurityConfig {
    pub enabled: bool,
    pub stage_blacklist: Vec<String>,
    pub operator_blacklist: Vec<String>,
    pub allow_cross_database_operations: bool,
    pub allow_java_script_execution: bool,
}

impl AclConfig {
    pub fn from_toml_str(content: &str) -> AclResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AclResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// The aggregation security settings, disabled when the section is missing
    pub fn aggregation_security(&self) -> AggregationSecurityConfig {
        self.aggregation_security.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_config() {
        let config = AclConfig::from_toml_str("").unwrap();
        assert!(config.acl.permissions.is_empty());
        assert!(config.acl.allow_options);
        assert!(config.aggregation_security.is_none());
        assert!(!config.aggregation_security().enabled);
        assert_eq!(config.logging, LogConfig::default());
    }

    #[test]
    fn test_full_config() {
        let config = AclConfig::from_toml_str(
            r#"
[logging.general]
default_level = "DEBUG"

[acl]
root_role = "admin"
allow_options = false

[[acl.permissions]]
roles = ["user"]
predicate = "method(GET)"
priority = 10
[acl.permissions.mongo]
readFilter = '{"owner": "@user._id"}'
allowWriteMode = true

[[acl.permissions]]
role = "guest"
predicate = "path('/public')"

[aggregation_security]
enabled = true
stageBlacklist = ["$out"]
operatorBlacklist = ["$function"]
allowJavaScriptExecution = true
"#,
        )
        .unwrap();

        assert_eq!(config.logging.general.default_level, "DEBUG");
        assert_eq!(config.acl.root_role.as_deref(), Some("admin"));
        assert!(!config.acl.allow_options);
        assert_eq!(config.acl.permissions.len(), 2);
        assert_eq!(config.acl.permissions[0].get("priority"), Some(&json!(10)));
        assert_eq!(
            config.acl.permissions[0].get("mongo").and_then(|m| m.get("allowWriteMode")),
            Some(&json!(true))
        );

        let security = config.aggregation_security();
        assert!(security.enabled);
        assert_eq!(security.stage_blacklist, vec!["$out"]);
        assert!(security.allow_java_script_execution);
        assert!(!security.allow_cross_database_operations);
    }

    #[test]
    fn test_invalid_toml() {
        let err = AclConfig::from_toml_str("[acl\nroot_role = 1").unwrap_err();
        assert!(matches!(err, crate::error::AclError::Toml(_)));
    }
}
