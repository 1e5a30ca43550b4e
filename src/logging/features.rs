//! Feature-specific logging macros
//!
//! Every component logs under its own target so that, for instance,
//! `security = "DEBUG"` in the `[logging.features]` table enables stage by
//! stage pipeline validation logs and nothing else.

/// Feature categories for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFeature {
    Registry,
    Interpolation,
    Permissions,
    Predicate,
    Security,
}

impl LogFeature {
    pub const ALL: [LogFeature; 5] = [
        LogFeature::Registry,
        LogFeature::Interpolation,
        LogFeature::Permissions,
        LogFeature::Predicate,
        LogFeature::Security,
    ];

    /// Get the target string for this feature
    pub fn target(&self) -> &'static str {
        match self {
            LogFeature::Registry => "mongo_acl::registry",
            LogFeature::Interpolation => "mongo_acl::interpolation",
            LogFeature::Permissions => "mongo_acl::permissions",
            LogFeature::Predicate => "mongo_acl::predicate",
            LogFeature::Security => "mongo_acl::security",
        }
    }

    /// Name of the feature in the `[logging.features]` table
    pub fn name(&self) -> &'static str {
        match self {
            LogFeature::Registry => "registry",
            LogFeature::Interpolation => "interpolation",
            LogFeature::Permissions => "permissions",
            LogFeature::Predicate => "predicate",
            LogFeature::Security => "security",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }
}

// Registry logging macros
#[macro_export]
macro_rules! log_registry_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "mongo_acl::registry", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_registry_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "mongo_acl::registry", $($arg)*)
    };
}

// Interpolation logging macros
#[macro_export]
macro_rules! log_interpolation_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "mongo_acl::interpolation", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_interpolation_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "mongo_acl::interpolation", $($arg)*)
    };
}

// Permission loading and matching macros
#[macro_export]
macro_rules! log_permissions_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "mongo_acl::permissions", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_permissions_info {
    ($($arg:tt)*) => {
        log::info!(target: "mongo_acl::permissions", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_permissions_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "mongo_acl::permissions", $($arg)*)
    };
}

// Predicate parsing macros
#[macro_export]
macro_rules! log_predicate_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "mongo_acl::predicate", $($arg)*)
    };
}

// Aggregation pipeline security macros
#[macro_export]
macro_rules! log_security_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "mongo_acl::security", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_security_info {
    ($($arg:tt)*) => {
        log::info!(target: "mongo_acl::security", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_security_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "mongo_acl::security", $($arg)*)
    };
}
