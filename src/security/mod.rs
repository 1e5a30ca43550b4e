//! Aggregation pipeline security
//!
//! Client-supplied aggregation pipelines are checked against a
//! [`SecurityPolicy`] before they reach the database:
//! - stage and operator blacklists
//! - stages that read from or write to another database
//! - stages that execute server-side JavaScript

pub mod pipeline;
pub mod policy;

pub use pipeline::{PipelineSecurityValidator, SecurityViolation, ViolationType};
pub use policy::SecurityPolicy;
