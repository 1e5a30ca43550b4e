use clap::Parser;
use mongo_acl::{
    AclAuthorizer, AclConfig, AclError, AclResult, LoggingSystem, PipelineSecurityValidator,
    PredicateContext,
};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Checks an ACL configuration and, optionally, an aggregation pipeline
/// against its security policy.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// JSON file holding an aggregation pipeline to validate
    #[arg(short, long, requires = "db")]
    pipeline: Option<PathBuf>,

    /// Database the pipeline would run against
    #[arg(short, long)]
    db: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns false when the pipeline violates the policy.
fn run(cli: &Cli) -> AclResult<bool> {
    let config = AclConfig::from_file(&cli.config)?;

    if let Err(e) = LoggingSystem::init(&config.logging) {
        eprintln!("warning: logging not initialized: {e}");
    }

    let authorizer = AclAuthorizer::from_config(&config.acl, Arc::new(PredicateContext::default()))?;
    println!(
        "{}: {} permissions loaded{}",
        cli.config.display(),
        authorizer.permissions().len(),
        config
            .acl
            .root_role
            .as_deref()
            .map(|role| format!(", root role '{role}'"))
            .unwrap_or_default()
    );
    for permission in authorizer.permissions() {
        println!(
            "  priority {:>11} roles {:?} {:?}",
            permission.priority(),
            permission.roles(),
            permission.clauses()
        );
    }

    let validator = PipelineSecurityValidator::from_config(&config.aggregation_security())?;
    println!(
        "aggregation security {}",
        if validator.policy().is_enabled() { "enabled" } else { "disabled" }
    );

    let (Some(path), Some(db)) = (&cli.pipeline, &cli.db) else {
        return Ok(true);
    };

    let pipeline: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let stages = pipeline
        .as_array()
        .ok_or_else(|| AclError::configuration(format!("{} does not hold a JSON array", path.display())))?;

    match validator.validate_pipeline(stages, db) {
        Some(violation) => {
            println!("{violation}");
            Ok(false)
        }
        None => {
            println!("{}: no violations for database '{db}'", path.display());
            Ok(true)
        }
    }
}
