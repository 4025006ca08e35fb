use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sqlgrade",
    version,
    about = "Semantic correctness evaluation for natural-language-to-SQL chatbots"
)]
pub struct Cli {
    /// log filter, e.g. `warn`, `info` or `sqlgrade_core=debug`
    #[arg(long, global = true, env = "SQLGRADE_LOG", default_value = "warn")]
    pub log_level: String,

    /// emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate the chatbot against a dataset
    Run(RunArgs),
    /// Write a sample config, dataset, replay file and demo database
    Init(InitArgs),
    /// Check config and dataset without asking the chatbot
    Validate(ValidateArgs),
    /// Inspect stored runs and audit records
    Audit(AuditArgs),
    Version,
}

/// Database credentials for networked backends. Values given here win over
/// the config file.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct DbEnvArgs {
    #[arg(long, env = "SQLGRADE_DB_HOST")]
    pub db_host: Option<String>,
    #[arg(long, env = "SQLGRADE_DB_USER")]
    pub db_user: Option<String>,
    #[arg(long, env = "SQLGRADE_DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,
    #[arg(long, env = "SQLGRADE_DB_NAME")]
    pub db_name: Option<String>,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "sqlgrade.yaml")]
    pub config: PathBuf,

    /// run store (runs, results, embedding cache, audit records)
    #[arg(long, default_value = ".sqlgrade/sqlgrade.db")]
    pub db: PathBuf,

    /// write the machine-readable run report here
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// exit 1 when the grand global score is below this value
    #[arg(long)]
    pub fail_under: Option<f64>,

    /// override settings.min_score
    #[arg(long)]
    pub min_score: Option<f64>,

    /// compare result rows order-insensitively
    #[arg(long)]
    pub sort_rows: bool,

    /// force refresh of embeddings (ignore cache)
    #[arg(long)]
    pub refresh_embeddings: bool,

    /// also audit generated results
    #[arg(long)]
    pub audit_generated: bool,

    /// skip audit records for this run
    #[arg(long)]
    pub no_audit: bool,

    /// reject unknown config fields
    #[arg(long)]
    pub strict: bool,

    #[command(flatten)]
    pub db_env: DbEnvArgs,
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "sqlgrade.yaml")]
    pub config: PathBuf,

    /// skip the demo dataset, replay file and database
    #[arg(long)]
    pub no_demo: bool,

    /// generate .gitignore for the run store
    #[arg(long)]
    pub gitignore: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long, default_value = "sqlgrade.yaml")]
    pub config: PathBuf,

    /// also execute every expected query against the database
    #[arg(long)]
    pub execute: bool,

    /// reject unknown config fields
    #[arg(long)]
    pub strict: bool,

    #[arg(long, default_value = "text")]
    pub format: String, // text|json

    #[command(flatten)]
    pub db_env: DbEnvArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AuditArgs {
    #[arg(long, default_value = ".sqlgrade/sqlgrade.db")]
    pub db: PathBuf,

    /// list audit records written for this test name (the question text)
    #[arg(long, conflicts_with = "similar_to")]
    pub test_name: Option<String>,

    /// list the audit records closest to this canonical result text
    #[arg(long)]
    pub similar_to: Option<String>,

    /// number of neighbours for --similar-to
    #[arg(long, default_value_t = 5)]
    pub k: usize,

    /// config whose embedder is used for --similar-to
    #[arg(long, default_value = "sqlgrade.yaml")]
    pub config: PathBuf,

    /// number of recent runs to list when no query is given
    #[arg(long, default_value_t = 10)]
    pub last: u32,
}
