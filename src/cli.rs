// src/cli.rs

use crate::constants::DEFAULT_TASK_FILENAME;
use crate::core::logging::LogFormat;
use clap::Parser;
use std::path::PathBuf;

/// strata: runs tasks declared in a YAML document, resolving each task's inputs
/// from arguments, flags, layered configuration or other tasks.
///
/// Examples:
///   strata greet Ada
///   strata -e prod --set db.host=db1 db migrate
///   strata --list
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The task document to load.
    #[arg(short, long, default_value = DEFAULT_TASK_FILENAME)]
    pub file: PathBuf,

    /// Additional settings file (YAML or TOML). May be repeated; later files win.
    #[arg(short, long = "config", value_name = "FILE")]
    pub config: Vec<String>,

    /// Run environment; loads `environments/<ENV>.yaml` next to the task document.
    #[arg(short, long)]
    pub env: Option<String>,

    /// Override a value, e.g. `--set db.host=db1`. May be repeated.
    #[arg(short, long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Application name. Defaults to the document's root `name`, then its file stem.
    #[arg(short, long)]
    pub name: Option<String>,

    /// List the available tasks and exit.
    #[arg(short, long)]
    pub list: bool,

    /// Log resolution details.
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format.
    #[arg(short, long, value_enum, default_value_t = LogFormat::Text)]
    pub output: LogFormat,

    /// Write logs to stderr. Logs always go to stderr; accepted for compatibility.
    #[arg(long)]
    pub logtostderr: bool,

    /// The task to run, as a dotted path below the application (e.g. `db.migrate`).
    /// Omit it to run the root task.
    pub task: Option<String>,

    /// Positional arguments for the task.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
