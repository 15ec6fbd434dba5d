// src/bin/strata.rs

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::Path;
use std::sync::Arc;
use strata::{
    cli::Cli,
    core::{
        application::Application,
        config_source::{self, SettingsOptions},
        ingestion,
        logging::{self, LogOptions},
        registry::TaskRegistry,
        step::StepLoaderRegistry,
        task_executor::SequentialExecutor,
    },
    models::ProvidedInputs,
};

/// Sets up logging, runs the requested task and prints its output. Any failure is
/// printed as the full annotated chain and exits with status 1.
fn main() {
    let cli = Cli::parse();
    logging::init(&LogOptions {
        format: cli.output,
        verbose: cli.verbose,
    });

    match run_cli(cli) {
        Ok(Some(output)) => println!("{output}"),
        Ok(None) => {}
        Err(e) => {
            eprintln!("\n{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn run_cli(cli: Cli) -> Result<Option<String>> {
    log::debug!("CLI args parsed: {:?}", cli);

    let task_file = dunce::canonicalize(&cli.file)
        .with_context(|| format!("Task document '{}' not found", cli.file.display()))?;
    let base_dir = task_file.parent().map(Path::to_path_buf);

    let loaders = StepLoaderRegistry::with_builtin_loaders();
    let root = ingestion::ingest_file(&task_file, &loaders)
        .with_context(|| format!("Failed to load tasks from '{}'", task_file.display()))?;

    let app_name = cli
        .name
        .clone()
        .or_else(|| Some(root.name.clone()).filter(|n| !n.is_empty()))
        .or_else(|| {
            task_file
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .context("Could not determine the application name; pass --name")?;

    let flags = cli
        .set
        .iter()
        .map(|flag| config_source::parse_flag(flag))
        .collect::<Result<Vec<_>, _>>()?;
    let settings = config_source::load_settings(&SettingsOptions {
        user_config: true,
        env: cli.env.clone(),
        task_dir: base_dir.clone(),
        config_files: cli.config.clone(),
        flags,
    })?;

    let registry = TaskRegistry::new(&app_name, Arc::new(root))?;

    if cli.list {
        print_task_list(&app_name, &registry);
        return Ok(None);
    }

    let cmd = std::env::args().next().unwrap_or_else(|| app_name.clone());
    let mut app = Application::new(
        app_name,
        registry,
        Box::new(settings),
        Arc::new(SequentialExecutor),
    )
    .with_env(cli.env.unwrap_or_default())
    .with_cmd(cmd);
    if let Some(dir) = base_dir {
        app = app.with_base_dir(dir);
    }

    let task = cli.task.unwrap_or_default();
    let output = app.run_task_for_key_string(&task, &cli.args, &ProvidedInputs::new())?;
    Ok(Some(output))
}

fn print_task_list(app_name: &str, registry: &TaskRegistry) {
    println!("{} {}", "Tasks of".bold(), app_name.cyan().bold());
    for (name, task) in registry.tasks() {
        if task.is_namespace() && !task.tasks.is_empty() {
            continue;
        }
        let short = name
            .strip_prefix(app_name)
            .map(|rest| rest.trim_start_matches('.'))
            .unwrap_or(name);
        let label = if short.is_empty() { "(root)" } else { short };
        if task.description.is_empty() {
            println!("  {}", label.green());
        } else {
            println!("  {:<24} {}", label.green(), task.description.dimmed());
        }
    }
}
