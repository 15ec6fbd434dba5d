// src/core/logging.rs

use clap::ValueEnum;
use std::io::Write;

/// How log records are rendered on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// env_logger's default layout.
    #[default]
    Text,
    /// One JSON object per record.
    Json,
    /// The message alone.
    Message,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub format: LogFormat,
    /// Raise the level to `debug` regardless of `RUST_LOG`.
    pub verbose: bool,
}

/// Installs the global logger. `RUST_LOG` is honored unless `verbose` is set.
/// Calling it twice is harmless; the second call is ignored.
pub fn init(options: &LogOptions) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if options.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }

    match options.format {
        LogFormat::Text => {}
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = serde_json::json!({
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "msg": record.args().to_string(),
                });
                writeln!(buf, "{line}")
            });
        }
        LogFormat::Message => {
            builder.format(|buf, record| writeln!(buf, "{}", record.args()));
        }
    }

    builder.target(env_logger::Target::Stderr);
    if builder.try_init().is_err() {
        log::debug!("Logger already initialized.");
    }
}
