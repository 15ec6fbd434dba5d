// src/constants.rs

/// Delimiter between the segments of a task key, an input name or a configuration path.
pub const PATH_DELIMITER: char = '.';

/// Configuration section holding values passed with `--set` on the command line.
pub const FLAGS_SECTION: &str = "flags";

/// Name given to the synthetic step created from an inline `script`.
pub const SCRIPT_STEP_NAME: &str = "script";

/// Prefix of the default name given to unnamed entries of a `steps` list.
pub const DEFAULT_STEP_NAME_PREFIX: &str = "step-";

/// Default task document looked up in the working directory.
pub const DEFAULT_TASK_FILENAME: &str = "strata.yaml";

/// Directory (next to the task document) holding per-environment settings files.
pub const ENVIRONMENTS_DIR: &str = "environments";

/// Name of the application directory inside the user's config directory.
pub const USER_CONFIG_DIR: &str = "strata";

/// Base name of the user-level settings file (`config.yaml`, `config.yml` or `config.toml`).
pub const USER_CONFIG_BASENAME: &str = "config";

/// Reserved variable slots bound for every task before its inputs.
pub const VAR_ARGS: &str = "args";
/// See [`VAR_ARGS`].
pub const VAR_ENV: &str = "env";
/// See [`VAR_ARGS`].
pub const VAR_CMD: &str = "cmd";
