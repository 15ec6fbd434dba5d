// src/system/executor.rs

use std::collections::HashMap;
use std::path::Path;
use std::process::{Command as StdCommand, Output, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No script specified to run.")]
    EmptyScript,
    #[error("Script could not be executed: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error("Script exited with a non-zero status ({code}).")]
    NonZeroExitStatus { code: String },
    #[error("Script produced output that was not valid UTF-8")]
    InvalidUtf8Output(#[source] std::string::FromUtf8Error),
}

/// Builds the platform shell invocation for a script.
fn shell_command(script: &str) -> StdCommand {
    if cfg!(target_os = "windows") {
        let mut command = StdCommand::new("cmd");
        command.arg("/C").arg(script);
        command
    } else {
        let mut command = StdCommand::new("sh");
        command.arg("-c").arg(script);
        command
    }
}

/// Runs a script through the platform shell.
///
/// In captured mode stdout is collected and returned with trailing whitespace removed,
/// while stderr passes through to the user's terminal. In interactive mode the script
/// inherits all standard streams and the returned output is empty.
pub fn execute_script(
    script: &str,
    cwd: Option<&Path>,
    env_vars: &HashMap<String, String>,
    interactive: bool,
) -> Result<String, ExecutionError> {
    if script.trim().is_empty() {
        return Err(ExecutionError::EmptyScript);
    }

    let mut command = shell_command(script);
    command.envs(env_vars);
    if let Some(dir) = cwd {
        command.current_dir(dunce::simplified(dir));
    }

    if interactive {
        log::debug!("Running interactive script:\n{}", script);
        let status = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(ExecutionError::SpawnFailed)?;
        if !status.success() {
            return Err(ExecutionError::NonZeroExitStatus {
                code: describe_code(status.code()),
            });
        }
        return Ok(String::new());
    }

    log::debug!("Running script:\n{}", script);
    let Output { status, stdout, .. } = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .map_err(ExecutionError::SpawnFailed)?;

    if !status.success() {
        return Err(ExecutionError::NonZeroExitStatus {
            code: describe_code(status.code()),
        });
    }

    let output = String::from_utf8(stdout).map_err(ExecutionError::InvalidUtf8Output)?;
    Ok(output.trim_end().to_string())
}

fn describe_code(code: Option<i32>) -> String {
    code.map_or_else(|| "terminated by signal".to_string(), |c| c.to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_trimmed_stdout() {
        let out = execute_script("echo hello", None, &HashMap::new(), false).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn passes_environment_variables() {
        let mut env = HashMap::new();
        env.insert("GREETING".to_string(), "hi there".to_string());
        let out = execute_script("printf '%s' \"$GREETING\"", None, &env, false).unwrap();
        assert_eq!(out, "hi there");
    }

    #[test]
    fn runs_in_the_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "found").unwrap();
        let out = execute_script("cat marker.txt", Some(dir.path()), &HashMap::new(), false).unwrap();
        assert_eq!(out, "found");
    }

    #[test]
    fn reports_non_zero_exit_codes() {
        let err = execute_script("exit 3", None, &HashMap::new(), false).unwrap_err();
        assert!(matches!(err, ExecutionError::NonZeroExitStatus { ref code } if code == "3"));
    }

    #[test]
    fn rejects_empty_scripts() {
        assert!(matches!(
            execute_script("   ", None, &HashMap::new(), false),
            Err(ExecutionError::EmptyScript)
        ));
    }
}
