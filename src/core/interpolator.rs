// src/core/interpolator.rs

use crate::core::value::Value;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    // Matches `{{ .db.host }}` and `{{ db.host }}`.
    static ref VAR_TOKEN_RE: Regex =
        Regex::new(r"\{\{\s*\.?([A-Za-z0-9_][A-Za-z0-9_\-.]*)\s*\}\}").expect("valid regex");
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("Template references undefined variable '{name}'.")]
    UndefinedVariable { name: String },
}

/// Replaces every `{{ .path }}` reference in `template` with the rendered variable at that path.
pub fn interpolate(template: &str, vars: &Value) -> Result<String, InterpolationError> {
    let mut rendered = String::with_capacity(template.len());
    let mut last_index = 0;

    for caps in VAR_TOKEN_RE.captures_iter(template) {
        let (Some(full_match), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        rendered.push_str(&template[last_index..full_match.start()]);

        let value = vars
            .get_dotted(path.as_str())
            .ok_or_else(|| InterpolationError::UndefinedVariable {
                name: path.as_str().to_string(),
            })?;
        rendered.push_str(&value.render());

        last_index = full_match.end();
    }
    rendered.push_str(&template[last_index..]);

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Value {
        let mut vars = Value::new_map();
        vars.set_path(&["name"], "Ada".into());
        vars.set_path(&["db", "host"], "localhost".into());
        vars.set_path(&["args"], vec!["x".to_string(), "y".to_string()].into());
        vars
    }

    #[test]
    fn interpolates_flat_and_nested_references() {
        let out = interpolate("hello {{ .name }} @ {{db.host}}", &vars()).unwrap();
        assert_eq!(out, "hello Ada @ localhost");
    }

    #[test]
    fn renders_lists_space_joined() {
        assert_eq!(interpolate("run {{ .args }}", &vars()).unwrap(), "run x y");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(interpolate("echo ${HOME} {}", &vars()).unwrap(), "echo ${HOME} {}");
    }

    #[test]
    fn fails_on_undefined_variables() {
        assert_eq!(
            interpolate("{{ .missing }}", &vars()),
            Err(InterpolationError::UndefinedVariable {
                name: "missing".to_string()
            })
        );
    }
}
