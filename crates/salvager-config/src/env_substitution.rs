use once_cell::sync::Lazy;
use regex::Regex;
use salvager_core::{Result, SalvagerError};
use serde_json::Value;
use std::env;

// ${VAR} and ${VAR:-default}
static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex pattern")
});

/// Recursively substitute environment variables in every string of a value tree
pub fn substitute_env_vars(value: &mut Value) -> Result<()> {
    match value {
        Value::String(s) => {
            *s = substitute_in_string(s)?;
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Array(arr) => {
            for v in arr.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn substitute_in_string(input: &str) -> Result<String> {
    let mut missing = Vec::new();

    let result = ENV_VAR_REGEX.replace_all(input, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.push(var_name.to_string());
                    String::new()
                }
            },
        }
    });

    if !missing.is_empty() {
        return Err(SalvagerError::ConfigError(format!(
            "Missing required environment variables: {}",
            missing.join(", ")
        )));
    }

    Ok(result.into_owned())
}
