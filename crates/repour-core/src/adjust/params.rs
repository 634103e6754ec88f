use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::adjust::AdjustResult;
use crate::models::{CoreError, CoreErrorKind};

const FILE_OPTION_PREFIX: &str = "--file=";

/// Splits a parameter string the way a POSIX shell would tokenize it,
/// without any expansion.
pub fn split_parameters(raw: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some('\n') => {}
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some('\n') => {}
                    Some(escaped) => current.push(escaped),
                    None => return Err("trailing backslash".to_string()),
                }
            }
            ch if ch.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

/// Reads and validates the caller-supplied tool options stored under `key`.
/// Every option must start with a dash.
pub fn extra_parameters(
    parameters: &BTreeMap<String, String>,
    key: &str,
) -> AdjustResult<Vec<String>> {
    let Some(raw) = parameters.get(key) else {
        return Ok(Vec::new());
    };

    let tokens = split_parameters(raw).map_err(|reason| {
        CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("could not parse {key} '{raw}': {reason}"),
        )
    })?;

    if let Some(bad) = tokens.iter().find(|token| !token.starts_with('-')) {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!(
                "Parameters that do not start with dash \"-\" are not allowed. Found \"{bad}\" in \"{raw}\"."
            ),
        ));
    }

    Ok(tokens)
}

/// Splits `--file=<path>` selections out of the extra options and returns
/// the directory they point at, relative to the checkout root.
pub fn take_subfolder(parameters: Vec<String>) -> AdjustResult<(Vec<String>, Option<PathBuf>)> {
    let mut remaining = Vec::with_capacity(parameters.len());
    let mut subfolder = None;

    for parameter in parameters {
        match parameter.strip_prefix(FILE_OPTION_PREFIX) {
            Some(value) => subfolder = Some(subfolder_of(value)?),
            None => remaining.push(parameter),
        }
    }

    Ok((remaining, subfolder.filter(|path: &PathBuf| !path.as_os_str().is_empty())))
}

fn subfolder_of(value: &str) -> AdjustResult<PathBuf> {
    let path = Path::new(value);

    if path
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("--file must be a relative path inside the checkout, got '{value}'"),
        ));
    }

    let points_at_file = !value.ends_with('/')
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.contains('.'));

    let directory = if points_at_file {
        path.parent().unwrap_or_else(|| Path::new(""))
    } else {
        path
    };

    Ok(directory
        .components()
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect())
}

pub fn temporary_build_parameters(
    timestamp: Option<&str>,
    specific_indy_group: Option<&str>,
) -> Vec<String> {
    let mut parameters = Vec::new();

    if let Some(timestamp) = timestamp.filter(|value| !value.is_empty()) {
        parameters.push(format!("-DversionIncrementalSuffix={timestamp}-redhat"));
    }

    if let Some(group) = specific_indy_group.filter(|value| !value.is_empty()) {
        parameters.push(format!("-DrestRepositoryGroup={group}"));
    }

    parameters
}
