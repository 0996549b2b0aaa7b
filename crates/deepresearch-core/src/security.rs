use std::env;
use std::path::{Component, Path, PathBuf};

use crate::DeepResearchError;

/// Wrapper around sensitive values to reduce accidental logging.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, DeepResearchError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value)),
        _ => Err(DeepResearchError::MissingSecret(var.to_string())),
    }
}

/// Resolve `relative` inside `root`, rejecting absolute paths and `..` escapes.
pub fn confine_path(root: &Path, relative: &str) -> Result<PathBuf, DeepResearchError> {
    let candidate = Path::new(relative);
    let mut resolved = root.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(DeepResearchError::InvalidConfiguration(format!(
                    "path '{relative}' escapes the working directory"
                )));
            }
        }
    }
    if resolved == root {
        return Err(DeepResearchError::InvalidConfiguration(
            "path must name a file inside the working directory".into(),
        ));
    }
    Ok(resolved)
}
