use std::path::PathBuf;

use tracing::debug;

use crate::DeepResearchError;
use crate::security::confine_path;

pub const FILE_READ: &str = "file_read";
pub const FILE_WRITE: &str = "file_write";

/// `file_read` / `file_write` tools scoped to the agent working directory.
#[derive(Debug, Clone)]
pub struct FileTools {
    root: PathBuf,
}

impl FileTools {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn read(&self, relative: &str) -> Result<String, DeepResearchError> {
        let path = confine_path(&self.root, relative)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| DeepResearchError::io(path, err))
    }

    /// Write `contents`, creating parent directories. Returns the absolute path.
    pub async fn write(&self, relative: &str, contents: &str) -> Result<PathBuf, DeepResearchError> {
        let path = confine_path(&self.root, relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| DeepResearchError::io(parent, err))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|err| DeepResearchError::io(&path, err))?;
        debug!(path = %path.display(), bytes = contents.len(), "file written");
        Ok(path)
    }
}
