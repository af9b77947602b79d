use std::path::Path;

use msdenoise::error::{BatchError, ConfigError};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Error interpreting the config: {0}")]
    Config(#[from] ConfigError),

    #[error("Error parsing {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Error accessing file {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("Error writing output: {0}")]
    Serialize(serde_json::Error),

    #[error("Error running batch: {0}")]
    Batch(#[from] BatchError),
}

impl CliError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        CliError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }

    pub fn parse(path: &Path, source: serde_json::Error) -> Self {
        CliError::Parse {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }
}
