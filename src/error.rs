use std::io;
use std::path::PathBuf;

use thiserror::Error;


#[derive(Debug, Error)]
pub enum Error {
    #[error("required configuration value {0} is not set")]
    ConfigMissing(&'static str),

    #[error("configuration value {key} is invalid: {reason}")]
    ConfigInvalid { key: &'static str, reason: String },

    #[error("directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("directory {0} timed out")]
    DirectoryTimeout(&'static str),

    #[error("search failed with result code {code}: {message}")]
    SearchFailed { code: u32, message: String },

    #[error("filter template {template:?} is invalid: {reason}")]
    InvalidFilterTemplate { template: String, reason: String },

    #[error("failed to write {}: {source}", path.display())]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
