// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use thiserror::Error;

/// Error kinds produced while locating and loading configuration.
///
/// The split between [`ConfigError::Unreadable`] and [`ConfigError::Invalid`]
/// matters to the caller: an unreadable file (missing, permission denied) and
/// a file that parses as YAML but fails to deserialize into [`crate::Config`]
/// map onto different process exit codes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config ({path}): {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
