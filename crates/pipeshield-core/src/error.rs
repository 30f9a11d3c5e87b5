//! Configuration error types.

use std::path::PathBuf;

/// Errors raised while loading or validating configuration.
///
/// All of these are fatal at startup: the process must exit non-zero rather
/// than run with a partially-understood config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(
        "no decision strategy configured: set prometheus.alertName, \
         or both disableIngressQuery and enableIngressQuery"
    )]
    NoStrategy,

    #[error("disableIngressQuery and enableIngressQuery must be set together")]
    IncompleteQueryPair,
}
