//! Top-level error type the binary's `main` converges everything into.
//!
//! Each crate boundary owns its own `thiserror` enum; this one gathers them
//! with `#[from]` rather than re-deriving their variants.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;

/// Everything that can end `wanproxy` before a clean, requested shutdown.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Loading or parsing the configuration file failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Binding a configured interface's listen address failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address from the failing `[[interface]]` block.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Waiting on the shutdown signal itself failed.
    #[error("failed to wait for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
    /// Opening a configured `disk_path` as a persistent segment cache
    /// failed.
    #[error("failed to open disk cache at {path}: {source}")]
    DiskCache {
        /// The configured path.
        path: std::path::PathBuf,
        /// Underlying `sled` error.
        #[source]
        source: sled::Error,
    },
}
