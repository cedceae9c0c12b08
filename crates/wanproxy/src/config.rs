//! TOML configuration: listen interfaces, their codec settings, and the
//! remote peers reachable for codec pipes.
//!
//! `ProxyConfig` is parsed with `serde` + `toml`, the same pairing used
//! elsewhere in this codebase for scenario and fixture files.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Byte budget assumed for a codec-enabled interface that doesn't name one
/// explicitly.
const DEFAULT_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// Top-level configuration loaded from a TOML file: zero or more listen
/// interfaces, plus the named remote peers they may dial for codec pipes.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Listen interfaces.
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<InterfaceConfig>,
    /// Named remote peers reachable for codec pipes.
    #[serde(default, rename = "peer")]
    pub peers: Vec<PeerConfig>,
}

/// One `[[interface]]` listen block.
#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    /// Front-end protocol this interface speaks.
    pub protocol: Protocol,
    /// Local address to bind and accept on.
    pub bind: SocketAddr,
    /// Fixed upstream target for `tcp-forward`; unused for `socks`, whose
    /// destination comes from the client's handshake.
    pub remote: Option<SocketAddr>,
    /// Codec settings for this interface's wan leg. Absent means plain,
    /// unaccelerated relaying.
    pub codec: Option<CodecConfig>,
}

/// Front-end protocol an interface accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// SOCKS4/4A/SOCKS5 `CONNECT`, destination chosen by the client.
    Socks,
    /// Plain TCP forwarding to a fixed `remote` address.
    TcpForward,
}

/// The `[interface.codec]` sub-table: cache sizing and backing for one
/// interface's wan leg.
#[derive(Debug, Clone, Deserialize)]
pub struct CodecConfig {
    /// Cache size budget in bytes, converted to a segment count at
    /// `floor(bytes / SEGMENT_LENGTH)`. Ignored when `disk_path` is set;
    /// a disk-backed cache has no fixed capacity of its own.
    pub cache_bytes: usize,
    /// When set, this interface's own cache is a `sled` database persisted
    /// at this path instead of an in-memory one, and is treated as
    /// pre-shared: the encoder never emits `EXTRACT` against it, only
    /// `REF` for tags it already holds from a prior run.
    #[serde(default)]
    pub disk_path: Option<PathBuf>,
}

/// One `[[peer]]` table: a named remote proxy address.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// Human-readable name, for logging only.
    pub name: String,
    /// The peer's listen address.
    pub address: SocketAddr,
}

impl ProxyConfig {
    /// Read and parse a `ProxyConfig` from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if its contents are not valid configuration
    /// TOML.
    pub fn configure(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;

        for interface in &config.interfaces {
            if interface.protocol == Protocol::TcpForward && interface.remote.is_none() {
                return Err(ConfigError::MissingRemote { bind: interface.bind });
            }
        }

        Ok(config)
    }

    /// The cache byte budget to size the process-wide cache registry with:
    /// the largest `cache_bytes` configured across codec-enabled
    /// interfaces, or [`DEFAULT_CACHE_BYTES`] if none configure one.
    #[must_use]
    pub fn cache_byte_limit(&self) -> usize {
        self.interfaces
            .iter()
            .filter_map(|iface| iface.codec.as_ref())
            .map(|codec| codec.cache_bytes)
            .max()
            .unwrap_or(DEFAULT_CACHE_BYTES)
    }
}

/// Errors reading or parsing a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// The path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents were not valid configuration TOML.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// The path that was attempted.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// A `tcp-forward` interface did not name a `remote` to forward to.
    #[error("interface {bind} is tcp-forward but names no remote")]
    MissingRemote {
        /// The bind address of the offending interface.
        bind: SocketAddr,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_socks_interface_with_codec_and_a_peer() {
        let toml = r#"
            [[interface]]
            protocol = "socks"
            bind = "127.0.0.1:8080"

            [interface.codec]
            cache_bytes = 67108864

            [[peer]]
            name = "remote-office"
            address = "203.0.113.9:7320"
        "#;

        let config: ProxyConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.interfaces.len(), 1);
        assert_eq!(config.interfaces[0].protocol, Protocol::Socks);
        assert_eq!(config.interfaces[0].bind, "127.0.0.1:8080".parse().unwrap());
        let codec = config.interfaces[0].codec.as_ref().unwrap();
        assert_eq!(codec.cache_bytes, 67_108_864);
        assert!(codec.disk_path.is_none());
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].name, "remote-office");
        assert_eq!(config.cache_byte_limit(), 67_108_864);
    }

    #[test]
    fn interface_without_codec_relays_plain() {
        let toml = r#"
            [[interface]]
            protocol = "tcp-forward"
            bind = "127.0.0.1:9000"
            remote = "10.0.0.1:80"
        "#;

        let config: ProxyConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.interfaces[0].protocol, Protocol::TcpForward);
        assert!(config.interfaces[0].codec.is_none());
        assert_eq!(config.interfaces[0].remote, Some("10.0.0.1:80".parse().unwrap()));
    }

    #[test]
    fn codec_with_a_disk_path_parses_it() {
        let toml = r#"
            [[interface]]
            protocol = "socks"
            bind = "127.0.0.1:8080"

            [interface.codec]
            cache_bytes = 1048576
            disk_path = "/var/lib/wanproxy/cache"
        "#;

        let config: ProxyConfig = toml::from_str(toml).unwrap();
        let codec = config.interfaces[0].codec.as_ref().unwrap();
        assert_eq!(codec.disk_path.as_deref(), Some(Path::new("/var/lib/wanproxy/cache")));
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let err = ProxyConfig::configure("/nonexistent/path/to/wanproxy.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = std::env::temp_dir();
        let path = dir.join("wanproxy-config-test-malformed.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        let err = ProxyConfig::configure(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn tcp_forward_without_remote_is_a_config_error() {
        let toml = r#"
            [[interface]]
            protocol = "tcp-forward"
            bind = "127.0.0.1:9000"
        "#;
        let dir = std::env::temp_dir();
        let path = dir.join("wanproxy-config-test-missing-remote.toml");
        std::fs::write(&path, toml).unwrap();
        let err = ProxyConfig::configure(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, ConfigError::MissingRemote { .. }));
    }

    #[test]
    fn empty_config_falls_back_to_default_cache_budget() {
        let config = ProxyConfig { interfaces: vec![], peers: vec![] };
        assert_eq!(config.cache_byte_limit(), DEFAULT_CACHE_BYTES);
    }
}
