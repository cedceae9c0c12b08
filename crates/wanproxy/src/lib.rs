//! `wanproxy`'s production glue: wraps [`wanproxy_net::Connector`] with a
//! TOML-driven set of listen interfaces and a single shared cache registry.
//!
//! [`main`](../bin.wanproxy.html) stays a thin CLI shell (argument parsing,
//! tracing setup, signal wait); everything that can be exercised without a
//! terminal — loading configuration, binding interfaces, tearing a running
//! proxy back down — lives here so integration tests can drive it directly.

pub mod config;
pub mod error;

use std::path::Path;
use std::sync::Arc;

use config::{Protocol, ProxyConfig};
use error::ProxyError;
use uuid::Uuid;
use wanproxy_net::{CacheRegistry, Connector, FrontEnd, PeerCodec, ReplyPolicy, Stop};

/// A running proxy: one accept loop per configured interface, plus the
/// stop signal that tears all of them down together.
pub struct Proxy {
    stop: Stop,
    accept_loops: tokio::task::JoinSet<()>,
}

impl Proxy {
    /// Load `config_path`, bind every configured interface, and start its
    /// accept loop.
    ///
    /// Returns once every interface is bound and listening; the accept
    /// loops themselves keep running in the background until
    /// [`Proxy::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] if the file can't be read or parsed,
    /// or [`ProxyError::Bind`] if any configured interface's address is
    /// already in use.
    pub async fn start(config_path: impl AsRef<Path>) -> Result<Self, ProxyError> {
        let config = ProxyConfig::configure(config_path)?;
        let cache_registry = Arc::new(CacheRegistry::new(config.cache_byte_limit()));
        let stop = Stop::new();
        let mut accept_loops = tokio::task::JoinSet::new();

        for interface in &config.interfaces {
            let listener = tokio::net::TcpListener::bind(interface.bind)
                .await
                .map_err(|source| ProxyError::Bind { addr: interface.bind, source })?;
            tracing::info!(bind = %interface.bind, protocol = ?interface.protocol, "listening");

            let codec = match &interface.codec {
                Some(codec_cfg) => {
                    let self_uuid = Uuid::new_v4();
                    if let Some(disk_path) = &codec_cfg.disk_path {
                        cache_registry.register_disk(self_uuid, disk_path).map_err(|source| {
                            ProxyError::DiskCache { path: disk_path.clone(), source }
                        })?;
                    }
                    PeerCodec::Pipe { self_uuid, window_capacity: xcodec_core::DEFAULT_WINDOW }
                }
                None => PeerCodec::Plain,
            };

            let front_end = match interface.protocol {
                Protocol::Socks => FrontEnd::Socks(ReplyPolicy::default()),
                // `ProxyConfig::configure` rejects a `tcp-forward`
                // interface with no `remote`, so this is always populated.
                Protocol::TcpForward => match interface.remote {
                    Some(remote) => FrontEnd::Forward(remote),
                    None => {
                        unreachable!("configure() rejects tcp-forward interfaces with no remote")
                    }
                },
            };

            let connector = Connector::new(
                listener,
                stop.clone(),
                front_end,
                codec,
                Arc::clone(&cache_registry),
            );
            accept_loops.spawn(connector.run());
        }

        Ok(Self { stop, accept_loops })
    }

    /// The stop signal governing this proxy, cloneable for callers that
    /// want to trigger shutdown from elsewhere (a signal handler, a test).
    #[must_use]
    pub fn stop(&self) -> Stop {
        self.stop.clone()
    }

    /// Signal every accept loop to stop and wait for all of them to
    /// finish before returning.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        while self.accept_loops.join_next().await.is_some() {}
    }
}
