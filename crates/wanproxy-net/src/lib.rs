//! Production networking glue: SOCKS front-end, splice, connector, and the
//! process-wide cache registry.
//!
//! This crate wires the sans-IO layers below it (`xcodec-core`,
//! `xcodec-proto`, `xcodec-pipe`) to real `tokio::net::TcpStream`s. Nothing
//! below this crate knows a socket exists; nothing above it (the `wanproxy`
//! binary) needs to know how a splice or a codec pipe is actually driven.

mod connector;
mod error;
mod registry;
mod socks;
mod splice;

pub use connector::{ConnectError, Connector, FrontEnd, Listener, PeerCodec, Stop};
pub use error::{SocksError, SpliceError};
pub use registry::CacheRegistry;
pub use socks::{Handshake, ReplyPolicy, Target, handshake, reply_failure, reply_success};
pub use splice::{codec_splice, splice};
