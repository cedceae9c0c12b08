use thiserror::Error;

/// Errors raised while negotiating a SOCKS front-end handshake.
#[derive(Debug, Error)]
pub enum SocksError {
    /// The connection closed before a complete request was read.
    #[error("connection closed mid-handshake")]
    Truncated,

    /// First byte named a SOCKS version this server does not speak.
    #[error("unsupported SOCKS version {0:#04x}")]
    UnsupportedVersion(u8),

    /// A SOCKS5 client offered no acceptable authentication method.
    #[error("client offered no acceptable SOCKS5 authentication method")]
    NoAcceptableMethod,

    /// Command byte was not CONNECT; BIND/UDP ASSOCIATE are not supported.
    #[error("unsupported SOCKS command {0:#04x}")]
    UnsupportedCommand(u8),

    /// Address type byte was not one this server understands.
    #[error("unsupported SOCKS5 address type {0:#04x}")]
    UnsupportedAddressType(u8),

    /// A domain name was not valid UTF-8.
    #[error("SOCKS5 domain name was not valid UTF-8")]
    InvalidDomainName,

    /// Underlying I/O failure talking to the client.
    #[error("SOCKS I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while relaying bytes between two ends of a proxied
/// connection, whether a raw splice or a WAN-accelerated codec pipe.
#[derive(Debug, Error)]
pub enum SpliceError {
    /// I/O failure on either side of the relay.
    #[error("splice I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The codec pipe session hit a fatal protocol violation.
    #[error("codec pipe error: {0}")]
    Pipe(#[from] xcodec_pipe::PipeError),

    /// A spawned relay task panicked or was cancelled unexpectedly.
    #[error("relay task failed to join: {0}")]
    Join(String),
}

/// Result alias for this crate's fallible operations.
pub type Result<T, E = SpliceError> = std::result::Result<T, E>;
