//! SOCKS4/4A and SOCKS5 front-end handshake.
//!
//! Only the `CONNECT` command is supported; `BIND` and `UDP ASSOCIATE`
//! are rejected. The handshake is driven directly over an
//! `AsyncRead + AsyncWrite` stream rather than through a sans-IO state
//! machine: unlike the codec pipe, a SOCKS negotiation is a short,
//! strictly request-then-reply exchange with no interleaving, so a plain
//! async function reads as clearly as a hand-rolled state table would.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SocksError;

/// The address the client asked to be connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A literal IP address and port.
    Ip(IpAddr, u16),
    /// An unresolved domain name and port; the connector resolves it.
    Domain(String, u16),
}

impl Target {
    /// The port requested, regardless of address form.
    #[must_use]
    pub fn port(&self) -> u16 {
        match self {
            Self::Ip(_, port) | Self::Domain(_, port) => *port,
        }
    }
}

/// The address-type byte actually presented in the client's request.
/// SOCKS4 carries no such byte; it is modeled as its own variant since it
/// always replies in the fixed SOCKS4 reply format regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestAtyp {
    V4Legacy,
    Ipv4,
    Domain,
    Ipv6,
}

/// A parsed, not-yet-replied-to `CONNECT` request.
#[derive(Debug)]
pub struct Handshake {
    /// The address the client wants to reach.
    pub target: Target,
    atyp: RequestAtyp,
}

/// Governs how a successful SOCKS5 reply reports its bound address type.
#[derive(Debug, Clone, Copy)]
pub struct ReplyPolicy {
    /// When `true` (the default), the reply's `ATYP` matches what the
    /// client actually requested. When `false`, reproduces the original
    /// implementation's behavior of always reporting `0x03` (domain) for a
    /// domain request and `0x01` (IPv4) for everything else — including an
    /// IPv6 request, whose 16-byte address is then truncated to fit the
    /// 4-byte IPv4 field the lie requires.
    pub echo_requested_atyp: bool,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self { echo_requested_atyp: true }
    }
}

/// Read and parse one `CONNECT` handshake from `stream`. Does not write a
/// reply; callers dial the target and then send one via
/// [`reply_success`] or [`reply_failure`].
///
/// # Errors
///
/// Returns an error for an unrecognised version, an unsupported command or
/// address type, a SOCKS5 greeting with no acceptable auth method, or any
/// I/O failure (including early EOF, reported as [`SocksError::Truncated`]).
pub async fn handshake<S>(stream: &mut S) -> Result<Handshake, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = read_u8(stream).await?;
    match version {
        0x04 => handshake_v4(stream).await,
        0x05 => handshake_v5(stream).await,
        other => Err(SocksError::UnsupportedVersion(other)),
    }
}

/// Write a successful reply naming `bound` as the address the upstream
/// connection was made from.
///
/// # Errors
///
/// Returns an error on I/O failure.
pub async fn reply_success<S>(
    stream: &mut S,
    handshake: &Handshake,
    bound: SocketAddr,
    policy: ReplyPolicy,
) -> Result<(), SocksError>
where
    S: AsyncWrite + Unpin,
{
    match handshake.atyp {
        RequestAtyp::V4Legacy => {
            let mut reply = vec![0x00, 0x5A];
            reply.extend_from_slice(&bound.port().to_be_bytes());
            push_ipv4_octets(&mut reply, bound);
            stream.write_all(&reply).await?;
        }
        _ => stream.write_all(&build_v5_reply(0x00, handshake, bound, policy)).await?,
    }
    Ok(())
}

/// Write a connection-refused reply.
///
/// # Errors
///
/// Returns an error on I/O failure.
pub async fn reply_failure<S>(stream: &mut S, handshake: &Handshake) -> Result<(), SocksError>
where
    S: AsyncWrite + Unpin,
{
    match handshake.atyp {
        RequestAtyp::V4Legacy => stream.write_all(&[0x00, 0x5B, 0, 0, 0, 0, 0, 0]).await?,
        _ => {
            let zero = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
            let reply = build_v5_reply(0x01, handshake, zero, ReplyPolicy::default());
            stream.write_all(&reply).await?;
        }
    }
    Ok(())
}

async fn handshake_v4<S>(stream: &mut S) -> Result<Handshake, SocksError>
where
    S: AsyncRead + Unpin,
{
    let cmd = read_u8(stream).await?;
    if cmd != 0x01 {
        return Err(SocksError::UnsupportedCommand(cmd));
    }
    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await.map_err(map_eof)?;
    let port = u16::from_be_bytes(port_buf);

    let mut ip_buf = [0u8; 4];
    stream.read_exact(&mut ip_buf).await.map_err(map_eof)?;
    let _userid = read_null_terminated(stream).await?;

    // SOCKS4A: DSTIP of the form 0.0.0.x (x != 0) means "domain follows".
    let is_socks4a = ip_buf[0] == 0 && ip_buf[1] == 0 && ip_buf[2] == 0 && ip_buf[3] != 0;
    let target = if is_socks4a {
        Target::Domain(read_null_terminated(stream).await?, port)
    } else {
        Target::Ip(IpAddr::V4(Ipv4Addr::from(ip_buf)), port)
    };
    Ok(Handshake { target, atyp: RequestAtyp::V4Legacy })
}

async fn handshake_v5<S>(stream: &mut S) -> Result<Handshake, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nmethods = read_u8(stream).await?;
    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await.map_err(map_eof)?;
    if !methods.contains(&0x00) {
        stream.write_all(&[0x05, 0xFF]).await?;
        return Err(SocksError::NoAcceptableMethod);
    }
    stream.write_all(&[0x05, 0x00]).await?;

    let ver = read_u8(stream).await?;
    if ver != 0x05 {
        return Err(SocksError::UnsupportedVersion(ver));
    }
    let cmd = read_u8(stream).await?;
    if cmd != 0x01 {
        return Err(SocksError::UnsupportedCommand(cmd));
    }
    let _reserved = read_u8(stream).await?;

    let atyp_byte = read_u8(stream).await?;
    let (addr, atyp) = match atyp_byte {
        0x01 => {
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.map_err(map_eof)?;
            (AddrForm::Ip(IpAddr::V4(Ipv4Addr::from(buf))), RequestAtyp::Ipv4)
        }
        0x03 => {
            let len = read_u8(stream).await?;
            let mut buf = vec![0u8; len as usize];
            stream.read_exact(&mut buf).await.map_err(map_eof)?;
            let name = String::from_utf8(buf).map_err(|_| SocksError::InvalidDomainName)?;
            (AddrForm::Domain(name), RequestAtyp::Domain)
        }
        0x04 => {
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await.map_err(map_eof)?;
            (AddrForm::Ip(IpAddr::V6(Ipv6Addr::from(buf))), RequestAtyp::Ipv6)
        }
        other => return Err(SocksError::UnsupportedAddressType(other)),
    };

    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await.map_err(map_eof)?;
    let port = u16::from_be_bytes(port_buf);

    let target = match addr {
        AddrForm::Ip(ip) => Target::Ip(ip, port),
        AddrForm::Domain(name) => Target::Domain(name, port),
    };
    Ok(Handshake { target, atyp })
}

enum AddrForm {
    Ip(IpAddr),
    Domain(String),
}

fn build_v5_reply(rep: u8, handshake: &Handshake, bound: SocketAddr, policy: ReplyPolicy) -> Vec<u8> {
    let mut out = vec![0x05, rep, 0x00];
    let requested_is_domain = matches!(handshake.target, Target::Domain(..));

    if policy.echo_requested_atyp {
        match handshake.atyp {
            RequestAtyp::Ipv4 => {
                out.push(0x01);
                push_ipv4_octets(&mut out, bound);
            }
            RequestAtyp::Ipv6 => {
                out.push(0x04);
                push_ipv6_octets(&mut out, bound);
            }
            RequestAtyp::Domain => {
                out.push(0x03);
                push_domain_echo(&mut out, &handshake.target);
            }
            RequestAtyp::V4Legacy => unreachable!("SOCKS4 replies never reach build_v5_reply"),
        }
    } else if requested_is_domain {
        out.push(0x03);
        push_domain_echo(&mut out, &handshake.target);
    } else {
        out.push(0x01);
        push_ipv4_octets(&mut out, bound);
    }

    out.extend_from_slice(&bound.port().to_be_bytes());
    out
}

fn push_ipv4_octets(out: &mut Vec<u8>, addr: SocketAddr) {
    match addr.ip() {
        IpAddr::V4(v4) => out.extend_from_slice(&v4.octets()),
        IpAddr::V6(v6) => out.extend_from_slice(&v6.octets()[12..16]),
    }
}

fn push_ipv6_octets(out: &mut Vec<u8>, addr: SocketAddr) {
    match addr.ip() {
        IpAddr::V6(v6) => out.extend_from_slice(&v6.octets()),
        IpAddr::V4(v4) => out.extend_from_slice(&v4.to_ipv6_mapped().octets()),
    }
}

fn push_domain_echo(out: &mut Vec<u8>, target: &Target) {
    if let Target::Domain(name, _) = target {
        let bytes = name.as_bytes();
        let len = u8::try_from(bytes.len()).unwrap_or(u8::MAX);
        out.push(len);
        out.extend_from_slice(&bytes[..len as usize]);
    } else {
        out.push(0);
    }
}

async fn read_u8<S: AsyncRead + Unpin>(stream: &mut S) -> Result<u8, SocksError> {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte).await.map_err(map_eof)?;
    Ok(byte[0])
}

async fn read_null_terminated<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, SocksError> {
    let mut buf = Vec::new();
    loop {
        let byte = read_u8(stream).await?;
        if byte == 0 {
            break;
        }
        buf.push(byte);
        if buf.len() > 255 {
            return Err(SocksError::Truncated);
        }
    }
    String::from_utf8(buf).map_err(|_| SocksError::InvalidDomainName)
}

fn map_eof(err: std::io::Error) -> SocksError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        SocksError::Truncated
    } else {
        SocksError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn socks4_connect_to_ip() {
        let (mut client, mut server) = duplex(256);
        let mut request = vec![0x04, 0x01];
        request.extend_from_slice(&80u16.to_be_bytes());
        request.extend_from_slice(&[93, 184, 216, 34]);
        request.push(0); // empty userid
        client.write_all(&request).await.unwrap();

        let result = handshake(&mut server).await.unwrap();
        assert_eq!(result.target, Target::Ip(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)), 80));

        let bound = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 80);
        reply_success(&mut server, &result, bound, ReplyPolicy::default()).await.unwrap();
        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x00, 0x5A, 0, 80, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn socks4a_connect_to_domain() {
        let (mut client, mut server) = duplex(256);
        let mut request = vec![0x04, 0x01];
        request.extend_from_slice(&443u16.to_be_bytes());
        request.extend_from_slice(&[0, 0, 0, 1]);
        request.push(0);
        request.extend_from_slice(b"example.com\0");
        client.write_all(&request).await.unwrap();

        let result = handshake(&mut server).await.unwrap();
        assert_eq!(result.target, Target::Domain("example.com".to_string(), 443));
    }

    #[tokio::test]
    async fn socks5_connect_to_ipv4_no_auth() {
        let (mut client, mut server) = duplex(256);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut request = vec![0x05, 0x01, 0x00, 0x01];
        request.extend_from_slice(&[10, 0, 0, 1]);
        request.extend_from_slice(&8080u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let result = handshake(&mut server).await.unwrap();

        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();
        assert_eq!(method_reply, [0x05, 0x00]);

        assert_eq!(result.target, Target::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 8080));

        let bound = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8)), 8080);
        reply_success(&mut server, &result, bound, ReplyPolicy::default()).await.unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00, 0x00, 0x01, 5, 6, 7, 8, 0x1f, 0x90]);
    }

    #[tokio::test]
    async fn socks5_no_acceptable_method_is_rejected() {
        let (mut client, mut server) = duplex(256);
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let err = handshake(&mut server).await.unwrap_err();
        assert!(matches!(err, SocksError::NoAcceptableMethod));
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xFF]);
    }

    #[tokio::test]
    async fn socks5_domain_request_echoes_atyp_by_default() {
        let (mut client, mut server) = duplex(256);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut request = vec![0x05, 0x01, 0x00, 0x03, 11];
        request.extend_from_slice(b"example.com");
        request.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let result = handshake(&mut server).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();

        let bound = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)), 443);
        reply_success(&mut server, &result, bound, ReplyPolicy::default()).await.unwrap();
        let mut reply = vec![0u8; 4 + 1 + 11 + 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[3], 0x03, "default policy echoes the requested ATYP");
        assert_eq!(&reply[4..5], &[11]);
        assert_eq!(&reply[5..16], b"example.com");
    }

    #[tokio::test]
    async fn socks5_ipv6_request_with_lying_policy_reports_ipv4() {
        let (mut client, mut server) = duplex(256);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut request = vec![0x05, 0x01, 0x00, 0x04];
        request.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        request.extend_from_slice(&53u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let result = handshake(&mut server).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();

        let bound = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(2, 2, 2, 2)), 53);
        reply_success(&mut server, &result, bound, ReplyPolicy { echo_requested_atyp: false })
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[3], 0x01, "lying policy always reports IPv4 for a non-domain request");
        assert_eq!(&reply[4..8], &[2, 2, 2, 2]);
    }
}
