//! End-to-end tests driving a real [`wanproxy::Proxy`] against a TOML
//! configuration file, the same surface the `wanproxy` binary itself uses.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wanproxy::Proxy;

async fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                while let Ok(n) = sock.read(&mut buf).await {
                    if n == 0 || sock.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

fn write_config(contents: &str) -> std::path::PathBuf {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let path =
        std::env::temp_dir().join(format!("wanproxy-it-{}-{id}.toml", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn socks_interface_relays_to_a_client_chosen_destination() {
    let echo_addr = spawn_echo_server().await;

    // Probe the OS for a free port, then hand that exact address to the
    // proxy's config so the test can connect to a known address.
    let bind_probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = bind_probe.local_addr().unwrap();
    drop(bind_probe);
    let config_path = write_config(&format!(
        r#"
        [[interface]]
        protocol = "socks"
        bind = "{proxy_addr}"
        "#
    ));

    let proxy = Proxy::start(&config_path).await.unwrap();
    let _ = std::fs::remove_file(&config_path);

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let mut request = vec![0x04, 0x01];
    request.extend_from_slice(&echo_addr.port().to_be_bytes());
    request.extend_from_slice(&Ipv4Addr::LOCALHOST.octets());
    request.push(0x00);
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 8];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x00);
    assert_eq!(reply[1], 0x5a);

    client.write_all(b"round trip").await.unwrap();
    let mut echoed = [0u8; 10];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"round trip");

    drop(client);
    tokio::time::timeout(Duration::from_secs(5), proxy.shutdown()).await.unwrap();
}

#[tokio::test]
async fn tcp_forward_interface_ignores_the_client_and_dials_its_fixed_remote() {
    let echo_addr = spawn_echo_server().await;

    let bind_probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = bind_probe.local_addr().unwrap();
    drop(bind_probe);
    let config_path = write_config(&format!(
        r#"
        [[interface]]
        protocol = "tcp-forward"
        bind = "{proxy_addr}"
        remote = "{echo_addr}"
        "#
    ));

    let proxy = Proxy::start(&config_path).await.unwrap();
    let _ = std::fs::remove_file(&config_path);

    // No SOCKS handshake at all: the first bytes written are already
    // application data, and they still arrive at `echo_addr`.
    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(b"forwarded").await.unwrap();
    let mut echoed = [0u8; 9];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"forwarded");

    drop(client);
    tokio::time::timeout(Duration::from_secs(5), proxy.shutdown()).await.unwrap();
}

#[tokio::test]
async fn a_second_bind_to_the_same_address_fails_with_a_bind_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config_path = write_config(&format!(
        r#"
        [[interface]]
        protocol = "socks"
        bind = "{addr}"
        "#
    ));

    let err = Proxy::start(&config_path).await.unwrap_err();
    let _ = std::fs::remove_file(&config_path);
    drop(listener);

    assert!(matches!(err, wanproxy::error::ProxyError::Bind { .. }));
}
