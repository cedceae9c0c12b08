//! Bidirectional byte pump connecting two ends of a proxied connection.
//!
//! Mirrors the original codec's `Splice`: two independent directions, each
//! running until its read side hits EOF, at which point it shuts down the
//! write half of the *other* connection (a graceful half-close) rather than
//! tearing down the whole relay. Either direction can be cancelled
//! out-of-band via a shared [`CancellationToken`], which both directions
//! race against their own read.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use xcodec_pipe::{PipeAction, PipeSession};

use crate::error::SpliceError;

/// Read buffer size for the codec-aware relay. One segment's worth of
/// backlog plus headroom; large enough that a single read usually spans
/// several content-defined segments.
const CODEC_READ_BUF: usize = 64 * 1024;

/// Pump bytes in both directions between `a` and `b` until both sides have
/// reached EOF (or `cancel` fires). Each direction runs as its own task, so
/// one side finishing early does not block the other from draining.
///
/// # Errors
///
/// Returns the first I/O error observed on either direction. A
/// cancellation is not an error: the relay simply stops early.
pub async fn splice<A, B>(a: A, b: B, cancel: CancellationToken) -> Result<(), SpliceError>
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let forward_cancel = cancel.clone();
    let forward = tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            () = forward_cancel.cancelled() => Ok(0),
            result = tokio::io::copy(&mut a_read, &mut b_write) => result,
        };
        let _ = b_write.shutdown().await;
        result
    });

    let reverse_cancel = cancel.clone();
    let reverse = tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            () = reverse_cancel.cancelled() => Ok(0),
            result = tokio::io::copy(&mut b_read, &mut a_write) => result,
        };
        let _ = a_write.shutdown().await;
        result
    });

    let (forward_result, reverse_result) = tokio::join!(forward, reverse);
    let forward_bytes = forward_result.map_err(|err| SpliceError::Join(err.to_string()))??;
    let reverse_bytes = reverse_result.map_err(|err| SpliceError::Join(err.to_string()))??;
    debug!(forward_bytes, reverse_bytes, "splice finished");
    Ok(())
}

/// Pump bytes between `app` and `wan`, passing everything leaving toward
/// `wan` through `session`'s encoder and everything arriving from `wan`
/// through its decoder.
///
/// Unlike [`splice`], this runs as a single task rather than two spawned
/// halves: `session` has no internal locking, and both the app-read and
/// wan-read paths need mutable access to it, so one task driving a
/// `select!` loop is simpler than wrapping it in a mutex to share across
/// two tasks. The loop stops once both sides have reached EOF or the
/// session reports [`PipeAction::Complete`] on both legs of its EOS
/// handshake.
///
/// # Errors
///
/// Returns the first I/O error observed on either side, or the first
/// [`xcodec_pipe::PipeError`] the session raises (a malformed frame, an
/// out-of-window backref, an ASK for a tag neither side ever declared).
/// Cancellation is not an error.
pub async fn codec_splice<A, W>(
    app: A,
    wan: W,
    mut session: PipeSession,
    cancel: CancellationToken,
) -> Result<(), SpliceError>
where
    A: AsyncRead + AsyncWrite + Unpin,
    W: AsyncRead + AsyncWrite + Unpin,
{
    let (mut app_read, mut app_write) = tokio::io::split(app);
    let (mut wan_read, mut wan_write) = tokio::io::split(wan);

    for action in session.start() {
        apply_action(action, &mut wan_write, &mut app_write).await?;
    }

    let mut app_buf = vec![0u8; CODEC_READ_BUF];
    let mut wan_buf = vec![0u8; CODEC_READ_BUF];
    let mut app_eof = false;
    let mut wan_eof = false;

    loop {
        if session.is_complete() || (app_eof && wan_eof) {
            break;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Ok(());
            }
            result = app_read.read(&mut app_buf), if !app_eof => {
                let n = result?;
                if n == 0 {
                    app_eof = true;
                    for action in session.send_eos() {
                        apply_action(action, &mut wan_write, &mut app_write).await?;
                    }
                } else {
                    for action in session.submit_outbound(&app_buf[..n]) {
                        apply_action(action, &mut wan_write, &mut app_write).await?;
                    }
                }
            }
            result = wan_read.read(&mut wan_buf), if !wan_eof => {
                let n = result?;
                if n == 0 {
                    wan_eof = true;
                    let _ = app_write.shutdown().await;
                } else {
                    for action in session.receive_wire(&wan_buf[..n]) {
                        apply_action(action, &mut wan_write, &mut app_write).await?;
                    }
                }
            }
        }
    }

    let _ = app_write.shutdown().await;
    let _ = wan_write.shutdown().await;
    debug!("codec splice finished");
    Ok(())
}

async fn apply_action<W, A>(
    action: PipeAction,
    wan_write: &mut W,
    app_write: &mut A,
) -> Result<(), SpliceError>
where
    W: AsyncWrite + Unpin,
    A: AsyncWrite + Unpin,
{
    match action {
        PipeAction::SendWire(bytes) => wan_write.write_all(&bytes).await?,
        PipeAction::Deliver(bytes) => app_write.write_all(&bytes).await?,
        PipeAction::Complete => {}
        PipeAction::Fail(err) => return Err(SpliceError::Pipe(err)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    use super::*;

    #[tokio::test]
    async fn bytes_flow_both_directions_until_eof() {
        let (client_side, a) = duplex(256);
        let (b, upstream_side) = duplex(256);
        let cancel = CancellationToken::new();

        let relay = tokio::spawn(splice(a, b, cancel));

        let (mut client_side, mut upstream_side) = (client_side, upstream_side);
        client_side.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream_side.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client_side);
        drop(upstream_side);
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_relay() {
        let (client_side, a) = duplex(256);
        let (b, _upstream_side) = duplex(256);
        let cancel = CancellationToken::new();

        let relay = tokio::spawn(splice(a, b, cancel.clone()));
        cancel.cancel();
        relay.await.unwrap().unwrap();
        drop(client_side);
    }

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use uuid::Uuid;
    use xcodec_core::{MemoryCache, SegmentBacking};
    use xcodec_pipe::CacheProvider;

    struct TestProvider {
        caches: Mutex<HashMap<Uuid, Arc<dyn SegmentBacking>>>,
    }

    impl TestProvider {
        fn new() -> Self {
            Self { caches: Mutex::new(HashMap::new()) }
        }
    }

    impl CacheProvider for TestProvider {
        fn resolve(&self, uuid: Uuid) -> Arc<dyn SegmentBacking> {
            self.caches
                .lock()
                .expect("provider mutex poisoned")
                .entry(uuid)
                .or_insert_with(|| Arc::new(MemoryCache::new(uuid, 256)))
                .clone()
        }
    }

    /// Bridges two `codec_splice` legs back to back over a pair of duplex
    /// streams standing in for the WAN link, and checks that bytes written
    /// on one app side arrive unmodified on the other, round-tripped
    /// through encode/decode.
    #[tokio::test]
    async fn codec_splice_relays_bytes_through_both_sessions() {
        let (local_app, local_app_peer) = duplex(8192);
        let (remote_app_peer, remote_app) = duplex(8192);
        let (local_wan, remote_wan) = duplex(8192);

        let provider: Arc<dyn CacheProvider> = Arc::new(TestProvider::new());
        let local_session = PipeSession::new(Uuid::from_u128(1), provider.clone(), 64);
        let remote_session = PipeSession::new(Uuid::from_u128(2), provider, 64);

        let cancel = CancellationToken::new();
        let local_relay = tokio::spawn(codec_splice(
            local_app,
            local_wan,
            local_session,
            cancel.clone(),
        ));
        let remote_relay = tokio::spawn(codec_splice(
            remote_app,
            remote_wan,
            remote_session,
            cancel.clone(),
        ));

        let mut local_app_peer = local_app_peer;
        let mut remote_app_peer = remote_app_peer;

        local_app_peer.write_all(b"hello over the wire").await.unwrap();
        let mut buf = [0u8; 19];
        remote_app_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello over the wire");

        remote_app_peer.write_all(b"and back again").await.unwrap();
        let mut buf = [0u8; 14];
        local_app_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"and back again");

        drop(local_app_peer);
        drop(remote_app_peer);
        local_relay.await.unwrap().unwrap();
        remote_relay.await.unwrap().unwrap();
    }
}
