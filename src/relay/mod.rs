//! Bidirectional relay between the client and the outbound stream
//!
//! Two one-way pumps run concurrently, each with its own 8 KiB buffer.
//! The connection is torn down when the first pump completes for any
//! reason; the survivor gets a short grace before it is aborted.

use crate::session::ConnContext;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHUNK_SIZE: usize = 8 * 1024;
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_GRACE: Duration = Duration::from_secs(3);
const REAP_GRACE: Duration = Duration::from_secs(1);

const HTTP_METHODS: [&str; 6] = ["GET ", "POST ", "PUT ", "DELETE ", "HEAD ", "OPTIONS "];

/// Observability knobs taken from the log config
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOptions {
    pub verbose_traffic: bool,
    pub show_http_details: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

enum PumpEnd {
    /// Peer closed its write half
    Eof,
    /// No data for the idle window
    Idle,
    Cancelled,
    Failed(io::Error),
}

/// Run the duplex relay until one direction finishes.
///
/// Counters on `ctx` are updated per successful read; the caller emits
/// the summary after this returns.
pub async fn run<C, T>(
    client: C,
    target: T,
    ctx: Arc<ConnContext>,
    opts: RelayOptions,
    cancel: CancellationToken,
) where
    C: AsyncRead + AsyncWrite + Send + 'static,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_rd, client_wr) = split(client);
    let (target_rd, target_wr) = split(target);

    let mut up = tokio::spawn(pump(
        client_rd,
        target_wr,
        Direction::Up,
        ctx.clone(),
        opts,
        cancel.clone(),
    ));
    let mut down = tokio::spawn(pump(
        target_rd,
        client_wr,
        Direction::Down,
        ctx.clone(),
        opts,
        cancel.clone(),
    ));

    let (first, first_dir, mut rest, rest_dir) = tokio::select! {
        r = &mut up => (r, Direction::Up, down, Direction::Down),
        r = &mut down => (r, Direction::Down, up, Direction::Up),
    };
    log_outcome(first, first_dir, &ctx);

    // First completion tears the connection down
    cancel.cancel();
    match tokio::time::timeout(REAP_GRACE, &mut rest).await {
        Ok(r) => log_outcome(r, rest_dir, &ctx),
        Err(_) => {
            rest.abort();
            let _ = rest.await;
            debug!("[conn#{}] {} pump force-closed", ctx.id, rest_dir.as_str());
        }
    }
}

async fn pump<R, W>(
    mut rd: R,
    mut wr: W,
    dir: Direction,
    ctx: Arc<ConnContext>,
    opts: RelayOptions,
    cancel: CancellationToken,
) -> PumpEnd
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return PumpEnd::Cancelled,
            r = tokio::time::timeout(READ_IDLE_TIMEOUT, rd.read(&mut buf)) => r,
        };
        let n = match read {
            Err(_) => return PumpEnd::Idle,
            Ok(Ok(0)) => {
                // Half-close: propagate EOF, the peer may keep sending
                let _ = tokio::time::timeout(CLOSE_GRACE, wr.shutdown()).await;
                return PumpEnd::Eof;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return PumpEnd::Failed(e),
        };

        match dir {
            Direction::Up => ctx.add_up(n as u64),
            Direction::Down => ctx.add_down(n as u64),
        }

        if opts.show_http_details {
            sniff_http(&buf[..n], dir, ctx.id);
        }
        if opts.verbose_traffic {
            debug!("[conn#{}] {} {} bytes", ctx.id, dir.as_str(), n);
        }

        let write = tokio::select! {
            _ = cancel.cancelled() => return PumpEnd::Cancelled,
            r = tokio::time::timeout(WRITE_TIMEOUT, write_chunk(&mut wr, &buf[..n])) => r,
        };
        match write {
            Err(_) => {
                return PumpEnd::Failed(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "write drain timed out",
                ))
            }
            Ok(Err(e)) => return PumpEnd::Failed(e),
            Ok(Ok(())) => {}
        }
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(wr: &mut W, chunk: &[u8]) -> io::Result<()> {
    wr.write_all(chunk).await?;
    wr.flush().await
}

/// Shutdown-shaped errors are routine in proxy traffic and stay at debug
fn is_benign(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
    ) || e.to_string().contains("close_notify")
}

fn log_outcome(res: Result<PumpEnd, JoinError>, dir: Direction, ctx: &ConnContext) {
    match res {
        Ok(PumpEnd::Eof) => debug!("[conn#{}] {} peer closed", ctx.id, dir.as_str()),
        Ok(PumpEnd::Idle) => debug!("[conn#{}] {} read idle timeout", ctx.id, dir.as_str()),
        Ok(PumpEnd::Cancelled) => debug!("[conn#{}] {} pump cancelled", ctx.id, dir.as_str()),
        Ok(PumpEnd::Failed(e)) => {
            if is_benign(&e) {
                debug!("[conn#{}] {} closed: {}", ctx.id, dir.as_str(), e);
            } else {
                warn!("[conn#{}] {} error: {}", ctx.id, dir.as_str(), e);
            }
        }
        Err(_) => debug!("[conn#{}] {} pump aborted", ctx.id, dir.as_str()),
    }
}

fn sniff_http(data: &[u8], dir: Direction, conn_id: u64) {
    let text = String::from_utf8_lossy(data);
    match dir {
        Direction::Up => {
            if HTTP_METHODS.iter().any(|m| text.starts_with(m)) {
                let mut lines = text.lines();
                if let Some(request_line) = lines.next() {
                    info!("[conn#{}] HTTP request: {}", conn_id, request_line.trim());
                }
                for line in lines.take(5) {
                    if let Some(prefix) = line.get(..5) {
                        if prefix.eq_ignore_ascii_case("host:") {
                            info!("[conn#{}] HTTP host: {}", conn_id, line[5..].trim());
                            break;
                        }
                    }
                }
            }
        }
        Direction::Down => {
            if text.starts_with("HTTP/") {
                if let Some(status_line) = text.lines().next() {
                    info!("[conn#{}] HTTP response: {}", conn_id, status_line.trim());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::next_conn_id;
    use tokio::io::duplex;

    fn test_ctx() -> Arc<ConnContext> {
        Arc::new(ConnContext::new(
            next_conn_id(),
            "127.0.0.1:9999".parse().unwrap(),
            "example.com:80".to_string(),
        ))
    }

    #[tokio::test]
    async fn test_bytes_relayed_in_order() {
        let (client_side, mut client) = duplex(64 * 1024);
        let (target_side, mut target) = duplex(64 * 1024);

        let ctx = test_ctx();
        let relay = tokio::spawn(run(
            client_side,
            target_side,
            ctx.clone(),
            RelayOptions::default(),
            CancellationToken::new(),
        ));

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        target.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, payload);

        relay.await.unwrap();
        assert_eq!(ctx.up_bytes(), payload.len() as u64);
        assert_eq!(ctx.down_bytes(), 0);
    }

    #[tokio::test]
    async fn test_eof_propagates_and_relay_ends() {
        let (client_side, mut client) = duplex(1024);
        let (target_side, mut target) = duplex(1024);

        let ctx = test_ctx();
        let relay = tokio::spawn(run(
            client_side,
            target_side,
            ctx.clone(),
            RelayOptions::default(),
            CancellationToken::new(),
        ));

        target.write_all(b"response data").await.unwrap();
        let mut buf = [0u8; 13];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"response data");

        // Target closes; client observes EOF and the relay finishes
        target.shutdown().await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        relay.await.unwrap();
        assert_eq!(ctx.down_bytes(), 13);
        assert_eq!(ctx.down_packets(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_relay() {
        let (client_side, _client) = duplex(1024);
        let (target_side, _target) = duplex(1024);

        let ctx = test_ctx();
        let cancel = CancellationToken::new();
        let relay = tokio::spawn(run(
            client_side,
            target_side,
            ctx,
            RelayOptions::default(),
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), relay)
            .await
            .expect("relay did not stop on cancellation")
            .unwrap();
    }

    #[test]
    fn test_benign_classification() {
        assert!(is_benign(&io::Error::new(io::ErrorKind::UnexpectedEof, "eof")));
        assert!(is_benign(&io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
        assert!(is_benign(&io::Error::new(io::ErrorKind::TimedOut, "timeout")));
        assert!(is_benign(&io::Error::new(
            io::ErrorKind::Other,
            "peer closed connection without sending TLS close_notify"
        )));
        assert!(!is_benign(&io::Error::new(
            io::ErrorKind::InvalidData,
            "received corrupt message"
        )));
    }
}
