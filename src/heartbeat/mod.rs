//! Upstream heartbeat prober
//!
//! Every tick opens and immediately closes a TLS connection to the
//! upstream, then emits one status line. Probe failures never touch
//! client traffic.

use crate::dns::Resolver;
use crate::{Error, Result};
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const PROBE_INTERVAL: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_TEXT_LIMIT: usize = 50;

#[derive(Debug, Default)]
struct ProbeState {
    last_ok: Option<bool>,
    latency_ms: Option<f64>,
    consecutive_failures: u32,
}

/// Snapshot of the prober for display
#[derive(Debug, Clone)]
pub struct HeartbeatStatus {
    pub running: bool,
    pub last_ok: Option<bool>,
    pub latency_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub server: String,
}

/// Periodic upstream reachability prober
pub struct Heartbeat {
    server: String,
    port: u16,
    sni: String,
    connector: TlsConnector,
    resolver: Arc<Resolver>,
    interval: Duration,
    state: Mutex<ProbeState>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Heartbeat {
    pub fn new(
        server: String,
        port: u16,
        sni: String,
        tls_config: Arc<rustls::ClientConfig>,
        resolver: Arc<Resolver>,
    ) -> Self {
        Heartbeat {
            server,
            port,
            sni,
            connector: TlsConnector::from(tls_config),
            resolver,
            interval: PROBE_INTERVAL,
            state: Mutex::new(ProbeState::default()),
            task: Mutex::new(None),
        }
    }

    /// Start the probe loop. A second start while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let this = self.clone();
        let handle = tokio::spawn(this.monitor_loop(cancel.clone()));
        *task = Some((cancel, handle));
        info!("Heartbeat started for {}:{}", self.server, self.port);
    }

    /// Cancel the probe loop and wait for it to exit.
    pub async fn stop(&self) {
        let taken = self.task.lock().take();
        if let Some((cancel, handle)) = taken {
            cancel.cancel();
            let _ = handle.await;
            info!("Heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    pub fn status(&self) -> HeartbeatStatus {
        let state = self.state.lock();
        HeartbeatStatus {
            running: self.is_running(),
            last_ok: state.last_ok,
            latency_ms: state.latency_ms,
            consecutive_failures: state.consecutive_failures,
            server: format!("{}:{}", self.server, self.port),
        }
    }

    async fn monitor_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // Mid-probe cancellation tears the probe down without a status line
            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.probe() => self.observe(outcome),
            }
        }
    }

    async fn probe(&self) -> Result<f64> {
        let start = Instant::now();
        timeout(PROBE_TIMEOUT, self.open_and_close())
            .await
            .map_err(|_| Error::timeout("probe timed out"))??;
        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }

    async fn open_and_close(&self) -> Result<()> {
        let ip = self.resolver.resolve(&self.server).await?;
        let stream = TcpStream::connect(SocketAddr::new(ip, self.port))
            .await
            .map_err(|e| Error::connection(e.to_string()))?;

        let server_name = ServerName::try_from(self.sni.clone())
            .map_err(|_| Error::tls(format!("Invalid SNI: {}", self.sni)))?;
        let tls_stream = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::tls(e.to_string()))?;
        drop(tls_stream);
        Ok(())
    }

    fn observe(&self, outcome: Result<f64>) {
        let ts = chrono::Local::now().format("%H:%M:%S");
        let endpoint = format!("{}:{}", self.server, self.port);
        let mut state = self.state.lock();

        match outcome {
            Ok(latency) => {
                let glyph = if latency < 100.0 {
                    "*"
                } else if latency < 300.0 {
                    "~"
                } else {
                    "!"
                };
                info!(
                    "[{}] {} upstream ok | latency {:.1}ms | {}",
                    ts, glyph, latency, endpoint
                );
                if state.last_ok == Some(false) {
                    info!("Upstream recovered: {}", endpoint);
                }
                state.last_ok = Some(true);
                state.latency_ms = Some(latency);
                state.consecutive_failures = 0;
            }
            Err(e) => {
                let reason = describe(&e);
                info!("[{}] x upstream failed | {} | {}", ts, reason, endpoint);
                if state.last_ok != Some(false) {
                    warn!("Upstream degraded: {}", endpoint);
                }
                state.last_ok = Some(false);
                state.latency_ms = None;
                state.consecutive_failures += 1;
                if state.consecutive_failures >= 3 {
                    error!(
                        "Upstream failed {} consecutive probes: {}",
                        state.consecutive_failures, reason
                    );
                }
            }
        }
    }
}

/// One-line failure description by error family, capped at 50 chars
fn describe(e: &Error) -> String {
    let text = match e {
        Error::Timeout(_) => "connect timed out".to_string(),
        Error::Tls(m) => format!("TLS error: {}", m),
        Error::Dns(m) => format!("DNS error: {}", m),
        Error::Connection(m) if m.to_lowercase().contains("refused") => {
            "connection refused".to_string()
        }
        other => other.to_string(),
    };
    text.chars().take(ERROR_TEXT_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::tls::client_config;

    fn heartbeat(server: &str, port: u16) -> Arc<Heartbeat> {
        Arc::new(Heartbeat::new(
            server.to_string(),
            port,
            server.to_string(),
            client_config(false),
            Arc::new(Resolver::new()),
        ))
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let hb = heartbeat("127.0.0.1", 1);
        assert!(!hb.is_running());

        hb.start();
        assert!(hb.is_running());

        // Second start is a no-op
        hb.start();
        assert!(hb.is_running());

        hb.stop().await;
        assert!(!hb.is_running());
    }

    #[tokio::test]
    async fn test_failed_probe_updates_state() {
        // Closed loopback port: the first tick fails fast
        let hb = heartbeat("127.0.0.1", 1);
        hb.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        hb.stop().await;

        let status = hb.status();
        assert_eq!(status.last_ok, Some(false));
        assert!(status.consecutive_failures >= 1);
        assert!(status.latency_ms.is_none());
    }

    #[test]
    fn test_describe_truncates() {
        let e = Error::tls("x".repeat(200));
        assert_eq!(describe(&e).chars().count(), ERROR_TEXT_LIMIT);
    }

    #[test]
    fn test_describe_families() {
        assert_eq!(describe(&Error::timeout("whatever")), "connect timed out");
        assert_eq!(
            describe(&Error::connection("Connection refused (os error 111)")),
            "connection refused"
        );
        assert!(describe(&Error::dns("no records")).starts_with("DNS error"));
    }
}
