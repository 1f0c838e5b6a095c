//! SOCKS5 proxy inbound

use crate::common::net::{configure_tcp_stream, format_bytes, Address};
use crate::common::socks::{
    read_address, write_reply, Greeting, RequestHeader, CMD_CONNECT, REP_ADDRESS_TYPE_NOT_SUPPORTED,
    REP_COMMAND_NOT_SUPPORTED, REP_GENERAL_FAILURE, REP_SUCCEEDED, SOCKS5_VERSION,
};
use crate::config::Config;
use crate::outbound::{Dialer, Direct, Trojan};
use crate::relay::{self, RelayOptions};
use crate::router::Router;
use crate::session::{next_conn_id, ConnContext};
use crate::{Error, Result};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// SOCKS5 proxy listener
pub struct Socks5Listener {
    listen: String,
    router: Arc<Router>,
    trojan: Arc<Trojan>,
    relay_opts: RelayOptions,
}

impl Socks5Listener {
    pub fn new(config: &Config, router: Arc<Router>, trojan: Arc<Trojan>) -> Self {
        Socks5Listener {
            listen: config.local.bind_addr(),
            router,
            trojan,
            relay_opts: RelayOptions {
                verbose_traffic: config.log.verbose_traffic,
                show_http_details: config.log.show_http_details,
            },
        }
    }

    /// Bind the listening socket. Failure here is fatal at startup.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.listen)
            .await
            .map_err(|e| Error::connection(format!("Bind {} failed: {}", self.listen, e)))?;
        info!("SOCKS5 proxy listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept loop. Each connection runs in its own task with a child
    /// cancellation token; a crash inside one never reaches its siblings.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let this = self.clone();
                        let conn_token = shutdown.child_token();
                        tokio::spawn(async move {
                            this.handle_connection(stream, peer, conn_token).await;
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                }
            }
        }
        info!("SOCKS5 proxy stopped");
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        let id = next_conn_id();
        info!("[conn#{}] Client connected: {}", id, peer);

        if let Err(e) = self.process(stream, peer, id, cancel).await {
            match &e {
                Error::Io(ioe)
                    if matches!(
                        ioe.kind(),
                        io::ErrorKind::UnexpectedEof
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::BrokenPipe
                    ) =>
                {
                    debug!("[conn#{}] Client went away: {}", id, e)
                }
                _ => warn!("[conn#{}] {}", id, e),
            }
        }

        info!("[conn#{}] Client connection closed: {}", id, peer);
    }

    async fn process(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        id: u64,
        cancel: CancellationToken,
    ) -> Result<()> {
        configure_tcp_stream(&stream);

        // Greeting: wrong version or a truncated read closes without reply
        timeout(HANDSHAKE_TIMEOUT, Greeting::read_from(&mut stream))
            .await
            .map_err(|_| Error::timeout("Greeting timed out"))??;
        Greeting::write_ack(&mut stream).await?;

        let header = timeout(HANDSHAKE_TIMEOUT, RequestHeader::read_from(&mut stream))
            .await
            .map_err(|_| Error::timeout("Request timed out"))??;

        if header.version != SOCKS5_VERSION {
            write_reply(&mut stream, REP_GENERAL_FAILURE).await?;
            return Err(Error::protocol(format!(
                "Unsupported SOCKS version: {}",
                header.version
            )));
        }
        if header.command != CMD_CONNECT {
            write_reply(&mut stream, REP_COMMAND_NOT_SUPPORTED).await?;
            return Err(Error::unsupported(format!(
                "Command {:#04x} not supported",
                header.command
            )));
        }

        let read = timeout(HANDSHAKE_TIMEOUT, read_address(&mut stream, header.atyp))
            .await
            .map_err(|_| Error::timeout("Request timed out"))?;
        let (address, port) = match read {
            Ok(pair) => pair,
            Err(e @ Error::Protocol(_)) => {
                write_reply(&mut stream, REP_ADDRESS_TYPE_NOT_SUPPORTED).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // Re-classify so IP literals delivered as ATYP_DOMAIN dial as literals
        let host = address.to_host();
        let address = Address::from(host.clone());

        let dialer = if self.router.should_proxy(&host) {
            Dialer::Trojan(self.trojan.clone())
        } else {
            Dialer::Direct(Direct::new())
        };
        info!(
            "[conn#{}] {} -> {}:{} via {}",
            id,
            peer,
            host,
            port,
            dialer.label()
        );

        let remote = match dialer.dial(&address, port).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!("[conn#{}] Dial {}:{} failed: {}", id, host, port, e);
                write_reply(&mut stream, REP_GENERAL_FAILURE).await?;
                return Ok(());
            }
        };
        write_reply(&mut stream, REP_SUCCEEDED).await?;

        let ctx = Arc::new(ConnContext::new(id, peer, format!("{}:{}", host, port)));
        debug!("[conn#{}] Relay started: {}", id, ctx.dest);
        relay::run(stream, remote, ctx.clone(), self.relay_opts, cancel).await;

        let elapsed = ctx.start.elapsed().as_secs_f64();
        let up = ctx.up_bytes();
        let down = ctx.down_bytes();
        let total = up + down;
        let speed = if elapsed > 0.0 {
            (total as f64 / elapsed) as u64
        } else {
            0
        };
        info!(
            "[conn#{}] Transfer summary: up {} down {} total {} in {:.2}s ({}/s)",
            id,
            format_bytes(up),
            format_bytes(down),
            format_bytes(total),
            elapsed,
            format_bytes(speed)
        );
        Ok(())
    }
}
