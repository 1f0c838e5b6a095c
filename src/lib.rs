//! troxy - local SOCKS5 endpoint relaying TCP through a Trojan-over-TLS server
//!
//! # Architecture
//!
//! ```text
//! +-----------+     +-----------------+     +-----------------------+
//! |  client   | --> | inbound/socks5  | --> | outbound (per conn)   |
//! +-----------+     |   (acceptor)    |     |  Direct | Trojan+TLS  |
//!                   +--------+--------+     +-----------+-----------+
//!                            |                          |
//!                      +-----v-----+             +------v------+
//!                      |  router   |             |    relay    |
//!                      +-----------+             +-------------+
//!
//!                   heartbeat/ probes the upstream on the side
//! ```

pub mod common;
pub mod config;
pub mod dns;
pub mod heartbeat;
pub mod inbound;
pub mod outbound;
pub mod relay;
pub mod router;
pub mod session;

pub use common::error::{Error, Result};
pub use config::Config;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Grace given to in-flight tasks after the shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Application instance wiring all components
pub struct App {
    listener: Arc<inbound::Socks5Listener>,
    heartbeat: Arc<heartbeat::Heartbeat>,
}

impl App {
    /// Build all components from a validated configuration.
    ///
    /// The plaintext password is hashed here and not retained.
    pub fn new(config: Config) -> Result<Self> {
        let resolver = Arc::new(dns::Resolver::new());
        let tls = common::tls::client_config(config.trojan.verify_ssl);

        let trojan = Arc::new(outbound::Trojan::new(
            config.trojan.server.clone(),
            config.trojan.port,
            &config.trojan.password,
            config.trojan.sni().to_string(),
            tls.clone(),
            resolver.clone(),
        ));

        let router = Arc::new(router::Router::new(&config.routing));

        let listener = Arc::new(inbound::Socks5Listener::new(
            &config,
            router,
            trojan.clone(),
        ));

        let heartbeat = Arc::new(heartbeat::Heartbeat::new(
            config.trojan.server.clone(),
            config.trojan.port,
            config.trojan.sni().to_string(),
            tls,
            resolver,
        ));

        info!(
            "Upstream {} (sni {}, verify_ssl {})",
            config.trojan.endpoint(),
            config.trojan.sni(),
            config.trojan.verify_ssl
        );

        Ok(App {
            listener,
            heartbeat,
        })
    }

    /// Run until SIGINT/SIGTERM. Bind failure is fatal and returned.
    pub async fn run(&self) -> Result<()> {
        let shutdown = CancellationToken::new();

        let socket = self.listener.bind().await?;
        let serve = tokio::spawn(self.listener.clone().serve(socket, shutdown.clone()));

        self.heartbeat.start();

        wait_for_signal().await;
        info!("Shutdown signal received");

        shutdown.cancel();
        self.heartbeat.stop().await;
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, serve).await;

        info!("Proxy stopped");
        Ok(())
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
