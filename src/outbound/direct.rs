//! Direct outbound (no proxy)

use super::ProxyStream;
use crate::common::net::{configure_tcp_stream, Address};
use crate::{Error, Result};
use tokio::net::TcpStream;
use tracing::debug;

/// Plain TCP connection to the requested destination.
///
/// Resolution and connect timeout are left to the OS.
pub struct Direct;

impl Direct {
    pub fn new() -> Self {
        Direct
    }

    pub async fn dial(&self, addr: &Address, port: u16) -> Result<Box<dyn ProxyStream>> {
        let target = addr.to_string_with_port(port);
        debug!("Direct connecting to {}", target);

        let stream = TcpStream::connect(&target)
            .await
            .map_err(|e| Error::connection(format!("Failed to connect to {}: {}", target, e)))?;
        configure_tcp_stream(&stream);

        debug!("Direct connected to {}", target);
        Ok(Box::new(stream))
    }
}

impl Default for Direct {
    fn default() -> Self {
        Self::new()
    }
}
