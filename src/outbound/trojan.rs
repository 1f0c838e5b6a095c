//! Trojan outbound protocol

use super::ProxyStream;
use crate::common::net::{configure_tcp_stream, Address};
use crate::dns::Resolver;
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use rustls::pki_types::ServerName;
use sha2::{Digest, Sha224};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// TCP + TLS dial deadline, header write included
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Trojan command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrojanCommand {
    Connect = 0x01,
}

/// Build the opening bytes of a Trojan request:
/// `sha224hex(password) CRLF CMD ATYP addr port_be CRLF`
///
/// `password_hash` is the 56-byte lowercase hex digest. Domains must be
/// 1-255 bytes; violations are rejected before any I/O happens.
pub fn build_request(
    password_hash: &str,
    command: TrojanCommand,
    address: &Address,
    port: u16,
) -> Result<Vec<u8>> {
    let mut header = BytesMut::with_capacity(64 + 20);
    header.put_slice(password_hash.as_bytes());
    header.put_slice(b"\r\n");
    header.put_u8(command as u8);
    match address {
        Address::Ipv4(ip) => {
            header.put_u8(0x01);
            header.put_slice(&ip.octets());
        }
        Address::Ipv6(ip) => {
            header.put_u8(0x04);
            header.put_slice(&ip.octets());
        }
        Address::Domain(d) => {
            let bytes = d.as_bytes();
            if bytes.is_empty() || bytes.len() > 255 {
                return Err(Error::address(format!(
                    "Domain length {} out of range 1-255",
                    bytes.len()
                )));
            }
            header.put_u8(0x03);
            header.put_u8(bytes.len() as u8);
            header.put_slice(bytes);
        }
    }
    header.put_u16(port);
    header.put_slice(b"\r\n");
    Ok(header.to_vec())
}

/// Trojan upstream dialer
pub struct Trojan {
    server: String,
    port: u16,
    password_hash: String,
    sni: String,
    connector: TlsConnector,
    resolver: Arc<Resolver>,
}

impl Trojan {
    pub fn new(
        server: String,
        port: u16,
        password: &str,
        sni: String,
        tls_config: Arc<rustls::ClientConfig>,
        resolver: Arc<Resolver>,
    ) -> Self {
        let mut hasher = Sha224::new();
        hasher.update(password.as_bytes());
        let password_hash = hex::encode(hasher.finalize());

        Trojan {
            server,
            port,
            password_hash,
            sni,
            connector: TlsConnector::from(tls_config),
            resolver,
        }
    }

    /// Open a TLS stream to the upstream and write the Trojan request.
    ///
    /// The server is silent on success; payload bytes may follow
    /// immediately, so no response is awaited.
    pub async fn dial(&self, address: &Address, port: u16) -> Result<Box<dyn ProxyStream>> {
        let header = build_request(&self.password_hash, TrojanCommand::Connect, address, port)?;

        let stream = tokio::time::timeout(DIAL_TIMEOUT, self.open(header))
            .await
            .map_err(|_| Error::timeout(format!("Trojan dial to {} timed out", self.server)))??;

        debug!(
            "Trojan tunnel to {} established via {}:{}",
            address.to_string_with_port(port),
            self.server,
            self.port
        );
        Ok(stream)
    }

    async fn open(&self, header: Vec<u8>) -> Result<Box<dyn ProxyStream>> {
        let ip = self.resolver.resolve(&self.server).await?;
        let addr = SocketAddr::new(ip, self.port);

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::connection(format!("Connect to {} failed: {}", addr, e)))?;
        configure_tcp_stream(&stream);

        let server_name = ServerName::try_from(self.sni.clone())
            .map_err(|_| Error::tls(format!("Invalid SNI: {}", self.sni)))?;

        let mut tls_stream = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::tls(format!("TLS handshake with {} failed: {}", self.server, e)))?;

        tls_stream.write_all(&header).await?;
        tls_stream.flush().await?;

        Ok(Box::new(tls_stream))
    }
}
