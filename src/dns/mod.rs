//! DNS resolution for upstream dialing

use crate::{Error, Result};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

/// Thin wrapper around hickory so resolution failures surface as a
/// distinct error kind instead of a generic connect error.
pub struct Resolver {
    inner: TokioAsyncResolver,
}

impl Resolver {
    pub fn new() -> Self {
        let inner = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(r) => r,
            Err(_) => {
                let mut opts = ResolverOpts::default();
                opts.timeout = Duration::from_secs(5);
                opts.attempts = 2;
                TokioAsyncResolver::tokio(ResolverConfig::default(), opts)
            }
        };
        Resolver { inner }
    }

    /// Resolve a host to one IP address. Literals short-circuit.
    pub async fn resolve(&self, host: &str) -> Result<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }

        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| Error::dns(format!("{}: {}", host, e)))?;

        let ip = lookup
            .iter()
            .next()
            .ok_or_else(|| Error::dns(format!("No addresses for {}", host)))?;
        debug!("Resolved {} -> {}", host, ip);
        Ok(ip)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_literal_short_circuit() {
        let resolver = Resolver::new();
        let ip = resolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::from([127, 0, 0, 1]));

        let ip = resolver.resolve("::1").await.unwrap();
        assert!(ip.is_loopback());
    }
}
