//! Outbound dialers
//!
//! Each connection gets a dialer chosen at dispatch time: plain TCP to the
//! destination, or the Trojan upstream. Both yield an established
//! bidirectional stream the relay is generic over.

mod direct;
mod trojan;

pub use direct::Direct;
pub use trojan::Trojan;

use crate::common::net::Address;
use crate::Result;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// An established outbound stream
pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ProxyStream for T {}

/// Dialer chosen per connection
pub enum Dialer {
    Direct(Direct),
    Trojan(Arc<Trojan>),
}

impl Dialer {
    /// Open a stream to the destination
    pub async fn dial(&self, addr: &Address, port: u16) -> Result<Box<dyn ProxyStream>> {
        match self {
            Dialer::Direct(d) => d.dial(addr, port).await,
            Dialer::Trojan(t) => t.dial(addr, port).await,
        }
    }

    /// Short label for connection logs
    pub fn label(&self) -> &'static str {
        match self {
            Dialer::Direct(_) => "direct",
            Dialer::Trojan(_) => "proxy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialer_labels() {
        assert_eq!(Dialer::Direct(Direct::new()).label(), "direct");
    }
}
