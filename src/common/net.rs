//! Network utilities

use socket2::SockRef;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::net::TcpStream;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// Destination address as carried by SOCKS5 and Trojan requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// IPv6 address
    Ipv6(Ipv6Addr),
    /// Domain name
    Domain(String),
}

impl Address {
    /// Convert to string representation with port
    pub fn to_string_with_port(&self, port: u16) -> String {
        match self {
            Address::Ipv4(ip) => format!("{}:{}", ip, port),
            Address::Ipv6(ip) => format!("[{}]:{}", ip, port),
            Address::Domain(d) => format!("{}:{}", d, port),
        }
    }

    /// Get as IP if the address is a literal
    pub fn to_ip(&self) -> Option<IpAddr> {
        match self {
            Address::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Address::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Address::Domain(_) => None,
        }
    }

    /// Get as host string
    pub fn to_host(&self) -> String {
        match self {
            Address::Ipv4(ip) => ip.to_string(),
            Address::Ipv6(ip) => ip.to_string(),
            Address::Domain(d) => d.clone(),
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address::Ipv4(ip)
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Address::Ipv6(ip)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::Ipv4(v4),
            IpAddr::V6(v6) => Address::Ipv6(v6),
        }
    }
}

impl From<String> for Address {
    fn from(host: String) -> Self {
        // Literal parse first, IPv4 before IPv6; anything unparseable is a domain
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Address::Ipv4(ip);
        }
        if let Ok(ip) = host.parse::<Ipv6Addr>() {
            return Address::Ipv6(ip);
        }
        Address::Domain(host)
    }
}

impl From<&str> for Address {
    fn from(host: &str) -> Self {
        Address::from(host.to_string())
    }
}

/// Format a byte count for traffic summaries
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
