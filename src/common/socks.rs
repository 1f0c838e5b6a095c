//! SOCKS5 wire protocol (RFC 1928, TCP CONNECT subset)

use super::net::Address;
use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// SOCKS5 version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS5 authentication methods
pub const AUTH_NO_AUTH: u8 = 0x00;

// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

// SOCKS5 address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// SOCKS5 reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Client greeting: `VER NMETHODS METHODS...`
///
/// The advertised method list is read and discarded; the server always
/// answers NO-AUTH. A wrong version closes the connection without a reply.
pub struct Greeting;

impl Greeting {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await?;

        if head[0] != SOCKS5_VERSION {
            return Err(Error::protocol(format!(
                "Unsupported SOCKS version: {}",
                head[0]
            )));
        }

        let n = head[1] as usize;
        let mut methods = [0u8; 255];
        reader.read_exact(&mut methods[..n]).await?;
        Ok(())
    }

    pub async fn write_ack<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
        writer.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await?;
        Ok(())
    }
}

/// Fixed 4-byte request header: `VER CMD RSV ATYP`
///
/// Fields are kept raw so the acceptor can pick the exact reply code.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeader {
    pub version: u8,
    pub command: u8,
    pub atyp: u8,
}

impl RequestHeader {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;

        Ok(RequestHeader {
            version: header[0],
            command: header[1],
            atyp: header[3],
        })
    }
}

/// Read the destination address and port for a given ATYP
pub async fn read_address<R: AsyncRead + Unpin>(
    reader: &mut R,
    atyp: u8,
) -> Result<(Address, u16)> {
    match atyp {
        ATYP_IPV4 => {
            let mut buf = [0u8; 6];
            reader.read_exact(&mut buf).await?;
            let addr = Address::Ipv4(std::net::Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]));
            let port = u16::from_be_bytes([buf[4], buf[5]]);
            Ok((addr, port))
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            reader.read_exact(&mut len).await?;
            let len = len[0] as usize;
            let mut buf = vec![0u8; len + 2];
            reader.read_exact(&mut buf).await?;
            let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
            buf.truncate(len);
            let domain = String::from_utf8(buf)
                .map_err(|e| Error::parse(format!("Invalid domain: {}", e)))?;
            Ok((Address::Domain(domain), port))
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 18];
            reader.read_exact(&mut buf).await?;
            let mut ip = [0u8; 16];
            ip.copy_from_slice(&buf[..16]);
            let addr = Address::Ipv6(std::net::Ipv6Addr::from(ip));
            let port = u16::from_be_bytes([buf[16], buf[17]]);
            Ok((addr, port))
        }
        t => Err(Error::protocol(format!("Unknown address type: {}", t))),
    }
}

/// Write the single canonical reply: `VER REP 0x00 ATYP_IPV4 0.0.0.0 0`
///
/// The bound address is never reported to the client.
pub async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, rep: u8) -> Result<()> {
    let mut buf = [0u8; 10];
    buf[0] = SOCKS5_VERSION;
    buf[1] = rep;
    buf[3] = ATYP_IPV4;
    writer.write_all(&buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_greeting_no_auth() {
        let mut input: &[u8] = &[0x05, 0x01, 0x00];
        Greeting::read_from(&mut input).await.unwrap();
    }

    #[tokio::test]
    async fn test_greeting_empty_method_list() {
        let mut input: &[u8] = &[0x05, 0x00];
        Greeting::read_from(&mut input).await.unwrap();
    }

    #[tokio::test]
    async fn test_greeting_wrong_version() {
        let mut input: &[u8] = &[0x04, 0x01, 0x00];
        let err = Greeting::read_from(&mut input).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_request_header() {
        let mut input: &[u8] = &[0x05, 0x01, 0x00, 0x03];
        let header = RequestHeader::read_from(&mut input).await.unwrap();
        assert_eq!(header.version, 0x05);
        assert_eq!(header.command, CMD_CONNECT);
        assert_eq!(header.atyp, ATYP_DOMAIN);
    }

    #[tokio::test]
    async fn test_read_domain_address() {
        let mut input: Vec<u8> = vec![0x0B];
        input.extend_from_slice(b"example.com");
        input.extend_from_slice(&443u16.to_be_bytes());
        let mut reader: &[u8] = &input;

        let (addr, port) = read_address(&mut reader, ATYP_DOMAIN).await.unwrap();
        assert_eq!(addr, Address::Domain("example.com".to_string()));
        assert_eq!(port, 443);
    }

    #[tokio::test]
    async fn test_read_ipv4_address() {
        let mut input: &[u8] = &[127, 0, 0, 1, 0x00, 0x50];
        let (addr, port) = read_address(&mut input, ATYP_IPV4).await.unwrap();
        assert_eq!(addr.to_host(), "127.0.0.1");
        assert_eq!(port, 80);
    }

    #[tokio::test]
    async fn test_unknown_atyp() {
        let mut input: &[u8] = &[0u8; 8];
        let err = read_address(&mut input, 0x02).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_canonical_reply() {
        let mut out = Vec::new();
        write_reply(&mut out, REP_SUCCEEDED).await.unwrap();
        assert_eq!(out, [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

        let mut out = Vec::new();
        write_reply(&mut out, REP_GENERAL_FAILURE).await.unwrap();
        assert_eq!(out, [0x05, 0x01, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }
}
