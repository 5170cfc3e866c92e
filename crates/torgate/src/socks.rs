//! SOCKS5 Client
//!
//! Minimal RFC 1928 CONNECT client used to reach destinations through
//! the Tor proxy.
//!
//! # Protocol
//!
//! ```text
//! Client → greeting (no-auth) → CONNECT <domain>:<port> → relay
//! ```
//!
//! Destinations are always sent as names (address type 0x03) unless
//! they are already IP literals, so resolution happens inside Tor.

use crate::endpoint::ProxyEndpoint;
use std::net::IpAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// SOCKS5 version
const SOCKS5_VERSION: u8 = 0x05;

/// SOCKS5 authentication methods
const AUTH_NO_AUTH: u8 = 0x00;

/// SOCKS5 commands
const CMD_CONNECT: u8 = 0x01;

/// SOCKS5 address types
const ADDR_IPV4: u8 = 0x01;
const ADDR_DOMAIN: u8 = 0x03;
const ADDR_IPV6: u8 = 0x04;

/// SOCKS5 reply codes
const REPLY_SUCCESS: u8 = 0x00;

/// SOCKS5 client errors
#[derive(Debug, thiserror::Error)]
pub enum SocksError {
    #[error("Invalid SOCKS version in reply: {0:#04x}")]
    InvalidVersion(u8),

    #[error("Proxy rejected no-auth method")]
    AuthRejected,

    #[error("Proxy refused CONNECT: {}", reply_message(*.0))]
    Reply(u8),

    #[error("Invalid destination: {0}")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Human-readable text for a SOCKS5 reply code
pub fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown reply code",
    }
}

/// Connect to `host:port` through the proxy
///
/// Not bounded by a timeout; callers wrap it in `tokio::time::timeout`.
pub async fn connect(
    proxy: &ProxyEndpoint,
    host: &str,
    port: u16,
) -> Result<TcpStream, SocksError> {
    let request = connect_request(host, port)?;

    let mut stream = TcpStream::connect(proxy.socket_target()).await?;

    // ===== Method negotiation =====

    stream.write_all(&[SOCKS5_VERSION, 1, AUTH_NO_AUTH]).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS5_VERSION {
        return Err(SocksError::InvalidVersion(choice[0]));
    }
    if choice[1] != AUTH_NO_AUTH {
        return Err(SocksError::AuthRejected);
    }

    // ===== Connection request =====

    stream.write_all(&request).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(SocksError::InvalidVersion(header[0]));
    }
    if header[1] != REPLY_SUCCESS {
        return Err(SocksError::Reply(header[1]));
    }

    // Drain the bound address so the stream starts at payload
    let bound_len = match header[3] {
        ADDR_IPV4 => 4,
        ADDR_IPV6 => 16,
        ADDR_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(SocksError::InvalidAddress(format!(
                "unknown bound address type {:#04x}",
                other
            )))
        }
    };
    let mut bound = vec![0u8; bound_len + 2];
    stream.read_exact(&mut bound).await?;

    debug!("SOCKS5 CONNECT {}:{} via {} established", host, port, proxy);
    Ok(stream)
}

/// Encode the CONNECT request for a destination
fn connect_request(host: &str, port: u16) -> Result<Vec<u8>, SocksError> {
    let mut req = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            req.push(ADDR_IPV4);
            req.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            req.push(ADDR_IPV6);
            req.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let name = host.as_bytes();
            if name.is_empty() || name.len() > u8::MAX as usize {
                return Err(SocksError::InvalidAddress(host.to_string()));
            }
            req.push(ADDR_DOMAIN);
            req.push(name.len() as u8);
            req.extend_from_slice(name);
        }
    }

    req.extend_from_slice(&port.to_be_bytes());
    Ok(req)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// What the stub proxy does for a given destination
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum StubBehavior {
        Accept,
        Refuse,
        Hang,
    }

    /// Spawn a local SOCKS5 server that answers CONNECT per destination
    /// host. Unknown hosts get "host unreachable".
    pub(crate) async fn spawn_stub_proxy(rules: Vec<(&str, StubBehavior)>) -> ProxyEndpoint {
        let rules: Arc<HashMap<String, StubBehavior>> = Arc::new(
            rules.into_iter().map(|(h, b)| (h.to_string(), b)).collect(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let rules = rules.clone();
                tokio::spawn(async move {
                    let _ = serve_stub(stream, &rules).await;
                });
            }
        });

        ProxyEndpoint::new("127.0.0.1", port).unwrap()
    }

    async fn serve_stub(
        mut stream: TcpStream,
        rules: &HashMap<String, StubBehavior>,
    ) -> std::io::Result<()> {
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await?;
        let mut methods = vec![0u8; buf[1] as usize];
        stream.read_exact(&mut methods).await?;
        stream.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await?;

        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        let host = match header[3] {
            ADDR_DOMAIN => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                let mut name = vec![0u8; len[0] as usize];
                stream.read_exact(&mut name).await?;
                String::from_utf8_lossy(&name).into_owned()
            }
            ADDR_IPV4 => {
                let mut ip = [0u8; 4];
                stream.read_exact(&mut ip).await?;
                std::net::Ipv4Addr::from(ip).to_string()
            }
            _ => return Ok(()),
        };
        let mut port = [0u8; 2];
        stream.read_exact(&mut port).await?;

        let reply = match rules.get(&host).copied() {
            Some(StubBehavior::Accept) => REPLY_SUCCESS,
            Some(StubBehavior::Refuse) => 0x05,
            Some(StubBehavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                return Ok(());
            }
            None => 0x04,
        };
        stream
            .write_all(&[SOCKS5_VERSION, reply, 0x00, ADDR_IPV4, 0, 0, 0, 0, 0, 0])
            .await?;
        Ok(())
    }

    #[test]
    fn test_connect_request_domain() {
        let req = connect_request("check.torproject.org", 443).unwrap();
        assert_eq!(&req[..4], &[SOCKS5_VERSION, CMD_CONNECT, 0x00, ADDR_DOMAIN]);
        assert_eq!(req[4] as usize, "check.torproject.org".len());
        assert_eq!(&req[req.len() - 2..], &443u16.to_be_bytes());
    }

    #[test]
    fn test_connect_request_ip_literal() {
        let req = connect_request("10.1.2.3", 80).unwrap();
        assert_eq!(req[3], ADDR_IPV4);
        assert_eq!(&req[4..8], &[10, 1, 2, 3]);

        assert!(connect_request("", 80).is_err());
        assert!(connect_request(&"a".repeat(300), 80).is_err());
    }

    #[tokio::test]
    async fn test_connect_through_stub() {
        let proxy = spawn_stub_proxy(vec![
            ("ok.example", StubBehavior::Accept),
            ("refused.example", StubBehavior::Refuse),
        ])
        .await;

        assert!(connect(&proxy, "ok.example", 443).await.is_ok());

        let err = connect(&proxy, "refused.example", 443).await.unwrap_err();
        assert!(matches!(err, SocksError::Reply(0x05)));
        assert!(err.to_string().contains("connection refused"));
    }
}
