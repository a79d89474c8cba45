//! SOCKS5 forwarding proxy (RFC 1928, `CONNECT` only, no authentication).
//! Grounded on `original_source/proxy/internal/socksproxy/server.go`: the
//! policy engine is consulted as the SOCKS "rule set" before a connection is
//! ever dialed.
//!
//! The wire handshake is hand-rolled rather than delegated to a crate: RFC
//! 1928 is small and stable, and hand-rolling keeps every byte on the wire
//! traceable without depending on an unverified library surface.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use policy_core::entitlement::extract_ip;
use policy_core::PolicyEngine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_NOT_ALLOWED: u8 = 0x02;
const REPLY_HOST_UNREACHABLE: u8 = 0x04;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;

pub struct SocksProxy {
    pub policy: Arc<PolicyEngine>,
}

pub async fn serve(addr: &str, proxy: Arc<SocksProxy>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "SOCKS5 listener started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let proxy = proxy.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, proxy).await {
                warn!(error = %e, "socks5 connection ended");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, proxy: Arc<SocksProxy>) -> anyhow::Result<()> {
    if !negotiate_method(&mut stream).await? {
        return Ok(());
    }

    let (host, port) = match read_connect_request(&mut stream).await? {
        Some(target) => target,
        None => return Ok(()),
    };

    let remote = peer.to_string();
    let client_ip = extract_ip(&remote);
    let decision = proxy.policy.decide(&host, &client_ip, None).await;

    if !decision.allow {
        send_reply(&mut stream, REPLY_NOT_ALLOWED).await?;
        return Ok(());
    }

    let target = format!("{host}:{port}");
    let upstream = match TcpStream::connect(&target).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, target, "socks5 upstream dial failed");
            send_reply(&mut stream, REPLY_HOST_UNREACHABLE).await?;
            return Ok(());
        }
    };

    send_reply(&mut stream, REPLY_SUCCEEDED).await?;

    let (mut client_stream, mut upstream_stream) = (stream, upstream);
    if let Err(e) = tokio::io::copy_bidirectional(&mut client_stream, &mut upstream_stream).await {
        warn!(error = %e, target, "socks5 relay ended");
    }

    Ok(())
}

/// Returns `false` (and leaves the connection unusable) when the client
/// offers no acceptable authentication method.
async fn negotiate_method(stream: &mut TcpStream) -> anyhow::Result<bool> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != VERSION {
        anyhow::bail!("unsupported SOCKS version {}", header[0]);
    }

    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
        return Ok(false);
    }

    stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
    Ok(true)
}

/// Parses a CONNECT request. Any other command is rejected with a wire
/// reply and returns `Ok(None)`.
async fn read_connect_request(stream: &mut TcpStream) -> anyhow::Result<Option<(String, u16)>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [version, cmd, _rsv, atyp] = header;

    if version != VERSION {
        anyhow::bail!("unsupported SOCKS version {version}");
    }

    if cmd != CMD_CONNECT {
        send_reply(stream, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Ok(None);
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await?;
            Ipv4Addr::from(buf).to_string()
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 16];
            stream.read_exact(&mut buf).await?;
            Ipv6Addr::from(buf).to_string()
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            stream.read_exact(&mut len_buf).await?;
            let mut name_buf = vec![0u8; len_buf[0] as usize];
            stream.read_exact(&mut name_buf).await?;
            String::from_utf8(name_buf)?
        }
        other => {
            error!(atyp = other, "unsupported SOCKS address type");
            send_reply(stream, REPLY_GENERAL_FAILURE).await?;
            return Ok(None);
        }
    };

    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    Ok(Some((host, port)))
}

async fn send_reply(stream: &mut TcpStream, reply: u8) -> anyhow::Result<()> {
    let bound = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    let mut buf = vec![VERSION, reply, 0x00, ATYP_IPV4];
    match bound {
        SocketAddr::V4(v4) => {
            buf.extend_from_slice(&v4.ip().octets());
            buf.extend_from_slice(&v4.port().to_be_bytes());
        }
        SocketAddr::V6(_) => unreachable!(),
    }
    stream.write_all(&buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn negotiates_no_auth_method() {
        let (mut client, mut server) = loopback_pair().await;

        client.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await.unwrap();
        let accepted = negotiate_method(&mut server).await.unwrap();
        assert!(accepted);

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [VERSION, METHOD_NO_AUTH]);
    }

    #[tokio::test]
    async fn rejects_connection_without_no_auth_method() {
        let (mut client, mut server) = loopback_pair().await;

        client.write_all(&[VERSION, 1, 0x02]).await.unwrap();
        let accepted = negotiate_method(&mut server).await.unwrap();
        assert!(!accepted);

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [VERSION, METHOD_NONE_ACCEPTABLE]);
    }

    #[tokio::test]
    async fn parses_domain_connect_request() {
        let (mut client, mut server) = loopback_pair().await;

        let domain = b"example.com";
        let mut req = vec![VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, domain.len() as u8];
        req.extend_from_slice(domain);
        req.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let (host, port) = read_connect_request(&mut server).await.unwrap().unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
    }

    #[tokio::test]
    async fn rejects_non_connect_command() {
        let (mut client, mut server) = loopback_pair().await;

        client.write_all(&[VERSION, 0x02, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0, 80]).await.unwrap();
        let result = read_connect_request(&mut server).await.unwrap();
        assert!(result.is_none());

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REPLY_COMMAND_NOT_SUPPORTED);
    }
}
