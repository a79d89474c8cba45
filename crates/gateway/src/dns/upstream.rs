//! Upstream recursive-resolver exchange. UDP first, TCP fallback on a
//! truncated (TC-bit) response, both under the configured timeout.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use policy_core::CoreError;

pub struct UpstreamResolver {
    addr: String,
    request_timeout: Duration,
}

impl UpstreamResolver {
    pub fn new(addr: String, request_timeout: Duration) -> Self {
        Self { addr, request_timeout }
    }

    /// Safe to call concurrently: each call opens its own ephemeral socket.
    pub async fn exchange(&self, query: &[u8]) -> Result<Vec<u8>, CoreError> {
        timeout(self.request_timeout, self.exchange_inner(query))
            .await
            .map_err(|_| CoreError::UpstreamTimeout)?
    }

    async fn exchange_inner(&self, query: &[u8]) -> Result<Vec<u8>, CoreError> {
        let udp_resp = self.exchange_udp(query).await?;
        if is_truncated(&udp_resp) {
            self.exchange_tcp(query).await
        } else {
            Ok(udp_resp)
        }
    }

    async fn exchange_udp(&self, query: &[u8]) -> Result<Vec<u8>, CoreError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|e| CoreError::UpstreamDns(e.to_string()))?;
        socket.connect(&self.addr).await.map_err(|e| CoreError::UpstreamDns(e.to_string()))?;
        socket.send(query).await.map_err(|e| CoreError::UpstreamDns(e.to_string()))?;

        let mut buf = vec![0u8; 4096];
        let n = socket.recv(&mut buf).await.map_err(|e| CoreError::UpstreamDns(e.to_string()))?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn exchange_tcp(&self, query: &[u8]) -> Result<Vec<u8>, CoreError> {
        let mut stream = TcpStream::connect(&self.addr).await.map_err(|e| CoreError::UpstreamDns(e.to_string()))?;

        let len = (query.len() as u16).to_be_bytes();
        stream.write_all(&len).await.map_err(|e| CoreError::UpstreamDns(e.to_string()))?;
        stream.write_all(query).await.map_err(|e| CoreError::UpstreamDns(e.to_string()))?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await.map_err(|e| CoreError::UpstreamDns(e.to_string()))?;
        let resp_len = u16::from_be_bytes(len_buf) as usize;

        let mut resp = vec![0u8; resp_len];
        stream.read_exact(&mut resp).await.map_err(|e| CoreError::UpstreamDns(e.to_string()))?;
        Ok(resp)
    }
}

fn is_truncated(resp: &[u8]) -> bool {
    resp.len() > 2 && (resp[2] & 0x02) != 0
}
