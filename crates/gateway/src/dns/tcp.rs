use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use super::{process_message, DnsPlane};

pub async fn serve(addr: &str, plane: Arc<DnsPlane>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "DNS TCP listener started");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "tcp accept failed");
                continue;
            }
        };

        let plane = plane.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer.to_string(), plane).await {
                warn!(error = %e, "dns tcp connection ended");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, peer: String, plane: Arc<DnsPlane>) -> anyhow::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(()); // client closed
        }
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut query = vec![0u8; len];
        stream.read_exact(&mut query).await?;

        let outcome = process_message(&plane, &query, &peer, "tcp").await;

        stream.write_all(&(outcome.bytes.len() as u16).to_be_bytes()).await?;
        stream.write_all(&outcome.bytes).await?;
    }
}
