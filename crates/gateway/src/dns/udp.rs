use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{error, info};

use super::{process_message, DnsPlane};

pub async fn serve(addr: &str, plane: Arc<DnsPlane>) -> anyhow::Result<()> {
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    info!(addr, "DNS UDP listener started");

    let mut buf = vec![0u8; 4096];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "udp recv failed");
                continue;
            }
        };

        let query = buf[..n].to_vec();
        let plane = plane.clone();
        let socket = socket.clone();

        tokio::spawn(async move {
            let outcome = process_message(&plane, &query, &peer.to_string(), "udp").await;
            if let Err(e) = socket.send_to(&outcome.bytes, peer).await {
                error!(error = %e, "udp send failed");
            }
        });
    }
}
