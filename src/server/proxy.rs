use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::utils::error::Result;

// Per-direction copy buffer, sized for throughput
const RELAY_BUFFER_SIZE: usize = 512 * 1024;

/// Pump bytes between client and upstream until either direction ends.
///
/// Each direction runs in its own task. A shared cancellation token ends the
/// sibling as soon as one direction closes or errors, so both halves close
/// together; there is no half-close propagation distinct from full close.
pub async fn relay_data(client: TcpStream, upstream: TcpStream) -> Result<()> {
    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let cancel = CancellationToken::new();

    let upload = tokio::spawn(copy_half(client_read, upstream_write, cancel.clone()));
    let download = tokio::spawn(copy_half(upstream_read, client_write, cancel));

    let (upload_result, download_result) = tokio::join!(upload, download);

    let sent = upload_result.map_err(io::Error::other)?;
    let received = download_result.map_err(io::Error::other)?;

    match (sent, received) {
        (Ok(sent), Ok(received)) => {
            debug!("relay finished: {} bytes up, {} bytes down", sent, received);
        }
        (sent, received) => {
            debug!(up = ?sent, down = ?received, "relay torn down");
        }
    }

    Ok(())
}

async fn copy_half(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    cancel: CancellationToken,
) -> io::Result<u64> {
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    let result = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break Ok(total),
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => break Ok(total),
            Ok(n) => n,
            Err(e) => break Err(e),
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            break Err(e);
        }
        total += n as u64;
    };

    // Whatever ended this direction ends the other one too
    cancel.cancel();
    writer.shutdown().await.ok();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    #[tokio::test]
    async fn relays_both_directions_and_propagates_close() {
        let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = listener_a.local_addr().unwrap();
        let addr_b = listener_b.local_addr().unwrap();

        let mut client = TcpStream::connect(addr_a).await.unwrap();
        let (relay_client, _) = listener_a.accept().await.unwrap();
        let relay_upstream = TcpStream::connect(addr_b).await.unwrap();
        let (mut upstream, _) = listener_b.accept().await.unwrap();

        let relay = tokio::spawn(relay_data(relay_client, relay_upstream));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // Closing the client tears the relay down end to end
        drop(client);
        drop(upstream);
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn one_side_closing_tears_down_an_idle_peer() {
        let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = listener_a.local_addr().unwrap();
        let addr_b = listener_b.local_addr().unwrap();

        // The client stays connected and sends nothing
        let _client = TcpStream::connect(addr_a).await.unwrap();
        let (relay_client, _) = listener_a.accept().await.unwrap();
        let relay_upstream = TcpStream::connect(addr_b).await.unwrap();
        let (upstream, _) = listener_b.accept().await.unwrap();

        let relay = tokio::spawn(relay_data(relay_client, relay_upstream));

        // Only the upstream closes; the idle client direction must be torn
        // down with it
        drop(upstream);

        timeout(Duration::from_secs(2), relay)
            .await
            .expect("relay did not tear down")
            .unwrap()
            .unwrap();
    }
}
