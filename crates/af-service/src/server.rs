//! TCP front end: one task per connection, one JSON request per line.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::protocol::SessionRegistry;

/// Accept connections forever, serving every one from the shared registry.
pub async fn serve(listener: TcpListener, registry: Arc<SessionRegistry>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Trial worker connected from {peer}");
        let registry = Arc::clone(&registry);

        tokio::spawn(async move {
            match handle_connection(socket, registry).await {
                Ok(served) => debug!("Connection {peer} closed after {served} requests"),
                Err(e) => warn!("Connection {peer} failed: {e}"),
            }
        });
    }
}

/// Answer newline-delimited requests until the peer hangs up. Returns the
/// number of requests served.
pub async fn handle_connection<S>(stream: S, registry: Arc<SessionRegistry>) -> std::io::Result<usize>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let mut served = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = registry.handle_line(&line);
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        served += 1;
    }

    writer.flush().await?;
    Ok(served)
}
