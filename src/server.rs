use crate::protocol::{self, Response, MAX_REQUEST_SIZE};
use crate::store::TelemetryStore;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const DEFAULT_PORT: u16 = 5000;

/// Accept clients until `shutdown` flips to true. Each client is served on
/// its own task, one response line per request line.
pub async fn serve(
    listener: TcpListener,
    store: Arc<TelemetryStore>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!("🌐 Ingest server listening on {}", listener.local_addr()?);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("🔗 Client connected: {}", addr);
                    let client_store = Arc::clone(&store);
                    let client_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, client_store, client_shutdown).await {
                            warn!("Client {} error: {}", addr, e);
                        }
                        debug!("🔌 Client {} disconnected", addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("🛑 Ingest server stopped");
    Ok(())
}

async fn handle_client(
    stream: TcpStream,
    store: Arc<TelemetryStore>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // One byte past the limit is enough to tell an oversized line apart.
    let read_limit = MAX_REQUEST_SIZE as u64 + 1;

    loop {
        line.clear();
        let mut limited = (&mut reader).take(read_limit);
        let read = tokio::select! {
            read = limited.read_line(&mut line) => read?,
            _ = shutdown.changed() => break,
        };
        if read == 0 {
            break;
        }

        // Limit hit before a newline: answer once and drop the client
        if read > MAX_REQUEST_SIZE && !line.ends_with('\n') {
            warn!("Request line exceeds {} bytes, closing connection", MAX_REQUEST_SIZE);
            let response = Response::error(format!("Request exceeds {MAX_REQUEST_SIZE} bytes"));
            write_response(&mut writer, &response).await?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = protocol::handle_line(&store, trimmed);
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

async fn write_response<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
