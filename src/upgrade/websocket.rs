//! WebSocket upgrade target.
//!
//! # Responsibilities
//! - Validate the client handshake (key and version)
//! - Answer with `101 Switching Protocols` and `Sec-WebSocket-Accept`
//! - Hand the framed stream to user code
//!
//! # Data Flow
//! ```text
//! RawConnection ──101──▶ WebSocketStream<RawConnection> ──▶ on_socket(ws, headers)
//! ```

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::error::Error;
use crate::http::request::Headers;
use crate::net::io::RawConnection;
use crate::upgrade::UpgradeHandler;

const PROTOCOL: &str = "websocket";

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

const VERSION_REQUIRED: &[u8] = b"HTTP/1.1 426 Upgrade Required\r\n\
    Sec-WebSocket-Version: 13\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

pub struct WebSocketUpgrade<F> {
    on_socket: Arc<F>,
}

impl<F, Fut> WebSocketUpgrade<F>
where
    F: Fn(WebSocketStream<RawConnection>, Headers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(on_socket: F) -> Self {
        Self {
            on_socket: Arc::new(on_socket),
        }
    }
}

impl<F, Fut> UpgradeHandler for WebSocketUpgrade<F>
where
    F: Fn(WebSocketStream<RawConnection>, Headers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn upgrade(&self, mut conn: RawConnection, headers: Headers) -> BoxFuture<'static, Result<(), Error>> {
        let on_socket = Arc::clone(&self.on_socket);

        Box::pin(async move {
            let key = match headers.get("sec-websocket-key") {
                Some(key) => key.trim().to_string(),
                None => return reject(conn, BAD_REQUEST, "missing Sec-WebSocket-Key").await,
            };

            if headers.get("sec-websocket-version").map(str::trim) != Some("13") {
                return reject(conn, VERSION_REQUIRED, "unsupported WebSocket version").await;
            }

            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: {}\r\n\r\n",
                derive_accept_key(key.as_bytes())
            );
            conn.write_all(response.as_bytes()).await?;

            let ws = WebSocketStream::from_raw_socket(conn, Role::Server, None).await;
            tracing::debug!("WebSocket session started");

            on_socket(ws, headers).await;

            tracing::debug!("WebSocket session ended");
            Ok(())
        })
    }
}

async fn reject(mut conn: RawConnection, response: &[u8], reason: &str) -> Result<(), Error> {
    conn.write_all(response).await?;
    let _ = conn.shutdown().await;

    Err(Error::Upgrade {
        protocol: PROTOCOL.to_string(),
        reason: reason.to_string(),
    })
}

/// Echo text and binary messages until the peer closes.
pub async fn echo(mut ws: WebSocketStream<RawConnection>) {
    while let Some(msg) = ws.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket read failed");
                break;
            }
        };

        if msg.is_close() {
            break;
        }

        if (msg.is_text() || msg.is_binary()) && ws.send(msg).await.is_err() {
            break;
        }
    }

    let _ = ws.close(None).await;
}
