//! Connection handles.
//!
//! # Responsibilities
//! - Type-erase the byte stream a connection runs on (TCP, duplex pipes)
//! - Hand a connection over to an upgrade target together with the bytes
//!   the tokenizer already buffered

use bytes::{Buf, Bytes};
use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Any bidirectional byte stream a connection can run on.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A connection taken over by an upgrade target.
///
/// Reads first replay `buffered` (bytes that arrived after the upgrade
/// request and were never interpreted as HTTP/1), then continue from the
/// socket. Writes go straight to the socket.
pub struct RawConnection {
    inner: Box<dyn Io>,
    buffered: Bytes,
}

impl RawConnection {
    pub fn new(inner: Box<dyn Io>, buffered: Bytes) -> Self {
        Self { inner, buffered }
    }

    /// Bytes not yet replayed.
    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    pub fn into_parts(self) -> (Box<dyn Io>, Bytes) {
        (self.inner, self.buffered)
    }
}

impl std::fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawConnection")
            .field("buffered", &self.buffered.len())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for RawConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.buffered.is_empty() {
            let size = cmp::min(self.buffered.len(), buf.remaining());
            buf.put_slice(&self.buffered[..size]);
            self.buffered.advance(size);

            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut *self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RawConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn replays_buffered_bytes_first() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut conn = RawConnection::new(Box::new(local), Bytes::from_static(b"early "));

        remote.write_all(b"late").await.unwrap();
        drop(remote);

        let mut out = String::new();
        conn.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "early late");
    }

    #[tokio::test]
    async fn writes_pass_through() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut conn = RawConnection::new(Box::new(local), Bytes::new());

        conn.write_all(b"pong").await.unwrap();
        conn.shutdown().await.unwrap();

        let mut out = Vec::new();
        remote.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"pong");
    }
}
