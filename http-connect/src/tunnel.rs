// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// An established tunnel through the proxy.
///
/// Bytes the proxy sent after its response headers are returned by the
/// first reads, before anything else from the underlying stream.
#[derive(Debug)]
pub struct Tunnel<S> {
    stream: S,
    pending: Bytes,
}

impl<S> Tunnel<S> {
    pub(crate) fn new(stream: S, pending: Bytes) -> Self {
        Tunnel { stream, pending }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Returns the underlying stream and any bytes not read yet.
    pub fn into_parts(self) -> (S, Bytes) {
        (self.stream, self.pending)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Tunnel<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pending.has_remaining() {
            let n = self.pending.len().min(buf.remaining());
            buf.put_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Tunnel<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_pending_bytes_read_first() {
        let (client, mut server) = duplex(64);
        let mut tunnel = Tunnel::new(client, Bytes::from_static(b"hello!"));

        server.write_all(b" world").await.unwrap();
        drop(server);

        let mut out = String::new();
        tunnel.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello! world");
    }

    #[tokio::test]
    async fn test_pending_bytes_split_across_small_reads() {
        let (client, _server) = duplex(64);
        let mut tunnel = Tunnel::new(client, Bytes::from_static(b"abcdef"));

        let mut buf = [0u8; 4];
        let n = tunnel.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = tunnel.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");

        let (_, pending) = tunnel.into_parts();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_writes_pass_through() {
        let (client, mut server) = duplex(64);
        let mut tunnel = Tunnel::new(client, Bytes::new());

        tunnel.write_all(b"EHLO\r\n").await.unwrap();
        let mut buf = [0u8; 6];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"EHLO\r\n");
    }
}
