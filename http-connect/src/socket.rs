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

//! Plain socket connector for reaching the proxy.
//!
//! Understands `tcp://host:port[...]` and, on Unix, `unix:///path`.
//! Query parameters such as `hostname` are meant for upper layers (TLS)
//! and are ignored here.

use crate::connector::Connect;
use async_trait::async_trait;
use log::debug;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use url::Url;

/// Connects TCP and Unix domain sockets.
#[derive(Clone, Debug)]
pub struct SocketConnector {
    nodelay: bool,
}

impl SocketConnector {
    pub fn new() -> Self {
        SocketConnector { nodelay: true }
    }

    /// Sets `TCP_NODELAY` on new TCP connections.
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.nodelay = nodelay;
    }
}

impl Default for SocketConnector {
    fn default() -> Self {
        SocketConnector::new()
    }
}

/// A connected TCP or Unix domain socket.
#[derive(Debug)]
pub enum SocketStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

#[async_trait]
impl Connect for SocketConnector {
    type Stream = SocketStream;

    async fn connect(&self, uri: &str) -> io::Result<SocketStream> {
        let (scheme, rest) = uri.split_once("://").unwrap_or(("tcp", uri));
        match scheme {
            "tcp" => {
                let url = Url::parse(&format!("tcp://{}", rest))
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let host = url
                    .host_str()
                    .map(|h| h.trim_matches(|c| c == '[' || c == ']'))
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| invalid_uri(uri))?;
                let port = url.port().ok_or_else(|| invalid_uri(uri))?;
                debug!("Opening TCP connection to {}:{}", host, port);
                let stream = TcpStream::connect((host, port)).await?;
                stream.set_nodelay(self.nodelay)?;
                Ok(SocketStream::Tcp(stream))
            }
            #[cfg(unix)]
            "unix" => {
                debug!("Opening Unix connection to {}", rest);
                Ok(SocketStream::Unix(UnixStream::connect(rest).await?))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("Unsupported transport \"{}\"", scheme),
            )),
        }
    }
}

fn invalid_uri(uri: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid socket URI \"{}\"", uri))
}

impl AsyncRead for SocketStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            SocketStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SocketStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            SocketStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            SocketStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SocketStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            SocketStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connect_ignores_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"hi").await.unwrap();
        });

        let uri = format!("tcp://{}?hostname=google.com", addr);
        let mut stream = SocketConnector::new().connect(&uri).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_and_invalid_uris() {
        let connector = SocketConnector::new();

        let err = connector.connect("tls://127.0.0.1:443").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let err = connector.connect("tcp://127.0.0.1").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_connect() {
        let path = std::env::temp_dir().join(format!("http-connect-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"ok").await.unwrap();
        });

        let uri = format!("unix://{}", path.display());
        let mut stream = SocketConnector::new().connect(&uri).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");

        handle.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
