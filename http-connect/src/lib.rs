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

//! # HTTP Connect
//!
//! This crate provides a connector that establishes transparent byte
//! stream tunnels to a destination `host:port` through an HTTP proxy
//! server, using the HTTP CONNECT method.
//!
//! The main component of this crate is the `ProxyConnector` struct. It
//! wraps an inner [`Connect`] implementation used to reach the proxy,
//! performs the CONNECT request handshake, including optional Basic
//! authentication and extra headers, and hands back the tunneled
//! stream. It implements [`Connect`] itself, so any protocol (TLS, HTTP,
//! SMTP) can be layered on top.
//!
//! ## Example
//!
//! ```no_run
//! use http_connect::ProxyConnector;
//! use tokio::io::AsyncWriteExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let proxy = ProxyConnector::with_socket_connector("user:pass@127.0.0.1:8080")?;
//!     let mut tunnel = proxy.connect("example.com:80")?.await?;
//!     tunnel.write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Proxy addresses
//!
//! * `proxy.example.com` and `http://proxy.example.com:3128` use TCP.
//! * `https://proxy.example.com` uses TLS to the proxy (port 443 by default).
//! * `http+unix:///run/proxy.sock` uses a Unix domain socket.
//!
//! Credentials in the address (`user:pass@host`) are percent-decoded.
//!
//! ## Limitations
//!
//! * No retries, no connection reuse and no timeouts: callers compose
//!   these around [`ProxyConnector::connect`].

mod config;
mod connector;
mod error;
mod session;
mod socket;
mod target;
mod tunnel;

pub use config::{Credentials, HeaderValue, ProxyConfig, Transport};
pub use connector::*;
pub use error::{Error, ErrorKind};
pub use session::{State, MAX_HEADER_SIZE};
pub use socket::{SocketConnector, SocketStream};
pub use target::{build as build_target, Destination, Target};
pub use tunnel::Tunnel;
