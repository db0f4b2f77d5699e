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

//! Builds the URI handed to the inner connector.
//!
//! The inner connector is asked to reach the proxy, but downstream
//! connectors (TLS server name, hostname based routing) still need the
//! real destination. It travels in the `hostname` query parameter.

use crate::config::{ProxyConfig, Transport};
use crate::error::Error;
use std::fmt;
use url::{form_urlencoded, Url};

pub type Result<T> = core::result::Result<T, Error>;

/// Destination host and port requested by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    host: String,
    port: u16,
}

impl Destination {
    /// Host without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Writes `host:port`, bracketing IPv6 literals.
impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A validated destination plus the URI for the inner connector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub destination: Destination,
    pub inner_uri: String,
}

/// Parses `uri` (`host:port[/path][?query][#fragment]`, optionally with
/// a `tcp://` prefix) and builds the inner connector URI for `config`.
///
/// # Errors
/// Returns `InvalidTargetUri` if the URI does not parse, uses a scheme
/// other than `tcp`, or lacks a host or port.
pub fn build(config: &ProxyConfig, uri: &str) -> Result<Target> {
    let full_uri = if uri.contains("://") { uri.to_string() } else { format!("tcp://{}", uri) };
    let url = Url::parse(&full_uri).map_err(|e| Error::invalid_target(uri).with_source(e))?;
    if url.scheme() != "tcp" {
        return Err(Error::invalid_target(uri));
    }
    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.trim_matches(|c| c == '[' || c == ']').to_string(),
        _ => return Err(Error::invalid_target(uri)),
    };
    let port = url.port().ok_or_else(|| Error::invalid_target(uri))?;
    let destination = Destination { host, port };

    // A Unix socket path leaves no room for the URI components.
    if config.transport() == Transport::Unix {
        return Ok(Target { destination, inner_uri: config.proxy_uri() });
    }

    let mut inner_uri = config.proxy_uri();
    inner_uri.push_str(url.path());

    let query = url.query().unwrap_or("");
    inner_uri.push('?');
    if url.query_pairs().any(|(key, _)| key == "hostname") {
        inner_uri.push_str(query);
    } else {
        if !query.is_empty() {
            inner_uri.push_str(query);
            inner_uri.push('&');
        }
        inner_uri.push_str("hostname=");
        inner_uri.extend(form_urlencoded::byte_serialize(destination.host.as_bytes()));
    }

    if let Some(fragment) = url.fragment() {
        inner_uri.push('#');
        inner_uri.push_str(fragment);
    }

    Ok(Target { destination, inner_uri })
}
