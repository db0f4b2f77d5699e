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

// # Proxy Configuration
//
// This module parses proxy address strings into a `ProxyConfig`.
//
// Accepted forms:
//
//   [http://|https://][username[:password]@]host[:port]
//   http+unix://[username[:password]@]/path/to/socket
//
// The default port is 80 for `http` and 443 for `https`. Credentials
// are percent-decoded and turned into a `Proxy-Authorization` header.

use crate::error::{Error, ErrorKind};
use base64::{engine::general_purpose, Engine as _};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use url::Url;

pub type Result<T> = core::result::Result<T, Error>;

// RFC 3986 unreserved characters stay as they are.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Transport used to reach the proxy itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Tls,
    Unix,
}

impl Transport {
    /// URI scheme handed to the inner connector.
    pub fn scheme(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Tls => "tls",
            Transport::Unix => "unix",
        }
    }
}

/// Percent-decoded proxy credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    /// Returns the `Proxy-Authorization` header line, including CRLF.
    pub fn header_line(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password.as_deref().unwrap_or(""));
        format!("Proxy-Authorization: Basic {}\r\n", base64_encode(raw.as_bytes()))
    }
}

/// Value of an extra header: a key may map to several lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderValue {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::One(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::One(value)
    }
}

impl From<Vec<&str>> for HeaderValue {
    fn from(values: Vec<&str>) -> Self {
        HeaderValue::Many(values.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        HeaderValue::Many(values)
    }
}

/// Proxy configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    transport: Transport,
    host: String,
    port: u16,
    unix_path: Option<String>,
    credentials: Option<Credentials>,
    headers: Vec<(String, String)>,
}

impl ProxyConfig {
    /// Parses a proxy address string and returns a `ProxyConfig` struct.
    ///
    /// The scheme defaults to `http` when missing. IPv6 hosts must be
    /// enclosed in square brackets (e.g. `[::1]:8080`).
    ///
    /// # Errors
    /// Returns `InvalidProxyAddress` for malformed addresses, for schemes
    /// other than `http`, `https` and `http+unix`, for a missing host and
    /// for credentials that do not decode to UTF-8.
    pub fn from_string(config_string: &str) -> Result<ProxyConfig> {
        if config_string.starts_with("https+unix://") {
            return Err(Error::invalid_proxy(config_string));
        }

        let mut unix_path = None;
        let mut proxy_url = config_string.to_string();
        if let Some(caps) = unix_proxy_regex().captures(config_string) {
            // Parse credentials from a placeholder host, keep the socket path.
            let userinfo = caps.name("userinfo").map_or("", |m| m.as_str());
            proxy_url = format!("http://{}localhost", userinfo);
            unix_path = caps.name("path").map(|m| m.as_str().to_string());
        }

        if !proxy_url.contains("://") {
            proxy_url = format!("http://{}", proxy_url);
        }

        let url = Url::parse(&proxy_url)
            .map_err(|e| Error::invalid_proxy(config_string).with_source(e))?;

        let transport = match (url.scheme(), unix_path.is_some()) {
            (_, true) => Transport::Unix,
            ("http", false) => Transport::Tcp,
            ("https", false) => Transport::Tls,
            _ => return Err(Error::invalid_proxy(config_string)),
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(Error::invalid_proxy(config_string)),
        };
        let port = url.port_or_known_default().ok_or_else(|| Error::invalid_proxy(config_string))?;

        let credentials = if !url.username().is_empty() || url.password().is_some() {
            let username = percent_decode(url.username(), config_string)?;
            let password = url.password().map(|p| percent_decode(p, config_string)).transpose()?;
            Some(Credentials { username, password })
        } else {
            None
        };

        Ok(ProxyConfig { transport, host, port, unix_path, credentials, headers: Vec::new() })
    }

    /// Appends extra header lines sent with every CONNECT request.
    ///
    /// A name mapped to several values emits one line per value, in order.
    pub fn with_headers<I, N, V>(mut self, headers: I) -> Result<ProxyConfig>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<HeaderValue>,
    {
        for (name, value) in headers {
            let name = name.into();
            let values = match value.into() {
                HeaderValue::One(value) => vec![value],
                HeaderValue::Many(values) => values,
            };
            for value in values {
                validate_header(&name, &value)?;
                self.headers.push((name.clone(), value));
            }
        }
        Ok(self)
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unix_path(&self) -> Option<&str> {
        self.unix_path.as_deref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// The transport URI of the proxy, e.g. `tcp://proxy.example.com:80`
    /// or `unix:///tmp/proxy.sock`.
    pub fn proxy_uri(&self) -> String {
        match &self.unix_path {
            Some(path) => format!("{}://{}", self.transport.scheme(), path),
            None => format!("{}://{}:{}", self.transport.scheme(), self.host, self.port),
        }
    }

    pub fn authorization_header(&self) -> Option<String> {
        self.credentials.as_ref().map(Credentials::header_line)
    }

    /// Header lines following `Host:` in the CONNECT request, each
    /// terminated by CRLF: the authorization line first, then the extra
    /// headers in insertion order.
    pub fn header_lines(&self) -> String {
        let mut lines = self.authorization_header().unwrap_or_default();
        for (name, value) in &self.headers {
            lines.push_str(&format!("{}: {}\r\n", name, value));
        }
        lines
    }
}

impl FromStr for ProxyConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProxyConfig::from_string(s)
    }
}

/// Writes the normalized proxy address. Extra headers are not part of it.
impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = match self.transport {
            Transport::Tcp => "http",
            Transport::Tls => "https",
            Transport::Unix => "http+unix",
        };
        write!(f, "{}://", scheme)?;
        if let Some(credentials) = &self.credentials {
            write!(f, "{}", utf8_percent_encode(&credentials.username, USERINFO))?;
            if let Some(password) = &credentials.password {
                write!(f, ":{}", utf8_percent_encode(password, USERINFO))?;
            }
            write!(f, "@")?;
        }
        match &self.unix_path {
            Some(path) => write!(f, "{}", path),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

fn unix_proxy_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^http\+unix://(?P<userinfo>.*?@)?(?P<path>.+?)$").expect("valid regex")
    })
}

fn percent_decode(s: &str, config_string: &str) -> Result<String> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| Error::invalid_proxy(config_string).with_source(e))
}

fn validate_header(name: &str, value: &str) -> Result<()> {
    let valid_name = !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic() && b != b':');
    let valid_value = !value.bytes().any(|b| b == b'\r' || b == b'\n');
    if valid_name && valid_value {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::InvalidHeader, format!("Invalid proxy header \"{}\"", name)))
    }
}

fn base64_encode(src: &[u8]) -> String {
    general_purpose::STANDARD.encode(src)
}
