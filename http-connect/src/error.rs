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

//! This module defines the tunnel error types.
//!
//! Every failure carries a stable [`ErrorKind`], a message naming the
//! target `host:port`, and, when it originates from a nested
//! operation, the underlying cause.

use std::error::Error as StdError;
use std::fmt;
use std::io;

type Cause = Box<dyn StdError + Send + Sync>;

/// Failure categories of a tunnel attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidProxyAddress,
    InvalidTargetUri,
    InvalidHeader,
    ProxyUnreachable,
    InvalidProxyResponse,
    ResponseTooLarge,
    ProxyAuthenticationRequired,
    ProxyRefused,
    StreamError,
    ConnectionLost,
    OperationAborted,
}

impl ErrorKind {
    /// POSIX error number matching this kind, if any.
    pub fn errno(self) -> Option<i32> {
        match self {
            ErrorKind::InvalidProxyAddress
            | ErrorKind::InvalidTargetUri
            | ErrorKind::InvalidHeader => None,
            ErrorKind::ProxyUnreachable | ErrorKind::ProxyRefused => Some(libc::ECONNREFUSED),
            ErrorKind::InvalidProxyResponse => Some(libc::EBADMSG),
            ErrorKind::ResponseTooLarge => Some(libc::EMSGSIZE),
            ErrorKind::ProxyAuthenticationRequired => Some(libc::EACCES),
            ErrorKind::StreamError => Some(libc::EIO),
            ErrorKind::ConnectionLost => Some(libc::ECONNRESET),
            ErrorKind::OperationAborted => Some(libc::ECONNABORTED),
        }
    }

    /// Symbolic name of the error number, used as message suffix.
    pub fn symbol(self) -> Option<&'static str> {
        match self {
            ErrorKind::InvalidProxyAddress
            | ErrorKind::InvalidTargetUri
            | ErrorKind::InvalidHeader => None,
            ErrorKind::ProxyUnreachable | ErrorKind::ProxyRefused => Some("ECONNREFUSED"),
            ErrorKind::InvalidProxyResponse => Some("EBADMSG"),
            ErrorKind::ResponseTooLarge => Some("EMSGSIZE"),
            ErrorKind::ProxyAuthenticationRequired => Some("EACCES"),
            ErrorKind::StreamError => Some("EIO"),
            ErrorKind::ConnectionLost => Some("ECONNRESET"),
            ErrorKind::OperationAborted => Some("ECONNABORTED"),
        }
    }

    fn io_kind(self) -> io::ErrorKind {
        match self {
            ErrorKind::InvalidProxyAddress
            | ErrorKind::InvalidTargetUri
            | ErrorKind::InvalidHeader => io::ErrorKind::InvalidInput,
            ErrorKind::ProxyUnreachable | ErrorKind::ProxyRefused => {
                io::ErrorKind::ConnectionRefused
            }
            ErrorKind::InvalidProxyResponse | ErrorKind::ResponseTooLarge => {
                io::ErrorKind::InvalidData
            }
            ErrorKind::ProxyAuthenticationRequired => io::ErrorKind::PermissionDenied,
            ErrorKind::StreamError => io::ErrorKind::Other,
            ErrorKind::ConnectionLost => io::ErrorKind::ConnectionReset,
            ErrorKind::OperationAborted => io::ErrorKind::ConnectionAborted,
        }
    }
}

/// A classified tunnel error.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Cause>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error { kind, message: message.into(), source: None }
    }

    pub(crate) fn with_source(mut self, source: impl Into<Cause>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub(crate) fn invalid_proxy(url: &str) -> Self {
        Error::new(ErrorKind::InvalidProxyAddress, format!("Invalid proxy URL \"{}\"", url))
    }

    pub(crate) fn invalid_target(uri: &str) -> Self {
        Error::new(ErrorKind::InvalidTargetUri, format!("Invalid target URI \"{}\"", uri))
    }

    /// Builds a handshake failure for `target` (`host:port`).
    pub(crate) fn handshake(kind: ErrorKind, target: &str, reason: impl fmt::Display) -> Self {
        let mut message = format!("Connection to tcp://{} failed because {}", target, reason);
        if let Some(symbol) = kind.symbol() {
            message.push_str(&format!(" ({})", symbol));
        }
        Error::new(kind, message)
    }

    /// Builds the error reported when the caller cancels a pending attempt.
    pub(crate) fn aborted(target: &str) -> Self {
        Error::new(
            ErrorKind::OperationAborted,
            format!("Connection to tcp://{} cancelled while waiting for proxy (ECONNABORTED)", target),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// POSIX-style error number, for interop with socket error conventions.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.kind.errno()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|cause| cause.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        io::Error::new(err.kind.io_kind(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_message_names_target_and_symbol() {
        let err = Error::handshake(
            ErrorKind::ProxyRefused,
            "google.com:80",
            "proxy refused connection with HTTP error code 403 (Not allowed)",
        );
        assert_eq!(
            err.to_string(),
            "Connection to tcp://google.com:80 failed because proxy refused connection with HTTP error code 403 (Not allowed) (ECONNREFUSED)"
        );
        assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));
    }

    #[test]
    fn test_io_error_chaining() {
        let inner_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let outer_error = Error::handshake(
            ErrorKind::StreamError,
            "google.com:80",
            "connection to proxy caused a stream error",
        )
        .with_source(inner_error);

        let source = outer_error.source().unwrap();
        assert!(source.to_string().contains("file not found"));
    }

    #[test]
    fn test_into_io_error_keeps_kind() {
        let err = Error::handshake(ErrorKind::ConnectionLost, "google.com:80", "lost");
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionReset);
        let inner = io_err.get_ref().unwrap().downcast_ref::<Error>().unwrap();
        assert_eq!(inner.kind(), ErrorKind::ConnectionLost);
    }

    #[test]
    fn test_configuration_errors_have_no_errno() {
        assert_eq!(Error::invalid_proxy("///").raw_os_error(), None);
        assert_eq!(Error::invalid_target("///").kind(), ErrorKind::InvalidTargetUri);
    }
}
