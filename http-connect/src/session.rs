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

// # Handshake Session
//
// One session drives one tunnel attempt:
//
//   AwaitingInnerConnect -> AwaitingHeaders -> Established
//
// with `Failed` and `Canceled` reachable from both non-terminal states.
//
// While it buffers the response headers the acquired stream lives in the
// `Attempt` shared with abort handles, so cancelling drops (closes) it on
// the spot. Leaving `AwaitingHeaders` either moves the stream into the
// returned `Tunnel` or drops it.

use crate::config::ProxyConfig;
use crate::connector::Connect;
use crate::error::{Error, ErrorKind};
use crate::target::Target;
use crate::tunnel::Tunnel;
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{watch, Notify};

pub type Result<T> = core::result::Result<T, Error>;

/// Maximum size of the proxy response header block.
pub const MAX_HEADER_SIZE: usize = 8192;

const HTTP_VERSION: &str = "1.1";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK_SIZE: usize = 4096;

/// Lifecycle of a tunnel attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    AwaitingInnerConnect,
    AwaitingHeaders,
    Established,
    Failed,
    Canceled,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Established | State::Failed | State::Canceled)
    }
}

/// State of one attempt shared between its session and its abort handles.
///
/// The stream slot lock also serializes state transitions, so a cancel
/// and a terminal transition can never both win.
pub(crate) struct Attempt<S> {
    state: watch::Sender<State>,
    stream: Mutex<Option<S>>,
    canceled: Notify,
}

impl<S> Attempt<S> {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(State::AwaitingInnerConnect);
        Attempt { state, stream: Mutex::new(None), canceled: Notify::new() }
    }

    pub(crate) fn watch(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// Moves the attempt to `Canceled`, closing the stream it holds.
    ///
    /// Returns false if the attempt already reached a terminal state.
    pub(crate) fn cancel(&self) -> bool {
        let mut slot = self.lock();
        if !self.transition(State::Canceled) {
            return false;
        }
        drop(slot.take());
        self.canceled.notify_one();
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<S>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `next` unless a terminal state was reached first.
    /// Callers hold the slot lock.
    fn transition(&self, next: State) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = next;
            true
        })
    }

    /// Parks the acquired stream and enters `AwaitingHeaders`.
    fn hold(&self, stream: S) -> bool {
        let mut slot = self.lock();
        if !self.transition(State::AwaitingHeaders) {
            return false;
        }
        *slot = Some(stream);
        true
    }

    /// Takes the stream out and enters `next`; `None` if canceled meanwhile.
    fn release(&self, next: State) -> Option<Option<S>> {
        let mut slot = self.lock();
        if !self.transition(next) {
            return None;
        }
        Some(slot.take())
    }
}

/// The parked stream as seen by the session. I/O fails once the attempt
/// is canceled and the stream is gone.
struct Held<S>(Arc<Attempt<S>>);

impl<S> Held<S> {
    fn with<T>(&self, f: impl FnOnce(Pin<&mut S>) -> Poll<io::Result<T>>) -> Poll<io::Result<T>>
    where
        S: Unpin,
    {
        match self.0.lock().as_mut() {
            Some(stream) => f(Pin::new(stream)),
            None => Poll::Ready(Err(io::ErrorKind::ConnectionAborted.into())),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Held<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.with(|stream| stream.poll_read(cx, buf))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Held<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.with(|stream| stream.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.with(|stream| stream.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.with(|stream| stream.poll_shutdown(cx))
    }
}

pub(crate) struct Session<S> {
    config: Arc<ProxyConfig>,
    target: Target,
    attempt: Arc<Attempt<S>>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(config: Arc<ProxyConfig>, target: Target, attempt: Arc<Attempt<S>>) -> Self {
        Session { config, target, attempt }
    }

    pub(crate) async fn run<C>(self, inner: &C) -> Result<Tunnel<S>>
    where
        C: Connect<Stream = S>,
    {
        let authority = self.target.destination.to_string();
        debug!("Connecting to proxy {} for {}", self.target.inner_uri, authority);

        // Dropping the pending inner connect is what cancels it.
        let connected = tokio::select! {
            biased;
            _ = self.attempt.canceled.notified() => return Err(self.aborted(&authority)),
            connected = inner.connect(&self.target.inner_uri) => connected,
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(err) => {
                let err = Error::handshake(
                    ErrorKind::ProxyUnreachable,
                    &authority,
                    "connection to proxy failed",
                )
                .with_source(err);
                return self.settle(Err(err), &authority);
            }
        };
        if !self.attempt.hold(stream) {
            return Err(self.aborted(&authority));
        }
        debug!("{}: {:?}", authority, State::AwaitingHeaders);

        let request = connect_request(&authority, &self.config);
        let mut stream = Held(self.attempt.clone());
        let response = tokio::select! {
            biased;
            _ = self.attempt.canceled.notified() => Err(Error::aborted(&authority)),
            response = read_response(&mut stream, &request, &authority) => response,
        };
        self.settle(response, &authority)
    }

    /// Moves the attempt to its terminal state for `response`.
    fn settle(&self, response: Result<Bytes>, authority: &str) -> Result<Tunnel<S>> {
        let next = if response.is_ok() { State::Established } else { State::Failed };
        let Some(stream) = self.attempt.release(next) else {
            return Err(self.aborted(authority));
        };
        debug!("{}: {:?}", authority, next);
        match (response, stream) {
            (Ok(pending), Some(stream)) => {
                info!("Tunnel to {} established through {}", authority, self.config.proxy_uri());
                Ok(Tunnel::new(stream, pending))
            }
            (Ok(_), None) => Err(self.aborted(authority)),
            (Err(err), stream) => {
                drop(stream);
                warn!("{}", err);
                Err(err)
            }
        }
    }

    fn aborted(&self, authority: &str) -> Error {
        let err = Error::aborted(authority);
        warn!("{}", err);
        err
    }
}

/// Builds the CONNECT request for `authority` (`host:port`).
pub(crate) fn connect_request(authority: &str, config: &ProxyConfig) -> String {
    format!(
        "CONNECT {0} HTTP/{1}\r\nHost: {0}\r\n{2}\r\n",
        authority,
        HTTP_VERSION,
        config.header_lines()
    )
}

/// Writes `request` and buffers the response until the header block is
/// complete. Returns the bytes received after the header block.
async fn read_response<S>(stream: &mut S, request: &str, authority: &str) -> Result<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream_error = |err: std::io::Error| {
        Error::handshake(
            ErrorKind::StreamError,
            authority,
            "connection to proxy caused a stream error",
        )
        .with_source(err)
    };

    stream.write_all(request.as_bytes()).await.map_err(stream_error)?;
    stream.flush().await.map_err(stream_error)?;
    debug!("Sent CONNECT request for {}", authority);

    let mut buffer = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = stream.read(&mut chunk).await.map_err(stream_error)?;
        if n == 0 {
            return Err(Error::handshake(
                ErrorKind::ConnectionLost,
                authority,
                "connection to proxy was lost while waiting for response",
            ));
        }
        buffer.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_terminator(&buffer) {
            let end = pos + HEADER_TERMINATOR.len();
            check_status(&buffer[..end], authority)?;
            return Ok(buffer.split_off(end).freeze());
        }

        if buffer.len() > MAX_HEADER_SIZE {
            return Err(Error::handshake(
                ErrorKind::ResponseTooLarge,
                authority,
                "proxy response headers exceed maximum of 8 KiB",
            ));
        }
    }
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer.windows(HEADER_TERMINATOR.len()).position(|window| window == HEADER_TERMINATOR)
}

/// Parses the header block and maps non-2xx status codes to errors.
fn check_status(head: &[u8], authority: &str) -> Result<()> {
    // Every header line ends in a newline, so this never runs short.
    let lines = head.iter().filter(|&&b| b == b'\n').count();
    let mut headers = vec![httparse::EMPTY_HEADER; lines];
    let mut response = httparse::Response::new(&mut headers);
    let invalid = || {
        Error::handshake(ErrorKind::InvalidProxyResponse, authority, "proxy returned invalid response")
    };

    match response.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(invalid()),
        Err(err) => return Err(invalid().with_source(err)),
    }
    let code = response.code.ok_or_else(invalid)?;
    let reason = response.reason.unwrap_or("");
    debug!("Proxy answered {} {} for {}", code, reason, authority);

    match code {
        200..=299 => Ok(()),
        407 => Err(Error::handshake(
            ErrorKind::ProxyAuthenticationRequired,
            authority,
            format!("proxy denied access with HTTP error code {} ({})", code, reason),
        )),
        _ => Err(Error::handshake(
            ErrorKind::ProxyRefused,
            authority,
            format!("proxy refused connection with HTTP error code {} ({})", code, reason),
        )),
    }
}
