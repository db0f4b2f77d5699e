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

use crate::config::{HeaderValue, ProxyConfig};
use crate::error::Error;
use crate::session::{Attempt, Session, State};
use crate::socket::SocketConnector;
use crate::target;
use crate::tunnel::Tunnel;
use async_trait::async_trait;
use log::debug;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

pub type Result<T> = core::result::Result<T, Error>;

/// A stream connector: resolves a URI into a connected byte stream.
///
/// The proxy connector consumes one of these to reach the proxy and
/// implements it itself, so it can stand in for any other connector.
#[async_trait]
pub trait Connect: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self, uri: &str) -> io::Result<Self::Stream>;
}

/// Establishes a tunnel to a target address through an HTTP proxy.
///
/// The `ProxyConnector` asks the inner connector for a stream to the
/// proxy, then performs the CONNECT request handshake on it, including
/// optional Basic authentication and extra headers.
pub struct ProxyConnector<C> {
    config: Arc<ProxyConfig>,
    inner: Arc<C>,
}

impl<C> Clone for ProxyConnector<C> {
    fn clone(&self) -> Self {
        ProxyConnector { config: self.config.clone(), inner: self.inner.clone() }
    }
}

impl ProxyConnector<SocketConnector> {
    /// Creates a proxy connector reaching the proxy over plain sockets.
    pub fn with_socket_connector(proxy_url: &str) -> Result<Self> {
        ProxyConnector::new(proxy_url, SocketConnector::new())
    }
}

impl<C: Connect + 'static> ProxyConnector<C> {
    /// # Errors
    /// Returns `InvalidProxyAddress` if `proxy_url` is malformed.
    pub fn new(proxy_url: &str, inner: C) -> Result<Self> {
        Ok(ProxyConnector::from_config(ProxyConfig::from_string(proxy_url)?, inner))
    }

    /// Like [`ProxyConnector::new`], sending `headers` with every request.
    pub fn with_headers<I, N, V>(proxy_url: &str, inner: C, headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<HeaderValue>,
    {
        let config = ProxyConfig::from_string(proxy_url)?.with_headers(headers)?;
        Ok(ProxyConnector::from_config(config, inner))
    }

    pub fn from_config(config: ProxyConfig, inner: C) -> Self {
        ProxyConnector { config: Arc::new(config), inner: Arc::new(inner) }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Starts a tunnel attempt to `uri` (`host:port[/path][?query][#fragment]`).
    ///
    /// The destination is validated before any I/O happens.
    ///
    /// # Errors
    /// Returns `InvalidTargetUri` for malformed destinations; handshake
    /// failures are reported by the returned future.
    pub fn connect(&self, uri: &str) -> Result<Connecting<C::Stream>> {
        let target = target::build(&self.config, uri)?;
        debug!("Tunnel to {} via {}", target.destination, target.inner_uri);

        let attempt = Arc::new(Attempt::new());
        let state = attempt.watch();
        let abort = AbortHandle { attempt: attempt.clone() };
        let session = Session::new(self.config.clone(), target, attempt);
        let inner = self.inner.clone();
        let future: BoxConnecting<C::Stream> =
            Box::pin(async move { session.run(inner.as_ref()).await });

        Ok(Connecting { future, abort, state })
    }
}

#[async_trait]
impl<C: Connect + 'static> Connect for ProxyConnector<C> {
    type Stream = Tunnel<C::Stream>;

    async fn connect(&self, uri: &str) -> io::Result<Self::Stream> {
        let connecting = ProxyConnector::connect(self, uri)?;
        Ok(connecting.await?)
    }
}

type BoxConnecting<S> = Pin<Box<dyn Future<Output = Result<Tunnel<S>>> + Send>>;

/// A pending tunnel attempt.
///
/// Resolves to the established [`Tunnel`] or a classified [`Error`].
/// Dropping it cancels the attempt like [`AbortHandle::abort`].
#[must_use = "futures do nothing unless polled"]
pub struct Connecting<S> {
    future: BoxConnecting<S>,
    abort: AbortHandle,
    state: watch::Receiver<State>,
}

impl<S> Connecting<S> {
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Current lifecycle state of the attempt.
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// A receiver notified on every state transition.
    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.state.clone()
    }
}

impl<S> Future for Connecting<S> {
    type Output = Result<Tunnel<S>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl<S> Drop for Connecting<S> {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self) -> bool;
}

impl<S: Send> Cancel for Attempt<S> {
    fn cancel(&self) -> bool {
        Attempt::cancel(self)
    }
}

/// Cancels a pending tunnel attempt.
///
/// Aborting closes the stream to the proxy, if one was acquired, and
/// publishes `Canceled` before returning. The attempt then resolves to
/// `OperationAborted`. Aborting an attempt that already finished has no
/// effect.
#[derive(Clone)]
pub struct AbortHandle {
    attempt: Arc<dyn Cancel>,
}

impl AbortHandle {
    pub fn abort(&self) {
        if self.attempt.cancel() {
            debug!("Tunnel attempt canceled");
        }
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle").finish_non_exhaustive()
    }
}
