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

//! Command Line Interface for HTTP CONNECT tunnels
//!
//! Raw protocol sessions (SMTP, plain HTTP) can be driven by hand:
//!
//! ```text
//! http-connect --proxy 127.0.0.1:8080 smtp.example.com:25
//! ```

mod args;
mod logger;

use anyhow::Context;
use args::TunnelArgs;
use clap::Parser;
use http_connect::{ProxyConnector, SocketConnector};
use log::{debug, error, info};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = TunnelArgs::parse();
    logger::init("http-connect", args.verbose);

    let proxy = ProxyConnector::with_headers(&args.proxy, SocketConnector::new(), args.headers)
        .with_context(|| format!("Unable to use proxy {}", args.proxy))?;
    let tunnel = proxy
        .connect(&args.destination)?
        .await
        .with_context(|| format!("Unable to open tunnel to {}", args.destination))?;
    info!("Tunnel to {} open via {}", args.destination, proxy.config());

    // A pending stdin read would otherwise keep the runtime alive.
    if let Err(err) = pipe(tunnel).await {
        error!("{:#}", err);
        std::process::exit(1);
    }
    std::process::exit(0)
}

/// Copies stdin into the tunnel and the tunnel into stdout until the
/// remote side closes.
async fn pipe<S>(tunnel: S) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(tunnel);
    let mut stdout = tokio::io::stdout();
    {
        let upstream = async {
            let sent = tokio::io::copy(&mut tokio::io::stdin(), &mut writer).await?;
            debug!("stdin closed after {} bytes", sent);
            writer.shutdown().await
        };
        let downstream = tokio::io::copy(&mut reader, &mut stdout);
        tokio::pin!(downstream);

        tokio::select! {
            received = &mut downstream => {
                let received = received.context("Reading from tunnel")?;
                debug!("Tunnel closed after {} bytes", received);
            }
            sent = upstream => {
                sent.context("Writing to tunnel")?;
                let received = downstream.await.context("Reading from tunnel")?;
                debug!("Tunnel closed after {} bytes", received);
            }
        }
    }
    stdout.flush().await?;
    Ok(())
}
