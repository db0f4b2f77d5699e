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

use clap::Parser;

/// Opens a raw tunnel through an HTTP CONNECT proxy and pipes it to
/// stdin/stdout.
#[derive(Debug, Parser)]
#[command(name = "http-connect")]
pub struct TunnelArgs {
    /// Destination as host:port[/path][?query][#fragment]
    pub destination: String,
    /// Proxy address, e.g. user:pass@127.0.0.1:8080 or http+unix:///run/proxy.sock
    #[arg(short, long, env = "http_proxy", default_value = "127.0.0.1:8080")]
    pub proxy: String,
    /// Extra header sent to the proxy as "Name: Value", may be repeated
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
    /// Set verbose mode
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) =
        s.split_once(':').ok_or_else(|| format!("expected \"Name: Value\", got \"{}\"", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in \"{}\"", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Cookie: id=123").unwrap(),
            ("Cookie".to_string(), "id=123".to_string())
        );
        assert_eq!(
            parse_header("X-Forwarded-For:10.0.0.1").unwrap(),
            ("X-Forwarded-For".to_string(), "10.0.0.1".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_parse_args() {
        let args = TunnelArgs::parse_from([
            "http-connect",
            "smtp.example.com:25",
            "--proxy",
            "user:pass@127.0.0.1:3128",
            "-H",
            "Cookie: id=123",
            "-H",
            "Cookie: year=2018",
        ]);
        assert_eq!(args.destination, "smtp.example.com:25");
        assert_eq!(args.proxy, "user:pass@127.0.0.1:3128");
        assert_eq!(args.headers.len(), 2);
        assert!(!args.verbose);
    }
}
