//
//  Copyright 2024 Google, Inc.
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at:
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! A logger for the tunnel command line tool.
//!
//! Uses the env_logger crate that allows control of logging through
//! the RUST_LOG environment variable.

use chrono::{Datelike, Timelike, Utc};
use env_logger::{Builder, Env};
use log::{Level, Record};
use std::{ffi::OsStr, io::Write, path::Path};

/// Initiating the environment for logging with given prefix.
///
/// Logs go to stderr so stdout stays a clean copy of the tunnel.
pub fn init(prefix: &'static str, verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
    builder.format(move |buf, record| {
        writeln!(
            buf,
            "{} {} {} {}:{} - {}",
            prefix,
            level_to_string(record.level()),
            log_current_time(),
            format_file(record),
            record.line().unwrap_or(0),
            record.args()
        )
    });
    builder.init();
}

/// Timestamp of the current time for logs, in UTC.
fn log_current_time() -> String {
    let now = Utc::now();
    format!(
        "{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis()
    )
}

/// Helper function for parsing the file name from given record file path
fn format_file<'a>(record: &'a Record<'a>) -> &'a str {
    record
        .file()
        .and_then(|filepath| Path::new(filepath).file_name())
        .and_then(OsStr::to_str)
        .unwrap_or("N/A")
}

/// Helper function for translating log levels to string.
fn level_to_string(level: Level) -> &'static str {
    match level {
        Level::Error => "E",
        Level::Warn => "W",
        Level::Info => "I",
        Level::Debug => "D",
        Level::Trace => "T",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_to_string() {
        assert_eq!(level_to_string(Level::Warn), "W");
        assert_eq!(level_to_string(Level::Trace), "T");
    }

    #[test]
    fn test_log_current_time_format() {
        let time = log_current_time();
        // MM-DD HH:MM:SS.mmm
        assert_eq!(time.len(), 18, "Unexpected timestamp {}", time);
        assert_eq!(&time[2..3], "-");
        assert_eq!(&time[14..15], ".");
    }
}
