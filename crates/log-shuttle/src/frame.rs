// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Logplex wire framing.
//!
//! The `application/logplex-1` content type is a sequence of octet-counted
//! syslog lines: each record is the decimal byte length of its payload, a
//! space, then the payload itself. The payload is an RFC5424 frame -
//! `<prival>version timestamp hostname appname procid msgid message` -
//! terminated by a newline.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::ShuttleConfig;

/// Applies the logplex octet-count frame to one finished payload.
#[must_use]
pub fn octet_frame(payload: &[u8]) -> Bytes {
    let mut framed = Vec::with_capacity(payload.len() + 8);
    framed.extend_from_slice(payload.len().to_string().as_bytes());
    framed.push(b' ');
    framed.extend_from_slice(payload);
    Bytes::from(framed)
}

/// Turns raw log lines into wire-ready records.
///
/// The RFC5424 header fields are fixed at construction from the shuttle
/// configuration; only the timestamp varies per line. With `skip_headers`
/// set, lines are assumed to carry their own syslog header and receive the
/// octet count only.
#[derive(Debug, Clone)]
pub struct Framer {
    skip_headers: bool,
    // "<prival>version " and " hostname appname procid msgid ", precomputed
    // so framing a line is two appends around the timestamp
    prefix: String,
    suffix: String,
}

impl Framer {
    #[must_use]
    pub fn new(config: &ShuttleConfig) -> Self {
        let appname = if config.appname.is_empty() {
            "-"
        } else {
            config.appname.as_str()
        };
        Framer {
            skip_headers: config.skip_headers,
            prefix: format!("<{}>{} ", config.prival, config.syslog_version),
            suffix: format!(
                " {} {} {} {} ",
                config.hostname, appname, config.procid, config.msgid
            ),
        }
    }

    /// Frames one log line, stamped with the current time.
    #[must_use]
    pub fn frame(&self, line: &str) -> Bytes {
        self.frame_at(line, Utc::now())
    }

    fn frame_at(&self, line: &str, at: DateTime<Utc>) -> Bytes {
        if self.skip_headers {
            let mut payload = Vec::with_capacity(line.len() + 1);
            payload.extend_from_slice(line.as_bytes());
            payload.push(b'\n');
            return octet_frame(&payload);
        }
        let timestamp = at.to_rfc3339_opts(SecondsFormat::Micros, false);
        let payload = format!(
            "{}{}{}{}\n",
            self.prefix, timestamp, self.suffix, line
        );
        octet_frame(payload.as_bytes())
    }
}

/// The synthetic record appended to a batch when messages were discarded
/// since the previous delivery. Lets the destination observe loss even
/// though the data itself is gone.
#[must_use]
pub(crate) fn drop_record(n: u64) -> Bytes {
    drop_record_at(n, Utc::now())
}

fn drop_record_at(n: u64, at: DateTime<Utc>) -> Bytes {
    let timestamp = at.to_rfc3339_opts(SecondsFormat::Micros, false);
    let payload = format!(
        "<172>1 {timestamp} log-shuttle - shuttle - - Error L12: {n} messages dropped\n"
    );
    octet_frame(payload.as_bytes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2013-03-27T20:02:24.000000+00:00")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_octet_frame_prefixes_length() {
        assert_eq!(&octet_frame(b"hello")[..], b"5 hello");
        assert_eq!(&octet_frame(b"")[..], b"0 ");
    }

    #[test]
    fn test_frame_applies_rfc5424_header() {
        let framer = Framer::new(&ShuttleConfig::default());
        let record = framer.frame_at("hi there", fixed_time());

        let expected_payload =
            "<190>1 2013-03-27T20:02:24.000000+00:00 shuttle - shuttle - - hi there\n";
        let expected = format!("{} {}", expected_payload.len(), expected_payload);
        assert_eq!(&record[..], expected.as_bytes());
    }

    #[test]
    fn test_frame_uses_configured_appname() {
        let config = ShuttleConfig {
            appname: "t.1234".to_string(),
            ..ShuttleConfig::default()
        };
        let framer = Framer::new(&config);
        let record = framer.frame_at("x", fixed_time());

        let payload = String::from_utf8(record.to_vec()).unwrap();
        assert!(payload.contains(" shuttle t.1234 shuttle - - x\n"));
    }

    #[test]
    fn test_frame_skip_headers_counts_only() {
        let config = ShuttleConfig {
            skip_headers: true,
            ..ShuttleConfig::default()
        };
        let framer = Framer::new(&config);
        let record = framer.frame_at("already framed", fixed_time());

        assert_eq!(&record[..], b"15 already framed\n");
    }

    #[test]
    fn test_drop_record_layout() {
        let record = drop_record_at(5, fixed_time());

        let expected_payload = "<172>1 2013-03-27T20:02:24.000000+00:00 log-shuttle - shuttle - - Error L12: 5 messages dropped\n";
        let expected = format!("{} {}", expected_payload.len(), expected_payload);
        assert_eq!(&record[..], expected.as_bytes());
    }
}
