// Log Codec
//
// One record per line, newline-delimited JSON:
// {"time":"...","type":"<event-name>","payload":<event JSON>}

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Payload;

pub mod file;
pub mod memory;
pub mod store;

pub use file::FileLog;
pub use memory::MemoryLog;
pub use store::LogBackend;

/// Fixed UTC timestamp format with nanosecond precision.
///
/// `%9f` requires exactly nine digits when parsing.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%9fZ";

pub fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parse a timestamp written by [`format_time`].
///
/// Only the exact fixed format is accepted, including all nine fractional
/// digits.
pub fn parse_time(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT).map(|naive| naive.and_utc())
}

/// A single persisted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub time: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encoding payload of `{kind}`: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed record: {0}")]
    Malformed(#[source] serde_json::Error),
}

impl LogRecord {
    /// Build a record for an event stamped at `time`.
    pub fn new<P>(time: DateTime<Utc>, kind: &str, event: &P) -> Result<Self, CodecError>
    where
        P: Payload + ?Sized,
    {
        let payload = event.payload().map_err(|source| CodecError::Payload {
            kind: kind.to_string(),
            source,
        })?;

        Ok(Self {
            time: format_time(time),
            kind: kind.to_string(),
            payload,
        })
    }

    /// Encode as one line, including the trailing newline.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut line = serde_json::to_vec(self).map_err(CodecError::Malformed)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decode one line. Surrounding whitespace is ignored.
    pub fn decode(line: &str) -> Result<Self, CodecError> {
        serde_json::from_str(line.trim()).map_err(CodecError::Malformed)
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>, chrono::ParseError> {
        parse_time(&self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Deposit {
        amount: u32,
    }

    #[test]
    fn time_format_keeps_nanoseconds() {
        let time = Utc
            .timestamp_opt(1_700_000_000, 123_456_789)
            .single()
            .unwrap();

        let text = format_time(time);
        assert_eq!(text, "2023-11-14T22:13:20.123456789Z");
        assert_eq!(parse_time(&text).unwrap(), time);
    }

    #[test]
    fn whole_seconds_still_have_nine_digits() {
        let time = Utc.timestamp_opt(0, 0).single().unwrap();
        assert_eq!(format_time(time), "1970-01-01T00:00:00.000000000Z");
    }

    #[test]
    fn other_time_formats_are_rejected() {
        assert!(parse_time("2023-11-14T22:13:20+01:00").is_err());
        assert!(parse_time("yesterday").is_err());
        assert!(parse_time("1970-01-01T00:00:01Z").is_err());
        assert!(parse_time("1970-01-01T00:00:01.5Z").is_err());
        assert!(parse_time("1970-01-01T00:00:01.1234567890Z").is_err());
        assert!(parse_time("1970-01-01T00:00:01.000000000").is_err());
        assert!(parse_time("1970-01-01T00:00:01.000000000Z").is_ok());
    }

    #[test]
    fn encoded_record_is_one_line_in_wire_order() {
        let time = Utc.timestamp_opt(1_700_000_000, 5).single().unwrap();
        let record = LogRecord::new(time, "deposit", &Deposit { amount: 7 }).unwrap();

        let line = String::from_utf8(record.encode().unwrap()).unwrap();
        assert_eq!(
            line,
            "{\"time\":\"2023-11-14T22:13:20.000000005Z\",\"type\":\"deposit\",\"payload\":{\"amount\":7}}\n"
        );
    }

    #[test]
    fn decode_reads_envelope() {
        let record = LogRecord::decode(
            r#"  {"type":"deposit","time":"2023-11-14T22:13:20.000000005Z","payload":{"amount":7}}  "#,
        )
        .unwrap();

        assert_eq!(record.kind, "deposit");
        assert_eq!(record.payload["amount"], 7);
        assert_eq!(record.timestamp().unwrap().timestamp_subsec_nanos(), 5);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = LogRecord::decode("{not json").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }
}
