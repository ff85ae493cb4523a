// Deterministic Replay Engine
//
// Folds the full event log into a model, starting from the empty value.
// Any unreadable record aborts the whole load; there is no partial model.

use std::io::{self, BufRead};

use crate::event::{DecodeError, Registry};
use crate::log::{parse_time, CodecError, LogRecord};

/// Errors that can occur while loading the log.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("opening log: {0}")]
    Open(#[source] io::Error),

    #[error("reading line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },

    #[error("decoding line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: CodecError,
    },

    #[error("unknown event `{name}` on line {line}, payload `{payload}`")]
    UnknownEvent {
        line: usize,
        name: String,
        payload: serde_json::Value,
    },

    #[error("loading event `{name}` on line {line}: {source}")]
    Payload {
        line: usize,
        name: String,
        #[source]
        source: DecodeError,
    },

    #[error("event `{name}` on line {line} has invalid time `{value}`: {source}")]
    Time {
        line: usize,
        name: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Outcome of a successful replay.
#[derive(Debug, Clone, PartialEq)]
pub struct Replayed<M> {
    pub model: M,
    /// Number of records folded into the model.
    pub records: usize,
}

/// Replay the log read from `reader` on top of `empty`.
///
/// This is the *only* supported way to derive the model from the log.
pub fn load_model<M, R: BufRead>(
    reader: R,
    registry: &Registry<M>,
    empty: M,
) -> Result<Replayed<M>, LoadError> {
    let mut model = empty;
    let mut records = 0;

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|source| LoadError::Read {
            line: line_no,
            source,
        })?;

        if line.trim().is_empty() {
            continue;
        }

        let record = LogRecord::decode(&line).map_err(|source| LoadError::Decode {
            line: line_no,
            source,
        })?;

        if !registry.contains(&record.kind) {
            return Err(LoadError::UnknownEvent {
                line: line_no,
                name: record.kind,
                payload: record.payload,
            });
        }

        let event = registry
            .decode(&record.kind, record.payload)
            .map_err(|source| LoadError::Payload {
                line: line_no,
                name: record.kind.clone(),
                source,
            })?;

        let time = parse_time(&record.time).map_err(|source| LoadError::Time {
            line: line_no,
            name: record.kind,
            value: record.time.clone(),
            source,
        })?;

        model = event.execute(&model, time);
        records += 1;
    }

    Ok(Replayed { model, records })
}
