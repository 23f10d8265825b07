//! Changelog record grammar
//!
//! The backing object's data stream is a concatenation of newline-terminated
//! mutation records, one per line:
//!
//! ```text
//! INSERT := "+" SP key SP value LF
//! ERASE  := "-" SP key LF
//! ```
//!
//! Keys and values are codec-encoded ASCII-safe text (see [`crate::codec`]).
//! Decoding a byte slice yields the ordered record list starting at offset
//! zero. A trailing fragment without a terminating LF is a decode error —
//! accepted batches append whole records only, so a partial line means the
//! stream is corrupt, not merely in flux.

use crate::error::{MapError, MapResult};

/// One decoded changelog record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Insert-or-overwrite of `key` with `value` (both in encoded text form)
    Insert {
        /// Encoded key text
        key: String,
        /// Encoded value text
        value: String,
    },
    /// Erasure of `key`
    Erase {
        /// Encoded key text
        key: String,
    },
    /// A line whose leading token is neither `+` nor `-`. Preserved so the
    /// replay layer can log and skip it instead of failing the whole stream.
    Unknown {
        /// The unrecognized leading token
        tag: String,
    },
}

/// Encode one INSERT record.
#[must_use]
pub fn encode_insert(key: &str, value: &str) -> String {
    format!("+ {} {}\n", key, value)
}

/// Encode one ERASE record.
#[must_use]
pub fn encode_erase(key: &str) -> String {
    format!("- {}\n", key)
}

/// Decode a changelog byte slice into ordered records.
///
/// Returns `(offset, record)` pairs where `offset` is the byte position of
/// the record's first byte, counted from `base` (the position of `bytes[0]`
/// in the full stream) so errors report absolute changelog positions.
pub fn decode(bytes: &[u8], base: u64) -> MapResult<Vec<(u64, Record)>> {
    let text = std::str::from_utf8(bytes).map_err(|e| MapError::CorruptLog {
        offset: base + e.valid_up_to() as u64,
        reason: "changelog is not valid UTF-8".to_string(),
    })?;

    let mut records = Vec::new();
    let mut offset = base;

    for line in text.split_inclusive('\n') {
        let Some(line) = line.strip_suffix('\n') else {
            return Err(MapError::CorruptLog {
                offset,
                reason: "trailing partial record (missing line terminator)".to_string(),
            });
        };
        records.push((offset, parse_line(line, offset)?));
        offset += line.len() as u64 + 1;
    }

    Ok(records)
}

/// Parse a single line (terminator already stripped).
fn parse_line(line: &str, offset: u64) -> MapResult<Record> {
    let malformed = |reason: String| MapError::CorruptLog { offset, reason };

    let mut tokens = line.split(' ');
    let tag = tokens
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| malformed("empty record".to_string()))?;

    match tag {
        "+" => {
            let key = tokens.next().unwrap_or("");
            let value = tokens.next().unwrap_or("");
            if key.is_empty() || value.is_empty() || tokens.next().is_some() {
                return Err(malformed(format!("malformed insert record: {:?}", line)));
            }
            Ok(Record::Insert {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
        "-" => {
            let key = tokens.next().unwrap_or("");
            if key.is_empty() || tokens.next().is_some() {
                return Err(malformed(format!("malformed erase record: {:?}", line)));
            }
            Ok(Record::Erase {
                key: key.to_string(),
            })
        }
        other => Ok(Record::Unknown {
            tag: other.to_string(),
        }),
    }
}
