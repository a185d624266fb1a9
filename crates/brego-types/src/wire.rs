//! Line-delimited JSON encoding of reading batches.
//!
//! Two layouts are supported:
//!
//! - [`WireFormat::Triples`]: one line per batch, `[[time, device, value], ...]`.
//!   The end-of-stream marker is `[[0,"END_STREAM",-1]]`.
//! - [`WireFormat::Records`]: one line per reading,
//!   `{"device": "...", "data": {"time": 1.5, "value": 21.0}}`.
//!   The end-of-stream marker is `{"msg":"END_STREAM"}`.
//!
//! Encoders never emit the trailing newline; stream writers add it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ParseError, ParseResult};
use crate::types::Reading;

/// Device name carried by the end-of-stream triple.
pub const END_STREAM: &str = "END_STREAM";

/// Layout used for broadcast lines and WebSocket messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// One array of `[time, device, value]` triples per batch.
    #[default]
    Triples,
    /// One `{"device", "data": {"time", "value"}}` object per reading.
    Records,
}

impl std::str::FromStr for WireFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "triples" => Ok(WireFormat::Triples),
            "records" => Ok(WireFormat::Records),
            other => Err(ParseError::InvalidData(format!(
                "unknown wire format '{}' (expected 'triples' or 'records')",
                other
            ))),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Record<'a> {
    #[serde(borrow)]
    device: std::borrow::Cow<'a, str>,
    data: RecordData,
}

#[derive(Serialize, Deserialize)]
struct RecordData {
    time: f64,
    value: Option<f64>,
}

/// A decoded broadcast line.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// Readings carried by the line.
    Readings(Vec<Reading>),
    /// The stream has ended.
    EndOfStream,
}

/// Encode a batch in the given format.
///
/// For [`WireFormat::Records`] a multi-reading batch produces several lines
/// separated by `\n`.
pub fn encode_batch(format: WireFormat, readings: &[Reading]) -> ParseResult<String> {
    match format {
        WireFormat::Triples => {
            let triples: Vec<(f64, &str, Option<f64>)> = readings
                .iter()
                .map(|r| (r.timestamp, r.device.as_str(), r.value))
                .collect();
            Ok(serde_json::to_string(&triples)?)
        }
        WireFormat::Records => {
            let mut lines = Vec::with_capacity(readings.len());
            for r in readings {
                let record = Record {
                    device: r.device.as_str().into(),
                    data: RecordData {
                        time: r.timestamp,
                        value: r.value,
                    },
                };
                lines.push(serde_json::to_string(&record)?);
            }
            Ok(lines.join("\n"))
        }
    }
}

/// The end-of-stream line for the given format.
pub fn end_of_stream(format: WireFormat) -> String {
    match format {
        WireFormat::Triples => format!("[[0,\"{}\",-1]]", END_STREAM),
        WireFormat::Records => format!("{{\"msg\":\"{}\"}}", END_STREAM),
    }
}

/// Decode a single line in either format.
///
/// The end-of-stream triple must be alone on its line; a batch mixing it
/// with readings is rejected as [`ParseError::InvalidData`].
pub fn decode_line(line: &str) -> ParseResult<Line> {
    let value: Value = serde_json::from_str(line.trim())?;

    match value {
        Value::Array(items) => {
            let count = items.len();
            let mut readings = Vec::with_capacity(count);
            for item in items {
                let (timestamp, device, reading_value): (f64, String, Option<f64>) =
                    serde_json::from_value(item)?;
                if device == END_STREAM {
                    if count == 1 {
                        return Ok(Line::EndOfStream);
                    }
                    return Err(ParseError::InvalidData(format!(
                        "{} marker inside a batch of {} triples",
                        END_STREAM, count
                    )));
                }
                readings.push(Reading::new(timestamp, device, reading_value));
            }
            Ok(Line::Readings(readings))
        }
        Value::Object(ref map) if map.get("msg").and_then(Value::as_str) == Some(END_STREAM) => {
            Ok(Line::EndOfStream)
        }
        Value::Object(_) => {
            let record: Record<'_> = serde_json::from_str(line.trim())?;
            Ok(Line::Readings(vec![Reading::new(
                record.data.time,
                record.device.into_owned(),
                record.data.value,
            )]))
        }
        other => Err(ParseError::InvalidData(format!(
            "expected a JSON array or object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Reading> {
        vec![
            Reading::new(10.5, "28-0001", Some(21.25)),
            Reading::new(10.75, "Tachometer", None),
        ]
    }

    #[test]
    fn test_triples_layout() {
        let line = encode_batch(WireFormat::Triples, &sample()).unwrap();
        assert_eq!(line, r#"[[10.5,"28-0001",21.25],[10.75,"Tachometer",null]]"#);
    }

    #[test]
    fn test_records_layout_one_line_per_reading() {
        let text = encode_batch(WireFormat::Records, &sample()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"device":"28-0001","data":{"time":10.5,"value":21.25}}"#
        );
        assert!(lines[1].contains("\"value\":null"));
    }

    #[test]
    fn test_decode_both_layouts() {
        let triples = encode_batch(WireFormat::Triples, &sample()).unwrap();
        assert_eq!(decode_line(&triples).unwrap(), Line::Readings(sample()));

        let record = r#"{"device":"Potentiometer","data":{"time":3.0,"value":0.5}}"#;
        assert_eq!(
            decode_line(record).unwrap(),
            Line::Readings(vec![Reading::new(3.0, "Potentiometer", Some(0.5))])
        );
    }

    #[test]
    fn test_end_of_stream_markers() {
        assert_eq!(end_of_stream(WireFormat::Triples), r#"[[0,"END_STREAM",-1]]"#);
        assert_eq!(end_of_stream(WireFormat::Records), r#"{"msg":"END_STREAM"}"#);

        for format in [WireFormat::Triples, WireFormat::Records] {
            assert_eq!(decode_line(&end_of_stream(format)).unwrap(), Line::EndOfStream);
        }
    }

    #[test]
    fn test_end_of_stream_mixed_with_readings_rejected() {
        for line in [
            r#"[[1.0,"28-a",20.5],[0,"END_STREAM",-1]]"#,
            r#"[[0,"END_STREAM",-1],[1.0,"28-a",20.5]]"#,
        ] {
            assert!(matches!(decode_line(line), Err(ParseError::InvalidData(_))));
        }
    }

    #[test]
    fn test_decode_rejects_scalars() {
        assert!(decode_line("42").is_err());
        assert!(decode_line("not json").is_err());
    }

    #[test]
    fn test_wire_format_from_str() {
        assert_eq!("Triples".parse::<WireFormat>().unwrap(), WireFormat::Triples);
        assert_eq!("records".parse::<WireFormat>().unwrap(), WireFormat::Records);
        assert!("csv".parse::<WireFormat>().is_err());
    }
}
