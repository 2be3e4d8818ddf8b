//! JSON wire frame shapes exchanged with the controller.
//!
//! Outbound: `{command: null}` (query), `{command: value}` (set), or a raw
//! gcode line wrapped as `{gc: "<gcode>"}`. Control characters bypass framing
//! entirely (single bytes, no newline, no JSON).
//!
//! Inbound: `{sr: {...}}` (status report fragment), `{qr: n}` (planner queue
//! free count), or `{r: {...}, f: [_, status_code, _, _]}` (command response).

use gcodekit4_core::{Error, Result};
use serde_json::Value;

/// A single-byte real-time control character. Bypasses the send window and
/// is written to the wire immediately with no trailing newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlChar {
    /// Feed hold.
    FeedHold,
    /// Cycle start / resume.
    CycleStart,
    /// Job cancel.
    Cancel,
}

impl ControlChar {
    /// The byte written to the wire for this control character.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::FeedHold => b'!',
            Self::CycleStart => b'~',
            Self::Cancel => b'%',
        }
    }
}

/// Build the `{gc: "<gcode>"}` outbound frame for a line of gcode.
pub fn gcode_frame(line: &str) -> String {
    serde_json::json!({ "gc": line }).to_string()
}

/// Build a `{command: null}` query frame.
pub fn query_frame(command: &str) -> String {
    serde_json::json!({ command: Value::Null }).to_string()
}

/// Build a `{command: value}` set frame.
pub fn set_frame(command: &str, value: Value) -> String {
    serde_json::json!({ command: value }).to_string()
}

/// The status-report field set requested at connect time: `{n, feed, stat, qr, mpo{axis}}`.
pub fn status_report_fields(axis_labels: &[char]) -> Value {
    let mut mpo = serde_json::Map::new();
    for a in axis_labels {
        mpo.insert(a.to_ascii_lowercase().to_string(), Value::Bool(true));
    }
    let mpo = Value::Object(mpo);
    serde_json::json!({
        "sr": {
            "n": true,
            "feed": true,
            "stat": true,
            "qr": true,
            "mpo": mpo,
        }
    })
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Status report fragment.
    StatusReport(Value),
    /// Planner queue free count.
    QueueFree(u64),
    /// Command response, carrying the parsed footer status code.
    Response { body: Value, status_code: i64 },
    /// A frame carrying none of the recognized keys; ignored by the session.
    Unrecognized(Value),
}

/// Parse a single newline-delimited inbound JSON object.
pub fn parse_inbound(raw: &str) -> Result<InboundFrame> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| Error::parse(0, format!("malformed controller frame: {e}")))?;

    if let Some(sr) = value.get("sr") {
        return Ok(InboundFrame::StatusReport(sr.clone()));
    }
    if let Some(qr) = value.get("qr").and_then(Value::as_u64) {
        return Ok(InboundFrame::QueueFree(qr));
    }
    if let Some(body) = value.get("r") {
        let status_code = value
            .get("f")
            .and_then(Value::as_array)
            .and_then(|f| f.get(1))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        return Ok(InboundFrame::Response {
            body: body.clone(),
            status_code,
        });
    }
    Ok(InboundFrame::Unrecognized(value))
}

/// The `stat` field's machine-readable name, per the controller status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStat {
    Init,
    Reset,
    Alarm,
    Stop,
    End,
    Run,
    Hold,
    Probe,
    Cycle,
    Home,
}

impl MachineStat {
    /// Decode the numeric `stat` code from a status report.
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Self::Init,
            1 => Self::Reset,
            2 => Self::Alarm,
            3 => Self::Stop,
            4 => Self::End,
            5 => Self::Run,
            6 => Self::Hold,
            7 => Self::Probe,
            8 => Self::Cycle,
            9 => Self::Home,
            _ => return None,
        })
    }

    /// `(ready, paused, moving, error, program)` flags for this stat.
    pub fn flags(self) -> (bool, bool, bool, bool, bool) {
        match self {
            Self::Init => (false, false, false, false, false),
            Self::Reset => (true, false, false, false, false),
            Self::Alarm => (false, false, false, true, false),
            Self::Stop | Self::Cycle => (true, false, false, false, true),
            Self::End => (true, false, false, false, false),
            Self::Run => (true, false, true, false, true),
            Self::Hold => (true, true, false, false, false),
            Self::Probe | Self::Home => (true, false, true, false, false),
        }
    }
}

/// Extract `mpos` axis values from a status-report fragment.
pub fn extract_mpos(sr: &Value, axis_labels: &[char]) -> Vec<Option<f64>> {
    axis_labels
        .iter()
        .map(|a| {
            sr.get("mpo")
                .and_then(|m| m.get(a.to_ascii_lowercase().to_string()))
                .and_then(Value::as_f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_with_footer_status() {
        let raw = r#"{"r":{"n":42},"f":[1,0,0,0]}"#;
        match parse_inbound(raw).unwrap() {
            InboundFrame::Response { status_code, .. } => assert_eq!(status_code, 0),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parses_queue_free() {
        match parse_inbound(r#"{"qr":4}"#).unwrap() {
            InboundFrame::QueueFree(n) => assert_eq!(n, 4),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn malformed_frame_is_parse_error() {
        assert!(parse_inbound("not json").is_err());
    }

    #[test]
    fn stat_run_flags_moving_and_ready() {
        let (ready, paused, moving, error, program) = MachineStat::Run.flags();
        assert!(ready && moving && program && !paused && !error);
    }

    #[test]
    fn gcode_frame_wraps_in_gc_key() {
        assert_eq!(gcode_frame("G1 X1"), r#"{"gc":"G1 X1"}"#);
    }
}
