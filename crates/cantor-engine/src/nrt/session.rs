use serde::Serialize;

use crate::error::SessionError;
use crate::message::{Message, Value};

pub const RECORD_INFO: &str = "/nrt_record_info";

/// Parameters of one offline recording session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionHeader {
    pub bpm: f32,
    pub output_name: String,
    /// Explicit end of the score in beats. Computed when absent.
    pub end_beat: Option<f32>,
}

impl SessionHeader {
    pub fn new(bpm: f32, output_name: impl Into<String>, end_beat: Option<f32>) -> Self {
        Self {
            bpm,
            output_name: output_name.into(),
            end_beat,
        }
    }

    /// Reads `/nrt_record_info bpm file [end_beat]`.
    pub fn from_message(message: &Message) -> Result<Self, SessionError> {
        let invalid = |reason: String| SessionError::InvalidSessionHeader(reason);
        if message.address != RECORD_INFO {
            return Err(invalid(format!(
                "expected {RECORD_INFO}, got {}",
                message.address
            )));
        }
        let bpm = match message.arg(0) {
            Some(value) => value
                .as_float()
                .ok_or_else(|| invalid(format!("bpm must be numeric, got {value}")))?,
            None => return Err(invalid("missing bpm".to_owned())),
        };
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(invalid(format!("bpm must be positive, got {bpm}")));
        }
        let output_name = match message.arg(1) {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(other) => return Err(invalid(format!("invalid file name {other}"))),
            None => return Err(invalid("missing file name".to_owned())),
        };
        let end_beat = match message.arg(2) {
            None => None,
            Some(value) => match value.as_float() {
                Some(beat) if beat.is_finite() && beat >= 0.0 => Some(beat),
                _ => return Err(invalid(format!("invalid end beat {value}"))),
            },
        };
        if message.args.len() > 3 {
            return Err(invalid(format!(
                "unexpected trailing arguments ({} given)",
                message.args.len()
            )));
        }
        Ok(Self {
            bpm,
            output_name,
            end_beat,
        })
    }

    pub fn beats_to_seconds(&self, beats: f32) -> f32 {
        beats * 60.0 / self.bpm
    }

    pub fn seconds_to_beats(&self, seconds: f32) -> f32 {
        seconds * self.bpm / 60.0
    }
}

/// A payload reserved at `offset` beats from the start of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedEvent {
    pub offset: f32,
    pub payload: Message,
    /// Submission order, used to break ties between equal offsets.
    pub arrival: u64,
}

/// Finalized session: events in timeline order plus the resolved end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub header: SessionHeader,
    pub events: Vec<TimedEvent>,
    pub end_beat: f32,
}
