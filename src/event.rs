use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::audio::notes::NoteName;

/// Seconds since the Unix epoch, as carried in every payload.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MelodyKind {
    /// Loudness-contour heuristic fired (no pitch information)
    MelodyPattern,
    /// The configured note sequence was heard in full
    MelodyDetected,
    /// One step of the configured sequence was heard
    TargetNoteDetected,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LevelEvent {
    pub level: f32,
    pub timestamp: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NoteEvent {
    pub note: NoteName,
    pub level: f32,
    pub timestamp: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MelodyEvent {
    #[serde(rename = "type")]
    pub kind: MelodyKind,
    pub level: f32,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_sequence: Option<Vec<NoteName>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<NoteName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f32>,
}

impl MelodyEvent {
    pub fn new(kind: MelodyKind, level: f32, timestamp: f64) -> Self {
        Self {
            kind,
            level,
            timestamp,
            matched_sequence: None,
            note: None,
            step: None,
            frequency: None,
        }
    }
}

/// One payload handed to an `EventSink`. Serializes to the bare payload object.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DetectionEvent {
    Level(LevelEvent),
    Note(NoteEvent),
    Melody(MelodyEvent),
}

impl DetectionEvent {
    /// Appended to the configured topic, e.g. `chimewatch/melody`.
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            DetectionEvent::Level(_) => "level",
            DetectionEvent::Note(_) => "note",
            DetectionEvent::Melody(_) => "melody",
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            DetectionEvent::Level(e) => e.timestamp,
            DetectionEvent::Note(e) => e.timestamp,
            DetectionEvent::Melody(e) => e.timestamp,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
