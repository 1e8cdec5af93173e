//! Microphone monitor that turns loudness and pitch into home-automation
//! events: a level gate, an FFT note detector, an ordered-melody matcher and
//! a loudness-pattern fallback, wired between a `FrameSource` and an
//! `EventSink`.

pub mod audio;
pub mod config;
pub mod event;
pub mod melody;
pub mod monitor;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use audio::{Frame, NoteName, NoteTable, SpectralNoteDetector};
pub use event::DetectionEvent;
pub use melody::{MelodyMatcher, MelodyStep};
pub use pipeline::{Pipeline, PipelineSettings, Tick};
