//! Where events go. Publishing is fire-and-forget: the loop never waits on
//! a transport.

use thiserror::Error;

use crate::event::DetectionEvent;

mod log_sink;
mod queued;
mod webhook;

pub use log_sink::LogSink;
pub use queued::QueuedSink;
pub use webhook::{WebhookSettings, WebhookSink};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event queue is full, event dropped")]
    QueueFull,
    #[error("event worker has stopped")]
    Disconnected,
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

pub trait EventSink: Send {
    fn publish(&mut self, event: &DetectionEvent) -> Result<(), SinkError>;
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn publish(&mut self, event: &DetectionEvent) -> Result<(), SinkError> {
        (**self).publish(event)
    }
}

/// `base/suffix`, or just the suffix when no base topic is configured.
pub fn full_topic(base: &str, event: &DetectionEvent) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        event.topic_suffix().to_string()
    } else {
        format!("{}/{}", base, event.topic_suffix())
    }
}
