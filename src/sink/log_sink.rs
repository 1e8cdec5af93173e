use std::io::{self, Write};

use super::{full_topic, EventSink, SinkError};
use crate::event::DetectionEvent;

/// Writes `topic payload` lines, one per event.
pub struct LogSink<W: Write + Send> {
    out: W,
    topic: String,
}

impl LogSink<io::Stdout> {
    pub fn stdout(topic: impl Into<String>) -> Self {
        Self::new(io::stdout(), topic)
    }
}

impl<W: Write + Send> LogSink<W> {
    pub fn new(out: W, topic: impl Into<String>) -> Self {
        Self {
            out,
            topic: topic.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> EventSink for LogSink<W> {
    fn publish(&mut self, event: &DetectionEvent) -> Result<(), SinkError> {
        let payload = event.to_json()?;
        writeln!(self.out, "{} {}", full_topic(&self.topic, event), payload)
            .and_then(|_| self.out.flush())
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}
