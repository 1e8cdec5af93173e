use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError};

use super::{EventSink, SinkError};
use crate::event::DetectionEvent;

/// Runs a sink on its own thread behind a bounded queue. `publish` never
/// blocks: when the queue is full the event is dropped.
pub struct QueuedSink {
    tx: Option<Sender<DetectionEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl QueuedSink {
    pub fn spawn<S: EventSink + 'static>(mut inner: S, capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<DetectionEvent>(capacity.max(1));
        let worker = std::thread::Builder::new()
            .name("event-sink".into())
            .spawn(move || {
                for event in rx {
                    if let Err(err) = inner.publish(&event) {
                        log::error!("Failed to publish {} event: {}", event.topic_suffix(), err);
                    }
                }
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("Failed to start event worker: {}", err);
                None
            }
        };
        Self {
            tx: worker.as_ref().map(|_| tx),
            worker,
        }
    }

    /// Stop accepting events and wait for the queue to drain.
    pub fn shutdown(mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Event worker panicked");
            }
        }
    }
}

impl EventSink for QueuedSink {
    fn publish(&mut self, event: &DetectionEvent) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Disconnected)?;
        tx.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::QueueFull,
            TrySendError::Disconnected(_) => SinkError::Disconnected,
        })
    }
}
