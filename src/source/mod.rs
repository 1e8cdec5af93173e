//! Where frames come from. The analysis core only sees `FrameSource`.

use std::time::Duration;

use thiserror::Error;

use crate::audio::Frame;

#[cfg(feature = "capture")]
mod device;
mod file;

#[cfg(feature = "capture")]
pub use device::DeviceSource;
pub use file::FileSource;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Samples were dropped between the device and the reader
    #[error("input overrun, samples were dropped")]
    Overrun,
    #[error("no audio received within {0:?}")]
    Timeout(Duration),
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("end of stream")]
    EndOfStream,
}

impl CaptureError {
    /// Transient errors skip one cycle; the rest need a reopen.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Overrun | CaptureError::Timeout(_))
    }
}

pub trait FrameSource {
    fn sample_rate(&self) -> u32;

    /// Block until one frame is available, at most for the source's read deadline.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Try to recover after `CaptureError::Unavailable`.
    fn reopen(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Whether frames arrive in wall-clock time (as opposed to replay).
    fn is_live(&self) -> bool {
        true
    }
}

/// Start the selected input, or the default one when nothing is selected or
/// the selected one fails to start.
#[cfg_attr(not(feature = "capture"), allow(dead_code))]
pub(crate) fn start_with_fallback<D, S>(
    selected: Option<D>,
    default: impl FnOnce() -> Option<D>,
    mut start: impl FnMut(&D) -> Result<S, CaptureError>,
) -> Result<S, CaptureError> {
    if let Some(device) = selected {
        match start(&device) {
            Ok(stream) => return Ok(stream),
            Err(err) => log::warn!("Selected input device failed ({}), falling back to default", err),
        }
    }
    let device =
        default().ok_or_else(|| CaptureError::Unavailable("no input device available".into()))?;
    start(&device)
}
