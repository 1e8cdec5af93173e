use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use super::{CaptureError, FrameSource};
use crate::audio::decode::{decode_file, DecodedAudio};
use crate::audio::Frame;

/// Replays a decoded recording as consecutive, non-overlapping frames.
/// A trailing partial frame is dropped.
pub struct FileSource {
    samples: Vec<f32>,
    sample_rate: u32,
    frame_len: usize,
    position: usize,
    realtime: bool,
}

impl FileSource {
    pub fn new(audio: DecodedAudio, frame_len: usize) -> Self {
        Self {
            samples: audio.samples,
            sample_rate: audio.sample_rate,
            frame_len: frame_len.max(1),
            position: 0,
            realtime: false,
        }
    }

    pub fn open(path: &Path, frame_len: usize) -> Result<Self> {
        Ok(Self::new(decode_file(path)?, frame_len))
    }

    /// Sleep for each frame's duration so replay runs at capture speed.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn total_frames(&self) -> usize {
        self.samples.len() / self.frame_len
    }
}

impl FrameSource for FileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let end = self.position + self.frame_len;
        if end > self.samples.len() {
            return Err(CaptureError::EndOfStream);
        }
        let frame = Frame::new(self.samples[self.position..end].to_vec(), self.sample_rate);
        self.position = end;

        if self.realtime {
            std::thread::sleep(Duration::from_secs_f32(frame.duration()));
        }
        Ok(frame)
    }

    fn is_live(&self) -> bool {
        self.realtime
    }
}
