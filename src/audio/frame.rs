/// One captured block of mono audio, normalized to [-1.0, 1.0].
///
/// Frames are produced by a `FrameSource`, analysed once and dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Frame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Build a frame from signed 16-bit PCM.
    pub fn from_i16(samples: &[i16], sample_rate: u32) -> Self {
        let scale = i16::MAX as f32;
        Self::new(samples.iter().map(|&s| s as f32 / scale).collect(), sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration covered by this frame, in seconds.
    pub fn duration(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Result of the stateless half of a processing cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameAnalysis {
    /// Gained RMS loudness (0.0 for silent or degenerate frames)
    pub level: f32,
    /// Whether the level passed the RMS gate
    pub gated_in: bool,
    /// Dominant note, only computed when gated in and note detection is on
    pub note: Option<super::spectrum::NoteMatch>,
}
