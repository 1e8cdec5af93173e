use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use super::frame::Frame;
use super::notes::{NoteName, NoteTable};

/// How the dominant bin is chosen among the bins above the noise floor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakPolicy {
    /// Largest magnitude above the floor
    #[default]
    Strongest,
    /// Lowest-frequency bin above the floor
    FirstAboveFloor,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    /// Frames shorter than this are not analysed
    pub min_frame_len: usize,
    /// Noise floor as a fraction of the spectrum peak (0..1)
    pub noise_floor: f32,
    /// Peak magnitude must be at least this multiple of the mean magnitude
    pub min_prominence: f32,
    /// Admissible peak band in Hz
    pub min_frequency: f32,
    pub max_frequency: f32,
    /// Maximum deviation from the nearest note, in cents
    pub tolerance_cents: f32,
    pub policy: PeakPolicy,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            min_frame_len: 1024,
            noise_floor: 0.2,
            min_prominence: 8.0,
            min_frequency: 20.0,
            max_frequency: 5000.0,
            tolerance_cents: 25.0,
            policy: PeakPolicy::Strongest,
        }
    }
}

/// A successful quantization of the dominant spectral peak.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteMatch {
    pub note: NoteName,
    /// Interpolated peak frequency (Hz)
    pub frequency: f32,
    /// Deviation from the reference pitch of `note` (cents)
    pub cents: f32,
}

/// Stateless pitch detector: Hann window, magnitude spectrum, peak pick,
/// nearest-note quantization.
pub struct SpectralNoteDetector {
    table: NoteTable,
    settings: DetectorSettings,
    frame_len: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl SpectralNoteDetector {
    /// Plans the FFT for `frame_len`; frames of other lengths are planned on the fly.
    pub fn new(table: NoteTable, settings: DetectorSettings, frame_len: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame_len.max(1));
        Self {
            table,
            settings,
            frame_len,
            fft,
            window: hann_window(frame_len),
        }
    }

    pub fn detect_note(&self, frame: &Frame) -> Option<NoteMatch> {
        let samples = frame.samples();
        if samples.len() < self.settings.min_frame_len.max(4) || frame.sample_rate() == 0 {
            return None;
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return None;
        }

        let magnitudes = if samples.len() == self.frame_len {
            magnitude_spectrum(samples, &self.window, self.fft.as_ref())
        } else {
            let mut planner = FftPlanner::<f32>::new();
            let fft = planner.plan_fft_forward(samples.len());
            magnitude_spectrum(samples, &hann_window(samples.len()), fft.as_ref())
        };

        let bin_hz = frame.sample_rate() as f32 / samples.len() as f32;
        let peak_bin = self.pick_peak(&magnitudes)?;
        let frequency = (peak_bin as f32 + interpolate_peak(&magnitudes, peak_bin)) * bin_hz;

        if frequency < self.settings.min_frequency || frequency > self.settings.max_frequency {
            log::trace!("peak {:.1} Hz outside admissible band", frequency);
            return None;
        }

        let (note, cents) = self.table.nearest(frequency)?;
        if cents.abs() > self.settings.tolerance_cents {
            log::trace!(
                "peak {:.1} Hz is {:+.1} cents from {}, rejected",
                frequency, cents, note.name
            );
            return None;
        }

        Some(NoteMatch {
            note: note.name,
            frequency,
            cents,
        })
    }

    /// Index of the dominant bin, or `None` for silence and broadband noise.
    fn pick_peak(&self, magnitudes: &[f32]) -> Option<usize> {
        // DC carries no pitch
        let bins = magnitudes.get(1..)?;
        let (max_idx, &max) = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        if max <= f32::EPSILON {
            return None;
        }

        let mean = bins.iter().sum::<f32>() / bins.len() as f32;
        if max < mean * self.settings.min_prominence {
            return None;
        }

        let floor = max * self.settings.noise_floor;
        let idx = match self.settings.policy {
            PeakPolicy::Strongest => max_idx,
            PeakPolicy::FirstAboveFloor => {
                // Climb to the top of the first lobe above the floor
                let mut i = bins.iter().position(|&m| m > floor)?;
                while i + 1 < bins.len() && bins[i + 1] > bins[i] {
                    i += 1;
                }
                i
            }
        };
        Some(idx + 1)
    }
}

/// Windowed magnitude spectrum over the non-negative frequencies (N/2 + 1 bins).
fn magnitude_spectrum(samples: &[f32], window: &[f32], fft: &dyn Fft<f32>) -> Vec<f32> {
    let mut buffer: Vec<Complex<f32>> = samples
        .iter()
        .zip(window)
        .map(|(&s, &w)| Complex::new(s * w, 0.0))
        .collect();
    fft.process(&mut buffer);

    let half = samples.len() / 2;
    buffer[..=half].iter().map(|c| c.norm()).collect()
}

/// Fractional bin offset of the true peak, from a parabola through the log
/// magnitudes of the peak and its neighbours. Within [-0.5, 0.5].
fn interpolate_peak(magnitudes: &[f32], bin: usize) -> f32 {
    if bin == 0 || bin + 1 >= magnitudes.len() {
        return 0.0;
    }
    let ln = |m: f32| m.max(1e-12).ln();
    let a = ln(magnitudes[bin - 1]);
    let b = ln(magnitudes[bin]);
    let c = ln(magnitudes[bin + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
}

pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 44_100;
    const LEN: usize = 8192;

    fn sine(freq: f32, amplitude: f32) -> Frame {
        let samples = (0..LEN)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32).sin())
            .collect();
        Frame::new(samples, RATE)
    }

    fn detector(settings: DetectorSettings) -> SpectralNoteDetector {
        SpectralNoteDetector::new(NoteTable::piano(), settings, LEN)
    }

    #[test]
    fn hann_window_is_symmetric_and_tapered() {
        let w = hann_window(16);
        assert_eq!(w[0], 0.0);
        assert!(w[15].abs() < 1e-6);
        assert!((w[3] - w[12]).abs() < 1e-6);
        assert_eq!(hann_window(1), vec![1.0]);
    }

    #[test]
    fn a4_sine_detects_a4() {
        let m = detector(DetectorSettings::default())
            .detect_note(&sine(440.0, 0.5))
            .unwrap();
        assert_eq!(m.note.to_string(), "A4");
        assert!(m.cents.abs() < 3.0, "deviation {}", m.cents);
    }

    #[test]
    fn short_and_silent_frames_yield_nothing() {
        let d = detector(DetectorSettings::default());
        assert!(d.detect_note(&Frame::new(vec![0.3; 512], RATE)).is_none());
        assert!(d.detect_note(&Frame::new(vec![0.0; LEN], RATE)).is_none());
        assert!(d.detect_note(&Frame::new(Vec::new(), RATE)).is_none());
    }

    #[test]
    fn nan_frames_yield_nothing() {
        let mut samples = vec![0.1; LEN];
        samples[10] = f32::NAN;
        assert!(detector(DetectorSettings::default())
            .detect_note(&Frame::new(samples, RATE))
            .is_none());
    }

    #[test]
    fn out_of_band_peak_is_rejected() {
        let settings = DetectorSettings {
            min_frequency: 1400.0,
            max_frequency: 2700.0,
            ..DetectorSettings::default()
        };
        let d = detector(settings);
        assert!(d.detect_note(&sine(440.0, 0.5)).is_none());
        assert_eq!(d.detect_note(&sine(2093.0, 0.5)).unwrap().note.to_string(), "C7");
    }

    #[test]
    fn quarter_tone_is_rejected() {
        let between = 440.0 * 2f32.powf(50.0 / 1200.0);
        assert!(detector(DetectorSettings::default())
            .detect_note(&sine(between, 0.5))
            .is_none());
    }

    #[test]
    fn other_frame_lengths_are_planned_on_the_fly() {
        let samples: Vec<f32> = (0..4410)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 880.0 * i as f32 / RATE as f32).sin())
            .collect();
        let m = detector(DetectorSettings::default())
            .detect_note(&Frame::new(samples, RATE))
            .unwrap();
        assert_eq!(m.note.to_string(), "A5");
    }

    #[test]
    fn peak_policies_differ_on_two_tones() {
        let quiet_low = sine(220.0, 0.3);
        let loud_high = sine(880.0, 0.6);
        let mixed: Vec<f32> = quiet_low
            .samples()
            .iter()
            .zip(loud_high.samples())
            .map(|(a, b)| a + b)
            .collect();
        let frame = Frame::new(mixed, RATE);

        let strongest = detector(DetectorSettings::default()).detect_note(&frame).unwrap();
        assert_eq!(strongest.note.to_string(), "A5");

        let first = detector(DetectorSettings {
            policy: PeakPolicy::FirstAboveFloor,
            ..DetectorSettings::default()
        })
        .detect_note(&frame)
        .unwrap();
        assert_eq!(first.note.to_string(), "A3");
    }
}
