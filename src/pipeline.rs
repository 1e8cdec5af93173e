use crate::audio::{
    DetectorSettings, Frame, FrameAnalysis, LevelMeter, NoteTable, PatternDetector,
    PatternSettings, SpectralNoteDetector,
};
use crate::event::{DetectionEvent, LevelEvent, MelodyEvent, MelodyKind, NoteEvent};
use crate::melody::{MatchOutcome, MelodyMatcher, MelodySettings, MelodyState};

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub gain: f32,
    pub rms_threshold: f32,
    pub note_detection: bool,
    /// Frame length the FFT is planned for
    pub frame_len: usize,
    pub detector: DetectorSettings,
    /// Requires `note_detection`
    pub melody: Option<MelodySettings>,
    pub pattern: Option<PatternSettings>,
}

/// When a cycle happened. `timestamp` (epoch seconds) goes into payloads;
/// `elapsed` (monotonic seconds) drives step windows and cooldowns.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    pub timestamp: f64,
    pub elapsed: f64,
}

impl Tick {
    /// Same value on both clocks, as in replay.
    pub fn at(secs: f64) -> Self {
        Self {
            timestamp: secs,
            elapsed: secs,
        }
    }
}

impl From<f64> for Tick {
    fn from(secs: f64) -> Self {
        Tick::at(secs)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            gain: 1.0,
            rms_threshold: 0.01,
            note_detection: true,
            frame_len: 8820,
            detector: DetectorSettings::default(),
            melody: None,
            pattern: None,
        }
    }
}

/// Everything one monitor owns between cycles: the level gate, the note
/// detector, melody progress and the level history.
pub struct Pipeline {
    meter: LevelMeter,
    detector: SpectralNoteDetector,
    note_detection: bool,
    matcher: Option<MelodyMatcher>,
    pattern: Option<PatternDetector>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        let matcher = if settings.note_detection {
            settings.melody.map(MelodyMatcher::new)
        } else {
            if settings.melody.is_some() {
                log::warn!("Melody matching needs note detection; ignoring melody");
            }
            None
        };

        Self {
            meter: LevelMeter::new(settings.gain, settings.rms_threshold),
            detector: SpectralNoteDetector::new(
                NoteTable::piano(),
                settings.detector,
                settings.frame_len,
            ),
            note_detection: settings.note_detection,
            matcher,
            pattern: settings.pattern.map(PatternDetector::new),
        }
    }

    pub fn melody_state(&self) -> Option<&MelodyState> {
        self.matcher.as_ref().map(|m| m.state())
    }

    /// Stateless half of a cycle: level, gate and (if gated in) note.
    /// Safe to run on many frames in parallel.
    pub fn analyze(&self, frame: &Frame) -> FrameAnalysis {
        let level = self.meter.compute_level(frame);
        let gated_in = self.meter.passes_gate(level);
        let note = if gated_in && self.note_detection {
            self.detector.detect_note(frame)
        } else {
            None
        };
        FrameAnalysis {
            level,
            gated_in,
            note,
        }
    }

    /// Stateful half of a cycle: melody progress, level history and the
    /// events to publish. Must see analyses in capture order.
    pub fn advance(&mut self, analysis: &FrameAnalysis, tick: impl Into<Tick>) -> Vec<DetectionEvent> {
        let Tick {
            timestamp: now,
            elapsed,
        } = tick.into();
        let level = analysis.level;
        if let Some(pattern) = self.pattern.as_mut() {
            pattern.record(level);
        }

        if !analysis.gated_in {
            if let Some(matcher) = self.matcher.as_mut() {
                matcher.expire(elapsed);
            }
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);
        match analysis.note {
            Some(m) => events.push(DetectionEvent::Note(NoteEvent {
                note: m.note,
                level,
                timestamp: now,
            })),
            None => events.push(DetectionEvent::Level(LevelEvent {
                level,
                timestamp: now,
            })),
        }

        if let Some(matcher) = self.matcher.as_mut() {
            match matcher.observe(analysis.note.as_slice(), elapsed) {
                MatchOutcome::Advanced { step, note } => {
                    let mut event = MelodyEvent::new(MelodyKind::TargetNoteDetected, level, now);
                    event.note = Some(note.note);
                    event.step = Some(step);
                    event.frequency = Some(note.frequency);
                    events.push(DetectionEvent::Melody(event));
                }
                MatchOutcome::Completed { sequence } => {
                    log::info!(
                        "Melody detected: {}",
                        sequence.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" ")
                    );
                    let mut event = MelodyEvent::new(MelodyKind::MelodyDetected, level, now);
                    event.matched_sequence = Some(sequence);
                    events.push(DetectionEvent::Melody(event));
                }
                _ => {}
            }
        }

        if let Some(pattern) = self.pattern.as_mut() {
            if pattern.evaluate(elapsed) {
                log::info!("Melody-like level pattern detected");
                events.push(DetectionEvent::Melody(MelodyEvent::new(
                    MelodyKind::MelodyPattern,
                    level,
                    now,
                )));
            }
        }

        events
    }

    /// One full cycle.
    pub fn process(&mut self, frame: &Frame, tick: impl Into<Tick>) -> Vec<DetectionEvent> {
        let analysis = self.analyze(frame);
        self.advance(&analysis, tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 44_100;
    const LEN: usize = 8192;

    fn tone(note: &str, amplitude: f32) -> Frame {
        let freq = note.parse::<crate::audio::NoteName>().unwrap().frequency();
        Frame::new(
            (0..LEN)
                .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32).sin())
                .collect(),
            RATE,
        )
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            frame_len: LEN,
            melody: Some(MelodySettings {
                sequence: vec!["E6".parse().unwrap(), "C6".parse().unwrap()],
                step_window_secs: 1.0,
                cooldown_secs: 10.0,
                strict: false,
            }),
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn quiet_frames_emit_nothing() {
        let mut pipeline = Pipeline::new(settings());
        assert!(pipeline.process(&tone("A4", 0.001), 0.0).is_empty());
        assert!(pipeline.process(&Frame::new(vec![0.0; LEN], RATE), 0.1).is_empty());
    }

    #[test]
    fn loud_tone_emits_note_event() {
        let mut pipeline = Pipeline::new(settings());
        let events = pipeline.process(&tone("A4", 0.5), 1.0);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DetectionEvent::Note(e) => {
                assert_eq!(e.note.to_string(), "A4");
                assert!((e.level - 0.5 / 2f32.sqrt()).abs() < 0.01);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn disabled_note_detection_emits_levels() {
        let mut pipeline = Pipeline::new(PipelineSettings {
            note_detection: false,
            ..settings()
        });
        assert!(pipeline.melody_state().is_none());
        let events = pipeline.process(&tone("E6", 0.5), 0.0);
        assert!(matches!(events.as_slice(), [DetectionEvent::Level(_)]));
    }

    #[test]
    fn melody_emits_progress_then_completion() {
        let mut pipeline = Pipeline::new(settings());
        let first = pipeline.process(&tone("E6", 0.5), 0.0);
        assert!(first.iter().any(|e| matches!(
            e,
            DetectionEvent::Melody(MelodyEvent { kind: MelodyKind::TargetNoteDetected, step: Some(0), .. })
        )));

        let second = pipeline.process(&tone("C6", 0.5), 0.5);
        let done: Vec<_> = second
            .iter()
            .filter_map(|e| match e {
                DetectionEvent::Melody(m) if m.kind == MelodyKind::MelodyDetected => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].matched_sequence.as_ref().unwrap().len(), 2);
        assert!(pipeline.melody_state().unwrap().is_idle());
    }

    #[test]
    fn gated_out_cycles_still_expire_progress() {
        let mut pipeline = Pipeline::new(settings());
        pipeline.process(&tone("E6", 0.5), 0.0);
        assert_eq!(pipeline.melody_state().unwrap().expected_index, 1);
        pipeline.process(&Frame::new(vec![0.0; LEN], RATE), 5.0);
        assert!(pipeline.melody_state().unwrap().is_idle());
    }

    #[test]
    fn melody_windows_follow_elapsed_time_not_wall_clock() {
        let mut pipeline = Pipeline::new(settings());
        pipeline.process(&tone("E6", 0.5), Tick { timestamp: 1_000.0, elapsed: 0.0 });
        // Wall clock stepped forward by an hour between cycles.
        let events = pipeline.process(&tone("C6", 0.5), Tick { timestamp: 4_600.5, elapsed: 0.5 });
        let done = events.iter().find_map(|e| match e {
            DetectionEvent::Melody(m) if m.kind == MelodyKind::MelodyDetected => Some(m),
            _ => None,
        });
        assert_eq!(done.map(|m| m.timestamp), Some(4_600.5));
    }

    #[test]
    fn analyze_is_idempotent() {
        let pipeline = Pipeline::new(settings());
        let frame = tone("G5", 0.4);
        assert_eq!(pipeline.analyze(&frame), pipeline.analyze(&frame));
    }
}
