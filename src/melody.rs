//! Ordered-melody recognition over per-cycle note detections.
//!
//! The matcher walks an expected sequence of steps. Each step must be heard
//! within `step_window_secs` of the previous one; a completed sequence is
//! reported at most once per `cooldown_secs`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::audio::notes::{NoteName, NoteParseError};
use crate::audio::spectrum::NoteMatch;

/// One expected element of the melody.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MelodyStep {
    /// A specific note, e.g. `E6`
    Note(NoteName),
    /// Any detected pitch inside `[low_hz, high_hz]`, e.g. `1400-2700`
    Band { low_hz: f32, high_hz: f32 },
}

impl MelodyStep {
    pub fn matches(&self, detected: &NoteMatch) -> bool {
        match *self {
            MelodyStep::Note(name) => detected.note == name,
            MelodyStep::Band { low_hz, high_hz } => {
                (low_hz..=high_hz).contains(&detected.frequency)
            }
        }
    }
}

impl fmt::Display for MelodyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MelodyStep::Note(name) => write!(f, "{}", name),
            MelodyStep::Band { low_hz, high_hz } => write!(f, "{}-{}", low_hz, high_hz),
        }
    }
}

impl FromStr for MelodyStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((low, high)) = s.split_once('-') {
            if let (Ok(low_hz), Ok(high_hz)) = (low.trim().parse::<f32>(), high.trim().parse::<f32>()) {
                if low_hz > 0.0 && low_hz < high_hz {
                    return Ok(MelodyStep::Band { low_hz, high_hz });
                }
                return Err(format!("invalid frequency band `{}`", s));
            }
        }
        s.parse()
            .map(MelodyStep::Note)
            .map_err(|e: NoteParseError| e.to_string())
    }
}

impl TryFrom<String> for MelodyStep {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MelodyStep> for String {
    fn from(step: MelodyStep) -> Self {
        step.to_string()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MelodySettings {
    pub sequence: Vec<MelodyStep>,
    pub step_window_secs: f64,
    pub cooldown_secs: f64,
    /// Every cycle after the first step must carry the next expected note.
    /// Off: silence or the previous step still sounding keeps the attempt.
    pub strict: bool,
}

/// Progress through the sequence. `expected_index` stays in `[0, len)`
/// between calls; reaching `len` resets within the same step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MelodyState {
    pub expected_index: usize,
    pub last_match: Option<f64>,
    pub matched: Vec<NoteName>,
}

impl MelodyState {
    pub fn is_idle(&self) -> bool {
        self.expected_index == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetReason {
    /// The next step did not arrive within the step window
    Timeout,
    /// A different pitch was heard instead of the expected one
    WrongNote,
    /// Strict matching: the expected note was not heard this cycle
    Missed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MatchOutcome {
    /// Nothing in progress, nothing matched
    Idle,
    /// In progress, still waiting for the next step
    Pending,
    /// Step `step` (0-based) was matched by `note`
    Advanced { step: usize, note: NoteMatch },
    /// Progress was abandoned
    Reset(ResetReason),
    /// Whole sequence heard
    Completed { sequence: Vec<NoteName> },
    /// Whole sequence heard again while cooling down; not reported
    Suppressed,
}

pub struct MelodyMatcher {
    settings: MelodySettings,
    state: MelodyState,
    last_completion: Option<f64>,
}

impl MelodyMatcher {
    pub fn new(settings: MelodySettings) -> Self {
        Self {
            settings,
            state: MelodyState::default(),
            last_completion: None,
        }
    }

    pub fn state(&self) -> &MelodyState {
        &self.state
    }

    pub fn in_cooldown(&self, now: f64) -> bool {
        self.last_completion
            .is_some_and(|last| now - last < self.settings.cooldown_secs)
    }

    pub fn reset(&mut self) {
        self.state = MelodyState::default();
    }

    /// Drop stale progress without observing anything. Returns true if a
    /// pending attempt timed out.
    pub fn expire(&mut self, now: f64) -> bool {
        let stale = !self.state.is_idle()
            && self
                .state
                .last_match
                .is_some_and(|last| now - last > self.settings.step_window_secs);
        if stale {
            log::debug!(
                "melody attempt timed out after {} of {} steps",
                self.state.expected_index,
                self.settings.sequence.len()
            );
            self.reset();
        }
        stale
    }

    /// Feed the notes detected during one cycle.
    pub fn observe(&mut self, detected: &[NoteMatch], now: f64) -> MatchOutcome {
        if self.settings.sequence.is_empty() {
            return MatchOutcome::Idle;
        }

        let timed_out = self.expire(now);
        let index = self.state.expected_index;
        let expected = self.settings.sequence[index];

        if let Some(hit) = detected.iter().find(|d| expected.matches(d)) {
            return self.advance(*hit, now);
        }

        if index == 0 {
            return if timed_out {
                MatchOutcome::Reset(ResetReason::Timeout)
            } else {
                MatchOutcome::Idle
            };
        }

        // Silence, or the previous step still ringing, keeps the attempt alive.
        let previous = self.settings.sequence[index - 1];
        if !self.settings.strict
            && (detected.is_empty() || detected.iter().any(|d| previous.matches(d)))
        {
            return MatchOutcome::Pending;
        }

        log::debug!(
            "melody attempt broken at step {}: expected {}, heard {:?}",
            index,
            expected,
            detected.iter().map(|d| d.note.to_string()).collect::<Vec<_>>()
        );
        self.reset();

        // The stray note may itself open a new attempt.
        let first = self.settings.sequence[0];
        match detected.iter().find(|d| first.matches(d)) {
            Some(hit) => self.advance(*hit, now),
            None if detected.is_empty() => MatchOutcome::Reset(ResetReason::Missed),
            None => MatchOutcome::Reset(ResetReason::WrongNote),
        }
    }

    fn advance(&mut self, hit: NoteMatch, now: f64) -> MatchOutcome {
        let step = self.state.expected_index;
        self.state.expected_index += 1;
        self.state.last_match = Some(now);
        self.state.matched.push(hit.note);

        if self.state.expected_index < self.settings.sequence.len() {
            return MatchOutcome::Advanced { step, note: hit };
        }

        let sequence = std::mem::take(&mut self.state.matched);
        self.reset();

        if self.in_cooldown(now) {
            log::debug!("melody repeated during cooldown, suppressed");
            return MatchOutcome::Suppressed;
        }
        self.last_completion = Some(now);
        MatchOutcome::Completed { sequence }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(name: &str) -> NoteMatch {
        let note: NoteName = name.parse().unwrap();
        NoteMatch {
            note,
            frequency: note.frequency(),
            cents: 0.0,
        }
    }

    fn matcher(seq: &[&str]) -> MelodyMatcher {
        MelodyMatcher::new(MelodySettings {
            sequence: seq.iter().map(|s| s.parse().unwrap()).collect(),
            step_window_secs: 1.0,
            cooldown_secs: 10.0,
            strict: false,
        })
    }

    fn play(m: &mut MelodyMatcher, notes: &[&str], start: f64, gap: f64) -> Vec<MatchOutcome> {
        notes
            .iter()
            .enumerate()
            .map(|(i, n)| m.observe(&[hit(n)], start + i as f64 * gap))
            .collect()
    }

    #[test]
    fn parses_steps() {
        assert_eq!("E6".parse::<MelodyStep>().unwrap(), MelodyStep::Note("E6".parse().unwrap()));
        assert_eq!(
            "1400-2700".parse::<MelodyStep>().unwrap(),
            MelodyStep::Band { low_hz: 1400.0, high_hz: 2700.0 }
        );
        assert!("2700-1400".parse::<MelodyStep>().is_err());
        assert!("X9".parse::<MelodyStep>().is_err());
        assert_eq!(MelodyStep::Band { low_hz: 1400.0, high_hz: 2700.0 }.to_string(), "1400-2700");
    }

    #[test]
    fn full_sequence_completes_once_and_resets() {
        let mut m = matcher(&["E6", "C6", "G6"]);
        let outcomes = play(&mut m, &["E6", "C6", "G6"], 0.0, 0.5);

        assert!(matches!(outcomes[0], MatchOutcome::Advanced { step: 0, .. }));
        assert!(matches!(outcomes[1], MatchOutcome::Advanced { step: 1, .. }));
        match &outcomes[2] {
            MatchOutcome::Completed { sequence } => {
                let names: Vec<String> = sequence.iter().map(|n| n.to_string()).collect();
                assert_eq!(names, vec!["E6", "C6", "G6"]);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert!(m.state().is_idle());
        assert!(m.state().matched.is_empty());
    }

    #[test]
    fn late_step_resets_without_completion() {
        let mut m = matcher(&["E6", "C6"]);
        assert!(matches!(m.observe(&[hit("E6")], 0.0), MatchOutcome::Advanced { .. }));
        assert_eq!(m.observe(&[hit("C6")], 1.5), MatchOutcome::Reset(ResetReason::Timeout));
        assert!(m.state().is_idle());
    }

    #[test]
    fn wrong_note_resets() {
        let mut m = matcher(&["E6", "C6", "G6"]);
        m.observe(&[hit("E6")], 0.0);
        assert_eq!(m.observe(&[hit("A4")], 0.2), MatchOutcome::Reset(ResetReason::WrongNote));
        assert!(m.state().is_idle());
    }

    #[test]
    fn wrong_note_that_opens_the_melody_rearms() {
        let mut m = matcher(&["E6", "C6", "G6"]);
        m.observe(&[hit("E6")], 0.0);
        m.observe(&[hit("C6")], 0.3);
        assert!(matches!(m.observe(&[hit("E6")], 0.6), MatchOutcome::Advanced { step: 0, .. }));
        assert_eq!(m.state().expected_index, 1);
    }

    #[test]
    fn sustain_and_silence_keep_progress() {
        let mut m = matcher(&["E6", "C6"]);
        m.observe(&[hit("E6")], 0.0);
        assert_eq!(m.observe(&[hit("E6")], 0.2), MatchOutcome::Pending);
        assert_eq!(m.observe(&[], 0.4), MatchOutcome::Pending);
        assert!(matches!(m.observe(&[hit("C6")], 0.8), MatchOutcome::Completed { .. }));
    }

    #[test]
    fn strict_matching_resets_on_absent_note() {
        let mut m = MelodyMatcher::new(MelodySettings {
            strict: true,
            ..matcher(&["E6", "C6", "G6"]).settings
        });
        m.observe(&[hit("E6")], 0.0);
        assert_eq!(m.observe(&[], 0.2), MatchOutcome::Reset(ResetReason::Missed));
        assert!(m.state().is_idle());

        // A held first note restarts the attempt instead of keeping it.
        m.observe(&[hit("E6")], 0.4);
        m.observe(&[hit("C6")], 0.6);
        assert_eq!(m.observe(&[hit("C6")], 0.8), MatchOutcome::Reset(ResetReason::WrongNote));
        assert!(matches!(m.observe(&[hit("E6")], 1.0), MatchOutcome::Advanced { step: 0, .. }));
        assert!(matches!(m.observe(&[hit("C6")], 1.2), MatchOutcome::Advanced { step: 1, .. }));
        assert!(matches!(m.observe(&[hit("G6")], 1.4), MatchOutcome::Completed { .. }));
    }

    #[test]
    fn expire_drops_stale_progress() {
        let mut m = matcher(&["E6", "C6"]);
        m.observe(&[hit("E6")], 0.0);
        assert!(!m.expire(0.5));
        assert!(m.expire(2.0));
        assert!(m.state().is_idle());
    }

    #[test]
    fn cooldown_suppresses_repeats() {
        let mut m = matcher(&["E6", "C6"]);
        assert!(matches!(play(&mut m, &["E6", "C6"], 0.0, 0.5)[1], MatchOutcome::Completed { .. }));
        assert_eq!(play(&mut m, &["E6", "C6"], 3.0, 0.5)[1], MatchOutcome::Suppressed);
        assert!(m.state().is_idle());
        // Cooldown counts from the reported completion at t=0.5, not the suppressed one.
        assert!(matches!(play(&mut m, &["E6", "C6"], 10.2, 0.5)[1], MatchOutcome::Completed { .. }));
    }

    #[test]
    fn band_steps_match_by_frequency() {
        let mut m = MelodyMatcher::new(MelodySettings {
            sequence: vec!["1400-2700".parse().unwrap(), "C6".parse().unwrap()],
            step_window_secs: 1.0,
            cooldown_secs: 10.0,
            strict: false,
        });
        assert_eq!(m.observe(&[hit("A4")], 0.0), MatchOutcome::Idle);
        assert!(matches!(m.observe(&[hit("E7")], 0.1), MatchOutcome::Advanced { .. }));
        assert!(matches!(m.observe(&[hit("C6")], 0.2), MatchOutcome::Completed { .. }));
    }

    #[test]
    fn single_step_melody_completes_immediately() {
        let mut m = matcher(&["A4"]);
        assert!(matches!(m.observe(&[hit("A4")], 0.0), MatchOutcome::Completed { .. }));
        assert_eq!(m.observe(&[hit("A4")], 1.0), MatchOutcome::Suppressed);
    }

    #[test]
    fn empty_sequence_never_matches() {
        let mut m = matcher(&[]);
        assert_eq!(m.observe(&[hit("A4")], 0.0), MatchOutcome::Idle);
    }
}
