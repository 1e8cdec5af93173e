//! Equal-tempered note table for the 88 piano keys (A0 to C8).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub const LOWEST_MIDI: u8 = 21;
pub const HIGHEST_MIDI: u8 = 108;
pub const A4_MIDI: u8 = 69;
pub const A4_HZ: f32 = 440.0;

/// Signed distance from `reference` to `freq` in cents.
pub fn cents_between(freq: f32, reference: f32) -> f32 {
    1200.0 * (freq / reference).log2()
}

/// Express a tolerance of `hz` around A4 in cents.
pub fn hz_tolerance_to_cents(hz: f32) -> f32 {
    cents_between(A4_HZ + hz.abs(), A4_HZ)
}

pub fn midi_to_frequency(midi: u8) -> f32 {
    A4_HZ * 2f32.powf((midi as f32 - A4_MIDI as f32) / 12.0)
}

#[derive(Debug, Error, PartialEq)]
pub enum NoteParseError {
    #[error("empty note name")]
    Empty,
    #[error("unknown pitch class in `{0}`")]
    PitchClass(String),
    #[error("missing or invalid octave in `{0}`")]
    Octave(String),
    #[error("`{0}` is outside the piano range A0-C8")]
    OutOfRange(String),
}

/// A named pitch: pitch class plus octave, e.g. `A4`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NoteName {
    midi: u8,
}

impl NoteName {
    pub fn from_midi(midi: u8) -> Option<Self> {
        (LOWEST_MIDI..=HIGHEST_MIDI)
            .contains(&midi)
            .then_some(Self { midi })
    }

    pub fn midi(&self) -> u8 {
        self.midi
    }

    pub fn pitch_class(&self) -> &'static str {
        PITCH_CLASSES[(self.midi % 12) as usize]
    }

    pub fn octave(&self) -> i32 {
        (self.midi as i32 / 12) - 1
    }

    pub fn frequency(&self) -> f32 {
        midi_to_frequency(self.midi)
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class(), self.octave())
    }
}

impl FromStr for NoteName {
    type Err = NoteParseError;

    /// Accepts sharps (`C#5`) and flats (`Db5`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let letter = chars.next().ok_or(NoteParseError::Empty)?;
        let base: i32 = match letter.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(NoteParseError::PitchClass(s.to_string())),
        };

        let rest = chars.as_str();
        let (accidental, octave_str) = match rest.chars().next() {
            Some('#') => (1, &rest[1..]),
            Some('b') => (-1, &rest[1..]),
            _ => (0, rest),
        };

        let octave: i32 = octave_str
            .parse()
            .map_err(|_| NoteParseError::Octave(s.to_string()))?;
        let midi = octave
            .checked_add(1)
            .and_then(|o| o.checked_mul(12))
            .and_then(|m| m.checked_add(base + accidental));

        midi.and_then(|m| u8::try_from(m).ok())
            .and_then(NoteName::from_midi)
            .ok_or_else(|| NoteParseError::OutOfRange(s.to_string()))
    }
}

impl Serialize for NoteName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NoteName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One entry of the table.
#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    pub name: NoteName,
    pub frequency: f32,
}

/// Read-only, ascending table of the 88 piano notes.
#[derive(Clone, Debug)]
pub struct NoteTable {
    notes: Vec<Note>,
}

impl NoteTable {
    pub fn piano() -> Self {
        let notes = (LOWEST_MIDI..=HIGHEST_MIDI)
            .filter_map(NoteName::from_midi)
            .map(|name| Note {
                name,
                frequency: name.frequency(),
            })
            .collect();
        Self { notes }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, name: NoteName) -> Option<&Note> {
        self.notes.iter().find(|n| n.name == name)
    }

    /// Closest entry to `freq` on the logarithmic (cents) scale, together
    /// with the deviation in cents. `None` for non-positive or non-finite input.
    pub fn nearest(&self, freq: f32) -> Option<(&Note, f32)> {
        if !freq.is_finite() || freq <= 0.0 || self.notes.is_empty() {
            return None;
        }

        // First entry at or above freq; the answer is it or its predecessor.
        let idx = self.notes.partition_point(|n| n.frequency < freq);
        let candidates = [idx.checked_sub(1), Some(idx)];

        candidates
            .into_iter()
            .flatten()
            .filter_map(|i| self.notes.get(i))
            .map(|note| (note, cents_between(freq, note.frequency)))
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
    }
}

impl Default for NoteTable {
    fn default() -> Self {
        Self::piano()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piano_table_spans_88_keys() {
        let table = NoteTable::piano();
        assert_eq!(table.len(), 88);
        assert_eq!(table.notes()[0].name.to_string(), "A0");
        assert_eq!(table.notes()[87].name.to_string(), "C8");
        assert!((table.notes()[0].frequency - 27.5).abs() < 1e-3);
        assert!((table.notes()[87].frequency - 4186.009).abs() < 0.01);
        assert!(table.notes().windows(2).all(|w| w[0].frequency < w[1].frequency));
    }

    #[test]
    fn a4_is_440() {
        let table = NoteTable::piano();
        let a4: NoteName = "A4".parse().unwrap();
        assert_eq!(a4.midi(), 69);
        assert_eq!(table.get(a4).unwrap().frequency, 440.0);
    }

    #[test]
    fn parses_sharps_and_flats() {
        let cs: NoteName = "C#5".parse().unwrap();
        let db: NoteName = "Db5".parse().unwrap();
        assert_eq!(cs, db);
        assert_eq!(cs.to_string(), "C#5");
        assert_eq!("a0".parse::<NoteName>().unwrap().midi(), 21);
    }

    #[test]
    fn rejects_bad_names() {
        assert_eq!("".parse::<NoteName>(), Err(NoteParseError::Empty));
        assert!(matches!("H4".parse::<NoteName>(), Err(NoteParseError::PitchClass(_))));
        assert!(matches!("C".parse::<NoteName>(), Err(NoteParseError::Octave(_))));
        assert!(matches!("G#0".parse::<NoteName>(), Err(NoteParseError::OutOfRange(_))));
        assert!(matches!("D8".parse::<NoteName>(), Err(NoteParseError::OutOfRange(_))));
        assert!(matches!("C2147483647".parse::<NoteName>(), Err(NoteParseError::OutOfRange(_))));
        assert!(matches!("B#2147483646".parse::<NoteName>(), Err(NoteParseError::OutOfRange(_))));
        assert!(matches!("Cb-2147483648".parse::<NoteName>(), Err(NoteParseError::OutOfRange(_))));
    }

    #[test]
    fn nearest_uses_cents() {
        let table = NoteTable::piano();
        let (note, cents) = table.nearest(445.0).unwrap();
        assert_eq!(note.name.to_string(), "A4");
        assert!((cents - 19.56).abs() < 0.1);

        // 453 Hz is closer to A4 in Hz but closer to A#4 in cents
        let (note, _) = table.nearest(453.0).unwrap();
        assert_eq!(note.name.to_string(), "A#4");
    }

    #[test]
    fn nearest_clamps_outside_range() {
        let table = NoteTable::piano();
        assert_eq!(table.nearest(10.0).unwrap().0.name.to_string(), "A0");
        assert_eq!(table.nearest(9_000.0).unwrap().0.name.to_string(), "C8");
        assert!(table.nearest(0.0).is_none());
        assert!(table.nearest(f32::NAN).is_none());
    }

    #[test]
    fn hz_tolerance_converts_around_a4() {
        assert!((hz_tolerance_to_cents(10.0) - 38.9).abs() < 0.1);
        assert_eq!(hz_tolerance_to_cents(0.0), 0.0);
    }
}
