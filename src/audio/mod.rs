pub mod decode;
pub mod frame;
pub mod level;
pub mod notes;
pub mod spectrum;

pub use frame::{Frame, FrameAnalysis};
pub use level::{LevelHistory, LevelMeter, PatternDetector, PatternSettings};
pub use notes::{NoteName, NoteTable};
pub use spectrum::{DetectorSettings, NoteMatch, PeakPolicy, SpectralNoteDetector};
