use clap::Parser;
use std::path::PathBuf;

use chimewatch::config::Config;
use chimewatch::MelodyStep;

#[derive(Parser, Debug)]
#[command(name = "chimewatch", about = "Listen for appliance chimes and publish level, note and melody events")]
pub struct Cli {
    /// Config file (TOML, or add-on options JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Replay a recording instead of capturing from a device
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// With --input: analyse the whole file at once and exit
    #[arg(long, requires = "input")]
    pub scan: bool,

    /// With --input: replay at capture speed
    #[arg(long, requires = "input")]
    pub realtime: bool,

    /// Capture device (substring of the device name)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Multiplier applied to the RMS level
    #[arg(long)]
    pub gain: Option<f32>,

    /// Minimum level that triggers analysis and events
    #[arg(long)]
    pub rms_threshold: Option<f32>,

    /// Note tolerance in cents
    #[arg(long)]
    pub sensitivity: Option<f32>,

    /// Report levels only
    #[arg(long)]
    pub no_notes: bool,

    /// Target melody, comma-separated notes or Hz bands (e.g. E6,C6,1400-2700)
    #[arg(long, value_delimiter = ',')]
    pub melody: Vec<MelodyStep>,

    /// Enable the loudness-pattern fallback detector
    #[arg(long)]
    pub pattern: bool,

    /// Webhook URL for events (stdout when unset)
    #[arg(long)]
    pub sink_url: Option<String>,

    /// Base topic for events
    #[arg(long)]
    pub topic: Option<String>,

    /// Stop after this many capture cycles
    #[arg(long)]
    pub cycles: Option<u64>,
}

impl Cli {
    /// Command-line values win over file and environment.
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref device) = self.device {
            config.audio.device = device.clone();
        }
        if let Some(gain) = self.gain {
            config.audio.gain = gain;
        }
        if let Some(threshold) = self.rms_threshold {
            config.audio.rms_threshold = threshold;
        }
        if let Some(cents) = self.sensitivity {
            config.detection.note_sensitivity = cents;
            config.detection.sensitivity_unit = chimewatch::config::SensitivityUnit::Cents;
        }
        if self.no_notes {
            config.detection.enabled = false;
        }
        if !self.melody.is_empty() {
            config.melody.enabled = true;
            config.melody.sequence = self.melody.clone();
        }
        if self.pattern {
            config.pattern.enabled = true;
        }
        if let Some(ref url) = self.sink_url {
            config.sink.url = Some(url.clone());
        }
        if let Some(ref topic) = self.topic {
            config.sink.topic = topic.clone();
        }
    }
}
