//! The polling loop: capture, analyse, publish, once per cycle.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::audio::decode::DecodedAudio;
use crate::audio::{Frame, FrameAnalysis};
use crate::event::{epoch_seconds, DetectionEvent};
use crate::pipeline::{Pipeline, Tick};
use crate::sink::{EventSink, SinkError};
use crate::source::{CaptureError, FrameSource};

/// Consecutive transient failures before the loop starts backing off.
const TRANSIENT_BURST: u32 = 5;

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Pause between cycles
    pub interval: Duration,
    /// First backoff step after a capture failure; doubles up to `max_retry_delay`
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Stop after this many cycles
    pub max_cycles: Option<u64>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            max_cycles: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub cycles: u64,
    pub frames: u64,
    pub skipped: u64,
    pub published: u64,
    pub dropped: u64,
}

/// Cycle times. Live capture stamps payloads with the wall clock and times
/// melody windows from a monotonic start; replay uses media time (origin +
/// audio consumed so far) for both.
#[derive(Clone, Copy, Debug)]
pub enum Clock {
    Wall { started: Instant },
    Media { origin: f64, elapsed: f64 },
}

impl Clock {
    pub fn for_source(source: &dyn FrameSource) -> Self {
        if source.is_live() {
            Clock::Wall {
                started: Instant::now(),
            }
        } else {
            Clock::Media {
                origin: epoch_seconds(),
                elapsed: 0.0,
            }
        }
    }

    /// Time of `frame`; media time advances by its duration.
    pub fn stamp(&mut self, frame: &Frame) -> Tick {
        match self {
            Clock::Wall { started } => Tick {
                timestamp: epoch_seconds(),
                elapsed: started.elapsed().as_secs_f64(),
            },
            Clock::Media { origin, elapsed } => {
                let tick = Tick::at(*origin + *elapsed);
                *elapsed += frame.duration() as f64;
                tick
            }
        }
    }
}

pub fn level_bar(level: f32) -> String {
    let filled = ((level.clamp(0.0, 1.0) * 50.0) as usize).min(50);
    format!("|{:<50}| {:.3}", "#".repeat(filled), level)
}

fn publish_all(sink: &mut dyn EventSink, events: &[DetectionEvent], stats: &mut RunStats) {
    for event in events {
        match sink.publish(event) {
            Ok(()) => stats.published += 1,
            Err(SinkError::QueueFull) => {
                stats.dropped += 1;
                log::warn!("Event queue full, dropped {} event", event.topic_suffix());
            }
            Err(err) => {
                stats.dropped += 1;
                log::error!("Failed to publish {} event: {}", event.topic_suffix(), err);
            }
        }
    }
}

/// Run until the source ends or `max_cycles` is reached. Capture problems
/// never end the loop: transient ones skip a cycle, lost devices are
/// reopened with exponential backoff.
pub fn run(
    pipeline: &mut Pipeline,
    source: &mut dyn FrameSource,
    sink: &mut dyn EventSink,
    settings: &LoopSettings,
) -> RunStats {
    let mut stats = RunStats::default();
    let mut clock = Clock::for_source(source);
    let mut delay = settings.retry_delay;
    let mut transient_streak = 0u32;

    loop {
        if settings.max_cycles.is_some_and(|max| stats.cycles >= max) {
            break;
        }
        stats.cycles += 1;

        match source.read_frame() {
            Ok(frame) => {
                transient_streak = 0;
                delay = settings.retry_delay;
                stats.frames += 1;

                let tick = clock.stamp(&frame);
                let analysis = pipeline.analyze(&frame);
                log::debug!("[LEVEL] {}", level_bar(analysis.level));
                let events = pipeline.advance(&analysis, tick);
                publish_all(sink, &events, &mut stats);
            }
            Err(CaptureError::EndOfStream) => {
                log::info!("Audio source ended");
                break;
            }
            Err(err) if err.is_transient() => {
                stats.skipped += 1;
                transient_streak += 1;
                log::warn!("Skipping cycle: {}", err);
                if transient_streak >= TRANSIENT_BURST {
                    log::warn!(
                        "{} consecutive capture failures, waiting {:?}",
                        transient_streak, delay
                    );
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(settings.max_retry_delay);
                }
                continue;
            }
            Err(err) => {
                stats.skipped += 1;
                log::error!("Capture lost: {}; retrying in {:?}", err, delay);
                std::thread::sleep(delay);
                delay = (delay * 2).min(settings.max_retry_delay);
                match source.reopen() {
                    Ok(()) => log::info!("Capture reopened"),
                    Err(err) => log::error!("Reopen failed: {}", err),
                }
                continue;
            }
        }

        if !settings.interval.is_zero() {
            std::thread::sleep(settings.interval);
        }
    }

    stats
}

/// Analyse a whole recording: levels and notes for all frames in parallel,
/// then melody matching in order. Timestamps start at `origin`.
pub fn scan(
    pipeline: &mut Pipeline,
    audio: &DecodedAudio,
    frame_len: usize,
    origin: f64,
    sink: &mut dyn EventSink,
) -> RunStats {
    let frame_len = frame_len.max(1);
    let total = audio.samples.len() / frame_len;
    let frame_secs = frame_len as f64 / audio.sample_rate.max(1) as f64;

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({eta} remaining)")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let analyzer: &Pipeline = pipeline;
    let analyses: Vec<FrameAnalysis> = audio
        .samples
        .par_chunks_exact(frame_len)
        .map(|chunk| {
            let analysis = analyzer.analyze(&Frame::new(chunk.to_vec(), audio.sample_rate));
            pb.inc(1);
            analysis
        })
        .collect();
    pb.finish_and_clear();

    let mut stats = RunStats::default();
    for (i, analysis) in analyses.iter().enumerate() {
        stats.cycles += 1;
        stats.frames += 1;
        let events = pipeline.advance(analysis, origin + i as f64 * frame_secs);
        publish_all(sink, &events, &mut stats);
    }

    log::info!(
        "Scanned {} frames ({:.1}s), published {} events",
        stats.frames,
        audio.duration(),
        stats.published
    );
    stats
}
