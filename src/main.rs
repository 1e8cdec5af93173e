mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use chimewatch::audio::decode::decode_file;
use chimewatch::config::{self, Config, ADDON_OPTIONS_PATH};
use chimewatch::event::epoch_seconds;
use chimewatch::monitor;
use chimewatch::pipeline::Pipeline;
use chimewatch::sink::{EventSink, LogSink, QueuedSink, WebhookSink};
use chimewatch::source::{FileSource, FrameSource};

use cli::Cli;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Explicit --config path, or auto-detect local / user / add-on config
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from("chimewatch.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(config_dir) = dirs::config_dir() {
            let user = config_dir.join("chimewatch").join("config.toml");
            if user.exists() {
                return Some(user);
            }
        }
        let addon = PathBuf::from(ADDON_OPTIONS_PATH);
        addon.exists().then_some(addon)
    });

    let mut config = match config_path {
        Some(ref path) => match config::load_config(path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            Err(err) if cli.config.is_some() => return Err(err),
            Err(err) => {
                log::warn!("Ignoring config {}: {:#}", path.display(), err);
                Config::default()
            }
        },
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    log::info!("chimewatch - appliance chime listener");
    log::info!(
        "Gain {:.2}, RMS threshold {:.3}, notes {}, tolerance {:.1} cents",
        config.audio.gain,
        config.audio.rms_threshold,
        if config.detection.enabled { "on" } else { "off" },
        config.tolerance_cents()
    );
    if config.melody.enabled {
        let steps: Vec<String> = config.melody.sequence.iter().map(|s| s.to_string()).collect();
        log::info!(
            "Target melody: {} (step window {:.1}s, cooldown {:.1}s)",
            steps.join(" "),
            config.melody.step_window_secs,
            config.melody.cooldown_secs
        );
    }

    let mut pipeline = Pipeline::new(config.pipeline_settings());

    let inner: Box<dyn EventSink> = match config.webhook_settings() {
        Some(hook) => {
            log::info!("Publishing events to {} (topic {})", hook.url, hook.topic);
            Box::new(WebhookSink::new(hook)?)
        }
        None => Box::new(LogSink::stdout(config.sink.topic.clone())),
    };
    let mut sink = QueuedSink::spawn(inner, config.sink.queue_capacity);

    if let Some(ref input) = cli.input {
        if !input.exists() {
            anyhow::bail!("Input file not found: {}", input.display());
        }

        if cli.scan {
            let audio = decode_file(input)?;
            monitor::scan(
                &mut pipeline,
                &audio,
                config.audio.frame_size,
                epoch_seconds(),
                &mut sink,
            );
        } else {
            let mut source = FileSource::open(input, config.audio.frame_size)?
                .realtime(cli.realtime);
            run(&mut pipeline, &mut source, &mut sink, &config, &cli);
        }
    } else {
        run_device(&mut pipeline, &mut sink, &config, &cli)?;
    }

    sink.shutdown();
    Ok(())
}

fn run(
    pipeline: &mut Pipeline,
    source: &mut dyn FrameSource,
    sink: &mut dyn EventSink,
    config: &Config,
    cli: &Cli,
) {
    let mut settings = config.loop_settings();
    settings.max_cycles = cli.cycles;
    if !source.is_live() {
        settings.interval = std::time::Duration::ZERO;
    }
    let stats = monitor::run(pipeline, source, sink, &settings);
    log::info!(
        "Stopped after {} cycles: {} frames, {} skipped, {} events published, {} dropped",
        stats.cycles, stats.frames, stats.skipped, stats.published, stats.dropped
    );
}

#[cfg(feature = "capture")]
fn run_device(
    pipeline: &mut Pipeline,
    sink: &mut dyn EventSink,
    config: &Config,
    cli: &Cli,
) -> Result<()> {
    use chimewatch::source::DeviceSource;
    use std::time::Duration;

    let selector = Some(config.audio.device.as_str()).filter(|s| !s.is_empty() && *s != "default");
    log::info!("Active audio device: {}", selector.unwrap_or("default"));
    let mut source = DeviceSource::open(
        selector,
        config.audio.sample_rate,
        config.audio.frame_size,
        Duration::from_millis(config.audio.read_timeout_ms),
    )
    .context("Failed to open capture device")?;

    if source.sample_rate() != config.audio.sample_rate {
        log::warn!(
            "Device runs at {} Hz instead of the configured {} Hz",
            source.sample_rate(),
            config.audio.sample_rate
        );
    }

    run(pipeline, &mut source, sink, config, cli);
    Ok(())
}

#[cfg(not(feature = "capture"))]
fn run_device(
    _pipeline: &mut Pipeline,
    _sink: &mut dyn EventSink,
    _config: &Config,
    _cli: &Cli,
) -> Result<()> {
    anyhow::bail!(
        "Live capture requires the 'capture' feature. \
         Rebuild with: cargo build --features capture, or pass --input FILE"
    )
}
