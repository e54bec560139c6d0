//! Scan-to-sound application entry point.
//!
//! Orchestrates the complete flow:
//! camera → decoder → frame aggregator → scheduler → mixer + console feedback

use crate::assets::cache::AssetCache;
use crate::assets::fetch::fetcher_for_base;
use crate::capture::controller::CaptureController;
use crate::capture::device::{DeviceEnumerator, Facing, V4l2Enumerator};
use crate::capture::engine::ProcessEngine;
use crate::config::Config;
use crate::console::CommandHandler;
use crate::error::{ChimeError, Result};
use crate::feedback::ConsoleFeedback;
use crate::mapping::MappingStore;
use crate::pipeline::orchestrator::Pipeline;
use crate::playback::output::{MixerPlayer, list_output_devices};
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

/// Load the mapping, logging loudly when it is unusable.
async fn load_mapping(source: &str) -> Result<Arc<MappingStore>> {
    match MappingStore::load(source).await {
        Ok(mapping) => {
            tracing::info!(figures = mapping.len(), source, "mapping loaded");
            Ok(Arc::new(mapping))
        }
        Err(e) => {
            tracing::error!("{}; scanning will not start", e);
            Err(e.into())
        }
    }
}

/// Run the scanner until the operator quits or stdin closes.
///
/// A mapping that fails to load aborts before any device is touched.
pub async fn run(config: Config, auto_start: bool, quiet: bool) -> Result<()> {
    let mapping = load_mapping(&config.mapping.source).await?;

    let cache = AssetCache::new(fetcher_for_base(&config.assets.base));
    if config.assets.preload {
        let refs = mapping.sound_refs();
        let ready = cache.preload(&refs).await;
        tracing::info!(ready, total = refs.len(), "assets preloaded");
    }

    let player = Arc::new(MixerPlayer::open(
        config.audio.device.as_deref(),
        config.audio.sample_rate,
    )?);
    let color = config.feedback.color && std::io::stdout().is_terminal();
    let feedback = Arc::new(ConsoleFeedback::new(
        Duration::from_millis(config.feedback.ttl_ms),
        color,
    ));

    let pipeline = Pipeline::new(config.pipeline.orchestrator_config()).start(
        mapping,
        cache,
        player,
        feedback,
    );

    let controller = Arc::new(CaptureController::new(
        Arc::new(V4l2Enumerator::new(&config.capture.video_class_dir)),
        Arc::new(ProcessEngine::new(config.capture.command.clone())),
        config.capture.scan_config(),
        pipeline.decode_sender(),
        config.capture.facing,
    ));
    let handler = CommandHandler::new(
        Arc::clone(&controller),
        pipeline.debounce(),
        config.capture.facing,
    );

    if auto_start {
        // Best effort: a failed start leaves the console up for a manual retry
        match controller.start(config.capture.facing).await {
            Ok(constraint) => tracing::info!(%constraint, "scanning"),
            Err(e) => tracing::warn!("auto-start failed: {}", e),
        }
    } else if !quiet {
        eprintln!("Ready. Type 'start' to begin scanning ('help' for commands).");
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    tokio::select! {
        result = handler.run(stdin, stdout) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    controller.stop().await;
    drop(handler);
    drop(controller);
    pipeline.stop().await;
    Ok(())
}

/// Print capture devices with their detected facing, then audio outputs.
pub async fn list_devices(config: &Config) -> Result<()> {
    let enumerator = V4l2Enumerator::new(&config.capture.video_class_dir);
    let cameras = enumerator.enumerate().await?;

    if cameras.is_empty() {
        println!("No capture devices found");
    } else {
        println!("Capture devices:");
        for device in &cameras {
            let facing = Facing::from_label(&device.label)
                .map(|f| f.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!("  {}  {}  (facing: {})", device.id, device.label, facing);
        }
    }

    match list_output_devices() {
        Ok(outputs) if outputs.is_empty() => println!("No audio output devices found"),
        Ok(outputs) => {
            println!("Audio outputs:");
            for (idx, name) in outputs.iter().enumerate() {
                println!("  [{}] {}", idx, name);
            }
        }
        Err(e) => eprintln!("Audio outputs unavailable: {}", e),
    }
    Ok(())
}

/// Validate a mapping document and load every sound it references.
///
/// Fails when the mapping is unusable or any asset cannot be loaded.
pub async fn check_mapping(config: &Config, source: &str, quiet: bool) -> Result<()> {
    let mapping = load_mapping(source).await?;
    let cache = AssetCache::new(fetcher_for_base(&config.assets.base));

    let refs = mapping.sound_refs();
    let mut failures = 0;
    for sound in &refs {
        match cache.ensure_loaded(sound).await {
            Ok(buffer) => {
                if !quiet {
                    println!(
                        "ok    {} ({} ms, {} Hz, {} ch)",
                        sound,
                        buffer.duration_ms(),
                        buffer.sample_rate,
                        buffer.channels
                    );
                }
            }
            Err(e) => {
                failures += 1;
                println!("FAIL  {}", e);
            }
        }
    }

    if !quiet {
        println!(
            "{} figures, {} sounds, {} failed",
            mapping.len(),
            refs.len(),
            failures
        );
    }
    if failures > 0 {
        return Err(ChimeError::Other(format!(
            "{} of {} sounds failed to load",
            failures,
            refs.len()
        )));
    }
    Ok(())
}
