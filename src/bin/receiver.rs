//! Audio Receiver Application
//!
//! Receives the host's audio stream and plays it on a local output device.
//!
//! Usage: `receiver [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_transport_core::{
    audio::{list_devices, AudioStream, CpalRenderer, LoggingListener, StreamState},
    codec::OpusDecoder,
    config::AppConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting audio receiver");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;

    // List available output devices
    println!("\n=== Available Output Devices ===");
    for device in list_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let audio = &config.audio;
    let decoder = OpusDecoder::new(audio.sample_rate, audio.channel_count, audio.samples_per_frame)
        .context("creating Opus decoder")?;
    let renderer = Arc::new(CpalRenderer::new(
        config.playback.device.clone(),
        config.playback.direct_submit,
    ));

    let stream = Arc::new(AudioStream::new(
        &config,
        Box::new(decoder),
        renderer.clone(),
        Arc::new(LoggingListener),
    )?);

    if !stream.start()? {
        anyhow::bail!("playback device rejected the stream");
    }

    tracing::info!(
        "Receiving audio from {}:{} on {}",
        config.stream.host,
        config.stream.audio_port,
        stream
            .local_addr()
            .map_or_else(|| "unknown".to_string(), |addr| addr.to_string())
    );

    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    stats_interval.tick().await;

    loop {
        tokio::select! {
            _ = stats_interval.tick() => {
                if stream.state() != StreamState::Running {
                    tracing::warn!("Audio stream stopped");
                    break;
                }

                let stats = stream.stats();
                tracing::info!(
                    "Audio: {} received, {} played, {} concealed ({:.1}% loss), {} dropped, {} reordered, {} buffered samples",
                    stats.datagrams_received,
                    stats.units_played,
                    stats.losses_concealed,
                    stats.loss_rate() * 100.0,
                    stats.units_dropped,
                    stats.reorder.queued,
                    renderer.buffered_samples(),
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    // Abort joins the stage threads
    let handle = stream.clone();
    tokio::task::spawn_blocking(move || handle.abort()).await?;

    tracing::info!("Receiver stopped");
    Ok(())
}
