//! Streaming Demo Application
//!
//! Feeds a synthetic tone through the full optimizer stack, loops the
//! chunks back as if received, and prints stats as JSON on exit.

use anyhow::Result;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adaptive_audio_streamer::{
    config::AdvancedStreamingConfig,
    constants::DEFAULT_SAMPLE_RATE,
    streaming::{AdvancedStreamingOptimizer, StreamingAudioBuffer, StreamingPerformanceMetrics},
};

/// 20 ms of audio per tick
const TICK_MS: u64 = 20;

struct ToneSource {
    frequency: f32,
    phase: f32,
}

impl ToneSource {
    fn new(frequency: f32) -> Self {
        Self {
            frequency,
            phase: 0.0,
        }
    }

    fn next_buffer(&mut self, samples: usize) -> Vec<f32> {
        let step = 2.0 * std::f32::consts::PI * self.frequency / DEFAULT_SAMPLE_RATE as f32;
        (0..samples)
            .map(|_| {
                let s = self.phase.sin() * 0.5;
                self.phase = (self.phase + step) % (2.0 * std::f32::consts::PI);
                s
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting adaptive streaming demo");

    let config = match std::env::args().nth(1) {
        Some(path) => AdvancedStreamingConfig::load(path)?,
        None => AdvancedStreamingConfig::load_or_default()?,
    };
    let duration_secs: u64 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let optimizer = AdvancedStreamingOptimizer::new();
    optimizer.initialize(&config)?;
    optimizer.register_metrics_callback(|metrics: &StreamingPerformanceMetrics| {
        tracing::debug!(
            "Metrics: e2e {:.1}ms, loss {:.2}%, cpu {:.0}%, quality {}",
            metrics.end_to_end_latency_ms,
            metrics.packet_loss_rate,
            metrics.cpu_usage * 100.0,
            metrics.current_quality
        );
    });
    optimizer.start()?;

    let mut source = ToneSource::new(440.0);
    let samples_per_tick = DEFAULT_SAMPLE_RATE as usize * TICK_MS as usize / 1000;
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));
    let deadline = tokio::time::sleep(Duration::from_secs(duration_secs));
    tokio::pin!(deadline);

    // Stands in for the transport between sender and receiver
    let link = StreamingAudioBuffer::new(64);
    let mut received = 0usize;
    let mut ticks = 0u64;

    tracing::info!("Streaming for {}s - press Ctrl+C to stop", duration_secs);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let buffer = source.next_buffer(samples_per_tick);
                let chunks = match optimizer.process_stream_with_optimizations(&buffer, 0) {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        tracing::warn!("Processing failed: {}", e);
                        continue;
                    }
                };

                for chunk in chunks {
                    link.add_chunk(chunk);
                }

                // Loopback: every chunk arrives and is acknowledged
                for chunk in link.get_chunks(link.len()) {
                    let packet_id = chunk.sequence_number;
                    received += optimizer.process_incoming_chunk(chunk).len();
                    optimizer.acknowledge_packet(packet_id);
                }
                for chunk in optimizer.get_retransmission_queue() {
                    link.add_chunk(chunk);
                }

                ticks += 1;
                if ticks % 50 == 0 {
                    let rms = (buffer.iter().map(|s| s * s).sum::<f32>() / buffer.len() as f32).sqrt();
                    if let Err(e) = optimizer.submit_batch_job(move || {
                        tracing::debug!("Level analysis: rms {:.3}", rms);
                        Ok(())
                    }) {
                        tracing::warn!("Failed to submit analysis job: {}", e);
                    }

                    let metrics = optimizer.get_performance_metrics();
                    tracing::info!(
                        "Stats: {} ticks, {} chunks delivered, e2e {:.1}ms, healthy {}",
                        ticks,
                        received,
                        metrics.end_to_end_latency_ms,
                        optimizer.is_healthy()
                    );
                }
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    optimizer.stop();
    println!("{}", serde_json::to_string_pretty(&optimizer.get_optimization_stats())?);
    Ok(())
}
