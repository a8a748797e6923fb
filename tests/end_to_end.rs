use adaptive_audio_streamer::config::AdvancedStreamingConfig;
use adaptive_audio_streamer::network::ManualNetworkProbe;
use adaptive_audio_streamer::scheduler::ManualResourceProbe;
use adaptive_audio_streamer::streaming::{
    AdvancedStreamingOptimizer, ComponentProbes, ManualAdjustment,
};
use adaptive_audio_streamer::error::StreamError;
use adaptive_audio_streamer::Error;
use std::time::Duration;

fn sine(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin() * 0.5)
        .collect()
}

fn fast_config() -> AdvancedStreamingConfig {
    let mut config = AdvancedStreamingConfig::default();
    config.network.monitoring_interval_ms = 50;
    config.quality.control_interval_ms = 50;
    config.pipeline.num_worker_threads = 2;
    config.pipeline.resource_interval_ms = 50;
    config
}

fn start(config: &AdvancedStreamingConfig) -> AdvancedStreamingOptimizer {
    let optimizer = AdvancedStreamingOptimizer::new();
    optimizer
        .initialize_with_probes(
            config,
            ComponentProbes {
                network: Some(Box::new(ManualNetworkProbe::new(15.0))),
                resources: Some(Box::new(ManualResourceProbe::new(0.1, 0.2))),
            },
        )
        .expect("initialize");
    optimizer.start().expect("start");
    optimizer
}

#[test]
fn sine_buffer_streams_through_default_stack() {
    let optimizer = start(&fast_config());
    let input = sine(1024);

    let chunks = optimizer
        .process_stream_with_optimizations(&input, 1)
        .expect("process");

    assert!(!chunks.is_empty());
    let emitted: Vec<f32> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
    assert_eq!(emitted, input);
    assert_eq!(
        optimizer.get_optimization_stats()["streaming.pending_samples"],
        0.0
    );

    optimizer.update_performance_metrics();
    let metrics = optimizer.get_performance_metrics();
    assert_eq!(metrics.active_streams, 1);
    assert!(metrics.ultra_low_latency_active);

    optimizer.stop();
    assert!(!optimizer.is_running());
}

#[test]
fn every_sample_is_emitted_or_pending() {
    let optimizer = start(&fast_config());
    let input = sine(16000);

    let mut emitted = 0;
    for buffer in input.chunks(1000) {
        let chunks = optimizer
            .process_stream_with_optimizations(buffer, 1)
            .expect("process");
        emitted += chunks.iter().map(|c| c.len()).sum::<usize>();
    }

    let stats = optimizer.get_optimization_stats();
    let pending = stats["streaming.pending_samples"] as usize;
    assert_eq!(emitted + pending, input.len());
    let counters = optimizer.stream_counters(1).expect("stream counters");
    assert_eq!(counters.samples_emitted as usize, emitted);
}

#[test]
fn slow_processing_escalates_to_ultra_low_latency() {
    let mut config = fast_config();
    config.network.enabled = false;
    config.streaming.enable_ultra_low_latency = false;
    config.streaming.target_latency_ms = 1;
    let optimizer = start(&config);

    let input = sine(160_000);
    for _ in 0..20 {
        optimizer
            .process_stream_with_optimizations(&input, 1)
            .expect("process");
        if optimizer.is_ultra_low_latency_active() {
            break;
        }
    }
    assert!(optimizer.is_ultra_low_latency_active());
    assert_eq!(
        optimizer.get_optimization_stats()["ultra_low_latency_activations"],
        1.0
    );
}

#[test]
fn invalid_samples_are_rejected() {
    let optimizer = start(&fast_config());
    let mut input = sine(512);
    input[100] = f32::NAN;

    let err = optimizer
        .process_stream_with_optimizations(&input, 1)
        .unwrap_err();
    assert!(matches!(err, Error::Stream(_)));
    assert!(optimizer.process_stream_with_optimizations(&[], 1).is_err());
}

#[test]
fn lifecycle_errors() {
    let optimizer = AdvancedStreamingOptimizer::new();
    assert!(optimizer.start().is_err());
    assert!(optimizer
        .process_stream_with_optimizations(&sine(256), 0)
        .is_err());

    let mut config = fast_config();
    config.streaming.target_latency_ms = 0;
    assert!(matches!(
        optimizer.initialize(&config),
        Err(Error::Config(_))
    ));
    assert!(!optimizer.is_initialized());
}

#[test]
fn unacknowledged_chunks_are_retransmitted() {
    let mut config = fast_config();
    config.network.enabled = false;
    config.streaming.enable_ultra_low_latency = false;
    config.recovery.packet_timeout_ms = 20;
    let optimizer = start(&config);

    let sent = optimizer
        .process_stream_with_optimizations(&sine(3200), 2)
        .expect("process");
    assert!(!sent.is_empty());

    std::thread::sleep(Duration::from_millis(60));
    let retransmit = optimizer.get_retransmission_queue();
    assert_eq!(retransmit.len(), sent.len());

    for chunk in &retransmit {
        optimizer.acknowledge_packet(chunk.sequence_number);
    }
    let stats = optimizer.get_optimization_stats();
    assert_eq!(stats["recovery.total_recovered_chunks"], sent.len() as f64);
    assert!(optimizer.get_retransmission_queue().is_empty());
}

#[test]
fn out_of_order_delivery_is_reordered() {
    let mut config = fast_config();
    config.network.enabled = false;
    config.streaming.enable_ultra_low_latency = false;
    let optimizer = start(&config);

    let mut sent = optimizer
        .process_stream_with_optimizations(&sine(8000), 3)
        .expect("process");
    assert!(sent.len() > 2);
    let expected: Vec<u32> = sent.iter().map(|c| c.sequence_number).collect();

    sent.reverse();
    let mut received = Vec::new();
    for chunk in sent {
        received.extend(optimizer.process_incoming_chunk(chunk));
    }
    let order: Vec<u32> = received.iter().map(|c| c.sequence_number).collect();
    assert_eq!(order, expected);
}

#[test]
fn lost_chunk_does_not_stall_delivery() {
    let mut config = fast_config();
    config.network.enabled = false;
    config.streaming.enable_ultra_low_latency = false;
    config.recovery.reorder_timeout_ms = 20;
    let optimizer = start(&config);

    let sent = optimizer
        .process_stream_with_optimizations(&sine(16000), 4)
        .expect("process");
    assert_eq!(sent.len(), 10);
    let lost = sent[1].sequence_number;

    let mut delivered = Vec::new();
    for chunk in sent.into_iter().filter(|c| c.sequence_number != lost) {
        std::thread::sleep(Duration::from_millis(30));
        delivered.extend(
            optimizer
                .process_incoming_chunk(chunk)
                .into_iter()
                .map(|c| c.sequence_number),
        );
    }

    assert_eq!(delivered.len(), 9);
    assert!(!delivered.contains(&lost));
    assert!(delivered.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn abandoned_packet_is_skipped_by_the_receiver() {
    let mut config = fast_config();
    config.network.enabled = false;
    config.streaming.enable_ultra_low_latency = false;
    config.recovery.packet_timeout_ms = 20;
    config.recovery.max_retries = 1;
    config.recovery.reorder_timeout_ms = 60_000;
    let optimizer = start(&config);

    let sent = optimizer
        .process_stream_with_optimizations(&sine(16000), 5)
        .expect("process");
    let lost = sent[1].sequence_number;

    let mut delivered = 0;
    for chunk in sent.iter().filter(|c| c.sequence_number != lost) {
        optimizer.acknowledge_packet(chunk.sequence_number);
        delivered += optimizer.process_incoming_chunk(chunk.clone()).len();
    }
    assert_eq!(delivered, 1);

    // One retry, never delivered, then the sender gives up
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(optimizer.get_retransmission_queue().len(), 1);
    std::thread::sleep(Duration::from_millis(40));
    assert!(optimizer.get_retransmission_queue().is_empty());

    let next = optimizer
        .process_stream_with_optimizations(&sine(1600), 5)
        .expect("process");
    let released = optimizer.process_incoming_chunk(next[0].clone());
    assert_eq!(released.len(), 9);
    assert_eq!(released[0].sequence_number, lost + 1);
    assert_eq!(
        released.last().map(|c| c.sequence_number),
        Some(next[0].sequence_number)
    );
}

#[test]
fn manual_adjustments_by_name() {
    let mut config = fast_config();
    config.streaming.enable_ultra_low_latency = false;
    let optimizer = start(&config);

    optimizer
        .perform_named_adjustment("ultra_low_latency", 1.0)
        .expect("adjust");
    assert!(optimizer.is_ultra_low_latency_active());

    optimizer
        .perform_manual_adjustment(ManualAdjustment::UltraLowLatency, 0.0)
        .expect("adjust");
    assert!(!optimizer.is_ultra_low_latency_active());

    let err = optimizer.perform_named_adjustment("gain", 1.0).unwrap_err();
    assert!(matches!(err, Error::Stream(StreamError::UnknownAdjustment(_))));
}

#[test]
fn real_time_jobs_run_on_the_pipeline() {
    let optimizer = start(&fast_config());
    let (tx, rx) = crossbeam_channel::bounded(4);

    for i in 0..4 {
        let tx = tx.clone();
        optimizer
            .submit_real_time_job(move || {
                let _ = tx.send(i);
                Ok(())
            })
            .expect("submit");
    }

    let mut done: Vec<i32> = (0..4)
        .filter_map(|_| rx.recv_timeout(Duration::from_secs(5)).ok())
        .collect();
    done.sort_unstable();
    assert_eq!(done, vec![0, 1, 2, 3]);
}

#[test]
fn config_round_trips_through_toml() {
    let dir = std::env::temp_dir().join(format!("aas-e2e-{}", std::process::id()));
    let path = dir.join("config.toml");

    let mut config = fast_config();
    config.streaming.target_latency_ms = 120;
    config.save(&path).expect("save");

    let loaded = AdvancedStreamingConfig::load(&path).expect("load");
    assert_eq!(loaded, config);
    let _ = std::fs::remove_dir_all(dir);
}
