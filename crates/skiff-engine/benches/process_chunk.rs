//! Per-block pipeline benchmark
//!
//! Measures a full `process_chunk` against the block deadline
//! (64 frames @ 48 kHz = ~1.33 ms).

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use skiff_core::{BLOCK_SIZE, ControlBuffer, EngineConfig, SampleBuffer, Time};
use skiff_engine::AudioEngine;
use skiff_plugins::PluginType;

fn engine_with_tracks(tracks: usize, plugins_per_track: usize) -> AudioEngine {
    let engine = AudioEngine::new(EngineConfig::default());
    for t in 0..tracks {
        // Mono tracks: the equalizer chains are mono-in/mono-out
        let track_name = format!("track_{t}");
        engine.create_track(&track_name, 1).unwrap();
        engine.connect_audio_input_channel(0, 0, &track_name).unwrap();
        engine.connect_audio_output_channel(0, 0, &track_name).unwrap();
        for p in 0..plugins_per_track {
            engine
                .add_plugin_to_track(
                    &track_name,
                    "skiff.equalizer",
                    &format!("eq_{t}_{p}"),
                    "",
                    PluginType::Internal,
                )
                .unwrap();
        }
    }
    engine
}

fn bench_process_chunk(c: &mut Criterion) {
    let mut input = SampleBuffer::new(2);
    for (n, sample) in input.channel_mut(0).iter_mut().enumerate() {
        *sample = (n as f32 * 0.13).sin() * 0.5;
    }
    input.copy_channel(0, 1, &input.clone());

    for (tracks, plugins) in [(1, 1), (4, 4), (8, 8)] {
        let engine = engine_with_tracks(tracks, plugins);
        let mut output = SampleBuffer::new(2);
        let in_controls = ControlBuffer::default();
        let mut out_controls = ControlBuffer::default();
        let mut block = 0i64;

        c.bench_function(&format!("process_chunk/{tracks}x{plugins}"), |b| {
            b.iter(|| {
                engine.process_chunk(
                    black_box(&input),
                    &mut output,
                    &in_controls,
                    &mut out_controls,
                    Time::ZERO,
                    block * BLOCK_SIZE as i64,
                );
                block += 1;
                // Keep the outbound queue from saturating
                while engine.main_out_queue().pop().is_some() {}
            });
        });
    }
}

criterion_group!(benches, bench_process_chunk);
criterion_main!(benches);
