//! Benchmark tests for kino-queue operations
//!
//! Run with: cargo bench -p kino-queue

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use url::Url;

use kino_queue::accumulate::LatestValues;
use kino_queue::now_playing::{metadata_info, playback_info};
use kino_queue::{
    Asset, ItemQueue, ItemTransition, NativeItem, NowPlayingMetadata, PlaybackProperties,
    PlayerConfig, PlayerProperties, ResourceContext, StreamType, TimeRange,
};

// ============================================================================
// Helpers
// ============================================================================

fn create_test_assets(count: usize) -> Vec<Asset<NowPlayingMetadata>> {
    (0..count)
        .map(|i| {
            Asset::simple(
                Url::parse(&format!("https://cdn.example.com/episode{}/master.m3u8", i)).unwrap(),
                NowPlayingMetadata::titled(format!("Episode {}", i)),
            )
        })
        .collect()
}

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_current_index(c: &mut Criterion) {
    let runtime = create_runtime();
    let _guard = runtime.enter();
    let context = ResourceContext::new(&PlayerConfig::default());

    let mut group = c.benchmark_group("Queue Current Index");

    for &count in &[10, 100, 1000] {
        let assets = create_test_assets(count);
        // Worst case: the current item is the last one
        let item: NativeItem = assets[count - 1].materialize(&context);
        let queue = ItemQueue::new(assets, ItemTransition::Advance(Some(item)));

        group.bench_with_input(BenchmarkId::new("last_item", count), &queue, |b, queue| {
            b.iter(|| black_box(queue.current_index()))
        });
    }

    group.finish();
}

fn bench_queue_updates(c: &mut Criterion) {
    let runtime = create_runtime();
    let _guard = runtime.enter();
    let context = ResourceContext::new(&PlayerConfig::default());

    let assets = create_test_assets(100);
    let item = assets[50].materialize(&context);
    let queue = ItemQueue::new(assets.clone(), ItemTransition::Advance(Some(item)));
    let mut edited = assets;
    edited.remove(50);

    let mut group = c.benchmark_group("Queue Updates");

    group.bench_function("with_elements", |b| {
        b.iter(|| black_box(queue.with_elements(edited.clone())))
    });

    group.bench_function("recovery_index", |b| {
        let updated = queue.with_elements(edited.clone());
        b.iter(|| black_box(updated.recovery_index(&queue)))
    });

    group.finish();
}

// ============================================================================
// Accumulator Benchmarks
// ============================================================================

fn bench_latest_values(c: &mut Criterion) {
    let mut group = c.benchmark_group("Latest Values");

    for &count in &[10, 100] {
        let keys: Vec<usize> = (0..count).collect();
        let mut values = LatestValues::new();
        values.restructure(keys.clone(), keys.iter().map(|&key| (key, key)));

        group.bench_with_input(BenchmarkId::new("record", count), &count, |b, &count| {
            b.iter(|| black_box(values.record(&(count / 2), count)))
        });

        let mut shuffled = keys.clone();
        shuffled.reverse();
        group.bench_with_input(
            BenchmarkId::new("restructure_reversed", count),
            &shuffled,
            |b, shuffled| {
                b.iter(|| {
                    let mut values = values.clone();
                    values.restructure(shuffled.clone(), std::iter::empty());
                    black_box(values.snapshot())
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Now Playing Benchmarks
// ============================================================================

fn bench_now_playing(c: &mut Criterion) {
    let metadata = NowPlayingMetadata::titled("Episode 1")
        .with_subtitle("Season 2")
        .with_description("A long description of the episode");
    let properties = PlayerProperties {
        playback: PlaybackProperties {
            rate: 1.0,
            ..Default::default()
        },
        stream_type: StreamType::OnDemand,
        is_buffering: false,
        seek_time: None,
        seekable_time_range: TimeRange::new(Duration::ZERO, Duration::from_secs(3600)),
    };

    let mut group = c.benchmark_group("Now Playing");

    group.bench_function("merge", |b| {
        b.iter(|| {
            let info = metadata_info(black_box(&metadata));
            black_box(info.merging(&playback_info(&properties, Some(Duration::from_secs(42)))))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_current_index,
    bench_queue_updates,
    bench_latest_values,
    bench_now_playing,
);
criterion_main!(benches);
