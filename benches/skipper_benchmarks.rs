//! # Skipper Performance Benchmarks
//!
//! Measures the paths a skip decision takes when no network is involved.
//!
//! - **Cache**: warm lookups, partitioning a large queue, staleness checks
//! - **Interceptor**: classifying outbound requests and reading write bodies
//! - **MPD parsing**: `mpc status` and `mpc playlist` output
//!
//! ```bash
//! cargo bench
//! cargo bench cache
//! ```

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use reqwest::Method;
use skipper::config::{ConfigSource, SharedSettings};
use skipper::interceptor::{body_marks_dislike, classify, rating_write_body};
use skipper::mpd_client::{parse_playlist, parse_status};
use skipper::rating::{CacheEntry, Rating, RatingState};
use skipper::rating_cache::{is_fresh, RatingCache};
use skipper::rating_client::{RatingSource, ServiceError};
use skipper::transport::OutboundRequest;
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Serves every id as disliked without any I/O
struct InstantSource;

impl RatingSource for InstantSource {
    fn fetch_batch(&self, track_ids: &[String]) -> Result<Vec<Rating>, ServiceError> {
        Ok(track_ids.iter().map(|id| Rating::new(id.as_str(), RatingState::Disliked)).collect())
    }
}

fn track_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}", 1_000_000_000 + i)).collect()
}

fn warmed_cache(ids: &[String]) -> RatingCache {
    let cache = RatingCache::new(Arc::new(InstantSource), Arc::new(SharedSettings::default()));
    cache.get(ids, false).expect("warm-up");
    cache
}

fn benchmark_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    let ids = track_ids(1);
    let cache = warmed_cache(&ids);
    group.bench_function("single_hit", |b| {
        b.iter(|| cache.get(black_box(&ids), false))
    });

    for size in [10, 100, 1000].iter() {
        let ids = track_ids(*size);
        let cache = warmed_cache(&ids);
        group.bench_with_input(BenchmarkId::new("queue_hit", size), &ids, |b, ids| {
            b.iter(|| cache.get(black_box(ids), false))
        });
    }

    let ids = track_ids(100);
    group.bench_function("cold_queue_100", |b| {
        b.iter_batched(
            || RatingCache::new(Arc::new(InstantSource), Arc::new(SharedSettings::default())),
            |cache| cache.get(black_box(&ids), false),
            BatchSize::SmallInput,
        )
    });

    let settings = SharedSettings::default().settings();
    let entry = CacheEntry {
        rating: Rating::new("1", RatingState::Liked),
        fetched_at: SystemTime::now(),
    };
    let now = SystemTime::now() + Duration::from_secs(30);
    group.bench_function("is_fresh", |b| {
        b.iter(|| is_fresh(black_box(&entry), black_box(&settings), black_box(now)))
    });

    group.finish();
}

fn benchmark_interceptor(c: &mut Criterion) {
    let mut group = c.benchmark_group("interceptor");

    let write = OutboundRequest::new(Method::PUT, "https://api.music.apple.com/v1/me/ratings/songs/1440818839")
        .body(rating_write_body(-1));
    let unrelated = OutboundRequest::new(Method::GET, "https://api.music.apple.com/v1/catalog/us/songs/1440818839");

    group.bench_function("classify_write", |b| b.iter(|| classify(black_box(&write))));
    group.bench_function("classify_unrelated", |b| b.iter(|| classify(black_box(&unrelated))));

    let body = rating_write_body(-1);
    group.bench_function("body_marks_dislike", |b| {
        b.iter(|| body_marks_dislike(black_box(Some(body.as_slice()))))
    });

    group.finish();
}

fn benchmark_mpd_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpd_parsing");

    let status = "artist/album/song.mp3\tArtist\tTitle\n\
                  [playing] #5/20   1:23/3:45 (37%)\n\
                  volume: 80%   repeat: on    random: off   single: off   consume: off\n";
    group.bench_function("status", |b| b.iter(|| parse_status(black_box(status))));

    let playlist: String = (0..500)
        .map(|i| format!("artist{i}/album/song{i}.flac\tArtist {i}\tSong {i}\n"))
        .collect();
    group.bench_function("playlist_500", |b| b.iter(|| parse_playlist(black_box(&playlist))));

    group.finish();
}

criterion_group!(
    benches,
    benchmark_cache,
    benchmark_interceptor,
    benchmark_mpd_parsing
);

criterion_main!(benches);
