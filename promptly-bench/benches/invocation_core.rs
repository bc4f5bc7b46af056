//! promptly benchmark suite.
//!
//! Hot paths that run on every tool call, independent of provider latency:
//!   cache_key_derive ............. hashing the cache key
//!   cache_hit / cache_miss ....... result cache lookups
//!   classify_http_status ......... error classification
//!   recover_fenced_json .......... fence/label stripping + JSON parse
//!   telemetry_publish_no_subs .... bus publish with nobody listening

use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use promptly_core::cache::{CacheKey, ResultCache};
use promptly_core::telemetry::{EventKind, TelemetryBus, TelemetryEvent};
use promptly_core::Provider;
use promptly_llm::extract::parse_json;
use promptly_llm::{BackendError, classify};
use uuid::Uuid;

const PROMPT: &str = "Summarise the quarterly report for an executive audience, \
highlighting risks and the three most important numbers.";

fn bench_cache(c: &mut Criterion) {
    c.bench_function("cache_key_derive", |b| {
        b.iter(|| CacheKey::derive(black_box(PROMPT), black_box("chain-of-thought"), black_box("markdown")));
    });

    let cache = ResultCache::new(256, Duration::from_secs(900));
    for i in 0..200 {
        cache.set(&format!("{PROMPT} #{i}"), "few-shot", "markdown", format!("refined {i}"));
    }
    let hit = format!("{PROMPT} #100");

    c.bench_function("cache_hit", |b| {
        b.iter(|| black_box(cache.get(black_box(&hit), "few-shot", "markdown")));
    });
    c.bench_function("cache_miss", |b| {
        b.iter(|| black_box(cache.get(black_box("never stored"), "few-shot", "markdown")));
    });
}

fn bench_classify(c: &mut Criterion) {
    c.bench_function("classify_http_status", |b| {
        b.iter(|| {
            let raw = BackendError::Http {
                status: black_box(429),
                provider_code: Some("rate_limit_exceeded".to_string()),
                message: String::new(),
            };
            black_box(classify(raw, Provider::OpenAi))
        });
    });
}

fn bench_recovery(c: &mut Criterion) {
    let output = "Refined Prompt:\n```json\n{\"score\": 8, \"reason\": \"clear and specific\", \
\"suggestions\": [\"name the audience\", \"cap the length\"]}\n```";

    c.bench_function("recover_fenced_json", |b| {
        b.iter(|| black_box(parse_json(black_box(output))));
    });
}

fn bench_telemetry(c: &mut Criterion) {
    let bus = TelemetryBus::new();
    c.bench_function("telemetry_publish_no_subs", |b| {
        b.iter(|| {
            bus.publish_with(|| {
                TelemetryEvent::success(
                    Uuid::nil(),
                    EventKind::Completion,
                    Provider::Anthropic,
                    "claude-3-5-haiku-latest",
                    1,
                    120,
                )
            });
        });
    });
}

criterion_group!(benches, bench_cache, bench_classify, bench_recovery, bench_telemetry);
criterion_main!(benches);
