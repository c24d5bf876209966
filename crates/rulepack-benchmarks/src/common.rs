//! Common utilities for benchmarks

use criterion::Criterion;
use pprof::criterion::{Output, PProfProfiler};
use std::collections::BTreeMap;

/// Configure criterion with flamegraph profiling support
pub fn criterion_config() -> Criterion {
    Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(2))
        .measurement_time(std::time::Duration::from_secs(5))
        .sample_size(50)
        .with_profiler(PProfProfiler::new(100, Output::Flamegraph(None)))
}

/// Markdown-like rule text of roughly `size` bytes
pub fn rule_text(size: usize) -> Vec<u8> {
    let line = b"- Prefer explicit error types over stringly errors.\n";
    line.iter().cycle().take(size).copied().collect()
}

/// `count` rule files named `rule-<i>.md`, each `size` bytes
pub fn rule_files(count: usize, size: usize) -> BTreeMap<String, Vec<u8>> {
    (0..count)
        .map(|i| (format!("rule-{}.md", i), rule_text(size)))
        .collect()
}
