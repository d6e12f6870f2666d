//! Property-based tests using proptest
//!
//! These tests verify invariants across randomized inputs, helping catch
//! edge cases that might be missed by example-based testing.

mod common;

use chrono::Utc;
use common::{FakeBackend, ScriptedRepository, build_manager};
use model_manager::{ModelStatus, PerformanceSample};
use model_manager::benchmark::HISTORY_CAPACITY;
use model_manager::gpu::parse_gpu_listing;
use model_manager::models::{ModelRegistry, RegistryEntry, default_catalog};
use model_manager::runtime::ComputeDevice;
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// Strategies
// =============================================================================

fn arb_status() -> impl Strategy<Value = ModelStatus> {
    prop_oneof![
        Just(ModelStatus::Available),
        Just(ModelStatus::Downloading),
        Just(ModelStatus::Downloaded),
        Just(ModelStatus::Validating),
        Just(ModelStatus::Loaded),
        Just(ModelStatus::Error),
    ]
}

fn sample(speed: f64) -> PerformanceSample {
    PerformanceSample {
        inference_speed: speed,
        memory_usage_mb: 0.0,
        gpu_utilization: 0.0,
        device: ComputeDevice::Cpu,
        recorded_at: Utc::now(),
    }
}

// =============================================================================
// Download progress
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Reported progress never decreases and ends at exactly 100
    #[test]
    fn download_progress_is_monotonic(sizes in prop::collection::vec(0u64..5_000_000, 1..8)) {
        let mut repository = ScriptedRepository::new();
        repository.files = std::iter::once(("config.json".to_string(), 512))
            .chain(sizes.iter().enumerate().map(|(i, s)| (format!("shard-{i}.bin"), *s)))
            .collect();

        let seen = tokio_test::block_on(async move {
            let dir = TempDir::new().unwrap();
            let manager =
                build_manager(&dir, Arc::new(repository), Arc::new(FakeBackend::default())).await;

            let mut seen = Vec::new();
            let ok = manager
                .download_with_progress("gpt2", |p| seen.push(p.progress))
                .await
                .unwrap();
            assert!(ok);

            let info = manager.get("gpt2").await.unwrap();
            assert_eq!(info.download_progress, 100.0);
            seen
        });

        prop_assert!(seen.windows(2).all(|w| w[0] <= w[1]), "went backwards: {:?}", seen);
        prop_assert_eq!(seen.last().copied(), Some(100.0));
        prop_assert!(seen.iter().all(|p| (0.0..=100.0).contains(p)));
    }

    /// Stored progress is clamped to the percentage range
    #[test]
    fn stored_progress_is_clamped(progress in -1_000.0f64..1_000.0) {
        let stored = tokio_test::block_on(async move {
            let registry = ModelRegistry::new(default_catalog());
            registry.set_progress("gpt2", progress).await.unwrap();
            registry.entry("gpt2").await.unwrap().download_progress
        });

        prop_assert!((0.0..=100.0).contains(&stored));
    }
}

// =============================================================================
// Performance history
// =============================================================================

proptest! {
    /// History never exceeds capacity and keeps the newest samples in order
    #[test]
    fn history_is_bounded_fifo(count in 0usize..40) {
        let mut entry = RegistryEntry::new();
        for i in 0..count {
            entry.push_sample(sample(i as f64));
        }

        prop_assert_eq!(entry.performance_history.len(), count.min(HISTORY_CAPACITY));

        let speeds: Vec<f64> = entry
            .performance_history
            .iter()
            .map(|s| s.inference_speed)
            .collect();
        let expected: Vec<f64> = (count.saturating_sub(HISTORY_CAPACITY)..count)
            .map(|i| i as f64)
            .collect();
        prop_assert_eq!(speeds, expected);
    }
}

// =============================================================================
// Status machine
// =============================================================================

proptest! {
    /// Every status can fall into error
    #[test]
    fn any_status_can_fail(status in arb_status()) {
        prop_assert!(status.can_transition_to(ModelStatus::Error));
    }

    /// Nothing skips straight from available to loaded or validating
    #[test]
    fn available_only_starts_downloads(next in arb_status()) {
        let allowed = ModelStatus::Available.can_transition_to(next);
        prop_assert_eq!(
            allowed,
            matches!(next, ModelStatus::Downloading | ModelStatus::Error)
        );
    }
}

// =============================================================================
// GPU listing parser
// =============================================================================

proptest! {
    /// Arbitrary nvidia-smi output never panics the parser
    #[test]
    fn gpu_listing_parser_is_total(stdout in ".{0,200}") {
        let info = parse_gpu_listing(&stdout);
        prop_assert_eq!(info.count(), info.indices.len());
    }

    /// Well-formed rows are all recognized
    #[test]
    fn gpu_listing_well_formed(memory in prop::collection::vec(1u64..100_000, 0..8)) {
        let stdout: String = memory
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}, {}\n", i, m))
            .collect();

        let info = parse_gpu_listing(&stdout);
        prop_assert_eq!(info.count(), memory.len());
        prop_assert_eq!(info.max_memory_mb(), memory.iter().copied().max().unwrap_or(0));
    }
}
