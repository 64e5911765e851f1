//! Property-based tests for the aggregation layer
//!
//! Aggregation must be order-independent: outcomes arrive from concurrent
//! workers in arbitrary order, and sharded aggregates are merged in
//! arbitrary order. Both paths must be bit-identical to sequential folding.

use std::time::Duration;

use proptest::prelude::*;

use medir::{AggregatedReport, ErrorKind, LatencyHistogram, Outcome, OutcomeStatus};
use medir::timing::AttemptMetrics;

fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        // Success with plausible timing
        (1u64..5_000_000, 1u64..500_000, 0usize..64, 1usize..5).prop_map(
            |(total_us, ttft_us, tokens, attempts)| {
                let total = Duration::from_micros(total_us.max(ttft_us));
                Outcome {
                    status: OutcomeStatus::Success,
                    attempts,
                    metrics: Some(AttemptMetrics {
                        ttft: Some(Duration::from_micros(ttft_us)),
                        total,
                        inter_token: vec![Duration::from_micros(200); tokens.saturating_sub(1)],
                        tokens,
                    }),
                }
            }
        ),
        // Terminal failures of every kind
        (0usize..4, 1usize..5).prop_map(|(kind, attempts)| {
            let kind = [
                ErrorKind::Transport,
                ErrorKind::Client,
                ErrorKind::Timeout,
                ErrorKind::RetriesExhausted,
            ][kind];
            Outcome {
                status: OutcomeStatus::Failed(kind),
                attempts,
                metrics: None,
            }
        }),
        Just(Outcome {
            status: OutcomeStatus::Cancelled,
            attempts: 0,
            metrics: None,
        }),
    ]
}

// ============================================================================
// HISTOGRAM MERGE LAWS
// ============================================================================

proptest! {
    /// Merging in either order yields bit-identical bucket counts
    #[test]
    fn prop_histogram_merge_commutes(
        left in prop::collection::vec(0u64..10_000_000, 0..200),
        right in prop::collection::vec(0u64..10_000_000, 0..200),
    ) {
        let mut a = LatencyHistogram::new();
        for v in &left {
            a.record(*v);
        }
        let mut b = LatencyHistogram::new();
        for v in &right {
            b.record(*v);
        }

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        prop_assert_eq!(&ab, &ba);
        prop_assert_eq!(ab.count(), (left.len() + right.len()) as u64);
    }

    /// (a + b) + c == a + (b + c)
    #[test]
    fn prop_histogram_merge_associates(
        xs in prop::collection::vec(0u64..10_000_000, 0..100),
        ys in prop::collection::vec(0u64..10_000_000, 0..100),
        zs in prop::collection::vec(0u64..10_000_000, 0..100),
    ) {
        let build = |values: &[u64]| {
            let mut hist = LatencyHistogram::new();
            for v in values {
                hist.record(*v);
            }
            hist
        };
        let (a, b, c) = (build(&xs), build(&ys), build(&zs));

        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut right = a.clone();
        right.merge(&bc);

        prop_assert_eq!(left, right);
    }

    /// Merged histogram equals one built from the concatenated samples
    #[test]
    fn prop_histogram_merge_equals_sequential(
        left in prop::collection::vec(0u64..10_000_000, 0..200),
        right in prop::collection::vec(0u64..10_000_000, 0..200),
    ) {
        let mut sequential = LatencyHistogram::new();
        for v in left.iter().chain(right.iter()) {
            sequential.record(*v);
        }

        let mut a = LatencyHistogram::new();
        for v in &left {
            a.record(*v);
        }
        let mut b = LatencyHistogram::new();
        for v in &right {
            b.record(*v);
        }
        a.merge(&b);

        prop_assert_eq!(a, sequential);
    }

    /// Quantile readout stays within the recorded range and within the
    /// documented relative error of a true order-statistic
    #[test]
    fn prop_quantile_error_bounded(
        values in prop::collection::vec(1u64..100_000_000, 1..500),
        q in 0.0f64..1.0,
    ) {
        let mut hist = LatencyHistogram::new();
        for v in &values {
            hist.record(*v);
        }
        let mut sorted = values.clone();
        sorted.sort_unstable();
        let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
        let exact = sorted[rank - 1];

        let approx = hist.quantile(q).unwrap();
        prop_assert!(approx >= hist.min().unwrap());
        prop_assert!(approx <= hist.max().unwrap());
        // Bucket floors sit at most 1/128 below the value they represent.
        prop_assert!(approx <= exact);
        prop_assert!((exact - approx) as f64 <= exact as f64 / 128.0 + 1.0);
    }
}

// ============================================================================
// REPORT MERGE LAWS
// ============================================================================

proptest! {
    /// Sharded folding + merge is identical to sequential folding
    #[test]
    fn prop_report_sharding_is_invisible(
        outcomes in prop::collection::vec(outcome_strategy(), 0..100),
        split in 0usize..100,
    ) {
        let split = split.min(outcomes.len());

        let mut sequential = AggregatedReport::new();
        for outcome in &outcomes {
            sequential.fold(outcome);
        }

        let mut shard_a = AggregatedReport::new();
        for outcome in &outcomes[..split] {
            shard_a.fold(outcome);
        }
        let mut shard_b = AggregatedReport::new();
        for outcome in &outcomes[split..] {
            shard_b.fold(outcome);
        }

        let mut merged = shard_a.clone();
        merged.merge(&shard_b);
        prop_assert_eq!(&merged, &sequential);

        let mut reversed = shard_b;
        reversed.merge(&shard_a);
        prop_assert_eq!(&reversed, &sequential);
    }

    /// Outcome accounting: total always equals success + failed + cancelled
    #[test]
    fn prop_report_counts_partition(
        outcomes in prop::collection::vec(outcome_strategy(), 0..100),
    ) {
        let mut report = AggregatedReport::new();
        for outcome in &outcomes {
            report.fold(outcome);
        }
        prop_assert_eq!(
            report.total,
            report.success + report.failed() + report.cancelled
        );
        prop_assert_eq!(report.total as usize, outcomes.len());
    }
}
