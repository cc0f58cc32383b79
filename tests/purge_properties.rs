//! Property tests for batching and output sanitizing

mod common;

use common::{cutoff, message_days_before_cutoff, progress_events, FakeMailbox};
use outlook_cli::output::sanitize_for_output;
use outlook_cli::purge::{CancellationFlag, PurgeConfig, PurgeWorker, RecordingReporter};
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn purge_deletes_every_old_message_exactly_once(
        old in 0usize..40,
        new in 0usize..5,
        batch_size in 1usize..12,
        page_size in 1usize..15,
        dry_run in any::<bool>(),
    ) {
        let mut messages: Vec<_> = (0..old)
            .map(|i| message_days_before_cutoff(&format!("m{}", i), 200 - i as i64))
            .collect();
        messages.extend((0..new).map(|i| message_days_before_cutoff(&format!("n{}", i), -1 - i as i64)));
        let fake = Arc::new(FakeMailbox::new(messages));
        let reporter = RecordingReporter::new();
        let config = PurgeConfig::new("inbox", cutoff())
            .batch_size(batch_size)
            .page_size(page_size)
            .dry_run(dry_run);

        let summary = tokio_test::block_on(
            PurgeWorker::new(fake.clone()).run(&config, &CancellationFlag::new(), &reporter),
        )
        .unwrap();

        prop_assert_eq!(summary.total_affected, old as u64);

        let progress = progress_events(&reporter.events());
        prop_assert_eq!(progress.len(), old.div_ceil(batch_size));
        prop_assert!(progress.iter().all(|p| p.batch_size >= 1 && p.batch_size <= batch_size));
        prop_assert_eq!(progress.iter().map(|p| p.batch_size).sum::<usize>(), old);
        prop_assert!(progress.windows(2).all(|w| w[0].deleted_so_far <= w[1].deleted_so_far));

        let mut deleted = fake.deleted_ids();
        if dry_run {
            prop_assert!(deleted.is_empty());
            prop_assert_eq!(fake.remaining_ids().len(), old + new);
        } else {
            deleted.sort();
            deleted.dedup();
            prop_assert_eq!(deleted.len(), old);
            prop_assert_eq!(fake.remaining_ids().len(), new);
        }
    }

    #[test]
    fn sanitized_output_is_a_single_clean_field(value in any::<String>()) {
        let cleaned = sanitize_for_output(&value);
        prop_assert!(!cleaned.contains('|'));
        prop_assert!(!cleaned.chars().any(|c| c.is_control()));
        prop_assert!(!cleaned.contains('\u{2028}') && !cleaned.contains('\u{2029}'), "output contains U+2028/U+2029 line separator");
        prop_assert!(!cleaned.contains("  "));
        prop_assert_eq!(cleaned.trim(), cleaned.as_str());
    }
}
