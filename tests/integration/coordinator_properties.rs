//! Property tests over coordinator event counts.

use super::test_utils::{coordinator, pages, run_collecting, ScriptedProvider};
use notecraft::generation::{
    ConcurrencyMode, EventSink, GenerationRequest, ProgressEvent,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

fn mode_strategy() -> impl Strategy<Value = ConcurrencyMode> {
    prop_oneof![
        Just(ConcurrencyMode::Sequential),
        (1usize..6).prop_map(ConcurrencyMode::Bounded),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_run_counts_add_up(
        n in 0usize..9,
        failing in proptest::collection::btree_set(0usize..9, 0..4),
        mode in mode_strategy(),
        use_reference in any::<bool>(),
    ) {
        let failing: BTreeSet<usize> = failing.into_iter().filter(|i| *i < n).collect();
        let prompts: Vec<String> = failing.iter().map(|i| format!("page-{}", i)).collect();
        let prompt_refs: Vec<&str> = prompts.iter().map(String::as_str).collect();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::new().failing(&prompt_refs));
        let coordinator = &coordinator(provider.clone(), &dir, mode);
        let request = GenerationRequest::new("task_prop", pages(n)).with_reference(use_reference);

        let (report, events) = runtime.block_on(run_collecting(
            |sink: EventSink<ProgressEvent>| async move {
                coordinator.run_generation(request, &sink).await
            },
        ));
        let report = report.unwrap();

        let finishes = events.iter().filter(|e| matches!(e, ProgressEvent::Finish(_))).count();
        let progress = events.iter().filter(|e| matches!(e, ProgressEvent::Progress { .. })).count();
        let terminal = events.iter().filter(|e| e.is_page_terminal()).count();

        prop_assert_eq!(finishes, 1);
        prop_assert!(matches!(events.last(), Some(ProgressEvent::Finish(_))));
        prop_assert_eq!(progress, n);
        prop_assert_eq!(terminal, n);
        prop_assert_eq!(report.summary.total, n);
        prop_assert_eq!(report.summary.completed + report.summary.failed, n);
        prop_assert_eq!(report.summary.failed, failing.len());
        prop_assert_eq!(report.summary.success, failing.is_empty());
        prop_assert!(provider.high_water() <= mode.effective_limit(n));

        // Per index, `generating` precedes the terminal event.
        for index in 0..n {
            let started = events.iter().position(|e| {
                matches!(e, ProgressEvent::Progress { index: i, .. } if *i == index)
            });
            let ended = events
                .iter()
                .position(|e| e.is_page_terminal() && e.index() == Some(index));
            prop_assert!(started.is_some() && ended.is_some() && started < ended);
        }
    }

    #[test]
    fn prop_retry_touches_only_the_given_subset(
        n in 1usize..8,
        failing in proptest::collection::btree_set(0usize..8, 1..4),
    ) {
        let failing: BTreeSet<usize> = failing.into_iter().filter(|i| *i < n).collect();
        prop_assume!(!failing.is_empty());
        let prompts: Vec<String> = failing.iter().map(|i| format!("page-{}", i)).collect();
        let prompt_refs: Vec<&str> = prompts.iter().map(String::as_str).collect();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::new().failing(&prompt_refs));
        let coordinator = &coordinator(provider.clone(), &dir, ConcurrencyMode::Bounded(3));
        let all = pages(n);

        let first = runtime
            .block_on(coordinator.run_generation(
                GenerationRequest::new("task_prop_retry", all.clone()),
                &EventSink::<ProgressEvent>::detached(),
            ))
            .unwrap();
        let failed: BTreeSet<usize> = first.failed_indices().into_iter().collect();
        prop_assert_eq!(&failed, &failing);

        provider.heal();
        let subset: Vec<_> = all.iter().filter(|p| failed.contains(&p.index)).cloned().collect();
        let (retry, events) = runtime.block_on(run_collecting(
            |sink: EventSink<ProgressEvent>| async move {
                coordinator.retry_failed("task_prop_retry", subset, &sink).await
            },
        ));
        let retry = retry.unwrap();

        let touched: BTreeSet<usize> = events.iter().filter_map(|e| e.index()).collect();
        prop_assert_eq!(&touched, &failed);
        prop_assert_eq!(retry.summary.total, failed.len());
        prop_assert!(retry.summary.success);
    }
}
