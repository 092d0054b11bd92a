//! End-to-end coordinator runs against the scripted provider.

use super::test_utils::{coordinator, pages, run_collecting, ScriptedProvider};
use notecraft::error::ApiError;
use notecraft::generation::{
    ConcurrencyMode, EventSink, GenerationRequest, GenerationSummary, PageStatus, ProgressEvent,
};
use notecraft::history::{HistoryReporter, LocalHistoryStore, RecordStatus};
use notecraft::outline::{OutlineResult, OutlineStage};
use notecraft::stage::StageOptions;
use std::sync::Arc;
use tempfile::TempDir;

const FIVE_PAGE_OUTLINE: &str = "<page>\n[封面]\n秋季显白美甲\n<page>\n[内容]\n色号推荐\n\
<page>\n[内容]\n上手步骤\n<page>\n[内容]\n搭配建议\n<page>\n[总结]\n收藏关注\n";

fn terminal_count(events: &[ProgressEvent]) -> usize {
    events.iter().filter(|e| e.is_page_terminal()).count()
}

#[tokio::test]
async fn test_outline_to_five_pages_with_cap_three() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new().with_text(vec![Ok(FIVE_PAGE_OUTLINE.to_string())]),
    );
    let outline = OutlineStage::new(provider.clone(), StageOptions::default())
        .generate("秋季显白美甲", Vec::new())
        .await
        .unwrap();
    assert_eq!(outline.pages.len(), 5);

    let coordinator = &coordinator(provider.clone(), &dir, ConcurrencyMode::Bounded(3));
    let request = GenerationRequest::new("task_five", outline.pages.clone())
        .with_outline(outline.raw.clone())
        .with_topic("秋季显白美甲");
    let (report, events) =
        run_collecting(|sink: EventSink<ProgressEvent>| async move { coordinator.run_generation(request, &sink).await })
            .await;
    let report = report.unwrap();

    assert_eq!(report.summary, GenerationSummary::new(5, 0));
    assert!(report.summary.success);
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Finish(GenerationSummary::new(5, 0)))
    );
    assert!(provider.high_water() <= 3);
    for index in 0..5 {
        assert!(dir.path().join("task_five").join(format!("{}.png", index)).exists());
    }
}

#[tokio::test]
async fn test_partial_failure_then_retry_failed_subset() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new().failing(&["page-2", "page-4"]));
    let coordinator = &coordinator(provider.clone(), &dir, ConcurrencyMode::Bounded(3));
    let all = pages(5);

    let request = GenerationRequest::new("task_partial", all.clone());
    let (report, events) =
        run_collecting(|sink: EventSink<ProgressEvent>| async move { coordinator.run_generation(request, &sink).await }).await;
    let report = report.unwrap();

    assert_eq!(report.summary, GenerationSummary::new(3, 2));
    assert!(!report.summary.success);
    assert_eq!(report.failed_indices(), vec![2, 4]);
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Finish(GenerationSummary::new(3, 2)))
    );

    provider.heal();
    let calls_before = provider.image_prompts().len();
    let failed: Vec<_> = all
        .iter()
        .filter(|p| report.failed_indices().contains(&p.index))
        .cloned()
        .collect();
    let (retry, events) = run_collecting(|sink: EventSink<ProgressEvent>| async move {
        coordinator.retry_failed("task_partial", failed, &sink).await
    })
    .await;
    let retry = retry.unwrap();

    assert_eq!(retry.summary, GenerationSummary::new(2, 0));
    assert_eq!(
        events.first(),
        Some(&ProgressEvent::RetryStart {
            message: "Retrying 2 failed page(s)".to_string()
        })
    );
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::RetryFinish(GenerationSummary::new(2, 0)))
    );
    assert!(!events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Progress { .. })));
    let retried: Vec<usize> = events.iter().filter_map(|e| e.index()).collect();
    assert_eq!(retried.len(), 2);
    assert!(retried.contains(&2) && retried.contains(&4));

    let new_calls = &provider.image_prompts()[calls_before..];
    assert_eq!(new_calls.len(), 2);
    assert!(new_calls.iter().all(|p| p == "page-2" || p == "page-4"));

    let results = coordinator.task_results("task_partial").unwrap();
    assert!(results.iter().all(|r| r.status == PageStatus::Done));
}

#[tokio::test]
async fn test_empty_retry_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let coordinator = &coordinator(provider.clone(), &dir, ConcurrencyMode::Bounded(3));

    let (report, events) = run_collecting(|sink: EventSink<ProgressEvent>| async move {
        coordinator.retry_failed("task_none", Vec::new(), &sink).await
    })
    .await;

    let summary = report.unwrap().summary;
    assert_eq!(summary, GenerationSummary::empty());
    assert!(summary.success);
    assert_eq!(events, vec![ProgressEvent::RetryFinish(GenerationSummary::empty())]);
    assert!(provider.image_prompts().is_empty());
}

#[tokio::test]
async fn test_zero_pages_finishes_successfully() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let coordinator = &coordinator(provider, &dir, ConcurrencyMode::Bounded(3));

    let (report, events) = run_collecting(|sink: EventSink<ProgressEvent>| async move {
        coordinator
            .run_generation(GenerationRequest::new("task_zero", Vec::new()), &sink)
            .await
    })
    .await;

    assert_eq!(report.unwrap().summary.total, 0);
    assert_eq!(events, vec![ProgressEvent::Finish(GenerationSummary::new(0, 0))]);
}

#[tokio::test]
async fn test_sequential_mode_never_overlaps_jobs() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new().failing(&["page-3"]));
    let coordinator = &coordinator(provider.clone(), &dir, ConcurrencyMode::Sequential);

    let request = GenerationRequest::new("task_seq", pages(6));
    let (_, events) =
        run_collecting(|sink: EventSink<ProgressEvent>| async move { coordinator.run_generation(request, &sink).await }).await;

    assert_eq!(provider.high_water(), 1);
    let position = |pred: &dyn Fn(&ProgressEvent) -> bool| {
        events.iter().position(|e| pred(e)).unwrap()
    };
    for index in 1..6 {
        let started = position(&|e| {
            matches!(e, ProgressEvent::Progress { index: i, .. } if *i == index)
        });
        let previous_done = position(&|e| e.is_page_terminal() && e.index() == Some(index - 1));
        assert!(
            previous_done < started,
            "page {} started before page {} finished",
            index,
            index - 1
        );
    }
}

#[tokio::test]
async fn test_cap_bounds_jobs_in_flight() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let coordinator = &coordinator(provider.clone(), &dir, ConcurrencyMode::Bounded(3));

    let request = GenerationRequest::new("task_cap", pages(10)).with_reference(false);
    let (report, events) =
        run_collecting(|sink: EventSink<ProgressEvent>| async move { coordinator.run_generation(request, &sink).await }).await;
    assert!(report.unwrap().summary.success);

    assert_eq!(provider.high_water(), 3);
    let mut generating = 0usize;
    let mut peak = 0usize;
    for event in &events {
        match event {
            ProgressEvent::Progress { .. } => generating += 1,
            e if e.is_page_terminal() => generating -= 1,
            _ => {}
        }
        peak = peak.max(generating);
    }
    assert!(peak <= 3);

    let starts: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Progress { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(starts, (0..10).collect::<Vec<_>>(), "jobs start lowest index first");
}

#[tokio::test]
async fn test_timeout_is_reported_as_page_error() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new().failing(&["page-1"]));
    let coordinator = &coordinator(provider, &dir, ConcurrencyMode::Bounded(2));

    let request = GenerationRequest::new("task_timeout", pages(2));
    let (report, events) =
        run_collecting(|sink: EventSink<ProgressEvent>| async move { coordinator.run_generation(request, &sink).await }).await;

    let report = report.unwrap();
    assert_eq!(report.summary.failed, 1);
    let message = events
        .iter()
        .find_map(|e| match e {
            ProgressEvent::Error { index: 1, message } => Some(message.clone()),
            _ => None,
        })
        .unwrap();
    assert!(message.contains("timed out"), "unexpected message: {}", message);
}

#[tokio::test]
async fn test_disconnected_consumer_does_not_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let coordinator = &coordinator(provider.clone(), &dir, ConcurrencyMode::Bounded(2));

    let (sink, mut receiver) = EventSink::<ProgressEvent>::new_pair(1);
    let consumer = async move {
        let first = receiver.recv().await;
        drop(receiver);
        first
    };
    let run = coordinator.run_generation(GenerationRequest::new("task_gone", pages(4)), &sink);
    let (report, first) = tokio::join!(run, consumer);

    assert!(matches!(first, Some(ProgressEvent::Progress { index: 0, .. })));
    assert_eq!(report.unwrap().summary, GenerationSummary::new(4, 0));
    assert!(!sink.is_connected());
    assert_eq!(provider.image_prompts().len(), 4);
    for index in 0..4 {
        assert!(dir.path().join("task_gone").join(format!("{}.png", index)).exists());
    }
}

#[tokio::test]
async fn test_unparseable_outline_creates_no_task() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new().with_text(vec![Ok("  ---  \n---\n".to_string())]),
    );
    let result = OutlineStage::new(provider.clone(), StageOptions::default())
        .generate("秋季显白美甲", Vec::new())
        .await;

    assert!(matches!(result, Err(ApiError::OutlineParse(_))));
    let coordinator = &coordinator(provider.clone(), &dir, ConcurrencyMode::Bounded(3));
    assert!(coordinator.task_results("秋季显白美甲").is_none());
    assert!(provider.image_prompts().is_empty());
}

#[tokio::test]
async fn test_history_follows_run_and_retry() {
    let dir = TempDir::new().unwrap();
    let history = Arc::new(LocalHistoryStore::open(dir.path().join("history")).unwrap());
    let provider = Arc::new(ScriptedProvider::new().failing(&["page-1"]));
    let coordinator = &coordinator(provider.clone(), &dir, ConcurrencyMode::Bounded(3))
        .with_history(history.clone());

    let all = pages(3);
    let outline = OutlineResult {
        raw: "page-0\n---\npage-1\n---\npage-2".to_string(),
        pages: all.clone(),
        has_images: false,
    };
    let record_id = history.create("Tea notes", &outline, Some("task_hist")).unwrap();

    let request = GenerationRequest::new("task_hist", all.clone()).with_record_id(record_id.clone());
    coordinator
        .run_generation(request, &EventSink::<ProgressEvent>::detached())
        .await
        .unwrap();
    let record = history.get_record(&record_id).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Partial);
    assert_eq!(record.images.generated, vec!["0.png", "2.png"]);

    provider.heal();
    coordinator
        .retry_failed(
            "task_hist",
            vec![all[1].clone()],
            &EventSink::<ProgressEvent>::detached(),
        )
        .await
        .unwrap();
    let record = history.get_record(&record_id).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.images.generated.len(), 3);
}

#[tokio::test]
async fn test_restore_then_retry_missing_pages_in_a_new_coordinator() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new().failing(&["page-3"]));
    let first = coordinator(provider.clone(), &dir, ConcurrencyMode::Bounded(2));
    first
        .run_generation(
            GenerationRequest::new("task_resume", pages(4)),
            &EventSink::<ProgressEvent>::detached(),
        )
        .await
        .unwrap();

    provider.heal();
    let second = coordinator(provider.clone(), &dir, ConcurrencyMode::Bounded(2));
    let request = GenerationRequest::new("task_resume", pages(4));
    let missing = second.restore_task(&request).unwrap();
    assert_eq!(missing, vec![3]);

    let retry_pages = pages(4).into_iter().filter(|p| missing.contains(&p.index)).collect();
    let report = second
        .retry_failed(
            "task_resume",
            retry_pages,
            &EventSink::<ProgressEvent>::detached(),
        )
        .await
        .unwrap();
    assert!(report.summary.success);
    assert_eq!(
        provider.reference_counts().last(),
        Some(&1),
        "restored cover is passed as reference"
    );
}
