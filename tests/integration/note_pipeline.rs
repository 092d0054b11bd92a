//! NotePipeline against the scripted provider, including the CLI event framing.

use super::test_utils::{run_collecting, ScriptedProvider};
use notecraft::cli::frame_event;
use notecraft::generation::{
    ConcurrencyMode, CoordinatorSettings, EventSink, GenerationCoordinator, GenerationSummary,
    SseEvent,
};
use notecraft::pipeline::{NoteEvent, NotePipeline, NoteRequest, NoteStep, PipelineEvent};
use notecraft::prompt::PagePromptTemplate;
use notecraft::stage::StageOptions;
use notecraft::storage::LocalImageStore;
use std::sync::Arc;
use tempfile::TempDir;

const OUTLINE: &str = "[封面]\n秋季显白美甲\n---\n[内容]\n色号推荐\n---\n[总结]\n收藏关注";
const CONTENT: &str = "Here you go:\n```json\n{\"titles\": [\"秋天就该这样涂\"], \"copywriting\": \"正文\", \"tags\": [\"美甲\", \"秋季\"]}\n```";

fn pipeline(provider: Arc<ScriptedProvider>, dir: &TempDir) -> NotePipeline {
    let coordinator = GenerationCoordinator::new(
        provider.clone(),
        Arc::new(LocalImageStore::new(dir.path())),
        CoordinatorSettings {
            mode: ConcurrencyMode::Bounded(3),
            prompt: PagePromptTemplate::custom("{page_content}"),
            ..Default::default()
        },
    );
    NotePipeline::new(provider, Arc::new(coordinator), StageOptions::default())
}

#[tokio::test]
async fn test_note_pipeline_streams_steps_and_images() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_text(vec![Ok(OUTLINE.to_string()), Ok(CONTENT.to_string())])
            .failing(&["[总结]\n收藏关注"]),
    );
    let pipeline = pipeline(provider.clone(), &dir);

    let mut request = NoteRequest::new("秋季显白美甲");
    request.task_id = Some("task_note".to_string());
    let (report, events) = run_collecting(|sink: EventSink<NoteEvent>| async move {
        pipeline.run(request, &sink).await
    })
    .await;
    let report = report.unwrap();

    assert_eq!(report.outline.pages.len(), 3);
    assert_eq!(report.content.as_ref().unwrap().tags, vec!["美甲", "秋季"]);
    assert_eq!(report.summary, Some(GenerationSummary::new(2, 1)));

    let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
    assert_eq!(names[0], "pipeline_start");
    assert_eq!(names[1], "step_start");
    assert_eq!(names.last(), Some(&"pipeline_complete"));
    let finish = names.iter().position(|n| *n == "finish").unwrap();
    let images_done = events
        .iter()
        .position(|e| {
            matches!(e, PipelineEvent::StepComplete { step: NoteStep::Images, .. })
        })
        .unwrap();
    assert!(finish < images_done);

    assert_eq!(provider.text_prompts().len(), 2);
    assert!(provider.text_prompts()[0].contains("秋季显白美甲"));
}

#[tokio::test]
async fn test_pipeline_events_frame_as_sse_and_json_lines() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new().with_text(vec![Ok(OUTLINE.to_string())]));
    let pipeline = pipeline(provider, &dir);

    let mut request = NoteRequest::new("秋季显白美甲");
    request.skip_content = true;
    request.skip_images = true;
    let (report, events) = run_collecting(|sink: EventSink<NoteEvent>| async move {
        pipeline.run(request, &sink).await
    })
    .await;
    assert!(report.unwrap().images.is_empty());

    let sse: String = events.iter().map(|e| frame_event(e, "sse")).collect();
    assert!(sse.starts_with("event: pipeline_start\ndata: {"));
    assert_eq!(sse.matches("event: step_skipped\n").count(), 2);

    for event in &events {
        let line = frame_event(event, "json");
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["event"], event.event_name());
    }
}

#[tokio::test]
async fn test_outline_failure_stops_before_any_image() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new().with_text(vec![Ok("   ".to_string())]));
    let pipeline = pipeline(provider.clone(), &dir);

    let (report, events) = run_collecting(|sink: EventSink<NoteEvent>| async move {
        pipeline.run(NoteRequest::new("topic"), &sink).await
    })
    .await;

    assert!(report.is_err());
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::Error { step: NoteStep::Outline, .. })
    ));
    assert!(provider.image_prompts().is_empty());
}
