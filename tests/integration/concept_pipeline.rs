//! ConceptPipeline end to end with knowledge overrides loaded from disk.

use super::test_utils::{run_collecting, ScriptedProvider};
use notecraft::concept::{
    ConceptEvent, ConceptHistoryStore, ConceptPipeline, ConceptRecordStatus, ConceptRequest,
    ConceptStep, KnowledgeRegistry,
};
use notecraft::generation::{
    ConcurrencyMode, CoordinatorSettings, EventSink, GenerationCoordinator, GenerationSummary,
    SseEvent,
};
use notecraft::pipeline::PipelineEvent;
use notecraft::stage::StageOptions;
use notecraft::storage::LocalImageStore;
use std::sync::Arc;
use tempfile::TempDir;

const ANALYSIS: &str = r#"{"main_theme": "Incentives", "key_concepts": [
    {"id": "c1", "name": "Proxy metrics", "importance": 5},
    {"id": "c2", "name": "Arms race", "importance": "high"},
    {"id": "c3", "name": "Feedback"}
], "relationships": [{"from": "c1", "to": "c2", "type": "causes"}]}"#;

const MAPPING: &str = r#"```json
{"mappings": [
    {"concept_id": "c1", "framework": "goodhart", "recommended_chart": "comparison"},
    {"concept_id": "c2", "framework": "moloch"},
    {"concept_id": "c3", "framework": "feedback_loops"}
]}
```"#;

const DESIGN: &str = r#"{"designs": [
    {"concept_id": "c1", "title": "Proxy Trap", "image_prompt": "Two bars diverging."},
    {"concept_id": "c2", "title": "Race/Bottom", "prompt": "Runners descending stairs."},
    {"concept_id": "c3", "title": "Loop", "image_prompt": "A closed loop."}
]}"#;

fn write_knowledge(dir: &TempDir) -> KnowledgeRegistry {
    let root = dir.path().join("knowledge");
    std::fs::create_dir_all(root.join("frameworks")).unwrap();
    std::fs::create_dir_all(root.join("visual_styles")).unwrap();
    std::fs::write(
        root.join("frameworks/feedback_loops.toml"),
        "name = \"Feedback loops\"\ncanonical_chart = \"cycle\"\nkeywords = [\"loop\"]\n",
    )
    .unwrap();
    std::fs::write(
        root.join("visual_styles/chalk.toml"),
        "name = \"Chalkboard\"\nstyle_prefix = \"Chalk drawing on a blackboard.\"\n",
    )
    .unwrap();
    KnowledgeRegistry::load(&root).unwrap()
}

#[tokio::test]
async fn test_concept_pipeline_with_custom_knowledge() {
    let dir = TempDir::new().unwrap();
    let knowledge = Arc::new(write_knowledge(&dir));
    assert!(knowledge.framework("feedback_loops").is_some());

    let provider = Arc::new(ScriptedProvider::new().with_text(vec![
        Ok(ANALYSIS.to_string()),
        Ok(MAPPING.to_string()),
        Ok(DESIGN.to_string()),
    ]));
    let coordinator = GenerationCoordinator::new(
        provider.clone(),
        Arc::new(LocalImageStore::new(dir.path().join("images"))),
        CoordinatorSettings {
            mode: ConcurrencyMode::Bounded(2),
            ..Default::default()
        },
    );
    let history = Arc::new(ConceptHistoryStore::open(dir.path().join("history/concept")).unwrap());
    let pipeline = ConceptPipeline::new(
        provider.clone(),
        Arc::new(coordinator),
        knowledge,
        StageOptions::default(),
    )
    .with_history(history.clone());

    let mut request = ConceptRequest::new("An essay about incentives and metrics.");
    request.style = "chalk".to_string();
    request.task_id = Some("concept_it".to_string());
    let (report, events) = run_collecting(|sink: EventSink<ConceptEvent>| async move {
        pipeline.run(request, &sink).await
    })
    .await;
    let report = report.unwrap();

    assert_eq!(report.main_theme, "Incentives");
    assert_eq!(report.concepts.len(), 3);
    assert_eq!(report.relationships.len(), 1);
    assert_eq!(report.mappings[2].recommended_chart.as_deref(), Some("cycle"));
    assert_eq!(report.summary, Some(GenerationSummary::new(3, 0)));
    assert_eq!(report.images[1].file_name.as_deref(), Some("02_Race_Bottom.png"));
    assert!(dir.path().join("images/concept_it/03_Loop.png").exists());

    let prompts = provider.image_prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts.iter().all(|p| p.starts_with("Chalk drawing on a blackboard.")));
    assert!(provider.reference_counts().iter().all(|n| *n == 0));

    let steps: Vec<ConceptStep> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::StepComplete { step, .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(
        steps,
        vec![
            ConceptStep::Analyze,
            ConceptStep::Map,
            ConceptStep::Design,
            ConceptStep::Generate
        ]
    );
    assert_eq!(events[0].event_name(), "pipeline_start");
    assert_eq!(events[0].payload()["style"], "chalk");

    let record = history.find_by_task("concept_it").unwrap().unwrap();
    assert_eq!(Some(record.id.as_str()), report.record_id.as_deref());
    assert_eq!(record.title, "Incentives");
    assert_eq!(record.status, ConceptRecordStatus::Completed);
    assert_eq!(record.image_count, 3);
    assert_eq!(record.thumbnail.as_deref(), Some("01_Proxy_Trap.png"));
}

#[tokio::test]
async fn test_empty_article_is_rejected() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let coordinator = GenerationCoordinator::new(
        provider.clone(),
        Arc::new(LocalImageStore::new(dir.path())),
        CoordinatorSettings::default(),
    );
    let pipeline = ConceptPipeline::new(
        provider.clone(),
        Arc::new(coordinator),
        Arc::new(KnowledgeRegistry::builtin()),
        StageOptions::default(),
    );

    let result = pipeline
        .run(ConceptRequest::new("   "), &EventSink::detached())
        .await;
    assert!(result.is_err());
    assert!(provider.text_prompts().is_empty());
}
