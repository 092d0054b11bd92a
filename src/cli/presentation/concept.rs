//! Concept history presentation.

use super::history::to_pretty_json;
use crate::concept::{ConceptIndexEntry, ConceptRecord, ConceptRecordPage};
use crate::error::ApiError;
use comfy_table::Table;

fn concept_table(entries: &[ConceptIndexEntry]) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["ID", "Title", "Status", "Style", "Images", "Task", "Updated"]);
    for entry in entries {
        table.add_row(vec![
            entry.id.clone(),
            entry.title.clone(),
            entry.status.as_str().to_string(),
            entry.style.clone(),
            entry.image_count.to_string(),
            entry.task_id.clone(),
            entry.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    table
}

pub fn format_concept_page_text(page: &ConceptRecordPage) -> String {
    if page.records.is_empty() {
        return "No concept records found.".to_string();
    }
    format!(
        "{}\nPage {}/{} ({} record(s))",
        concept_table(&page.records),
        page.page,
        page.total_pages.max(1),
        page.total
    )
}

pub fn format_concept_page_json(page: &ConceptRecordPage) -> Result<String, ApiError> {
    to_pretty_json(page)
}

pub fn format_concept_record_text(record: &ConceptRecord) -> String {
    let mut output = format!("Concept record: {}\n", record.id);
    output.push_str(&format!("Title: {}\n", record.title));
    output.push_str(&format!("Status: {}\n", record.status.as_str()));
    output.push_str(&format!("Style: {}\n", record.style));
    output.push_str(&format!("Task: {}\n", record.task_id));
    output.push_str(&format!("Created: {}\n", record.created_at.to_rfc3339()));
    output.push_str(&format!("Updated: {}\n", record.updated_at.to_rfc3339()));
    if let Some(error) = &record.error {
        output.push_str(&format!("Error: {}\n", error));
    }
    output.push_str(&format!("\nArticle: {}\n", record.article_preview));

    let Some(report) = &record.report else {
        return output;
    };
    output.push_str(&format!("\nConcepts ({}):\n", report.concepts.len()));
    for concept in &report.concepts {
        output.push_str(&format!("  - {} {}\n", concept.id, concept.name));
    }
    output.push_str(&format!("\nDesigns ({}):\n", report.designs.len()));
    for (position, design) in report.designs.iter().enumerate() {
        let image = report
            .images
            .iter()
            .find(|r| r.index == position)
            .and_then(|r| r.file_name.as_deref())
            .unwrap_or("-");
        output.push_str(&format!(
            "  {:>2}. {} [{}] {}\n",
            position + 1,
            design.title,
            design.chart_type,
            image
        ));
    }
    output
}

pub fn format_concept_record_json(record: &ConceptRecord) -> Result<String, ApiError> {
    to_pretty_json(record)
}
