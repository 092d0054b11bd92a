//! History command presentation: record tables, single record, statistics.

use crate::error::{ApiError, StorageError};
use crate::history::{HistoryRecord, HistoryStatistics, IndexEntry, RecordPage};
use comfy_table::Table;
use serde::Serialize;

pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::StorageError(StorageError::Serialization(e.to_string())))
}

fn entries_table(entries: &[IndexEntry]) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["ID", "Title", "Status", "Pages", "Task", "Updated"]);
    for entry in entries {
        table.add_row(vec![
            entry.id.clone(),
            entry.title.clone(),
            entry.status.as_str().to_string(),
            entry.page_count.to_string(),
            entry.task_id.clone().unwrap_or_else(|| "-".to_string()),
            entry.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    table
}

pub fn format_history_page_text(page: &RecordPage) -> String {
    if page.records.is_empty() {
        return "No history records found.".to_string();
    }
    format!(
        "{}\nPage {}/{} ({} record(s))",
        entries_table(&page.records),
        page.page,
        page.total_pages.max(1),
        page.total
    )
}

pub fn format_history_page_json(page: &RecordPage) -> Result<String, ApiError> {
    to_pretty_json(page)
}

pub fn format_search_result_text(keyword: &str, entries: &[IndexEntry]) -> String {
    if entries.is_empty() {
        return format!("No records match '{}'.", keyword);
    }
    entries_table(entries).to_string()
}

pub fn format_record_text(record: &HistoryRecord) -> String {
    let mut output = format!("Record: {}\n", record.id);
    output.push_str(&format!("Title: {}\n", record.title));
    output.push_str(&format!("Status: {}\n", record.status.as_str()));
    output.push_str(&format!("Created: {}\n", record.created_at.to_rfc3339()));
    output.push_str(&format!("Updated: {}\n", record.updated_at.to_rfc3339()));
    if let Some(task_id) = &record.images.task_id {
        output.push_str(&format!("Task: {}\n", task_id));
    }
    output.push_str(&format!("\nPages ({}):\n", record.outline.pages.len()));
    for page in &record.outline.pages {
        let first_line = page.content.lines().next().unwrap_or("").trim();
        output.push_str(&format!(
            "  {:>2}. [{}] {}\n",
            page.index,
            page.page_type.as_str(),
            first_line
        ));
    }
    if !record.images.generated.is_empty() {
        output.push_str(&format!(
            "\nImages: {}\n",
            record.images.generated.join(", ")
        ));
    }
    output
}

pub fn format_record_json(record: &HistoryRecord) -> Result<String, ApiError> {
    to_pretty_json(record)
}

pub fn format_statistics_text(stats: &HistoryStatistics) -> String {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Status", "Records"]);
    for (status, count) in &stats.by_status {
        table.add_row(vec![status.clone(), count.to_string()]);
    }
    format!("{}\nTotal: {}", table, stats.total)
}
