//! CLI presentation: text and json formatters per command family.

mod concept;
mod history;
mod knowledge;
mod provider;

pub use concept::{
    format_concept_page_json, format_concept_page_text, format_concept_record_json,
    format_concept_record_text,
};
pub use history::{
    format_history_page_json, format_history_page_text, format_record_json, format_record_text,
    format_search_result_text, format_statistics_text, to_pretty_json,
};
pub use knowledge::format_knowledge_text;
pub use provider::{format_providers_json, format_providers_text, ProviderSummary};
