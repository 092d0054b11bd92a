//! CLI domain: parse, route, help, output, and presentation only.
//! No domain orchestration; single route table dispatches to domain services.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::{command_name, concept_history_command_name, history_command_name, is_streaming};
pub use output::{drain_events, frame_event, map_error};
pub use parse::{Cli, Commands, ConceptCommands, ConceptHistoryCommands, HistoryCommands};
pub use presentation::{
    format_concept_page_json, format_concept_page_text, format_concept_record_json,
    format_concept_record_text,
    format_history_page_json, format_history_page_text, format_knowledge_text,
    format_providers_json, format_providers_text, format_record_json, format_record_text,
    format_search_result_text, format_statistics_text, ProviderSummary,
};
pub use route::{load_outline, RunContext};
