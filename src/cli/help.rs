//! CLI help and command-name contract for logging and routing.

use crate::cli::parse::{Commands, ConceptCommands, ConceptHistoryCommands, HistoryCommands};

/// Command name string for log fields (e.g. "generate", "history.list").
pub fn command_name(command: &Commands) -> String {
    match command {
        Commands::Outline { .. } => "outline".to_string(),
        Commands::Content { .. } => "content".to_string(),
        Commands::Generate { .. } => "generate".to_string(),
        Commands::Retry { .. } => "retry".to_string(),
        Commands::Run { .. } => "run".to_string(),
        Commands::Concept { command: None, .. } => "concept".to_string(),
        Commands::Concept {
            command: Some(ConceptCommands::History { command }),
            ..
        } => format!("concept.history.{}", concept_history_command_name(command)),
        Commands::History { command } => format!("history.{}", history_command_name(command)),
        Commands::Providers { .. } => "providers".to_string(),
        Commands::Knowledge { .. } => "knowledge".to_string(),
    }
}

pub fn history_command_name(command: &HistoryCommands) -> &'static str {
    match command {
        HistoryCommands::List { .. } => "list",
        HistoryCommands::Show { .. } => "show",
        HistoryCommands::Delete { .. } => "delete",
        HistoryCommands::Search { .. } => "search",
        HistoryCommands::Stats { .. } => "stats",
    }
}

pub fn concept_history_command_name(command: &ConceptHistoryCommands) -> &'static str {
    match command {
        ConceptHistoryCommands::List { .. } => "list",
        ConceptHistoryCommands::Show { .. } => "show",
        ConceptHistoryCommands::Delete { .. } => "delete",
    }
}

/// True for commands that stream events on stdout.
pub fn is_streaming(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Generate { .. }
            | Commands::Retry { .. }
            | Commands::Run { .. }
            | Commands::Concept { command: None, .. }
    )
}
