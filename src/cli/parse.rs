//! CLI parse: clap types for notecraft. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// notecraft - image-text notes and concept diagrams from generative models
#[derive(Parser)]
#[command(name = "notecraft")]
#[command(about = "Generate image-text notes and concept diagrams with pluggable model providers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a page outline for a topic
    Outline {
        /// Note topic
        topic: String,
        /// Reference image (repeatable)
        #[arg(long = "image")]
        images: Vec<PathBuf>,
        /// Output format (json or text)
        #[arg(long, default_value = "json", value_parser = ["json", "text"])]
        format: String,
    },
    /// Generate titles, copy and tags for an outlined note
    Content {
        /// Note topic
        topic: String,
        /// Outline file (JSON from `outline` or raw outline text)
        #[arg(long)]
        outline: PathBuf,
        /// Output format (json or text)
        #[arg(long, default_value = "json", value_parser = ["json", "text"])]
        format: String,
    },
    /// Render one image per outline page
    Generate {
        /// Outline file (JSON from `outline` or raw outline text)
        #[arg(long)]
        outline: PathBuf,
        /// Task id (generated when omitted)
        #[arg(long)]
        task_id: Option<String>,
        /// Topic passed to the page prompt
        #[arg(long)]
        topic: Option<String>,
        /// Reference image (repeatable)
        #[arg(long = "image")]
        images: Vec<PathBuf>,
        /// Do not pass the cover image to later pages
        #[arg(long)]
        no_reference: bool,
        /// History record to update when the run finishes
        #[arg(long)]
        record_id: Option<String>,
        /// Event framing (sse or json)
        #[arg(long, default_value = "sse", value_parser = ["sse", "json"])]
        format: String,
    },
    /// Re-render failed pages of an earlier task
    Retry {
        /// Task id of the earlier run
        #[arg(long)]
        task_id: String,
        /// Outline file used for the earlier run
        #[arg(long)]
        outline: PathBuf,
        /// Page indices to retry, comma separated (default: pages without an image)
        #[arg(long, value_delimiter = ',')]
        indices: Vec<usize>,
        /// Topic passed to the page prompt
        #[arg(long)]
        topic: Option<String>,
        /// History record to update when the retry finishes
        #[arg(long)]
        record_id: Option<String>,
        /// Event framing (sse or json)
        #[arg(long, default_value = "sse", value_parser = ["sse", "json"])]
        format: String,
    },
    /// Outline, content and images in one run
    Run {
        /// Note topic
        topic: String,
        /// Reference image (repeatable)
        #[arg(long = "image")]
        images: Vec<PathBuf>,
        /// Task id (generated when omitted)
        #[arg(long)]
        task_id: Option<String>,
        /// Do not pass the cover image to later pages
        #[arg(long)]
        no_reference: bool,
        /// Skip the content step
        #[arg(long)]
        skip_content: bool,
        /// Skip the image step
        #[arg(long)]
        skip_images: bool,
        /// Do not create a history record
        #[arg(long)]
        no_history: bool,
        /// Event framing (sse or json)
        #[arg(long, default_value = "sse", value_parser = ["sse", "json"])]
        format: String,
    },
    /// Turn an article into concept diagrams
    #[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
    Concept {
        #[command(subcommand)]
        command: Option<ConceptCommands>,
        /// Article file (plain text or markdown)
        #[arg(long, required = true)]
        article: Option<PathBuf>,
        /// Visual style id
        #[arg(long, default_value = "blueprint")]
        style: String,
        /// Maximum number of concepts to extract
        #[arg(long, default_value = "8")]
        max_concepts: usize,
        /// Task id (generated when omitted)
        #[arg(long)]
        task_id: Option<String>,
        /// Stop after the design step
        #[arg(long)]
        skip_generate: bool,
        /// Event framing (sse or json)
        #[arg(long, default_value = "sse", value_parser = ["sse", "json"])]
        format: String,
    },
    /// Generation history
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Show the resolved text and image providers
    Providers {
        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// List knowledge entries available to the concept pipeline
    Knowledge {
        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List records, newest first
    List {
        /// Page number (1-based)
        #[arg(long, default_value = "1")]
        page: usize,
        /// Records per page
        #[arg(long, default_value = "20")]
        page_size: usize,
        /// Filter by status (draft, generating, partial, completed, error)
        #[arg(long)]
        status: Option<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// Show one record
    Show {
        /// Record id
        record_id: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// Delete a record and its images
    Delete {
        /// Record id
        record_id: String,
    },
    /// Find records by title
    Search {
        /// Case-insensitive keyword
        keyword: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// Record counts by status
    Stats {
        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ConceptCommands {
    /// Concept run history
    History {
        #[command(subcommand)]
        command: ConceptHistoryCommands,
    },
}

#[derive(Subcommand)]
pub enum ConceptHistoryCommands {
    /// List concept runs, newest first
    List {
        /// Page number (1-based)
        #[arg(long, default_value = "1")]
        page: usize,
        /// Records per page
        #[arg(long, default_value = "20")]
        page_size: usize,
        /// Filter by status (in_progress, completed, partial, error)
        #[arg(long)]
        status: Option<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// Show one concept run with its report
    Show {
        /// Record id
        record_id: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// Delete a concept run and its images
    Delete {
        /// Record id
        record_id: String,
    },
}
