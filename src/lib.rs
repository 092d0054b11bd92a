//! notecraft: image-text note and concept diagram generation
//!
//! Text stages turn a topic into an outline and publish copy; the generation
//! coordinator renders one image per page under a concurrency cap and streams
//! progress events; the concept pipeline turns an article into diagram prompts
//! and feeds them through the same coordinator.

pub mod cli;
pub mod concept;
pub mod config;
pub mod content;
pub mod error;
pub mod generation;
pub mod history;
pub mod json_extract;
pub mod logging;
pub mod outline;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod stage;
pub mod storage;
