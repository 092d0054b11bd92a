//! Merge rules: built-in defaults sit below every file source.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("generation.max_concurrency", 15)?
        .set_default("generation.request_timeout_secs", 300)?
        .set_default("generation.text_timeout_secs", 120)?
        .set_default("generation.use_reference", true)?
        .set_default("generation.retained_tasks", 32)?
        .set_default("storage.history_dir", "history")?
        .set_default("storage.knowledge_dir", "knowledge")
}
