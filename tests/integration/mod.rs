//! Integration tests for notecraft generation, pipelines and configuration

mod concept_pipeline;
mod config_integration;
mod coordinator_properties;
mod coordinator_scenarios;
mod note_pipeline;
mod test_utils;
