//! Integration tests for configuration layering and provider resolution

use super::test_utils::with_xdg_env;
use clap::Parser;
use notecraft::cli::{Cli, RunContext};
use notecraft::config::{global_config_path, ConfigLoader};
use notecraft::generation::ConcurrencyMode;
use notecraft::provider::{ModelProviderClient, ProviderClient, ProviderFactory};
use tempfile::TempDir;

const GLOBAL: &str = r#"
[text]
active_provider = "gemini"

[text.providers.gemini]
type = "google_genai"
api_key = "global-text-key-0001"
model = "gemini-2.0-flash"

[image]
active_provider = "images"

[image.providers.images]
type = "openai_compatible"
api_key = "global-image-key-0002"
base_url = "https://images.example.com"
model = "gpt-image-1"
high_concurrency = true

[generation]
max_concurrency = 8
"#;

fn write_global(test_dir: &TempDir) {
    let dir = test_dir.path().join("notecraft");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), GLOBAL).unwrap();
}

#[test]
fn test_global_file_is_found_under_xdg_config_home() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        assert_eq!(
            global_config_path(),
            Some(test_dir.path().join("notecraft").join("config.toml"))
        );
    });
}

#[test]
fn test_workspace_file_overrides_global_file() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write_global(&test_dir);
    std::fs::create_dir_all(workspace.path().join("config")).unwrap();
    std::fs::write(
        workspace.path().join("config/config.toml"),
        "[generation]\nmax_concurrency = 2\n\n[storage]\nhistory_dir = \"out\"\n",
    )
    .unwrap();

    let config = with_xdg_env(&test_dir, || ConfigLoader::load(workspace.path()).unwrap());

    assert_eq!(config.generation.max_concurrency, 2);
    assert_eq!(config.generation.request_timeout_secs, 300);
    let image = config.resolve_image_provider().unwrap();
    assert_eq!(image.name, "images");
    assert_eq!(
        config.coordinator_settings(&image).mode,
        ConcurrencyMode::Bounded(2)
    );
    assert_eq!(
        config.storage.resolve(workspace.path()).history_dir,
        workspace.path().join("out")
    );
}

#[test]
fn test_factory_builds_the_configured_vendors() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write_global(&test_dir);
    let config = with_xdg_env(&test_dir, || ConfigLoader::load(workspace.path()).unwrap());

    let text = ProviderFactory::create_client(&config.resolve_text_provider().unwrap()).unwrap();
    assert!(matches!(text, ProviderClient::Gemini(_)));
    assert_eq!(text.model_name(), "gemini-2.0-flash");

    let image = ProviderFactory::create_client(&config.resolve_image_provider().unwrap()).unwrap();
    assert!(matches!(image, ProviderClient::OpenAiCompatible(_)));
    assert_eq!(image.provider_name(), "images");
}

#[test]
fn test_providers_command_masks_keys() {
    let workspace = TempDir::new().unwrap();
    let config_file = workspace.path().join("notecraft.toml");
    std::fs::write(&config_file, GLOBAL).unwrap();

    let context =
        RunContext::new(workspace.path().to_path_buf(), Some(config_file.clone())).unwrap();
    let cli = Cli::try_parse_from(["notecraft", "providers", "--format", "json"]).unwrap();
    let mut out = Vec::new();
    let output = context.execute_with_output(&cli.command, &mut out).unwrap();

    assert!(out.is_empty());
    let value: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value[0]["name"], "gemini");
    assert_eq!(value[1]["model"], "gpt-image-1");
    assert!(!output.contains("global-text-key-0001"));
    assert_eq!(value[0]["api_key"], "glob************0001");
}

#[test]
fn test_invalid_config_fails_context_creation() {
    let workspace = TempDir::new().unwrap();
    let config_file = workspace.path().join("bad.toml");
    std::fs::write(
        &config_file,
        "[text]\nactive_provider = \"nope\"\n\n[text.providers.real]\ntype = \"google_genai\"\nmodel = \"m\"\n",
    )
    .unwrap();

    let err = RunContext::new(workspace.path().to_path_buf(), Some(config_file)).err().unwrap();
    assert!(err.to_string().contains("active_provider 'nope' is not configured"));
}
