use std::io::Write;

use tagproxy_rs::config::{
    load_config, load_config_with_env, ConfigError, DEFAULT_FIREWORKS_BASE_URL,
    DEFAULT_OPENAI_BASE_URL,
};

fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write yaml");
    file
}

fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    move |name| {
        pairs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| (*value).to_string())
    }
}

fn path_of(file: &tempfile::NamedTempFile) -> String {
    file.path().to_string_lossy().into_owned()
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.yaml");
    let config = load_config_with_env(&path.to_string_lossy(), lookup(&[])).expect("defaults");
    assert_eq!(config.server.port, 8000);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.upstream.base_url, DEFAULT_OPENAI_BASE_URL);
    assert_eq!(config.upstream.api_key, None);
    assert!(!config.features.stream_tool_arguments);
}

#[test]
fn strict_loader_requires_the_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.yaml");
    assert!(matches!(
        load_config(&path.to_string_lossy()),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn yaml_values_are_read() {
    let file = write_yaml(
        r#"
server:
  port: 9100
  base_path: /proxy
upstream:
  base_url: http://127.0.0.1:8080/v1
  api_key: sk-file
features:
  log_level: DEBUG
  stream_tool_arguments: true
  max_tag_payload_bytes: 4096
"#,
    );
    let config = load_config_with_env(&path_of(&file), lookup(&[])).expect("load");
    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.base_path, "/proxy");
    assert_eq!(config.upstream.base_url, "http://127.0.0.1:8080/v1");
    assert_eq!(config.upstream.api_key.as_deref(), Some("sk-file"));
    assert_eq!(config.features.log_level, "DEBUG");
    assert!(config.features.stream_tool_arguments);
    assert_eq!(config.features.max_tag_payload_bytes, 4096);
}

#[test]
fn invalid_yaml_is_an_error() {
    let file = write_yaml("server: [unclosed");
    assert!(matches!(
        load_config_with_env(&path_of(&file), lookup(&[])),
        Err(ConfigError::Yaml(_))
    ));
}

#[test]
fn environment_overrides_file_values() {
    let file = write_yaml("server:\n  port: 9100\nupstream:\n  api_key: sk-file\n");
    let config = load_config_with_env(
        &path_of(&file),
        lookup(&[
            ("OPENAI_API_KEY", "sk-env"),
            ("PORT", "7000"),
            ("HOST", "127.0.0.1"),
            ("LOG_LEVEL", "warning"),
        ]),
    )
    .expect("load");
    assert_eq!(config.upstream.api_key.as_deref(), Some("sk-env"));
    assert_eq!(config.server.port, 7000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.features.log_level, "warning");
}

#[test]
fn fireworks_key_takes_priority_and_keeps_openai_url() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.yaml");
    let config = load_config_with_env(
        &path.to_string_lossy(),
        lookup(&[("OPENAI_API_KEY", "sk-openai"), ("FIREWORKS_API_KEY", "fw-key")]),
    )
    .expect("load");
    assert_eq!(config.upstream.api_key.as_deref(), Some("fw-key"));
    assert_eq!(config.upstream.base_url, DEFAULT_OPENAI_BASE_URL);
}

#[test]
fn fireworks_only_switches_default_url() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.yaml");
    let config = load_config_with_env(
        &path.to_string_lossy(),
        lookup(&[("FIREWORKS_API_KEY", "fw-key")]),
    )
    .expect("load");
    assert_eq!(config.upstream.base_url, DEFAULT_FIREWORKS_BASE_URL);
}

#[test]
fn explicit_base_url_wins() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.yaml");
    let config = load_config_with_env(
        &path.to_string_lossy(),
        lookup(&[
            ("FIREWORKS_API_KEY", "fw-key"),
            ("OPENAI_BASE_URL", "http://localhost:1234/v1"),
        ]),
    )
    .expect("load");
    assert_eq!(config.upstream.base_url, "http://localhost:1234/v1");
}

#[test]
fn invalid_override_fails_validation() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.yaml");
    assert!(matches!(
        load_config_with_env(&path.to_string_lossy(), lookup(&[("PORT", "eighty")])),
        Err(ConfigError::Validation(_))
    ));
    assert!(matches!(
        load_config_with_env(
            &path.to_string_lossy(),
            lookup(&[("OPENAI_BASE_URL", "ftp://example.com")])
        ),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn bundled_example_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.yaml");
    let config = load_config(path).expect("example config loads");
    assert_eq!(config.server.port, 8000);
}
