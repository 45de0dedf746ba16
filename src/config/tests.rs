use super::*;
use tempfile::TempDir;

#[test]
fn test_config_loads_defaults() {
    let config = Config::defaults().expect("Should load default config");

    assert_eq!(config.scanner.max_file_size_mb, 10);
    assert_eq!(config.scanner.thread_percentage, 75);
    assert_eq!(config.purge.message, "Initial commit");
    assert!(config.ignore_patterns.iter().any(|p| p == ".env"));
    assert!(config.signatures.iter().any(|s| s.id == "github-token"));
    assert!(config.signatures.iter().all(|s| s.replacement == DEFAULT_REPLACEMENT));
}

#[test]
fn test_default_config_compiles() {
    let config = Config::defaults().unwrap();
    let settings = Settings::from_config(&config).unwrap();
    assert_eq!(settings.signatures.len(), config.signatures.len());
    assert_eq!(settings.pool.max_blob_size, 10 * 1024 * 1024);
}

#[test]
fn test_repo_config_replaces_arrays() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("gitredact.toml"),
        r#"
ignore_patterns = ["*.secret"]

[scanner]
max_threads = 2

[[signatures]]
id = "custom"
literal = "hunter2"
replacement = "***"
"#,
    )
    .unwrap();

    let config = Config::load(dir.path(), None).unwrap();
    assert_eq!(config.ignore_patterns, vec!["*.secret".to_string()]);
    assert_eq!(config.signatures.len(), 1);
    assert_eq!(config.signatures[0].replacement, "***");
    assert_eq!(config.scanner.max_threads, 2);
    // Untouched keys keep their defaults.
    assert_eq!(config.scanner.thread_percentage, 75);
}

#[test]
fn test_yaml_repo_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("gitredact.yaml"),
        "purge:\n  message: \"Fresh start\"\n",
    )
    .unwrap();
    let config = Config::load(dir.path(), None).unwrap();
    assert_eq!(config.purge.message, "Fresh start");
}

#[test]
fn test_explicit_config_must_exist() {
    let dir = TempDir::new().unwrap();
    let err = Config::load(dir.path(), Some(&dir.path().join("missing.toml"))).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_explicit_json_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.json");
    std::fs::write(
        &path,
        r#"{"signatures": [{"id": "pw", "literal": "hunter2"}], "notify": {"events_file": "events.jsonl"}}"#,
    )
    .unwrap();
    let config = Config::load(dir.path(), Some(&path)).unwrap();
    assert_eq!(config.signatures[0].replacement, "REDACTED");
    assert_eq!(config.notify.events_file, Some(PathBuf::from("events.jsonl")));
}

#[test]
fn test_validate_rejects_bad_signature() {
    let config = Config::defaults().unwrap().with_signatures(vec![SignatureConfig {
        id: "broken".to_string(),
        pattern: Some("(".to_string()),
        literal: None,
        replacement: DEFAULT_REPLACEMENT.to_string(),
        description: String::new(),
    }]);
    assert!(matches!(config.validate(), Err(Error::Configuration(_))));
}

#[test]
fn test_validate_rejects_empty_signatures() {
    let config = Config::defaults().unwrap().with_signatures(Vec::new());
    assert!(config.validate().is_err());
}
