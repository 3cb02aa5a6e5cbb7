//! Integration tests for tether-config

use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use temp_env::with_vars;
use tether_config::*;

#[test]
fn test_default_config_validation() {
    let config = TetherConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("TETHER_LOG_LEVEL", Some("debug")),
        ("TETHER_LOG_FORMAT", Some("json")),
        ("TETHER_WORKER_PROGRAM", Some("/usr/local/bin/shared-worker")),
        ("TETHER_WORKER_ARGS", Some("--loader loader.js")),
        ("TETHER_WORKER_EXEC_FLAGS", Some("--unhandled-rejections=strict")),
        ("TETHER_WORKER_MESSAGE_BUFFER", Some("64")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.workers.program,
            Some(PathBuf::from("/usr/local/bin/shared-worker"))
        );
        assert_eq!(config.workers.args, vec!["--loader", "loader.js"]);
        assert_eq!(
            config.workers.exec_flags,
            vec!["--unhandled-rejections=strict"]
        );
        assert_eq!(config.workers.message_buffer, 64);
    });
}

#[test]
fn test_invalid_env_values_are_rejected() {
    with_vars(vec![("TETHER_WORKER_MESSAGE_BUFFER", Some("lots"))], || {
        let result = ConfigLoader::new().from_env();
        assert!(matches!(result, Err(ConfigError::EnvError(_))));
    });

    with_vars(vec![("TETHER_WORKER_MESSAGE_BUFFER", Some("0"))], || {
        let result = ConfigLoader::new().from_env();
        assert!(matches!(result, Err(ConfigError::DomainError { .. })));
    });

    with_vars(vec![("TETHER_LOG_LEVEL", Some("verbose"))], || {
        let result = ConfigLoader::new().from_env();
        assert!(matches!(result, Err(ConfigError::EnvError(_))));
    });
}

#[test]
fn test_custom_prefix() {
    with_vars(vec![("MYAPP_LOG_LEVEL", Some("warn"))], || {
        let config = ConfigLoader::with_prefix("MYAPP").from_env().unwrap();
        assert_eq!(config.logging.level, LogLevel::Warn);
    });
}

#[test]
fn test_yaml_config_serialization() {
    let yaml = TetherConfig::generate_sample();

    let parsed: TetherConfig = serde_yaml::from_str(&yaml).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert_eq!(parsed.workers, SharedWorkerConfig::default());
}

#[test]
fn test_load_from_file_with_env_override() {
    let yaml = r#"
workers:
  exec_flags:
    - "--unhandled-rejections=strict"
  message_buffer: 32
  program: "/opt/worker"
  args: ["bootstrap.js"]

logging:
  level: warn
  format: compact
  include_location: true
"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    with_vars(vec![("TETHER_LOG_LEVEL", Some("trace"))], || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();

        assert_eq!(config.workers.message_buffer, 32);
        assert_eq!(config.workers.program, Some(PathBuf::from("/opt/worker")));
        assert_eq!(config.workers.args, vec!["bootstrap.js"]);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.logging.include_location);
        // Environment wins over the file
        assert_eq!(config.logging.level, LogLevel::Trace);
    });
}

#[test]
fn test_partial_yaml_uses_defaults() {
    let yaml = "workers:\n  message_buffer: 8\n";
    let config: TetherConfig = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.workers.message_buffer, 8);
    assert!(config.workers.exec_flags.is_empty());
    assert_eq!(config.logging.level, LogLevel::Info);
}

#[test]
fn test_missing_file_is_an_error() {
    let result = ConfigLoader::new().from_file("/nonexistent/tether.yaml");
    assert!(matches!(result, Err(ConfigError::FileReadError(_))));
}
