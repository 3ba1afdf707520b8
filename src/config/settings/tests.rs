use super::*;
use serial_test::serial;
use tempfile::TempDir;

fn config_in(dir: &TempDir) -> Config {
    Config {
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.model, "nomic-embed-text:latest");
    assert_eq!(config.chunking.target_chunk_size, 1000);
    assert_eq!(config.chunking.overlap_size, 200);
    assert_eq!(config.sync.max_attempts, 3);
    assert_eq!(config.search.top_k, 5);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.sync.max_attempts = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidMaxAttempts(0))
    ));

    let mut invalid_config = config.clone();
    invalid_config.sync.initial_backoff_ms = 60_000;
    invalid_config.sync.max_backoff_ms = 1_000;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidBackoff(60_000, 1_000))
    ));

    let mut invalid_config = config;
    invalid_config.sync.jitter_ratio = 1.5;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn chunking_overlap_must_leave_room_to_advance() {
    let mut config = Config::default();
    config.chunking.target_chunk_size = 400;
    config.chunking.overlap_size = 200;

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidOverlapSize(200, 400))
    ));

    config.chunking.overlap_size = 199;
    assert!(config.validate().is_ok());
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let mut parsed_config: Config =
        toml::from_str(&toml_str).expect("should parse toml correctly");
    parsed_config.base_dir = config.base_dir.clone();
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [sync]
        max_attempts = 5
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.sync.max_attempts, 5);
    assert_eq!(parsed.sync.initial_backoff_ms, SyncConfig::default().initial_backoff_ms);
    assert_eq!(parsed.ollama, OllamaConfig::default());
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.sync, SyncConfig::default());
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = config_in(&temp_dir);
    config.sync.max_attempts = 4;
    config.search.min_score = 0.5;

    config.save().expect("should save config");
    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[search]\ntop_k = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn derived_paths() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = config_in(&temp_dir);

    assert_eq!(config.database_path(), temp_dir.path().join("metadata.db"));
    assert_eq!(config.vector_database_path(), temp_dir.path().join("vectors"));
}

#[test]
#[serial]
fn base_dir_env_override() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialized with every other test touching the environment
    unsafe {
        env::set_var(HOME_ENV_VAR, temp_dir.path());
    }

    let resolved = Config::default_base_dir();

    // SAFETY: see above
    unsafe {
        env::remove_var(HOME_ENV_VAR);
    }

    assert_eq!(
        resolved.expect("should resolve base dir"),
        temp_dir.path().to_path_buf()
    );
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_model("new-model".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_model(String::new()).is_err());
    assert!(config.set_batch_size(0).is_err());
}
