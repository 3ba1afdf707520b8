use super::*;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join("config.toml");

        let original_config = Config {
            ollama: OllamaConfig {
                protocol: "https".to_string(),
                host: "test-host".to_string(),
                port: 8080,
                model: "test-model".to_string(),
                batch_size: 32,
                ..OllamaConfig::default()
            },
            base_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        let toml_content = toml::to_string_pretty(&original_config)
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let loaded_config = Config::load(temp_dir.path()).expect("should load config");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [ollama
            host = "localhost"
            port = "invalid_port"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn show_config_prints_without_error() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config = Config {
            base_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        assert!(show_config(&config).is_ok());
    }
}
