use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input};

use super::{Config, ConfigError, OllamaConfig};
use crate::sync::SyncConfig;

/// Prompt for Ollama and sync settings, then optionally save them
#[inline]
pub fn run_interactive_config(mut config: Config) -> Result<()> {
    println!("{}", style("ragsync Configuration Setup").bold().cyan());
    println!();

    println!("{}", style("Ollama Configuration").bold().yellow());
    println!("Configure the Ollama instance used to embed documents and links.");
    println!();

    configure_ollama(&mut config.ollama)?;

    println!();
    println!("{}", style("Sync Configuration").bold().yellow());
    configure_sync(&mut config.sync)?;

    println!();
    println!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        println!("{}", style("✓ Ollama connection successful!").green());
    } else {
        println!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        println!("You can continue, but sources will stay pending until Ollama is reachable.");
    }

    println!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        println!("{}", style("✓ Configuration saved successfully!").green());
        println!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        println!("Configuration not saved.");
    }

    Ok(())
}

/// Print the effective configuration
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", style("Current Configuration").bold().cyan());
    println!();

    println!("{}", style("Ollama Settings:").bold().yellow());
    println!("  Host: {}", style(&config.ollama.host).cyan());
    println!("  Port: {}", style(config.ollama.port).cyan());
    println!("  Model: {}", style(&config.ollama.model).cyan());
    println!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    println!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    match config.ollama_url() {
        Ok(url) => println!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => println!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    println!();
    println!("{}", style("Chunking:").bold().yellow());
    println!(
        "  Window: {} chars, overlap {} chars, at most {} chunks",
        config.chunking.target_chunk_size, config.chunking.overlap_size, config.chunking.max_chunks
    );

    println!();
    println!("{}", style("Sync:").bold().yellow());
    println!("  Max Attempts: {}", config.sync.max_attempts);
    println!(
        "  Backoff: {}ms..{}ms (jitter {:.0}%)",
        config.sync.initial_backoff_ms,
        config.sync.max_backoff_ms,
        config.sync.jitter_ratio * 100.0
    );
    println!(
        "  Timeouts: embed {}s, store {}s",
        config.sync.embedding_timeout_secs, config.sync.store_timeout_secs
    );
    println!("  Concurrent Syncs: {}", config.sync.max_concurrent_syncs);

    println!();
    println!(
        "{} top {} results, min score {:.2}",
        style("Search:").bold().yellow(),
        config.search.top_k,
        config.search.min_score
    );

    println!();
    println!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let current = ollama.clone();
    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            OllamaConfig {
                host: input.clone(),
                ..current.clone()
            }
            .validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_sync(sync: &mut SyncConfig) -> Result<()> {
    sync.max_attempts = Input::new()
        .with_prompt("Attempts per sync")
        .default(sync.max_attempts)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (1..=20).contains(input) {
                Ok(())
            } else {
                Err("Attempts must be between 1 and 20")
            }
        })
        .interact_text()?;

    sync.max_concurrent_syncs = Input::new()
        .with_prompt("Concurrent syncs")
        .default(sync.max_concurrent_syncs)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=256).contains(input) {
                Ok(())
            } else {
                Err("Concurrency must be between 1 and 256")
            }
        })
        .interact_text()?;

    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let Ok(base_url) = ollama.ollama_url() else {
        return false;
    };
    let Ok(url) = base_url.join("/api/version") else {
        return false;
    };

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(url.as_str()).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => (400..500).contains(&code),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ollama_for(server: &MockServer) -> OllamaConfig {
        OllamaConfig {
            host: server.address().ip().to_string(),
            port: server.address().port(),
            ..OllamaConfig::default()
        }
    }

    #[tokio::test]
    async fn connection_test_reaches_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/version"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"version":"0.5.0"}"#))
            .mount(&server)
            .await;

        let ollama = ollama_for(&server);
        let reachable = tokio::task::spawn_blocking(move || test_ollama_connection(&ollama))
            .await
            .expect("connection test should finish");
        assert!(reachable);
    }

    #[tokio::test]
    async fn connection_test_fails_without_server() {
        let server = MockServer::start().await;
        let ollama = ollama_for(&server);
        drop(server);

        let reachable = tokio::task::spawn_blocking(move || test_ollama_connection(&ollama))
            .await
            .expect("connection test should finish");
        assert!(!reachable);
    }
}
