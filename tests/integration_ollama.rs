#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Ollama client tests: mocked end-to-end syncs, plus checks against a local
// instance. Run the latter with: cargo test --test integration_ollama -- --ignored

use async_trait::async_trait;
use ragsync::config::{Config, OllamaConfig};
use ragsync::database::memory::MemoryVectorStore;
use ragsync::database::{SourceKey, VectorStore};
use ragsync::embeddings::chunking::{ChunkingConfig, chunk_content};
use ragsync::embeddings::{EmbeddingBackend, OllamaClient};
use ragsync::sync::{
    SessionStore, SourceMetadata, StatusRecorder, SyncConfig, SyncCoordinator, SyncOutcome,
    SyncStatusUpdate,
};
use serde_json::json;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const TEST_MODEL: &str = "nomic-embed-text:latest";
const DEFAULT_OLLAMA_HOST: &str = "localhost";
const DEFAULT_OLLAMA_PORT: u16 = 11434;

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

#[derive(Default)]
struct StatusLog(Mutex<Vec<SyncStatusUpdate>>);

#[async_trait]
impl StatusRecorder for StatusLog {
    async fn record_status(
        &self,
        _key: &SourceKey,
        update: &SyncStatusUpdate,
    ) -> ragsync::Result<()> {
        self.0
            .lock()
            .expect("status log should not be poisoned")
            .push(update.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for StatusLog {
    async fn delete_sessions_for_chatbot(
        &self,
        _tenant_id: i64,
        _chatbot_id: i64,
    ) -> ragsync::Result<u64> {
        Ok(0)
    }
}

fn mock_config(server: &MockServer) -> Config {
    Config {
        ollama: OllamaConfig {
            host: server.address().ip().to_string(),
            port: server.address().port(),
            model: TEST_MODEL.to_string(),
            batch_size: 2,
            embedding_dimension: 3,
            timeout_secs: 5,
            ..OllamaConfig::default()
        },
        sync: SyncConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            jitter_ratio: 0.0,
            ..SyncConfig::default()
        },
        ..Config::default()
    }
}

fn echo_embeddings(request: &Request) -> ResponseTemplate {
    let body: serde_json::Value =
        serde_json::from_slice(&request.body).expect("request body should be json");
    let count = body["input"].as_array().map_or(0, Vec::len);
    let embeddings: Vec<Vec<f32>> = (0..count).map(|i| vec![1.0, i as f32, 0.5]).collect();
    ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
}

fn coordinator_for(
    config: &Config,
    store: Arc<MemoryVectorStore>,
    log: Arc<StatusLog>,
) -> SyncCoordinator {
    let client = OllamaClient::new(config).expect("Failed to create Ollama client");
    SyncCoordinator::new(
        config,
        Arc::new(client),
        store,
        Arc::clone(&log) as Arc<dyn StatusRecorder>,
        log as Arc<dyn SessionStore>,
    )
}

#[tokio::test]
async fn mocked_sync_embeds_every_chunk() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(echo_embeddings)
        .mount(&server)
        .await;

    let config = mock_config(&server);
    let store = Arc::new(MemoryVectorStore::new());
    let coordinator = coordinator_for(&config, Arc::clone(&store), Arc::new(StatusLog::default()));

    let content = "Rust is a systems programming language. ".repeat(80);
    let expected = chunk_content(&content, &ChunkingConfig::default())
        .expect("should chunk")
        .chunks
        .len();
    assert!(expected > 2);

    let key = SourceKey::document(1, 42);
    let outcome = coordinator
        .request_sync(key, content, SourceMetadata::new(5, json!({ "filename": "rust.txt" })))
        .wait()
        .await;

    assert_eq!(
        outcome,
        SyncOutcome::Synced {
            chunks: expected as u64,
            truncated: false
        }
    );
    assert_eq!(
        store.count_by_key(&key).await.expect("should count"),
        expected as u64
    );
}

#[tokio::test]
async fn mocked_outage_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(echo_embeddings)
        .mount(&server)
        .await;

    let config = mock_config(&server);
    let store = Arc::new(MemoryVectorStore::new());
    let log = Arc::new(StatusLog::default());
    let coordinator = coordinator_for(&config, Arc::clone(&store), Arc::clone(&log));

    let outcome = coordinator
        .request_sync(
            SourceKey::link(1, 3),
            "Short page".to_string(),
            SourceMetadata::new(5, json!({ "url": "https://example.com" })),
        )
        .wait()
        .await;

    assert!(outcome.is_synced());
    let attempts: Vec<u32> = log
        .0
        .lock()
        .expect("status log should not be poisoned")
        .iter()
        .map(|u| u.attempt_count)
        .collect();
    assert_eq!(attempts, vec![1, 0]);
}

#[tokio::test]
async fn mocked_rejection_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "error": "model not found" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = mock_config(&server);
    let coordinator = coordinator_for(
        &config,
        Arc::new(MemoryVectorStore::new()),
        Arc::new(StatusLog::default()),
    );

    let outcome = coordinator
        .request_sync(
            SourceKey::document(1, 1),
            "Some text".to_string(),
            SourceMetadata::new(5, json!({})),
        )
        .wait()
        .await;

    assert!(matches!(outcome, SyncOutcome::Failed { attempts: 1, .. }));
}

fn create_integration_test_client() -> OllamaClient {
    let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
    let port = env::var("OLLAMA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_OLLAMA_PORT);
    let model = env::var("OLLAMA_MODEL").unwrap_or_else(|_| TEST_MODEL.to_string());

    let config = Config {
        ollama: OllamaConfig {
            host,
            port,
            model,
            batch_size: 5,
            ..OllamaConfig::default()
        },
        ..Config::default()
    };

    OllamaClient::new(&config)
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(60))
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_health_check() {
    init_test_tracing();
    let client = create_integration_test_client();

    let result = client.health_check();
    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );
}

#[tokio::test]
#[ignore = "requires a local Ollama instance"]
async fn real_ollama_batch_embeddings() {
    init_test_tracing();
    let client = create_integration_test_client();

    let texts: Vec<String> = [
        "Installing the toolchain",
        "Configuring the embedding model",
        "Syncing documents and links",
        "Searching chatbot knowledge",
        "Deleting a chatbot",
        "Retrying failed syncs",
        "Checking consistency",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect();

    let embeddings = client.embed(&texts).await.expect("should embed");
    info!("Generated {} embeddings", embeddings.len());

    assert_eq!(embeddings.len(), texts.len());
    assert!(embeddings.iter().all(|e| e.len() == 768));
    assert_ne!(embeddings[0], embeddings[1]);
}
