//! Process-wide state, assembled once at startup and shared by every
//! request handler. Owns the vector-store singleton's `init -> serve ->
//! shutdown` lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use compactor::HistoryCompactor;
use config::{AppConfig, ModelRegistry};
use domain::Result;
use factextractor::FactExtractor;
use llm::{EmbeddingClient, LlmClient};
use memory::{MemoryStore, VectorStoreGateway};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::history::ChatHistoryStore;
use crate::jobs::{JobSender, spawn_workers};

pub struct AppState {
    pub config: AppConfig,
    pub db: SqlitePool,
    pub history: ChatHistoryStore,
    pub memory_store: MemoryStore,
    pub vector_store: Arc<VectorStoreGateway>,
    pub chat_client: LlmClient,
    pub utility_client: LlmClient,
    pub model_registry: ModelRegistry,
    pub jobs: JobSender,
}

impl AppState {
    pub async fn init(config: AppConfig) -> Result<Arc<Self>> {
        let db = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&config.database.url)
            .await?;

        let history = ChatHistoryStore::new(db.clone());
        history.migrate().await?;

        let embedding_client = if config.rag.api_key.is_empty() {
            None
        } else {
            Some(EmbeddingClient::new(
                config.rag.api_url.clone(),
                config.rag.api_key.clone(),
                config.rag.embedding_model.clone(),
            ))
        };
        let snapshot_path = PathBuf::from(&config.rag.vector_db_path).join("vectors.jsonl");
        let vector_store = Arc::new(VectorStoreGateway::new(snapshot_path, embedding_client));
        vector_store.load().await?;
        vector_store.clone().spawn_flush_ticker();

        let memory_store = MemoryStore::new(db.clone(), vector_store.clone());
        memory_store.migrate().await?;

        let chat_client = LlmClient::new(config.llm.chat_api_url.clone(), config.llm.chat_api_key.clone());
        let utility_client = LlmClient::new(
            config.llm.utility_api_url.clone(),
            config.llm.utility_api_key.clone(),
        );

        let model_registry = load_model_registry(&config);

        let compactor = Arc::new(HistoryCompactor::new(
            Arc::new(history.clone()),
            utility_client.clone(),
            config.llm.utility_model.clone(),
        ));
        let fact_extractor = Arc::new(FactExtractor::new(
            utility_client.clone(),
            config.llm.utility_model.clone(),
            memory_store.clone(),
        ));
        let jobs = spawn_workers(compactor, fact_extractor);

        Ok(Arc::new(Self {
            config,
            db,
            history,
            memory_store,
            vector_store,
            chat_client,
            utility_client,
            model_registry,
            jobs,
        }))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.vector_store.shutdown().await
    }
}

/// `models.json` is optional; its absence just means every model falls
/// back to C9's inference/default path.
fn load_model_registry(config: &AppConfig) -> ModelRegistry {
    match ModelRegistry::load_from("models.json", config.server.max_model_context_length) {
        Ok(registry) => registry,
        Err(_) => ModelRegistry::empty(config.server.max_model_context_length),
    }
}
