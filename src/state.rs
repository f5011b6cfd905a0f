use std::sync::Arc;

use crate::config::Config;
use crate::db::config::DbConfigError;
use crate::db::{DatabaseProxy, DbInitError, MemoryStore, Store};
use crate::services::conversation::ConversationManager;
use crate::services::evaluation::EvaluationEngine;
use crate::services::gateway::LlmGateway;
use crate::services::llm_provider::LLMProvider;
use crate::services::worksheet::WorksheetGenerator;

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    worksheets: WorksheetGenerator,
    evaluations: EvaluationEngine,
    conversations: ConversationManager,
    llm_model: Option<String>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>, gateway: LlmGateway) -> Self {
        let conversations = ConversationManager::new(gateway.clone(), Arc::clone(&store))
            .with_memory_window(config.memory_window)
            .with_lock_wait(config.lock_wait);

        Self {
            worksheets: WorksheetGenerator::new(gateway.clone(), Arc::clone(&store)),
            evaluations: EvaluationEngine::new(gateway, Arc::clone(&store)),
            conversations,
            store,
            config: Arc::new(config),
            llm_model: None,
        }
    }

    /// Wires the real provider and store. A missing `DATABASE_URL` selects
    /// the in-memory store; any other database failure is returned.
    pub async fn from_env(config: Config) -> Result<Self, DbInitError> {
        let store: Arc<dyn Store> = match DatabaseProxy::from_env().await {
            Ok(proxy) => proxy as Arc<dyn Store>,
            Err(DbInitError::Config(DbConfigError::Missing { key })) => {
                tracing::warn!(key, "database not configured, using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
            Err(err) => return Err(err),
        };

        let provider = LLMProvider::from_env();
        if !provider.is_available() {
            tracing::warn!("LLM provider not configured; model-backed requests will fail with an upstream error");
        }
        let model = provider.model_name().to_string();
        let timeout = provider.timeout();
        let gateway = LlmGateway::new(Arc::new(provider)).with_timeout(timeout);

        tracing::info!(store = store.backend_name(), %model, timeout_ms = timeout.as_millis() as u64, "state initialized");

        let mut state = Self::new(config, store, gateway);
        state.llm_model = Some(model);
        Ok(state)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn worksheets(&self) -> &WorksheetGenerator {
        &self.worksheets
    }

    pub fn evaluations(&self) -> &EvaluationEngine {
        &self.evaluations
    }

    pub fn conversations(&self) -> &ConversationManager {
        &self.conversations
    }

    pub fn llm_model(&self) -> Option<&str> {
        self.llm_model.as_deref()
    }
}
