//! Retrieval-augmented answering.
//!
//! The engine retrieves context for a question, composes a prompt, and asks
//! the generation backend for an answer. Retrieval problems are real errors;
//! generation problems are folded into the response value so batch and
//! interactive flows keep going.

use crate::error::{GenerationError, Result};
use crate::query::ollama::{GenerateResponse, OllamaClient, OllamaConfig, model_matches};
use crate::retrieval::context_retriever::{ContextRetriever, RetrievedContext, SourceRef};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a knowledgeable assistant. Your task is to provide helpful, accurate, and practical answers based on the provided context.\n\nGuidelines:\n1. Answer questions based primarily on the provided context\n2. Be clear and concise in your responses\n3. If the context doesn't contain relevant information, say so clearly\n4. Provide practical, actionable advice when possible\n5. If you're uncertain about something, express that uncertainty";

const NO_CONTEXT_RESPONSE: &str =
    "I couldn't find relevant information in the knowledge base to answer your question.";

/// Abstracts the LLM server so the engine can be tested without one.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> std::result::Result<GenerateResponse, GenerationError>;
    async fn verify_connection(&self) -> std::result::Result<Vec<String>, GenerationError>;
    fn model_name(&self) -> &str;
}

#[async_trait]
impl GenerationBackend for OllamaClient {
    async fn generate(&self, prompt: &str) -> std::result::Result<GenerateResponse, GenerationError> {
        OllamaClient::generate(self, prompt).await
    }

    async fn verify_connection(&self) -> std::result::Result<Vec<String>, GenerationError> {
        OllamaClient::verify_connection(self).await
    }

    fn model_name(&self) -> &str {
        &self.config().model
    }
}

/// Token counts and timings reported by the server, nanosecond durations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationStats {
    pub eval_count: u64,
    pub eval_duration: u64,
    pub total_duration: u64,
}

/// The full outcome of one question, including the context that backed it.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub response: String,
    pub context_used: String,
    pub sources: Vec<SourceRef>,
    pub context_length: usize,
    pub total_chunks: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_stats: Option<GenerationStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    fn no_context(query: &str) -> Self {
        Self {
            query: query.to_string(),
            response: NO_CONTEXT_RESPONSE.to_string(),
            context_used: String::new(),
            sources: Vec::new(),
            context_length: 0,
            total_chunks: 0,
            success: false,
            generation_stats: None,
            error: Some("No relevant context found".to_string()),
        }
    }
}

pub struct QueryEngine {
    retriever: ContextRetriever,
    backend: Arc<dyn GenerationBackend>,
    system_prompt: String,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("model", &self.backend.model_name())
            .finish()
    }
}

impl QueryEngine {
    pub fn new(
        retriever: ContextRetriever,
        config: OllamaConfig,
    ) -> std::result::Result<Self, GenerationError> {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let backend = Arc::new(OllamaClient::new(config)?);
        Ok(Self {
            retriever,
            backend,
            system_prompt,
        })
    }

    /// Variant taking any generation backend.
    pub fn with_backend(
        retriever: ContextRetriever,
        backend: Arc<dyn GenerationBackend>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            retriever,
            backend,
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Verify the server is reachable. A missing model is only a warning;
    /// generation will surface the failure if it actually matters.
    pub async fn connect(&self) -> std::result::Result<(), GenerationError> {
        let models = self.backend.verify_connection().await?;
        let model = self.backend.model_name();
        if models.iter().any(|name| model_matches(name, model)) {
            tracing::info!("Connected to Ollama; model {model} is available");
        } else {
            tracing::warn!(
                "Model {model} not found on the Ollama server (available: {models:?})"
            );
        }
        Ok(())
    }

    /// Answer one question with retrieved context.
    pub async fn query(&self, question: &str) -> Result<QueryResponse> {
        tracing::debug!("Retrieving context for query: {question}");
        let retrieved = self.retriever.retrieve(question).await?;
        if retrieved.is_empty() {
            tracing::debug!("No usable context; skipping generation");
            return Ok(QueryResponse::no_context(question));
        }

        let prompt = self.build_prompt(question, &retrieved.context);
        match self.backend.generate(&prompt).await {
            Ok(generated) => Ok(self.success_response(question, retrieved, generated)),
            Err(e) => {
                tracing::error!("Generation failed: {e}");
                Ok(self.failure_response(question, retrieved, e))
            }
        }
    }

    /// Answer questions one at a time, collecting every outcome.
    pub async fn batch_query(&self, questions: &[String]) -> Result<Vec<QueryResponse>> {
        let mut responses = Vec::with_capacity(questions.len());
        for (i, question) in questions.iter().enumerate() {
            tracing::info!("Processing query {}/{}: {question}", i + 1, questions.len());
            responses.push(self.query(question).await?);
        }
        Ok(responses)
    }

    fn build_prompt(&self, question: &str, context: &str) -> String {
        format!(
            "System: {}\n\nContext:\n{}\n\nUser Question: {}\n\n\
             Please provide a helpful response based on the context above. \
             If the context doesn't contain relevant information for the question, \
             please say so clearly.",
            self.system_prompt, context, question
        )
    }

    fn success_response(
        &self,
        question: &str,
        retrieved: RetrievedContext,
        generated: GenerateResponse,
    ) -> QueryResponse {
        QueryResponse {
            query: question.to_string(),
            response: generated.response,
            context_used: retrieved.context,
            sources: retrieved.sources,
            context_length: retrieved.context_length,
            total_chunks: retrieved.total_chunks,
            success: true,
            generation_stats: Some(GenerationStats {
                eval_count: generated.eval_count.unwrap_or(0),
                eval_duration: generated.eval_duration.unwrap_or(0),
                total_duration: generated.total_duration.unwrap_or(0),
            }),
            error: None,
        }
    }

    fn failure_response(
        &self,
        question: &str,
        retrieved: RetrievedContext,
        error: GenerationError,
    ) -> QueryResponse {
        QueryResponse {
            query: question.to_string(),
            response: format!("Error generating response: {error}"),
            context_used: retrieved.context,
            sources: retrieved.sources,
            context_length: retrieved.context_length,
            total_chunks: retrieved.total_chunks,
            success: false,
            generation_stats: None,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrievalError;
    use crate::retrieval::context_retriever::RetrieverConfig;
    use crate::storage::{ChunkFilter, ChunkRecord, ScoredChunk, SimilaritySearch};
    use std::sync::Mutex;

    struct StubIndex {
        results: Vec<ScoredChunk>,
        ready: bool,
    }

    #[async_trait]
    impl SimilaritySearch for StubIndex {
        async fn search_with_score(
            &self,
            _query: &str,
            k: usize,
            _filter: Option<&ChunkFilter>,
        ) -> anyhow::Result<Vec<ScoredChunk>> {
            let mut results = self.results.clone();
            results.truncate(k);
            Ok(results)
        }

        async fn ready(&self) -> anyhow::Result<bool> {
            Ok(self.ready)
        }
    }

    /// Records every prompt it is asked to complete.
    struct MockBackend {
        prompts: Arc<Mutex<Vec<String>>>,
        models: Vec<String>,
        fail: bool,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                prompts: Arc::new(Mutex::new(Vec::new())),
                models: vec!["mistral:latest".to_string()],
                fail: false,
            }
        }
    }

    #[async_trait]
    impl GenerationBackend for MockBackend {
        async fn generate(
            &self,
            prompt: &str,
        ) -> std::result::Result<GenerateResponse, GenerationError> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            if self.fail {
                return Err(GenerationError::Timeout { seconds: 120 });
            }
            Ok(GenerateResponse {
                response: "Mocked answer.".to_string(),
                done: true,
                eval_count: Some(42),
                eval_duration: Some(1_000_000_000),
                total_duration: Some(1_200_000_000),
            })
        }

        async fn verify_connection(&self) -> std::result::Result<Vec<String>, GenerationError> {
            Ok(self.models.clone())
        }

        fn model_name(&self) -> &str {
            "mistral:latest"
        }
    }

    fn make_hit(chunk_id: &str, content: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: ChunkRecord {
                id: None,
                chunk_id: chunk_id.to_string(),
                parent_doc_id: "doc-1".to_string(),
                chunk_index: 0,
                total_chunks: 1,
                content: content.to_string(),
                chunk_size: content.chars().count(),
                source: "faq.json".to_string(),
                category: "tax".to_string(),
                original_length: content.chars().count(),
                embedding: None,
            },
            score,
        }
    }

    fn engine_with(
        results: Vec<ScoredChunk>,
        ready: bool,
        backend: Arc<MockBackend>,
        system_prompt: Option<String>,
    ) -> QueryEngine {
        let index = Arc::new(StubIndex { results, ready });
        let retriever = ContextRetriever::new(index, RetrieverConfig::default()).unwrap();
        QueryEngine::with_backend(retriever, backend, system_prompt)
    }

    #[tokio::test]
    async fn test_query_success_carries_context_and_stats() {
        let backend = Arc::new(MockBackend::new());
        let engine = engine_with(
            vec![make_hit("doc-1_chunk_0", "The standard deduction lowers taxable income.", 0.9)],
            true,
            backend.clone(),
            None,
        );

        let response = engine.query("what is the standard deduction").await.unwrap();
        assert!(response.success);
        assert_eq!(response.response, "Mocked answer.");
        assert_eq!(response.query, "what is the standard deduction");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].chunk_id, "doc-1_chunk_0");
        assert_eq!(response.total_chunks, 1);
        assert!(response.context_used.contains("standard deduction"));
        assert_eq!(response.context_length, response.context_used.chars().count());
        assert_eq!(
            response.generation_stats,
            Some(GenerationStats {
                eval_count: 42,
                eval_duration: 1_000_000_000,
                total_duration: 1_200_000_000,
            })
        );
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_prompt_carries_system_context_and_question() {
        let backend = Arc::new(MockBackend::new());
        let engine = engine_with(
            vec![make_hit("doc-1_chunk_0", "Roth contributions are post-tax.", 0.8)],
            true,
            backend.clone(),
            Some("Answer tersely.".to_string()),
        );

        engine.query("how are Roth accounts taxed?").await.unwrap();

        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        let prompt = &prompts[0];
        assert!(prompt.starts_with("System: Answer tersely.\n\nContext:\n"));
        assert!(prompt.contains("Roth contributions are post-tax."));
        assert!(prompt.contains("\n\nUser Question: how are Roth accounts taxed?\n\n"));
        assert!(prompt.ends_with("please say so clearly."));
    }

    #[tokio::test]
    async fn test_empty_context_skips_generation() {
        let backend = Arc::new(MockBackend::new());
        let engine = engine_with(Vec::new(), true, backend.clone(), None);

        let response = engine.query("anything at all").await.unwrap();
        assert!(!response.success);
        assert_eq!(
            response.response,
            "I couldn't find relevant information in the knowledge base to answer your question."
        );
        assert_eq!(response.error.as_deref(), Some("No relevant context found"));
        assert!(response.sources.is_empty());
        assert!(response.context_used.is_empty());
        assert!(backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_preserves_context() {
        let backend = Arc::new(MockBackend {
            fail: true,
            ..MockBackend::new()
        });
        let engine = engine_with(
            vec![make_hit("doc-1_chunk_0", "Index funds track a market index.", 0.7)],
            true,
            backend.clone(),
            None,
        );

        let response = engine.query("what is an index fund").await.unwrap();
        assert!(!response.success);
        assert!(response.response.starts_with("Error generating response:"));
        assert!(response.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(response.sources.len(), 1);
        assert!(response.context_used.contains("Index funds"));
        assert!(response.generation_stats.is_none());
    }

    #[tokio::test]
    async fn test_retrieval_error_propagates() {
        let backend = Arc::new(MockBackend::new());
        let engine = engine_with(
            vec![make_hit("doc-1_chunk_0", "anything", 0.9)],
            false,
            backend.clone(),
            None,
        );

        let err = engine.query("question").await.unwrap_err();
        assert!(matches!(err, RetrievalError::IndexUnavailable { .. }));
        assert!(backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_query_processes_all() {
        let backend = Arc::new(MockBackend::new());
        let engine = engine_with(
            vec![make_hit("doc-1_chunk_0", "Budgets track spending.", 0.9)],
            true,
            backend.clone(),
            None,
        );

        let questions = vec!["first question".to_string(), "second question".to_string()];
        let responses = engine.batch_query(&questions).await.unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].query, "first question");
        assert_eq!(responses[1].query, "second question");
        assert!(responses.iter().all(|r| r.success));
        assert_eq!(backend.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_connect_warns_on_missing_model() {
        let backend = Arc::new(MockBackend {
            models: vec!["llama3:8b".to_string()],
            ..MockBackend::new()
        });
        let engine = engine_with(Vec::new(), true, backend, None);

        engine.connect().await.unwrap();
        assert!(logs_contain("not found on the Ollama server"));
    }

    #[test]
    fn test_default_system_prompt_mentions_context() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("provided context"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("Guidelines:"));
    }
}
