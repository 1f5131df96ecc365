//! Context assembly for retrieval-augmented generation.
//!
//! A [`ContextRetriever`] turns a query into a single context string: it
//! searches the index for the best-scoring chunks, drops those below the
//! score threshold, and joins the rest best-first under a character budget.
//! When a chunk would overflow the budget it is either truncated at a word
//! boundary (if enough room remains) or dropped, and assembly stops either
//! way. Finding nothing is an ordinary outcome, not an error: callers get an
//! empty context with an explanatory message.

use crate::error::{Result, RetrievalError};
use crate::storage::{ChunkFilter, ScoredChunk, SimilaritySearch};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 4000;
pub const DEFAULT_DIVERSE_POOL_K: usize = 10;
pub const DEFAULT_DIVERSITY_THRESHOLD: f32 = 0.7;
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 30;

const CONTEXT_JOINER: &str = "\n\n";
const JOINER_LEN: usize = CONTEXT_JOINER.len();
const TRUNCATION_MARKER: &str = "...";
/// A truncated chunk shorter than this is not worth including.
const MIN_PARTIAL_CHUNK: usize = 100;
const EMPTY_RESULT_MESSAGE: &str = "No relevant documents found";

/// Tuning knobs for retrieval and context assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Number of chunks to retrieve
    pub top_k: usize,
    /// Chunks scoring below this are dropped
    pub min_score_threshold: f32,
    /// Context budget in characters
    pub max_context_length: usize,
    /// Candidate pool size for diverse retrieval
    pub diverse_pool_k: usize,
    /// Word-overlap similarity at or above which a chunk counts as a
    /// near-duplicate during diverse retrieval
    pub diversity_threshold: f32,
    /// Include parent document fields on source references
    pub include_metadata: bool,
    /// Upper bound on a single index search
    pub search_timeout_secs: u64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score_threshold: 0.0,
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
            diverse_pool_k: DEFAULT_DIVERSE_POOL_K,
            diversity_threshold: DEFAULT_DIVERSITY_THRESHOLD,
            include_metadata: true,
            search_timeout_secs: DEFAULT_SEARCH_TIMEOUT_SECS,
        }
    }
}

impl RetrieverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_score_threshold(mut self, threshold: f32) -> Self {
        self.min_score_threshold = threshold;
        self
    }

    pub fn with_max_context_length(mut self, max_context_length: usize) -> Self {
        self.max_context_length = max_context_length;
        self
    }

    pub fn with_diversity_threshold(mut self, threshold: f32) -> Self {
        self.diversity_threshold = threshold;
        self
    }

    pub fn with_include_metadata(mut self, include_metadata: bool) -> Self {
        self.include_metadata = include_metadata;
        self
    }

    pub fn with_search_timeout(mut self, seconds: u64) -> Self {
        self.search_timeout_secs = seconds;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RetrievalError::invalid_config("top_k must be greater than zero"));
        }
        if self.max_context_length == 0 {
            return Err(RetrievalError::invalid_config(
                "max_context_length must be greater than zero",
            ));
        }
        if self.diverse_pool_k == 0 {
            return Err(RetrievalError::invalid_config(
                "diverse_pool_k must be greater than zero",
            ));
        }
        if !self.min_score_threshold.is_finite() {
            return Err(RetrievalError::invalid_config(
                "min_score_threshold must be finite",
            ));
        }
        if !(0.0..=1.0).contains(&self.diversity_threshold) {
            return Err(RetrievalError::invalid_config(
                "diversity_threshold must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

/// Metadata equality filters for retrieval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub category: Option<String>,
    pub source: Option<String>,
}

impl SearchFilter {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Default::default()
        }
    }

    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    fn to_chunk_filter(&self) -> ChunkFilter {
        ChunkFilter {
            category: self.category.clone(),
            source: self.source.clone(),
            ..Default::default()
        }
    }
}

/// Provenance for one chunk that made it into an assembled context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub source: String,
    pub category: String,
    pub similarity_score: f32,
    /// Characters of this chunk included in the context (may be fewer than
    /// the stored chunk when it was truncated to fit)
    pub chunk_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_doc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
}

/// An assembled context with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedContext {
    pub context: String,
    pub sources: Vec<SourceRef>,
    /// Number of chunks that contributed to the context
    pub total_chunks: usize,
    /// Context length in characters
    pub context_length: usize,
    /// Set when retrieval found nothing usable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RetrievedContext {
    /// The "found nothing" value. Deliberately not an error.
    pub fn empty() -> Self {
        Self {
            context: String::new(),
            sources: Vec::new(),
            total_chunks: 0,
            context_length: 0,
            message: Some(EMPTY_RESULT_MESSAGE.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_chunks == 0
    }
}

/// Compact description of what a query would retrieve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSummary {
    pub query: String,
    pub total_chunks: usize,
    pub context_length: usize,
    /// Distinct sources grouped by category
    pub sources_by_category: BTreeMap<String, Vec<String>>,
}

/// Retrieves score-ranked chunks and assembles budgeted context strings.
///
/// Every retrieval is read-only and deterministic: the same query against
/// the same index produces the same context.
pub struct ContextRetriever {
    index: Arc<dyn SimilaritySearch>,
    config: RetrieverConfig,
}

impl ContextRetriever {
    pub fn new(index: Arc<dyn SimilaritySearch>, config: RetrieverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { index, config })
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Retrieve and assemble context for `query`.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievedContext> {
        self.retrieve_inner(query, None).await
    }

    /// Like [`retrieve`](Self::retrieve), restricted to chunks matching
    /// `filter`. Filtering happens in the index, before scoring.
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        filter: &SearchFilter,
    ) -> Result<RetrievedContext> {
        self.retrieve_inner(query, Some(filter.to_chunk_filter())).await
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        filter: Option<ChunkFilter>,
    ) -> Result<RetrievedContext> {
        let hits = self.search(query, self.config.top_k, filter.as_ref()).await?;
        let kept = self.apply_threshold(hits);
        if kept.is_empty() {
            tracing::debug!("No chunks passed the score threshold");
            return Ok(RetrievedContext::empty());
        }
        Ok(self.assemble(kept))
    }

    /// Retrieve from a wider candidate pool, dropping chunks whose word sets
    /// nearly duplicate an already-selected chunk.
    pub async fn retrieve_diverse(&self, query: &str) -> Result<RetrievedContext> {
        let hits = self.search(query, self.config.diverse_pool_k, None).await?;
        let kept = self.apply_threshold(hits);
        if kept.is_empty() {
            return Ok(RetrievedContext::empty());
        }
        Ok(self.assemble(self.select_diverse(kept)))
    }

    /// Retrieve for a space-joined keyword list.
    pub async fn search_by_keywords(&self, keywords: &[String]) -> Result<RetrievedContext> {
        let query = keywords.join(" ");
        self.retrieve(&query).await
    }

    /// Summarize what `query` retrieves without returning the context body.
    pub async fn context_summary(&self, query: &str) -> Result<ContextSummary> {
        let retrieved = self.retrieve(query).await?;
        let mut sources_by_category: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for source in &retrieved.sources {
            let entry = sources_by_category.entry(source.category.clone()).or_default();
            if !entry.contains(&source.source) {
                entry.push(source.source.clone());
            }
        }
        Ok(ContextSummary {
            query: query.to_string(),
            total_chunks: retrieved.total_chunks,
            context_length: retrieved.context_length,
            sources_by_category,
        })
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        if !self.index.ready().await.map_err(RetrievalError::Index)? {
            return Err(RetrievalError::unavailable(
                "index is not built or has no embedded chunks",
            ));
        }
        let timeout = Duration::from_secs(self.config.search_timeout_secs);
        let results = tokio::time::timeout(timeout, self.index.search_with_score(query, k, filter))
            .await
            .map_err(|_| RetrievalError::Timeout {
                seconds: self.config.search_timeout_secs,
            })?
            .map_err(RetrievalError::Index)?;
        tracing::debug!("Search returned {} chunks", results.len());
        Ok(results)
    }

    fn apply_threshold(&self, hits: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let threshold = self.config.min_score_threshold;
        let total = hits.len();
        let kept: Vec<ScoredChunk> = hits
            .into_iter()
            .filter(|hit| hit.score >= threshold)
            .collect();
        if kept.len() < total {
            tracing::debug!(
                "Score threshold {} dropped {} of {} chunks",
                threshold,
                total - kept.len(),
                total
            );
        }
        kept
    }

    /// Join chunk contents best-first under the character budget. The final
    /// context never exceeds the budget by more than the truncation marker.
    fn assemble(&self, hits: Vec<ScoredChunk>) -> RetrievedContext {
        let budget = self.config.max_context_length;
        let mut parts: Vec<String> = Vec::new();
        let mut sources: Vec<SourceRef> = Vec::new();
        let mut used = 0usize;
        for hit in hits {
            let content = hit.chunk.content.trim();
            if content.is_empty() {
                continue;
            }
            let content_chars = content.chars().count();
            let joiner_chars = if parts.is_empty() { 0 } else { JOINER_LEN };
            if used + joiner_chars + content_chars > budget {
                let remaining = budget.saturating_sub(used + joiner_chars);
                if remaining > MIN_PARTIAL_CHUNK {
                    let truncated = truncate_at_word_boundary(content, remaining);
                    let part = format!("{truncated}{TRUNCATION_MARKER}");
                    sources.push(self.source_ref(&hit, part.chars().count()));
                    parts.push(part);
                }
                // Budget exhausted: nothing after this point is considered.
                break;
            }
            used += joiner_chars + content_chars;
            parts.push(content.to_string());
            sources.push(self.source_ref(&hit, content_chars));
        }
        if sources.is_empty() {
            return RetrievedContext::empty();
        }
        let context = parts.join(CONTEXT_JOINER);
        let context_length = context.chars().count();
        let total_chunks = sources.len();
        tracing::debug!(
            "Assembled context from {} chunks ({} characters)",
            total_chunks,
            context_length
        );
        RetrievedContext {
            context,
            sources,
            total_chunks,
            context_length,
            message: None,
        }
    }

    /// Greedy selection: walk hits best-first, keeping a chunk unless its
    /// word overlap with any kept chunk reaches the diversity threshold.
    fn select_diverse(&self, hits: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let mut selected: Vec<ScoredChunk> = Vec::new();
        for hit in hits {
            if selected.len() >= self.config.top_k {
                break;
            }
            let near_duplicate = selected.iter().any(|kept| {
                word_overlap(&kept.chunk.content, &hit.chunk.content)
                    >= self.config.diversity_threshold
            });
            if near_duplicate {
                tracing::debug!("Dropping near-duplicate chunk {}", hit.chunk.chunk_id);
                continue;
            }
            selected.push(hit);
        }
        selected
    }

    /// `included_size` is the character count of the content that actually
    /// entered the context, which is smaller than the stored chunk when the
    /// content was trimmed or truncated.
    fn source_ref(&self, hit: &ScoredChunk, included_size: usize) -> SourceRef {
        let chunk = &hit.chunk;
        let mut source = SourceRef {
            chunk_id: chunk.chunk_id.clone(),
            source: chunk.source.clone(),
            category: chunk.category.clone(),
            similarity_score: hit.score,
            chunk_size: included_size,
            parent_doc_id: None,
            chunk_index: None,
            total_chunks: None,
        };
        if self.config.include_metadata {
            source.parent_doc_id = Some(chunk.parent_doc_id.clone());
            source.chunk_index = Some(chunk.chunk_index);
            source.total_chunks = Some(chunk.total_chunks);
        }
        source
    }
}

/// First `max_chars` characters of `content`, cut back to the last space so
/// no word is split.
fn truncate_at_word_boundary(content: &str, max_chars: usize) -> &str {
    let prefix = char_prefix(content, max_chars);
    match prefix.rfind(' ') {
        Some(idx) if idx > 0 => &prefix[..idx],
        _ => prefix,
    }
}

fn char_prefix(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

/// Jaccard similarity between the lowercase word sets of two texts. Zero
/// when either text has no words.
fn word_overlap(a: &str, b: &str) -> f32 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f32 / union as f32
}
