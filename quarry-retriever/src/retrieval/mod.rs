//! Index building and context retrieval.

pub mod context_retriever;
pub mod index_builder;

pub use context_retriever::{
    ContextRetriever, ContextSummary, RetrievedContext, RetrieverConfig, SearchFilter, SourceRef,
};
pub use index_builder::{BuildStats, IndexBuilder, IndexBuilderConfig};
