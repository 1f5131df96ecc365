//! Text embedding for the quarry retrieval pipeline.
//!
//! Wraps fastembed's bundled sentence-transformer models behind the
//! [`EmbeddingProvider`] trait so the rest of the pipeline never depends on
//! a concrete backend. Initialized models are cached process-wide and all
//! inference runs on blocking threads, keeping async callers responsive.
//!
//! ```no_run
//! use quarry_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # tokio_test::block_on(async {
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//! let embedding = provider.embed_text("How are capital gains taxed?").await?;
//! println!("{} dimensions", embedding.len());
//! # Ok::<(), quarry_embed::EmbedError>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod provider;

pub use config::{DEFAULT_BATCH_SIZE, DEFAULT_MODEL, EmbedConfig};
pub use error::{EmbedError, Result};
pub use provider::{
    EmbeddingProvider, EmbeddingResult, FastEmbedProvider, convert_to_f16, validate_embedding,
};
