//! Model-facing half of the dreams board.
//!
//! Text completion (extraction, SMART refinement, roadmaps) goes through an
//! [`AiClient`] wrapping any [`LlmProvider`]. Search and layout go through a
//! synchronous [`EmbeddingProvider`]. Both are built once by the caller and
//! passed in, so tests can substitute fakes.

mod client;
pub mod embeddings;
mod error;
mod extract;
mod http;
pub mod normalize;
pub mod projection;
mod prompts;
pub mod providers;
mod refine;
pub mod repair;
mod roadmap;
pub mod similarity;
mod types;

pub use client::AiClient;
pub use embeddings::{Embedder, EmbeddingError, EmbeddingProvider, HashEmbedder, OllamaEmbedder};
pub use error::AiError;
pub use extract::{DreamExtractor, ExtractError};
pub use projection::{LayoutMode, ProjectedPoint, Projection, SpatialProjector};
pub use providers::{
    ollama::OllamaProvider, openai_compatible::OpenAiCompatibleProvider, LlmProvider,
};
pub use refine::{refinement_from_output, GoalRefiner, RefineFailure, Refinement};
pub use repair::{ParseOutcome, RepairNote};
pub use roadmap::{milestones_from_output, RoadmapPlanner, DEFAULT_AGE, MAX_MILESTONES};
pub use similarity::{search_dreams, SearchHit, DEFAULT_SEARCH_LIMIT};
pub use types::{AiStream, ChatMessage, ChatRequest, ChatRole, ResponseFormat};

#[cfg(feature = "embeddings-local")]
pub use embeddings::LocalEmbedder;
