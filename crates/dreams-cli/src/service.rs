//! The operations the dreams board exposes, independent of any transport.

use std::sync::Arc;

use dreams_ai::{
    search_dreams, AiClient, AiError, AiStream, DreamExtractor, EmbeddingError, EmbeddingProvider,
    ExtractError, GoalRefiner, Projection, RefineFailure, RoadmapPlanner, SearchHit,
    SpatialProjector,
};
use dreams_config::DreamsConfig;
use dreams_core::{new_record_id, DreamDraft, DreamEntry, DreamUpdate, Milestone, SmartGoal};
use dreams_store::{DocumentStore, JsonFileStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    Unavailable,
    InvalidInput,
    NotFound,
    Internal,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("language model unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("dream not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn kind(&self) -> ServiceErrorKind {
        match self {
            ServiceError::Unavailable(_) => ServiceErrorKind::Unavailable,
            ServiceError::InvalidInput(_) => ServiceErrorKind::InvalidInput,
            ServiceError::NotFound(_) => ServiceErrorKind::NotFound,
            ServiceError::Internal(_) => ServiceErrorKind::Internal,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ServiceErrorKind::Internal => 2,
            ServiceErrorKind::Unavailable => 3,
            ServiceErrorKind::InvalidInput => 4,
            ServiceErrorKind::NotFound => 5,
        }
    }

    fn from_ai(err: AiError, context: &str) -> Self {
        if err.is_unavailable() {
            return ServiceError::Unavailable(err.to_string());
        }
        tracing::error!(target: "dreams.cli", error = %err, "{context} failed");
        ServiceError::Internal(format!("{context} failed: {err}"))
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        tracing::error!(target: "dreams.cli", error = %err, "data store failure");
        ServiceError::Internal(err.to_string())
    }
}

impl From<ExtractError> for ServiceError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::UpstreamUnavailable(err) => ServiceError::Unavailable(err.to_string()),
            err @ (ExtractError::MalformedOutput(_) | ExtractError::NoValidRecords) => {
                ServiceError::InvalidInput(err.to_string())
            }
            ExtractError::Provider(err) => ServiceError::from_ai(err, "language model request"),
            ExtractError::Cancelled => ServiceError::Internal("request cancelled".into()),
        }
    }
}

/// Result of [`DreamService::polish`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolishOutcome {
    pub goal: SmartGoal,
    /// Whether the refinement was written back to the dream.
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

pub struct DreamService {
    store: Arc<dyn DocumentStore>,
    extractor: DreamExtractor,
    refiner: GoalRefiner,
    planner: RoadmapPlanner,
    embeddings: EmbeddingProvider,
    projector: SpatialProjector,
    default_limit: usize,
}

impl DreamService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        client: AiClient,
        reference_year: i32,
        embeddings: EmbeddingProvider,
    ) -> Self {
        Self {
            store,
            extractor: DreamExtractor::new(client.clone(), reference_year),
            refiner: GoalRefiner::new(client.clone()),
            planner: RoadmapPlanner::new(client),
            embeddings,
            projector: SpatialProjector::default(),
            default_limit: dreams_ai::DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_projector(mut self, projector: SpatialProjector) -> Self {
        self.projector = projector;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    /// Wire up the JSON file store, the configured completion backend and the
    /// configured embedding backend.
    ///
    /// Must be called outside of an async runtime: provider-backed embedders use a
    /// blocking HTTP client.
    pub fn from_config(config: &DreamsConfig) -> Result<Self, ServiceError> {
        let store = Arc::new(JsonFileStore::new(&config.storage.data_file));
        let client = AiClient::from_config(&config.ai)
            .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
        let embeddings = EmbeddingProvider::from_config(&config.ai);

        Ok(Self::new(store, client, config.ai.reference_year(), embeddings)
            .with_projector(SpatialProjector::new(config.layout.radius))
            .with_default_limit(config.search.default_limit))
    }

    pub fn embeddings(&self) -> &EmbeddingProvider {
        &self.embeddings
    }

    pub async fn analyze(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<Vec<DreamDraft>, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidInput("nothing to analyze".into()));
        }
        let drafts = self.extractor.extract(text, cancel).await?;
        tracing::info!(target: "dreams.cli", count = drafts.len(), "extracted dreams");
        Ok(drafts)
    }

    /// Persist `dreams`, minting identities where they are missing or malformed.
    pub fn save_batch(&self, dreams: Vec<DreamEntry>) -> Result<Vec<DreamEntry>, ServiceError> {
        let dreams: Vec<DreamEntry> = dreams
            .into_iter()
            .map(|mut dream| {
                if dream.id.is_empty() || dream.id.chars().any(char::is_whitespace) {
                    dream.id = new_record_id();
                }
                dream
            })
            .collect();
        self.store.append(dreams.clone())?;
        tracing::info!(target: "dreams.cli", count = dreams.len(), "saved dreams");
        Ok(dreams)
    }

    pub fn list(&self) -> Result<Vec<DreamEntry>, ServiceError> {
        Ok(self.store.list_all()?)
    }

    pub fn get(&self, id: &str) -> Result<DreamEntry, ServiceError> {
        self.store
            .get(id)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    pub fn update(&self, id: &str, update: DreamUpdate) -> Result<DreamEntry, ServiceError> {
        self.store
            .update(id, update)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    pub fn delete(&self, id: &str) -> Result<(), ServiceError> {
        if self.store.delete(id)? {
            Ok(())
        } else {
            Err(ServiceError::NotFound(id.to_string()))
        }
    }

    /// Rewrite a dream as a SMART goal.
    ///
    /// Only a successful refinement is persisted. When the model is unreachable the
    /// call fails; any other degraded refinement is returned as is.
    pub async fn polish(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<PolishOutcome, ServiceError> {
        let dream = self.get(id)?;
        let refinement = self.refiner.refine(&dream.title, cancel).await;

        match refinement.degraded {
            Some(RefineFailure::UpstreamUnavailable(reason)) => {
                Err(ServiceError::Unavailable(reason))
            }
            Some(failure) => Ok(PolishOutcome {
                goal: refinement.goal,
                persisted: false,
                degraded: Some(failure.to_string()),
            }),
            None => {
                let goal = refinement.goal;
                self.update(
                    id,
                    DreamUpdate {
                        title: Some(goal.polished_title.clone()),
                        is_polished: Some(true),
                        smart_data: Some(goal.clone()),
                        ..DreamUpdate::default()
                    },
                )?;
                Ok(PolishOutcome {
                    goal,
                    persisted: true,
                    degraded: None,
                })
            }
        }
    }

    /// Generate milestones for a dream and store them on it.
    pub async fn roadmap(
        &self,
        id: &str,
        age: u32,
        cancel: CancellationToken,
    ) -> Result<Vec<Milestone>, ServiceError> {
        let dream = self.get(id)?;
        let milestones = self.planner.generate(&dream, age, cancel).await?;
        self.update(
            id,
            DreamUpdate {
                milestones: Some(milestones.clone()),
                ..DreamUpdate::default()
            },
        )?;
        Ok(milestones)
    }

    /// The model's roadmap answer as it arrives. Nothing is persisted.
    pub async fn roadmap_stream(
        &self,
        id: &str,
        age: u32,
        cancel: CancellationToken,
    ) -> Result<AiStream, ServiceError> {
        let dream = self.get(id)?;
        self.planner
            .stream(&dream, age, cancel)
            .await
            .map_err(|err| ServiceError::from_ai(err, "roadmap stream"))
    }

    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchHit>, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ServiceError::InvalidInput("search query is empty".into()));
        }
        let limit = limit.unwrap_or(self.default_limit);
        let dreams = self.store.list_all()?;

        search_dreams(&self.embeddings, query, &dreams, limit).map_err(|err| {
            tracing::error!(target: "dreams.cli", error = %err, "search failed");
            ServiceError::Internal(format!("search failed: {err}"))
        })
    }

    pub fn layout(&self) -> Result<Projection, ServiceError> {
        let dreams = self.store.list_all()?;
        self.projector
            .project(&self.embeddings, &dreams)
            .map_err(|err: EmbeddingError| {
                tracing::error!(target: "dreams.cli", error = %err, "layout failed");
                ServiceError::Internal(format!("layout failed: {err}"))
            })
    }
}
