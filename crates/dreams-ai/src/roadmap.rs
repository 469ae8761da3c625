use dreams_core::{DreamEntry, Milestone};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::extract::ExtractError;
use crate::normalize::{find_key, normalize_object, value_as_text, value_as_year, MILESTONE_FIELDS};
use crate::repair::{parse_tolerant, ParseOutcome};
use crate::types::AiStream;
use crate::{prompts, AiClient, AiError};

/// Assumed age when the caller does not give one.
pub const DEFAULT_AGE: u32 = 30;
/// Milestones beyond this many are dropped.
pub const MAX_MILESTONES: usize = 5;

/// Breaks a dream into dated milestones.
#[derive(Clone)]
pub struct RoadmapPlanner {
    client: AiClient,
}

impl RoadmapPlanner {
    pub fn new(client: AiClient) -> Self {
        Self { client }
    }

    /// The model's raw answer, chunk by chunk.
    pub async fn stream(
        &self,
        dream: &DreamEntry,
        age: u32,
        cancel: CancellationToken,
    ) -> Result<AiStream, AiError> {
        self.client
            .chat_stream(prompts::roadmap_request(dream, age), cancel)
            .await
    }

    pub async fn generate(
        &self,
        dream: &DreamEntry,
        age: u32,
        cancel: CancellationToken,
    ) -> Result<Vec<Milestone>, ExtractError> {
        let output = match self
            .client
            .chat(prompts::roadmap_request(dream, age), cancel)
            .await
        {
            Ok(output) => output,
            Err(AiError::Cancelled) => return Err(ExtractError::Cancelled),
            Err(err) if err.is_unavailable() => return Err(ExtractError::UpstreamUnavailable(err)),
            Err(err) => {
                tracing::error!(target: "dreams.ai", error = %err, "roadmap request failed");
                return Err(ExtractError::Provider(err));
            }
        };
        milestones_from_output(dream, &output)
    }
}

/// Parse a roadmap answer. Accepts a bare array, `{"milestones": [...]}` and
/// `{"roadmap": {"milestones": [...]}}`.
pub fn milestones_from_output(
    dream: &DreamEntry,
    output: &str,
) -> Result<Vec<Milestone>, ExtractError> {
    let value = match parse_tolerant(output) {
        ParseOutcome::Strict(value) => value,
        ParseOutcome::Repaired(value, notes) => {
            tracing::debug!(target: "dreams.ai", ?notes, "repaired roadmap output");
            value
        }
        ParseOutcome::Failed(reason) => return Err(ExtractError::MalformedOutput(reason)),
    };

    let milestones: Vec<Milestone> = milestone_items(&value)
        .into_iter()
        .filter_map(|item| milestone_from_value(item, dream.suggested_target_year))
        .take(MAX_MILESTONES)
        .collect();

    if milestones.is_empty() {
        return Err(ExtractError::NoValidRecords);
    }
    Ok(milestones)
}

fn milestone_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(object) => {
            if let Some(roadmap) = find_key(object, "roadmap") {
                return milestone_items(roadmap);
            }
            match find_key(object, "milestones") {
                Some(Value::Array(items)) => items.iter().collect(),
                Some(_) => Vec::new(),
                None => vec![value],
            }
        }
        _ => Vec::new(),
    }
}

fn milestone_from_value(value: &Value, fallback_year: i32) -> Option<Milestone> {
    match value {
        Value::String(title) => {
            let title = title.trim();
            (!title.is_empty()).then(|| Milestone::new(title, fallback_year))
        }
        Value::Object(object) => {
            let fields = normalize_object(MILESTONE_FIELDS, object);
            let title = fields.get("title").and_then(value_as_text)?;
            let year = ["target_year", "target_date"]
                .iter()
                .find_map(|field| {
                    fields
                        .get(*field)
                        .and_then(value_as_year)
                        .filter(|year| (1000..=9999).contains(year))
                })
                .unwrap_or(fallback_year);
            Some(Milestone::new(title, year))
        }
        _ => None,
    }
}
