use dreams_core::{DreamCategory, DreamDraft};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::normalize::{find_key, normalize_object, value_as_text, value_as_year, DRAFT_FIELDS};
use crate::repair::{parse_tolerant, ParseOutcome};
use crate::types::ResponseFormat;
use crate::{prompts, AiClient, AiError};

const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1000..=9999;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("language model is unavailable: {0}")]
    UpstreamUnavailable(AiError),
    #[error("could not read the model output ({0}); try rephrasing")]
    MalformedOutput(String),
    #[error("no valid dreams found in the model output; try rephrasing")]
    NoValidRecords,
    #[error("language model request failed: {0}")]
    Provider(AiError),
    #[error("extraction cancelled")]
    Cancelled,
}

/// Turns free-form text into [`DreamDraft`]s.
#[derive(Clone)]
pub struct DreamExtractor {
    client: AiClient,
    reference_year: i32,
}

impl DreamExtractor {
    pub fn new(client: AiClient, reference_year: i32) -> Self {
        Self {
            client,
            reference_year,
        }
    }

    /// Year assigned to drafts the model did not date.
    pub fn default_target_year(&self) -> i32 {
        self.reference_year + 1
    }

    pub async fn extract(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<Vec<DreamDraft>, ExtractError> {
        let request = prompts::extraction_request(text, self.reference_year);

        match self
            .client
            .chat(request.clone().with_format(ResponseFormat::Json), cancel.clone())
            .await
        {
            Ok(output) => match parse_strict(&output) {
                Some(drafts) => return Ok(drafts),
                None => tracing::debug!(
                    target: "dreams.ai",
                    "structured output failed strict validation; retrying on the raw channel"
                ),
            },
            Err(AiError::Cancelled) => return Err(ExtractError::Cancelled),
            Err(err) if err.is_unavailable() => return Err(ExtractError::UpstreamUnavailable(err)),
            Err(err) => tracing::warn!(
                target: "dreams.ai",
                error = %err,
                "structured extraction request failed; retrying on the raw channel"
            ),
        }

        let raw = match self.client.chat(request, cancel).await {
            Ok(raw) => raw,
            Err(AiError::Cancelled) => return Err(ExtractError::Cancelled),
            Err(err) if err.is_unavailable() => return Err(ExtractError::UpstreamUnavailable(err)),
            Err(err) => {
                tracing::error!(target: "dreams.ai", error = %err, "raw extraction request failed");
                return Err(ExtractError::Provider(err));
            }
        };

        self.drafts_from_raw(&raw)
    }

    /// The repair half of the cascade, on already-fetched raw output.
    pub fn drafts_from_raw(&self, raw: &str) -> Result<Vec<DreamDraft>, ExtractError> {
        let value = match parse_tolerant(raw) {
            ParseOutcome::Strict(value) => value,
            ParseOutcome::Repaired(value, notes) => {
                tracing::debug!(target: "dreams.ai", ?notes, "repaired raw extraction output");
                value
            }
            ParseOutcome::Failed(reason) => {
                tracing::warn!(target: "dreams.ai", %reason, "raw extraction output is unparseable");
                return Err(ExtractError::MalformedOutput(reason));
            }
        };

        let candidates = candidates(value)?;
        let total = candidates.len();
        let drafts: Vec<DreamDraft> = candidates
            .into_iter()
            .filter_map(|candidate| self.draft_from_candidate(candidate))
            .collect();

        if drafts.len() < total {
            tracing::debug!(
                target: "dreams.ai",
                discarded = total - drafts.len(),
                "discarded drafts without a title"
            );
        }
        if drafts.is_empty() {
            return Err(ExtractError::NoValidRecords);
        }
        Ok(drafts)
    }

    fn draft_from_candidate(&self, candidate: Candidate) -> Option<DreamDraft> {
        let Candidate { value, group } = candidate;
        match value {
            Value::String(title) => {
                let title = title.trim();
                (!title.is_empty()).then(|| {
                    DreamDraft::new(
                        title,
                        group.unwrap_or(DreamCategory::Other),
                        self.default_target_year(),
                    )
                })
            }
            Value::Object(object) => {
                let fields = normalize_object(DRAFT_FIELDS, &object);
                let title = fields.get("title").and_then(value_as_text)?;
                let category = group.unwrap_or_else(|| {
                    fields
                        .get("category")
                        .and_then(value_as_text)
                        .map(|label| DreamCategory::from_label_or_other(&label))
                        .unwrap_or(DreamCategory::Other)
                });
                let year = fields
                    .get("suggested_target_year")
                    .and_then(value_as_year)
                    .filter(|year| YEAR_RANGE.contains(year))
                    .unwrap_or_else(|| self.default_target_year());
                Some(DreamDraft::new(title, category, year))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictEnvelope {
    dreams: Vec<StrictDraft>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictDraft {
    title: String,
    category: String,
    suggested_target_year: i32,
}

/// Exact-schema parse: every label known, every title non-empty, every year four digits.
fn parse_strict(output: &str) -> Option<Vec<DreamDraft>> {
    let envelope: StrictEnvelope = serde_json::from_str(output.trim()).ok()?;
    if envelope.dreams.is_empty() {
        return None;
    }
    envelope
        .dreams
        .into_iter()
        .map(|draft| {
            let category = DreamCategory::parse_label(&draft.category)?;
            let valid = !draft.title.trim().is_empty()
                && YEAR_RANGE.contains(&draft.suggested_target_year);
            valid.then(|| DreamDraft::new(draft.title, category, draft.suggested_target_year))
        })
        .collect()
}

struct Candidate {
    value: Value,
    /// Category implied by an enclosing grouping key.
    group: Option<DreamCategory>,
}

impl Candidate {
    fn flat(value: Value) -> Self {
        Self { value, group: None }
    }
}

fn candidates(value: Value) -> Result<Vec<Candidate>, ExtractError> {
    match value {
        Value::Array(items) => Ok(items.into_iter().map(Candidate::flat).collect()),
        Value::Object(object) => Ok(candidates_from_object(object)),
        other => Err(ExtractError::MalformedOutput(format!(
            "expected a JSON object or array, got {}",
            json_kind(&other)
        ))),
    }
}

fn candidates_from_object(object: Map<String, Value>) -> Vec<Candidate> {
    if let Some(dreams) = find_key(&object, "dreams") {
        return match dreams {
            Value::Array(items) => items.iter().cloned().map(Candidate::flat).collect(),
            Value::Object(_) => vec![Candidate::flat(dreams.clone())],
            _ => Vec::new(),
        };
    }

    if !object.values().any(Value::is_array) {
        // A lone record, e.g. `{"title": ..., "category": ...}`.
        return vec![Candidate::flat(Value::Object(object))];
    }

    // A titled record whose list fields are not category labels (`"tags": [...]`)
    // is still one record.
    let titled = normalize_object(DRAFT_FIELDS, &object)
        .get("title")
        .and_then(value_as_text)
        .is_some();
    let has_label_list = object
        .iter()
        .any(|(key, value)| value.is_array() && DreamCategory::parse_label(key).is_some());
    if titled && !has_label_list {
        return vec![Candidate::flat(Value::Object(object))];
    }

    let lists: Vec<(&String, &Vec<Value>)> = object
        .iter()
        .filter_map(|(key, value)| value.as_array().map(|items| (key, items)))
        .collect();

    // A single list is only a category group when its key is a known label.
    let grouped = match lists.as_slice() {
        [(key, _)] => DreamCategory::parse_label(key).is_some(),
        _ => true,
    };

    if !grouped {
        let (_, items) = lists[0];
        return items.iter().cloned().map(Candidate::flat).collect();
    }

    tracing::debug!(target: "dreams.ai", groups = lists.len(), "interpreting output as category groups");
    lists
        .into_iter()
        .flat_map(|(key, items)| {
            let category = DreamCategory::from_label_or_other(key);
            items.iter().cloned().map(move |value| Candidate {
                value,
                group: Some(category),
            })
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
