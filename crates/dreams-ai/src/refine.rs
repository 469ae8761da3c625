use dreams_core::SmartGoal;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::normalize::{normalize_object, value_as_text, SMART_FIELDS};
use crate::repair::{pad_closing_braces, ParseOutcome, RepairNote};
use crate::types::ResponseFormat;
use crate::{prompts, AiClient};

/// Why a refinement fell back to [`SmartGoal::minimal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefineFailure {
    /// The model could not be reached.
    UpstreamUnavailable(String),
    /// The model answered with an error.
    Upstream(String),
    /// The answer could not be parsed, even after brace padding.
    Unparseable(String),
}

impl std::fmt::Display for RefineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefineFailure::UpstreamUnavailable(msg) => write!(f, "language model unavailable: {msg}"),
            RefineFailure::Upstream(msg) => write!(f, "language model error: {msg}"),
            RefineFailure::Unparseable(msg) => write!(f, "unparseable refinement: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Refinement {
    pub goal: SmartGoal,
    /// `Some` when `goal` is the minimal fallback.
    pub degraded: Option<RefineFailure>,
    pub notes: Vec<RepairNote>,
}

impl Refinement {
    fn degraded(title: &str, failure: RefineFailure) -> Self {
        Self {
            goal: SmartGoal::minimal(title),
            degraded: Some(failure),
            notes: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Rewrites a dream title as a SMART goal.
#[derive(Clone)]
pub struct GoalRefiner {
    client: AiClient,
}

impl GoalRefiner {
    pub fn new(client: AiClient) -> Self {
        Self { client }
    }

    /// Never fails; problems are reported through [`Refinement::degraded`].
    pub async fn refine(&self, title: &str, cancel: CancellationToken) -> Refinement {
        let request = prompts::refinement_request(title).with_format(ResponseFormat::Json);
        match self.client.chat(request, cancel).await {
            Ok(output) => refinement_from_output(title, &output),
            Err(err) if err.is_unavailable() => {
                tracing::warn!(target: "dreams.ai", error = %err, "refinement model unavailable");
                Refinement::degraded(title, RefineFailure::UpstreamUnavailable(err.to_string()))
            }
            Err(err) => {
                tracing::warn!(target: "dreams.ai", error = %err, "refinement request failed");
                Refinement::degraded(title, RefineFailure::Upstream(err.to_string()))
            }
        }
    }
}

/// Parse model output into a refinement for `title`.
pub fn refinement_from_output(title: &str, output: &str) -> Refinement {
    let (value, notes) = match pad_closing_braces(output) {
        ParseOutcome::Strict(value) => (value, Vec::new()),
        ParseOutcome::Repaired(value, notes) => {
            tracing::debug!(target: "dreams.ai", ?notes, "repaired truncated refinement");
            (value, notes)
        }
        ParseOutcome::Failed(reason) => {
            tracing::warn!(target: "dreams.ai", %reason, "refinement output unparseable");
            return Refinement::degraded(title, RefineFailure::Unparseable(reason));
        }
    };

    let Value::Object(object) = value else {
        return Refinement::degraded(
            title,
            RefineFailure::Unparseable("refinement is not a JSON object".into()),
        );
    };

    let fields = normalize_object(SMART_FIELDS, &object);
    let facet = |name: &str| fields.get(name).and_then(value_as_text).unwrap_or_default();
    let polished_title = fields
        .get("polished_title")
        .and_then(value_as_text)
        .unwrap_or_else(|| title.to_string());

    Refinement {
        goal: SmartGoal {
            specific: facet("specific"),
            measurable: facet("measurable"),
            achievable: facet("achievable"),
            relevant: facet("relevant"),
            time_bound: facet("time_bound"),
            polished_title,
        },
        degraded: None,
        notes,
    }
}
