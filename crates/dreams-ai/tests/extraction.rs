use std::collections::VecDeque;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dreams_ai::{
    AiClient, AiError, AiStream, ChatRequest, DreamExtractor, ExtractError, GoalRefiner,
    LlmProvider, OllamaProvider, RefineFailure, ResponseFormat, RoadmapPlanner,
};
use dreams_core::{DreamCategory, DreamDraft};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Replays canned answers in order and records every request it sees.
#[derive(Default)]
struct ScriptedProvider {
    answers: Mutex<VecDeque<Result<String, AiError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    fn new(answers: impl IntoIterator<Item = Result<String, AiError>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn formats(&self) -> Vec<ResponseFormat> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.format)
            .collect()
    }

    fn next_answer(&self, request: ChatRequest) -> Result<String, AiError> {
        self.requests.lock().unwrap().push(request);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AiError::UnexpectedResponse("script exhausted".into())))
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(
        &self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<String, AiError> {
        self.next_answer(request)
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<AiStream, AiError> {
        let answer = self.next_answer(request)?;
        let chunks: Vec<Result<String, AiError>> = answer
            .split_inclusive(' ')
            .map(|chunk| Ok(chunk.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

fn ok(text: &str) -> Result<String, AiError> {
    Ok(text.to_string())
}

fn extractor(provider: &Arc<ScriptedProvider>) -> DreamExtractor {
    DreamExtractor::new(AiClient::new(provider.clone(), 2), 2025)
}

#[tokio::test]
async fn marathon_and_bakery_yield_two_dated_drafts() {
    // The structured channel answers with prose, so the raw channel is used.
    let provider = ScriptedProvider::new([
        ok("Sure! Here are your dreams."),
        ok(r#"```json
{
  "dreams": [
    {"Title": "Run a marathon", "Category": "Health & Wellness", "Target Year": "2026"},
    {"title": "Start a bakery", "category": "career & business", "suggested_target_year": 2028,},
  ]
}
```"#),
    ]);

    let drafts = extractor(&provider)
        .extract(
            "I want to run a marathon and also start a bakery",
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].category, DreamCategory::Health);
    assert_eq!(drafts[0].category.label(), "Health & Wellness");
    assert_eq!(drafts[1].category.label(), "Career & Business");
    for draft in &drafts {
        assert!(!draft.title.trim().is_empty());
        assert!((1000..=9999).contains(&draft.suggested_target_year));
    }
    assert_eq!(drafts[0].suggested_target_year, 2026);
    assert_eq!(
        provider.formats(),
        vec![ResponseFormat::Json, ResponseFormat::Text]
    );
}

#[tokio::test]
async fn strict_envelope_round_trips_without_second_call() {
    let provider = ScriptedProvider::new([ok(
        r#"{"dreams": [{"title": "Visit Japan", "category": "Travel & Adventure", "suggested_target_year": 2027}]}"#,
    )]);

    let drafts = extractor(&provider)
        .extract("I'd love to see Japan", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        drafts,
        vec![DreamDraft::new(
            "Visit Japan",
            DreamCategory::Travel,
            2027
        )]
    );
    assert_eq!(provider.formats(), vec![ResponseFormat::Json]);
}

#[tokio::test]
async fn category_groups_yield_one_draft_per_entry() {
    let provider = ScriptedProvider::new([
        ok("not json"),
        ok(r#"{
            "Health & Wellness": [{"title": "Run a marathon"}],
            "Hobbies": ["Learn pottery", {"name": "Knit a sweater", "category": "Career & Business"}]
        }"#),
    ]);

    let drafts = extractor(&provider)
        .extract("marathon, pottery, knitting", CancellationToken::new())
        .await
        .unwrap();

    let summary: Vec<(&str, DreamCategory, i32)> = drafts
        .iter()
        .map(|draft| {
            (
                draft.title.as_str(),
                draft.category,
                draft.suggested_target_year,
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Run a marathon", DreamCategory::Health, 2026),
            ("Learn pottery", DreamCategory::Other, 2026),
            ("Knit a sweater", DreamCategory::Other, 2026),
        ]
    );
}

#[test]
fn lone_record_with_list_field_stays_one_record() {
    let provider = ScriptedProvider::new(Vec::<Result<String, AiError>>::new());
    let drafts = extractor(&provider)
        .drafts_from_raw(
            r#"{"title": "Run a marathon", "category": "Health & Wellness",
                "suggested_target_year": 2027, "tags": ["fitness", "outdoors"]}"#,
        )
        .unwrap();

    assert_eq!(
        drafts,
        vec![DreamDraft::new("Run a marathon", DreamCategory::Health, 2027)]
    );
}

#[test]
fn untitled_single_list_is_still_unwrapped() {
    let provider = ScriptedProvider::new(Vec::<Result<String, AiError>>::new());
    let drafts = extractor(&provider)
        .drafts_from_raw(r#"{"goals": ["Learn pottery", "Visit Japan"]}"#)
        .unwrap();

    let titles: Vec<&str> = drafts.iter().map(|draft| draft.title.as_str()).collect();
    assert_eq!(titles, ["Learn pottery", "Visit Japan"]);
}

#[tokio::test]
async fn unparseable_output_is_malformed() {
    let provider = ScriptedProvider::new([ok("nope"), ok("I cannot help with that.")]);
    let err = extractor(&provider)
        .extract("whatever", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::MalformedOutput(_)), "{err:?}");
}

#[tokio::test]
async fn output_without_titles_has_no_valid_records() {
    let provider = ScriptedProvider::new([
        ok(r#"{"dreams": []}"#),
        ok(r#"{"dreams": [{"category": "Hobbies"}, {"title": "   "}]}"#),
    ]);
    let err = extractor(&provider)
        .extract("whatever", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::NoValidRecords), "{err:?}");
}

#[tokio::test]
async fn structured_channel_error_falls_back_to_raw_channel() {
    let provider = ScriptedProvider::new([
        Err(AiError::UnexpectedResponse("format not supported".into())),
        ok(r#"[{"title": "Write a novel", "category": "Creative Arts"}]"#),
    ]);
    let drafts = extractor(&provider)
        .extract("novel", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].suggested_target_year, 2026);
}

#[tokio::test]
async fn timeout_is_upstream_unavailable_without_retry() {
    let provider = ScriptedProvider::new([Err(AiError::Timeout)]);
    let err = extractor(&provider)
        .extract("anything", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::UpstreamUnavailable(_)), "{err:?}");
    assert_eq!(provider.formats().len(), 1);
}

#[tokio::test]
async fn refused_connection_is_upstream_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let port = listener.local_addr().expect("listener addr").port();
    drop(listener);

    let provider = OllamaProvider::new(
        Url::parse(&format!("http://127.0.0.1:{port}")).unwrap(),
        "llama3",
        Duration::from_secs(2),
    )
    .unwrap();
    let extractor = DreamExtractor::new(AiClient::new(Arc::new(provider), 1), 2025);

    let err = extractor
        .extract("run a marathon", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::UpstreamUnavailable(_)), "{err:?}");
}

#[tokio::test]
async fn refine_recovers_truncated_output() {
    let provider = ScriptedProvider::new([ok(
        r#"Here you go: {"Specific": "Finish a full marathon", "Time-Bound": "by 2026", "title": "Run the Berlin Marathon""#,
    )]);
    let refiner = GoalRefiner::new(AiClient::new(provider.clone(), 1));

    let refinement = refiner
        .refine("Run a marathon", CancellationToken::new())
        .await;

    assert!(!refinement.is_degraded());
    assert_eq!(refinement.goal.specific, "Finish a full marathon");
    assert_eq!(refinement.goal.time_bound, "by 2026");
    assert_eq!(refinement.goal.polished_title, "Run the Berlin Marathon");
    assert_eq!(refinement.goal.measurable, "");
    assert_eq!(provider.formats(), vec![ResponseFormat::Json]);
}

#[tokio::test]
async fn refine_degrades_when_model_is_down() {
    let provider = ScriptedProvider::new([Err(AiError::Timeout)]);
    let refiner = GoalRefiner::new(AiClient::new(provider, 1));

    let refinement = refiner
        .refine("Run a marathon", CancellationToken::new())
        .await;

    assert!(matches!(
        refinement.degraded,
        Some(RefineFailure::UpstreamUnavailable(_))
    ));
    assert_eq!(refinement.goal.polished_title, "Run a marathon");
    assert!(!refinement.goal.has_facets());
}

#[tokio::test]
async fn roadmap_stream_yields_raw_chunks() {
    let answer = r#"[{"title": "Register", "target_year": 2025}]"#;
    let provider = ScriptedProvider::new([ok(answer)]);
    let planner = RoadmapPlanner::new(AiClient::new(provider, 1));
    let dream = DreamDraft::new("Run a marathon", DreamCategory::Health, 2026).into_entry();

    let mut stream = planner
        .stream(&dream, 30, CancellationToken::new())
        .await
        .unwrap();
    let mut text = String::new();
    let mut chunks = 0;
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk.unwrap());
        chunks += 1;
    }

    assert_eq!(text, answer);
    assert!(chunks > 1);
}

#[tokio::test]
async fn roadmap_generate_dates_milestones() {
    let provider = ScriptedProvider::new([ok(
        r#"{"milestones": [
            {"title": "Build a base", "target_year": 2025},
            {"title": "Half marathon", "target_date": "2025-10-01"},
            {"title": "Race day"}
        ]}"#,
    )]);
    let planner = RoadmapPlanner::new(AiClient::new(provider, 1));
    let dream = DreamDraft::new("Run a marathon", DreamCategory::Health, 2026).into_entry();

    let milestones = planner
        .generate(&dream, 30, CancellationToken::new())
        .await
        .unwrap();

    let years: Vec<i32> = milestones.iter().map(|m| m.target_year).collect();
    assert_eq!(years, vec![2025, 2025, 2026]);
}
