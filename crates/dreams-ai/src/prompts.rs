use dreams_core::{DreamCategory, DreamEntry};

use crate::types::{ChatMessage, ChatRequest};

fn category_list() -> String {
    DreamCategory::ALL
        .iter()
        .map(|category| format!("- {}", category.label()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn extraction_request(text: &str, reference_year: i32) -> ChatRequest {
    let system = format!(
        "You are an expert life coach. Extract distinct dreams/goals from the user's text.\n\
         For each dream, categorize it into EXACTLY one of these categories:\n\
         {categories}\n\n\
         Provide a realistic target year for achieving it based on the nature of the goal \
         (assume the current year is {reference_year}).\n\n\
         RETURN ONLY JSON matching this structure exactly:\n\
         {{\"dreams\": [{{\"title\": \"Short title\", \"category\": \"Category Name\", \
         \"suggested_target_year\": {example_year}}}]}}",
        categories = category_list(),
        example_year = reference_year + 5,
    );

    ChatRequest {
        messages: vec![ChatMessage::system(system), ChatMessage::user(text)],
        ..ChatRequest::default()
    }
}

pub fn refinement_request(title: &str) -> ChatRequest {
    let system = "Transform the following dream into a SMART goal \
        (Specific, Measurable, Achievable, Relevant, Time-bound).\n\
        Also provide a \"polished_title\" that is more professional and clear.\n\
        RETURN ONLY JSON with the keys \"specific\", \"measurable\", \"achievable\", \
        \"relevant\", \"time_bound\" and \"polished_title\".";

    ChatRequest {
        messages: vec![
            ChatMessage::system(system),
            ChatMessage::user(format!("Dream: {title}")),
        ],
        ..ChatRequest::default()
    }
}

pub fn roadmap_request(dream: &DreamEntry, age: u32) -> ChatRequest {
    let system = format!(
        "Generate a roadmap of 3-5 milestones for this dream.\n\
         The user's current age is {age}. Consider their stage of life.\n\
         Each milestone needs a \"title\" and a \"target_year\".\n\
         RETURN ONLY a JSON array of milestones."
    );

    ChatRequest {
        messages: vec![
            ChatMessage::system(system),
            ChatMessage::user(format!(
                "Dream: {} (Target Year: {})",
                dream.title, dream.suggested_target_year
            )),
        ],
        ..ChatRequest::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_lists_every_category_and_year() {
        let request = extraction_request("run a marathon", 2026);
        let system = &request.messages[0].content;
        for category in DreamCategory::ALL {
            assert!(system.contains(category.label()));
        }
        assert!(system.contains("2026"));
        assert!(system.contains(r#"{"dreams": [{"title""#));
        assert_eq!(request.messages[1].content, "run a marathon");
    }
}
