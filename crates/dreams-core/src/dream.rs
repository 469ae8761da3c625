use serde::{Deserialize, Serialize};

use crate::DreamCategory;

/// Generate a fresh opaque record identity.
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The text a record is embedded as: `"{category}: {title}"`.
pub fn canonical_text(category: DreamCategory, title: &str) -> String {
    format!("{}: {}", category.label(), title.trim())
}

/// A single step on the way to a dream. Owned by its parent [`DreamEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    #[serde(default = "new_record_id")]
    pub id: String,
    pub title: String,
    pub target_year: i32,
    #[serde(default)]
    pub completed: bool,
}

impl Milestone {
    pub fn new(title: impl Into<String>, target_year: i32) -> Self {
        Self {
            id: new_record_id(),
            title: title.into(),
            target_year,
            completed: false,
        }
    }
}

/// The refined ("SMART") form of a dream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartGoal {
    pub specific: String,
    pub measurable: String,
    pub achievable: String,
    pub relevant: String,
    pub time_bound: String,
    pub polished_title: String,
}

impl SmartGoal {
    /// Empty facets, keeping the caller's title as the polished title.
    pub fn minimal(title: impl Into<String>) -> Self {
        Self {
            polished_title: title.into(),
            ..Self::default()
        }
    }

    pub fn has_facets(&self) -> bool {
        [
            &self.specific,
            &self.measurable,
            &self.achievable,
            &self.relevant,
            &self.time_bound,
        ]
        .iter()
        .any(|facet| !facet.trim().is_empty())
    }
}

/// A structurally valid goal candidate that has not been persisted yet.
///
/// This is exactly one element of the `{"dreams": [...]}` envelope the model is
/// asked to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DreamDraft {
    pub title: String,
    pub category: DreamCategory,
    pub suggested_target_year: i32,
}

impl DreamDraft {
    pub fn new(title: impl Into<String>, category: DreamCategory, suggested_target_year: i32) -> Self {
        Self {
            title: title.into(),
            category,
            suggested_target_year,
        }
    }

    pub fn canonical_text(&self) -> String {
        canonical_text(self.category, &self.title)
    }

    /// Assign an identity, producing a record ready for the store.
    pub fn into_entry(self) -> DreamEntry {
        DreamEntry {
            id: new_record_id(),
            title: self.title,
            category: self.category,
            suggested_target_year: self.suggested_target_year,
            completed: false,
            is_polished: false,
            smart_data: None,
            milestones: Vec::new(),
        }
    }
}

/// A persisted dream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DreamEntry {
    #[serde(default = "new_record_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: DreamCategory,
    pub suggested_target_year: i32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub is_polished: bool,
    #[serde(default)]
    pub smart_data: Option<SmartGoal>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

impl DreamEntry {
    pub fn canonical_text(&self) -> String {
        canonical_text(self.category, &self.title)
    }

    /// Apply a partial update in place. The identity never changes.
    pub fn apply(&mut self, update: DreamUpdate) {
        let DreamUpdate {
            title,
            category,
            suggested_target_year,
            completed,
            is_polished,
            smart_data,
            milestones,
        } = update;

        if let Some(title) = title {
            self.title = title;
        }
        if let Some(category) = category {
            self.category = category;
        }
        if let Some(year) = suggested_target_year {
            self.suggested_target_year = year;
        }
        if let Some(completed) = completed {
            self.completed = completed;
        }
        if let Some(is_polished) = is_polished {
            self.is_polished = is_polished;
        }
        if let Some(smart_data) = smart_data {
            self.smart_data = Some(smart_data);
        }
        if let Some(milestones) = milestones {
            self.milestones = milestones;
        }
    }
}

/// Partial replacement of a [`DreamEntry`].
///
/// Absent fields and explicit `null`s both deserialize to `None`, and `None` never
/// overwrites the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DreamUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<DreamCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_target_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_polished: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_data: Option<SmartGoal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestones: Option<Vec<Milestone>>,
}

impl DreamUpdate {
    pub fn is_empty(&self) -> bool {
        self == &DreamUpdate::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> DreamEntry {
        DreamEntry {
            id: "dream-1".to_string(),
            title: "Run a marathon".to_string(),
            category: DreamCategory::Health,
            suggested_target_year: 2027,
            completed: false,
            is_polished: false,
            smart_data: None,
            milestones: Vec::new(),
        }
    }

    #[test]
    fn canonical_text_puts_category_first() {
        assert_eq!(
            sample_entry().canonical_text(),
            "Health & Wellness: Run a marathon"
        );
    }

    #[test]
    fn explicit_null_in_update_is_a_no_op() {
        let update: DreamUpdate =
            serde_json::from_str(r#"{"title": null, "completed": true}"#).unwrap();
        let mut entry = sample_entry();
        entry.apply(update);

        assert_eq!(entry.title, "Run a marathon");
        assert!(entry.completed);
        assert_eq!(entry.id, "dream-1");
    }

    #[test]
    fn stored_entry_with_unknown_category_is_coerced() {
        let entry: DreamEntry = serde_json::from_str(
            r#"{"id": "x", "title": "Grow tomatoes", "category": "Gardening", "suggested_target_year": 2026}"#,
        )
        .unwrap();
        assert_eq!(entry.category, DreamCategory::Other);
        assert!(entry.milestones.is_empty());
        assert!(!entry.is_polished);
    }

    #[test]
    fn missing_id_gets_generated() {
        let entry: DreamEntry = serde_json::from_str(
            r#"{"title": "Visit Japan", "category": "Travel & Adventure", "suggested_target_year": 2028}"#,
        )
        .unwrap();
        assert!(!entry.id.is_empty());
    }

    #[test]
    fn draft_into_entry_starts_incomplete() {
        let entry = DreamDraft::new("Open a bakery", DreamCategory::Career, 2029).into_entry();
        assert_eq!(entry.title, "Open a bakery");
        assert!(!entry.completed);
        assert!(entry.smart_data.is_none());
    }

    #[test]
    fn empty_update_detects_no_fields() {
        assert!(DreamUpdate::default().is_empty());
        let update = DreamUpdate {
            completed: Some(false),
            ..DreamUpdate::default()
        };
        assert!(!update.is_empty());
    }
}
