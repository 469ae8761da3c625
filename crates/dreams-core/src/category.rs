use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// The closed set of labels a dream can be filed under.
///
/// Anything outside this set is coerced to [`DreamCategory::Other`], both when
/// parsing model output and when deserializing stored or submitted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DreamCategory {
    Career,
    Finance,
    Health,
    Family,
    Travel,
    Skills,
    Lifestyle,
    #[default]
    Other,
}

impl DreamCategory {
    pub const ALL: [DreamCategory; 8] = [
        DreamCategory::Career,
        DreamCategory::Finance,
        DreamCategory::Health,
        DreamCategory::Family,
        DreamCategory::Travel,
        DreamCategory::Skills,
        DreamCategory::Lifestyle,
        DreamCategory::Other,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            DreamCategory::Career => "Career & Business",
            DreamCategory::Finance => "Finance & Wealth",
            DreamCategory::Health => "Health & Wellness",
            DreamCategory::Family => "Relationships & Family",
            DreamCategory::Travel => "Travel & Adventure",
            DreamCategory::Skills => "Skills & Knowledge",
            DreamCategory::Lifestyle => "Lifestyle & Hobbies",
            DreamCategory::Other => "Other",
        }
    }

    /// Match `text` against the known labels, ignoring case and surrounding whitespace.
    pub fn parse_label(text: &str) -> Option<Self> {
        let wanted = label_key(text);
        Self::ALL
            .into_iter()
            .find(|category| label_key(category.label()) == wanted)
    }

    /// Like [`DreamCategory::parse_label`], falling back to the catch-all.
    pub fn from_label_or_other(text: &str) -> Self {
        Self::parse_label(text).unwrap_or(DreamCategory::Other)
    }

    pub fn is_catch_all(self) -> bool {
        self == DreamCategory::Other
    }
}

/// Lowercase and drop whitespace, underscores and hyphens.
fn label_key(text: &str) -> String {
    text.chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '_' && *ch != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl fmt::Display for DreamCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for DreamCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for DreamCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CategoryVisitor;

        impl<'de> Visitor<'de> for CategoryVisitor {
            type Value = DreamCategory;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a dream category label")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(DreamCategory::from_label_or_other(value))
            }

            // Non-string scalars are still "a value outside the closed set".
            fn visit_bool<E: de::Error>(self, _value: bool) -> Result<Self::Value, E> {
                Ok(DreamCategory::Other)
            }

            fn visit_i64<E: de::Error>(self, _value: i64) -> Result<Self::Value, E> {
                Ok(DreamCategory::Other)
            }

            fn visit_u64<E: de::Error>(self, _value: u64) -> Result<Self::Value, E> {
                Ok(DreamCategory::Other)
            }

            fn visit_f64<E: de::Error>(self, _value: f64) -> Result<Self::Value, E> {
                Ok(DreamCategory::Other)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(DreamCategory::Other)
            }
        }

        deserializer.deserialize_any(CategoryVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_parse() {
        for category in DreamCategory::ALL {
            assert_eq!(DreamCategory::parse_label(category.label()), Some(category));
        }
    }

    #[test]
    fn parse_ignores_case_and_padding() {
        assert_eq!(
            DreamCategory::parse_label("  health & WELLNESS "),
            Some(DreamCategory::Health)
        );
        assert_eq!(DreamCategory::parse_label("Health"), None);
    }

    #[test]
    fn parse_ignores_separators() {
        assert_eq!(
            DreamCategory::parse_label("career_&_business"),
            Some(DreamCategory::Career)
        );
        assert_eq!(
            DreamCategory::parse_label("Skills&Knowledge"),
            Some(DreamCategory::Skills)
        );
        assert_eq!(
            DreamCategory::parse_label("lifestyle-&-hobbies"),
            Some(DreamCategory::Lifestyle)
        );
        assert_eq!(DreamCategory::parse_label("Finance Wealth"), None);
    }

    #[test]
    fn unknown_values_deserialize_to_catch_all() {
        let parsed: Vec<DreamCategory> =
            serde_json::from_str(r#"["Travel & Adventure", "Gardening", 7, null]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                DreamCategory::Travel,
                DreamCategory::Other,
                DreamCategory::Other,
                DreamCategory::Other,
            ]
        );
    }

    #[test]
    fn serializes_as_label() {
        let json = serde_json::to_string(&DreamCategory::Family).unwrap();
        assert_eq!(json, "\"Relationships & Family\"");
    }
}
