//! Core shared types for Dreams.
//!
//! Every crate in the workspace speaks in terms of these records: the AI layer
//! produces [`DreamDraft`]s, the store persists [`DreamEntry`]s, and the search and
//! layout code embeds their [canonical text](canonical_text).

mod category;
mod dream;

pub use category::DreamCategory;
pub use dream::{
    canonical_text, new_record_id, DreamDraft, DreamEntry, DreamUpdate, Milestone, SmartGoal,
};
