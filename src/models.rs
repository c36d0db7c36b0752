use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::GraderError;

/// Coarse safety/utility class of a mushroom, independent of confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Edible,
    Poisonous,
    Inedible,
    Unknown,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Edible,
        Category::Poisonous,
        Category::Inedible,
        Category::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Edible => "EDIBLE",
            Category::Poisonous => "POISONOUS",
            Category::Inedible => "INEDIBLE",
            Category::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = GraderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| GraderError::CorruptRecord(format!("Invalid category value: {}", value)))
    }
}

/// A verdict produced by the interpreter that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class_name: String,
    pub class_index: u32,
    pub confidence: f32,
    pub category: Category,
    pub is_poisonous: bool,
    pub grade: Option<String>,
    pub image_path: Option<PathBuf>,
    pub timestamp: OffsetDateTime,
    pub notes: Option<String>,
}

impl Classification {
    pub fn with_image_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A persisted classification; `id` is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub id: i64,
    pub class_name: String,
    pub class_index: u32,
    pub confidence: f32,
    pub category: Category,
    pub is_poisonous: bool,
    pub grade: Option<String>,
    pub image_path: Option<PathBuf>,
    pub timestamp: OffsetDateTime,
    pub notes: Option<String>,
    pub(crate) _guard: (),
}

impl ClassificationResult {
    /// Confidence as a percentage with two decimals, e.g. `"91.00"`.
    pub fn confidence_percentage(&self) -> String {
        format!("{:.2}", self.confidence * 100.0)
    }

    /// The stored fields without the surrogate key.
    pub fn classification(&self) -> Classification {
        Classification {
            class_name: self.class_name.clone(),
            class_index: self.class_index,
            confidence: self.confidence,
            category: self.category,
            is_poisonous: self.is_poisonous,
            grade: self.grade.clone(),
            image_path: self.image_path.clone(),
            timestamp: self.timestamp,
            notes: self.notes.clone(),
        }
    }
}

impl PartialEq<Classification> for ClassificationResult {
    fn eq(&self, other: &Classification) -> bool {
        self.class_name == other.class_name
            && self.class_index == other.class_index
            && self.confidence == other.confidence
            && self.category == other.category
            && self.is_poisonous == other.is_poisonous
            && self.grade == other.grade
            && self.image_path == other.image_path
            && self.timestamp == other.timestamp
            && self.notes == other.notes
    }
}
