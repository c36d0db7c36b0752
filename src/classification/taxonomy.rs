//! Ordered lookup table from model output index to class metadata.
//!
//! The table is data, loaded from JSON and versioned with the model. Position
//! `i` in `classes` describes output `i` of the model, so the table is checked
//! against the model's class count when it is loaded.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DEFAULT_NUM_CLASSES;
use crate::error::{GraderError, Result};
use crate::models::Category;

/// Display name used when the model predicts an index the table does not cover.
pub const UNKNOWN_CLASS_NAME: &str = "Unknown";

pub const UNKNOWN_DESCRIPTION: &str = "Unknown Mushroom Species\n\
    Cannot identify this mushroom. Many poisonous species look like edible ones; \
    consult a mycologist before eating anything unidentified.\n\
    Safety: UNKNOWN - DO NOT EAT";

const BUILTIN_TAXONOMY: &str = include_str!("../../assets/taxonomy.json");

/// Grades recognised inside class names, checked in this order.
const NAME_GRADES: [&str; 4] = ["Class A", "Class B", "Class C", "Defective"];

/// How an entry's quality grade is determined.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", content = "value", rename_all = "snake_case")]
pub enum GradeRule {
    /// Look for a known grade label inside the display name.
    #[default]
    FromName,
    Fixed(String),
    #[serde(rename = "none")]
    Ungraded,
}

impl GradeRule {
    pub fn resolve(&self, name: &str) -> Option<String> {
        match self {
            GradeRule::FromName => NAME_GRADES
                .iter()
                .find(|grade| name.contains(*grade))
                .map(|grade| grade.to_string()),
            GradeRule::Fixed(grade) => Some(grade.clone()),
            GradeRule::Ungraded => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub name: String,
    pub poisonous: bool,
    pub category: Category,
    #[serde(default)]
    pub grade: GradeRule,
    #[serde(default)]
    pub description: String,
}

impl TaxonomyEntry {
    pub fn new(name: impl Into<String>, poisonous: bool, category: Category) -> Self {
        Self {
            name: name.into(),
            poisonous,
            category,
            grade: GradeRule::default(),
            description: String::new(),
        }
    }

    pub fn with_grade(mut self, grade: GradeRule) -> Self {
        self.grade = grade;
        self
    }

    pub fn grade(&self) -> Option<String> {
        self.grade.resolve(&self.name)
    }
}

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    model_version: String,
    classes: Vec<TaxonomyEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Taxonomy {
    model_version: String,
    entries: Vec<TaxonomyEntry>,
}

impl Taxonomy {
    /// Build a table, rejecting it unless it has exactly `num_classes` well-formed entries.
    pub fn new(
        model_version: impl Into<String>,
        entries: Vec<TaxonomyEntry>,
        num_classes: usize,
    ) -> Result<Self> {
        let model_version = model_version.into();
        if entries.is_empty() {
            return Err(GraderError::Taxonomy(format!(
                "Taxonomy {} has no classes",
                model_version
            )));
        }
        if entries.len() != num_classes {
            return Err(GraderError::Taxonomy(format!(
                "Taxonomy {} has {} classes but the model outputs {}",
                model_version,
                entries.len(),
                num_classes
            )));
        }

        let mut seen = HashSet::new();
        for (index, entry) in entries.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(GraderError::Taxonomy(format!("Class {} has an empty name", index)));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(GraderError::Taxonomy(format!(
                    "Class {} repeats the name {:?}",
                    index, entry.name
                )));
            }
            if entry.poisonous != (entry.category == Category::Poisonous) {
                return Err(GraderError::Taxonomy(format!(
                    "Class {} ({}) is marked poisonous={} but has category {}",
                    index, entry.name, entry.poisonous, entry.category
                )));
            }
        }

        Ok(Self {
            model_version,
            entries,
        })
    }

    pub fn from_json(json: &str, num_classes: usize) -> Result<Self> {
        let file = parse_table(json)?;
        Self::new(file.model_version, file.classes, num_classes)
    }

    pub fn load<P: AsRef<Path>>(path: P, num_classes: usize) -> Result<Self> {
        let taxonomy = Self::from_json(&read_table(path.as_ref())?, num_classes)?;
        taxonomy.log_loaded(path.as_ref());
        Ok(taxonomy)
    }

    /// Load a table that defines its own class count.
    ///
    /// The count is still checked against the model when a
    /// [`ClassificationPipeline`](crate::classification::ClassificationPipeline)
    /// is assembled.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file: TaxonomyFile = parse_table(&read_table(path.as_ref())?)?;
        let num_classes = file.classes.len();
        let taxonomy = Self::new(file.model_version, file.classes, num_classes)?;
        taxonomy.log_loaded(path.as_ref());
        Ok(taxonomy)
    }

    fn log_loaded(&self, path: &Path) {
        info!(
            "Loaded taxonomy {} ({} classes) from {}",
            self.model_version,
            self.len(),
            path.display()
        );
    }

    /// The table shipped with the crate for the 12-class mushroom model.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TAXONOMY, DEFAULT_NUM_CLASSES)
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn get(&self, index: usize) -> Option<&TaxonomyEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[TaxonomyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identification and safety notes for a class.
    pub fn describe(&self, index: usize) -> &str {
        match self.get(index) {
            Some(entry) if !entry.description.is_empty() => &entry.description,
            Some(entry) => &entry.name,
            None => UNKNOWN_DESCRIPTION,
        }
    }
}

fn read_table(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        GraderError::Taxonomy(format!("Failed to read taxonomy {}: {}", path.display(), e))
    })
}

fn parse_table(json: &str) -> Result<TaxonomyFile> {
    serde_json::from_str(json)
        .map_err(|e| GraderError::Taxonomy(format!("Malformed taxonomy JSON: {}", e)))
}
