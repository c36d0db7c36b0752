use std::path::PathBuf;

use time::OffsetDateTime;

use crate::error::GraderError;
use crate::models::{Category, ClassificationResult};

#[derive(Debug, sqlx::FromRow)]
pub(super) struct ResultRow {
    pub id: i64,
    pub class_name: String,
    pub class_index: i64,
    pub confidence: f64,
    pub category: String,
    pub is_poisonous: bool,
    pub grade: Option<String>,
    pub image_path: Option<String>,
    pub timestamp: i64,
    pub notes: Option<String>,
}

impl TryFrom<ResultRow> for ClassificationResult {
    type Error = GraderError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let class_index = u32::try_from(row.class_index).map_err(|_| {
            GraderError::CorruptRecord(format!(
                "Result {} has class index {}",
                row.id, row.class_index
            ))
        })?;
        Ok(ClassificationResult {
            id: row.id,
            class_name: row.class_name,
            class_index,
            confidence: row.confidence as f32,
            category: row.category.parse::<Category>()?,
            is_poisonous: row.is_poisonous,
            grade: row.grade,
            image_path: row.image_path.map(PathBuf::from),
            timestamp: from_nanos(row.timestamp)?,
            notes: row.notes,
            _guard: (),
        })
    }
}

/// Unix nanoseconds; representable from 1677 to 2262.
pub(super) fn to_nanos(timestamp: OffsetDateTime) -> Result<i64, GraderError> {
    i64::try_from(timestamp.unix_timestamp_nanos()).map_err(|_| {
        GraderError::InvalidRecord(format!("Timestamp {} is outside the storable range", timestamp))
    })
}

pub(super) fn from_nanos(nanos: i64) -> Result<OffsetDateTime, GraderError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|e| GraderError::CorruptRecord(format!("Invalid timestamp {}: {}", nanos, e)))
}

/// `LIKE` pattern matching `needle` anywhere, with wildcards in it taken literally.
pub(super) fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
