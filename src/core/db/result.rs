use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

use time::OffsetDateTime;

use crate::error::Result;
use crate::models::{Category, Classification, ClassificationResult};

/// Aggregate counts over the stored history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultStats {
    pub total: u64,
    pub poisonous: u64,
    pub edible: u64,
    pub by_category: BTreeMap<Category, u64>,
}

/// Persisted classification history.
///
/// Every list is ordered newest first; equal timestamps keep insertion order.
/// "Edible" means not flagged poisonous and not in the POISONOUS category.
///
/// Timestamps are stored exactly as given, at nanosecond precision. Results
/// from [`ResultInterpreter`](crate::classification::ResultInterpreter) share
/// one process clock and arrive in order; callers that build a
/// [`Classification`] themselves own its timestamp.
pub trait ResultRepository {
    fn insert(&self, result: &Classification) -> impl Future<Output = Result<i64>> + Send;
    /// Inserts all results or none of them.
    fn insert_many(&self, results: &[Classification]) -> impl Future<Output = Result<Vec<i64>>> + Send;
    fn get_by_id(&self, id: i64) -> impl Future<Output = Result<Option<ClassificationResult>>> + Send;
    fn list_all(&self) -> impl Future<Output = Result<Vec<ClassificationResult>>> + Send;
    fn list_recent(&self, limit: u32) -> impl Future<Output = Result<Vec<ClassificationResult>>> + Send;
    fn list_by_category(&self, category: Category) -> impl Future<Output = Result<Vec<ClassificationResult>>> + Send;
    fn list_poisonous(&self) -> impl Future<Output = Result<Vec<ClassificationResult>>> + Send;
    fn list_edible(&self) -> impl Future<Output = Result<Vec<ClassificationResult>>> + Send;
    /// Case-insensitive (ASCII) substring match on the class name.
    fn search_by_name(&self, needle: &str) -> impl Future<Output = Result<Vec<ClassificationResult>>> + Send;
    fn count_all(&self) -> impl Future<Output = Result<u64>> + Send;
    fn count_poisonous(&self) -> impl Future<Output = Result<u64>> + Send;
    fn count_edible(&self) -> impl Future<Output = Result<u64>> + Send;
    fn stats(&self) -> impl Future<Output = Result<ResultStats>> + Send;
    /// Sets the image path of a result that does not have one yet.
    fn attach_image_path(&self, id: i64, path: &Path) -> impl Future<Output = Result<ClassificationResult>> + Send;
    fn attach_notes(&self, id: i64, notes: &str) -> impl Future<Output = Result<ClassificationResult>> + Send;
    /// Returns whether a result was deleted.
    fn delete_by_id(&self, id: i64) -> impl Future<Output = Result<bool>> + Send;
    fn delete_all(&self) -> impl Future<Output = Result<u64>> + Send;
    /// Deletes results strictly older than `timestamp`.
    fn delete_older_than(&self, timestamp: OffsetDateTime) -> impl Future<Output = Result<u64>> + Send;
}
