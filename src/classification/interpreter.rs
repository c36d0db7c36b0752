use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::classification::taxonomy::{Taxonomy, UNKNOWN_CLASS_NAME};
use crate::config::CONFIDENCE_THRESHOLD;
use crate::models::{Category, Classification};

/// Outcome of interpreting one score vector.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    Accepted(Classification),
    /// The best score did not clear the threshold. Not an error.
    Rejected(Rejection),
}

impl Interpretation {
    pub fn accepted(self) -> Option<Classification> {
        match self {
            Interpretation::Accepted(classification) => Some(classification),
            Interpretation::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Interpretation::Rejected(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Index of the best score, `None` when the vector had no comparable score.
    pub best_index: Option<usize>,
    pub best_score: f32,
    pub threshold: f32,
}

/// Millisecond timestamps that never go backwards for one clock.
#[derive(Debug, Default)]
pub struct Timestamper {
    last_millis: AtomicI64,
}

static PROCESS_CLOCK: Timestamper = Timestamper::new();

impl Timestamper {
    pub const fn new() -> Self {
        Self {
            last_millis: AtomicI64::new(0),
        }
    }

    /// The clock every [`ResultInterpreter`] stamps with, so results from
    /// different workers stay in order within the process.
    pub fn process() -> &'static Timestamper {
        &PROCESS_CLOCK
    }

    pub fn now(&self) -> OffsetDateTime {
        let wall = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let previous = self.last_millis.fetch_max(wall, Ordering::SeqCst);
        let millis = previous.max(wall);
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

/// Index of the highest score; the lowest index wins ties and NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((index, score)),
        }
    }
    best
}

pub struct ResultInterpreter {
    taxonomy: Arc<Taxonomy>,
    threshold: f32,
    clock: &'static Timestamper,
}

impl ResultInterpreter {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self {
            taxonomy,
            threshold: CONFIDENCE_THRESHOLD,
            clock: Timestamper::process(),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn interpret(&self, scores: &[f32]) -> Interpretation {
        let Some((best_index, best_score)) = argmax(scores) else {
            warn!("Score vector has no comparable entries");
            return Interpretation::Rejected(Rejection {
                best_index: None,
                best_score: 0.0,
                threshold: self.threshold,
            });
        };

        debug!("Best: class {} ({:.4})", best_index, best_score);
        if best_score < self.threshold {
            warn!(
                "Low confidence {:.4} for class {}, below {:.2}",
                best_score, best_index, self.threshold
            );
            return Interpretation::Rejected(Rejection {
                best_index: Some(best_index),
                best_score,
                threshold: self.threshold,
            });
        }

        Interpretation::Accepted(self.classification_for(best_index, best_score))
    }

    fn classification_for(&self, index: usize, score: f32) -> Classification {
        let (class_name, category, is_poisonous, grade) = match self.taxonomy.get(index) {
            Some(entry) => (entry.name.clone(), entry.category, entry.poisonous, entry.grade()),
            None => {
                warn!(
                    "Class {} is outside the taxonomy ({} classes)",
                    index,
                    self.taxonomy.len()
                );
                (UNKNOWN_CLASS_NAME.to_string(), Category::Unknown, false, None)
            }
        };

        Classification {
            class_name,
            class_index: u32::try_from(index).unwrap_or(u32::MAX),
            confidence: score.clamp(0.0, 1.0),
            category,
            is_poisonous,
            grade,
            image_path: None,
            timestamp: self.clock.now(),
            notes: None,
        }
    }
}
