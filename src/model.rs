use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One parsed status document plus the poll counter it arrived under.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub document: StatusDocument,
    pub fetch_id: u64,
}

/// Raw status document as served by the CI status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusDocument {
    #[serde(default)]
    pub pipelines: Vec<RawPipeline>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPipeline {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub change_queues: Vec<RawChangeQueue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawChangeQueue {
    /// Each head is a chain of changes; the first entry is the queue head.
    #[serde(default)]
    pub heads: Vec<Vec<RawReview>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReview {
    pub id: Option<String>,
    pub project: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub jobs: Vec<RawJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawJob {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub remaining_time: u64,
    #[serde(default)]
    pub voting: bool,
    #[serde(default)]
    pub result: Option<String>,
}

/// Accepts numbers, numeric strings, null, or garbage; anything that is not
/// a non-negative number comes out as 0.
fn lenient_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Stable identity of a review across snapshots.
///
/// A raw id of the form `"<review-id>,<change-id>"` splits into its two
/// parts; anything else is carried whole as the review id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReviewKey {
    pub review_id: String,
    pub change_id: Option<String>,
}

impl ReviewKey {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(',') {
            Some((rid, cid)) => Self {
                review_id: rid.trim().to_string(),
                change_id: Some(cid.trim().to_string()),
            },
            None => Self {
                review_id: raw.trim().to_string(),
                change_id: None,
            },
        }
    }

    pub fn numeric_id(&self) -> Option<i64> {
        self.review_id.parse().ok()
    }

    fn numeric_change(&self) -> Option<i64> {
        self.change_id.as_deref().and_then(|c| c.parse().ok())
    }

    /// Sort key for display order: numeric ids compare numerically, the rest
    /// lexically after them.
    pub fn sort_key(&self) -> (i64, String, i64, String) {
        (
            self.numeric_id().unwrap_or(i64::MIN),
            self.review_id.clone(),
            self.numeric_change().unwrap_or(i64::MIN),
            self.change_id.clone().unwrap_or_default(),
        )
    }

    pub fn display(&self) -> String {
        match &self.change_id {
            Some(cid) => format!("{},{}", self.review_id, cid),
            None => self.review_id.clone(),
        }
    }
}

/// Enrichment lifecycle of a review.
///
/// Any state other than `New` is never re-submitted to the detail worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetailState {
    #[default]
    New,
    Detailing,
    Detailed,
    Ignored,
    Errored,
}

/// Commit metadata attached to a review by a successful enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetail {
    pub summary: String,
    pub description: String,
    pub author: String,
    pub committer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub remaining_ms: u64,
    pub voting: bool,
    pub result: Option<String>,
}

/// A change under test. Long-lived: the same identity in a later snapshot
/// resolves to the same entity, which is updated in place.
#[derive(Debug)]
pub struct Review {
    pub key: ReviewKey,
    pub project: String,
    pub url: Option<String>,
    pub jobs: IndexMap<String, Job>,
    pub state: DetailState,
    pub detail: Option<CommitDetail>,
}

pub type SharedReview = Arc<Mutex<Review>>;

impl Review {
    pub fn new(key: ReviewKey, project: String, raw: &RawReview) -> Self {
        let mut review = Self {
            key,
            project,
            url: None,
            jobs: IndexMap::new(),
            state: DetailState::New,
            detail: None,
        };
        review.merge(raw);
        review
    }

    /// Folds a raw snapshot entry into this entity. Jobs keep their
    /// first-seen order; a job seen again is updated in place, never
    /// duplicated. Raw jobs without a name are dropped.
    pub fn merge(&mut self, raw: &RawReview) {
        if raw.url.is_some() {
            self.url = raw.url.clone();
        }
        for raw_job in &raw.jobs {
            let Some(name) = raw_job.name.clone() else {
                continue;
            };
            match self.jobs.get_mut(&name) {
                Some(job) => {
                    job.remaining_ms = raw_job.remaining_time;
                    job.voting = raw_job.voting;
                    job.result = raw_job.result.clone();
                }
                None => {
                    self.jobs.insert(
                        name.clone(),
                        Job {
                            name,
                            remaining_ms: raw_job.remaining_time,
                            voting: raw_job.voting,
                            result: raw_job.result.clone(),
                        },
                    );
                }
            }
        }
    }

    /// Fraction of jobs that have finished, in `[0, 1]`. A review without
    /// jobs counts as complete.
    pub fn completion(&self) -> f64 {
        let total = self.jobs.len();
        if total == 0 {
            return 1.0;
        }
        let running = self
            .jobs
            .values()
            .filter(|job| job.remaining_ms > 0)
            .count();
        (total - running) as f64 / total as f64
    }
}

/// A named queue of reviews for one render pass. Transient: rebuilt fresh
/// every pass, only the reviews it references are long-lived.
#[derive(Debug)]
pub struct Pipeline {
    pub name: String,
    pub description: String,
    pub reviews: Vec<SharedReview>,
}
