use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{info, warn};
use parking_lot::{Condvar, Mutex};

use crate::app::UiQueue;
use crate::error::GateLensError;
use crate::gitops::{self, GitSettings};
use crate::model::{DetailState, SharedReview};

/// One queued enrichment. Ordering is (priority, admission sequence): lower
/// priority value first, FIFO among equals. The review itself is never
/// compared.
struct Entry {
    priority: i64,
    seq: u64,
    review: SharedReview,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the smallest (priority, seq).
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    activity: String,
    completed: u64,
}

/// Unbounded priority queue feeding the detail worker, shared between the
/// render pass (producer) and the worker thread (consumer).
pub struct DetailQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl DetailQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                activity: "idle".into(),
                ..QueueState::default()
            }),
            ready: Condvar::new(),
        })
    }

    /// Enqueues a review and marks it `Detailing` so it is never submitted
    /// twice. Reviews already past `New` are skipped.
    pub fn submit(&self, review: SharedReview, priority: i64) {
        {
            let mut guard = review.lock();
            if guard.state != DetailState::New {
                return;
            }
            guard.state = DetailState::Detailing;
        }
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            priority,
            seq,
            review,
        });
        drop(state);
        self.ready.notify_one();
    }

    /// Current backlog, for the status line.
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (current activity, completed fetch count).
    pub fn activity(&self) -> (String, u64) {
        let state = self.state.lock();
        (state.activity.clone(), state.completed)
    }

    fn set_activity(&self, activity: String) {
        self.state.lock().activity = activity;
    }

    fn finish_one(&self) {
        let mut state = self.state.lock();
        state.completed += 1;
        state.activity = "idle".into();
    }

    /// Blocks until an entry is available, waking periodically to observe
    /// the stop flag.
    fn pop(&self, stop: &AtomicBool) -> Option<Entry> {
        let mut state = self.state.lock();
        loop {
            if stop.load(atomic::Ordering::Relaxed) {
                return None;
            }
            if let Some(entry) = state.heap.pop() {
                return Some(entry);
            }
            self.ready
                .wait_for(&mut state, Duration::from_millis(200));
        }
    }

    pub fn wake(&self) {
        self.ready.notify_all();
    }
}

/// Spawns the worker thread: one enrichment at a time, priority order,
/// failures classified per review and never propagated.
pub fn spawn(
    queue: Arc<DetailQueue>,
    settings: GitSettings,
    ui: UiQueue,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("detail-worker".into())
        .spawn(move || {
            while let Some(entry) = queue.pop(&stop) {
                process(&queue, &settings, &ui, entry.review);
            }
            info!("detail worker stopped");
        })
        .expect("failed to spawn detail worker")
}

fn process(queue: &DetailQueue, settings: &GitSettings, ui: &UiQueue, review: SharedReview) {
    let (key, project, url) = {
        let guard = review.lock();
        (guard.key.clone(), guard.project.clone(), guard.url.clone())
    };
    queue.set_activity(format!("processing {}", key.display()));

    match gitops::enrich(settings, &key, &project, url.as_deref()) {
        Ok(detail) => {
            info!("detailed {}", key.display());
            let enriched = review.clone();
            ui.push(move |_app| {
                let mut guard = enriched.lock();
                guard.detail = Some(detail);
                guard.state = DetailState::Detailed;
            });
        }
        Err(GateLensError::InvalidReview(reason)) => {
            warn!("ignoring {}: {reason}", key.display());
            review.lock().state = DetailState::Ignored;
        }
        Err(err) => {
            warn!("enrichment of {} failed: {err}", key.display());
            review.lock().state = DetailState::Errored;
        }
    }
    queue.finish_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RawReview, Review, ReviewKey};

    fn review(id: &str) -> SharedReview {
        let raw: RawReview =
            serde_json::from_str(&format!(r#"{{"id": "{id}", "project": "p", "jobs": []}}"#))
                .unwrap();
        Arc::new(Mutex::new(Review::new(
            ReviewKey::parse(id),
            "p".into(),
            &raw,
        )))
    }

    fn drain_ids(queue: &DetailQueue) -> Vec<String> {
        let stop = AtomicBool::new(false);
        let mut ids = Vec::new();
        while !queue.is_empty() {
            let entry = queue.pop(&stop).unwrap();
            ids.push(entry.review.lock().key.display());
        }
        ids
    }

    #[test]
    fn test_lower_priority_value_first() {
        let queue = DetailQueue::new();
        queue.submit(review("100,1"), -100);
        queue.submit(review("500,1"), -500);
        assert_eq!(drain_ids(&queue), vec!["500,1", "100,1"]);
    }

    #[test]
    fn test_equal_priorities_keep_admission_order() {
        let queue = DetailQueue::new();
        for id in ["1,1", "2,1", "3,1"] {
            queue.submit(review(id), 7);
        }
        assert_eq!(drain_ids(&queue), vec!["1,1", "2,1", "3,1"]);
    }

    #[test]
    fn test_submit_marks_detailing_and_rejects_resubmission() {
        let queue = DetailQueue::new();
        let r = review("42,1");
        queue.submit(r.clone(), -42);
        assert_eq!(r.lock().state, DetailState::Detailing);
        assert_eq!(queue.len(), 1);

        // Already in flight; a second submission is a no-op.
        queue.submit(r.clone(), -42);
        assert_eq!(queue.len(), 1);

        r.lock().state = DetailState::Detailed;
        queue.submit(r.clone(), -42);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_missing_change_id_is_ignored_not_errored() {
        let queue = DetailQueue::new();
        let settings = GitSettings {
            clone_root: std::env::temp_dir(),
            upstream_host: "unused".into(),
            review_host: "unused".into(),
        };
        let ui = UiQueue::new();

        // "refresh" has no parseable change id, so enrichment validation
        // rejects it before any git work happens.
        let r = review("refresh");
        process(&queue, &settings, &ui, r.clone());
        assert_eq!(r.lock().state, DetailState::Ignored);

        let (_, completed) = queue.activity();
        assert_eq!(completed, 1);
    }

    #[test]
    fn test_backlog_and_activity_reporting() {
        let queue = DetailQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.activity(), ("idle".into(), 0));

        queue.submit(review("9,9"), -9);
        assert_eq!(queue.len(), 1);

        queue.set_activity("processing 9,9".into());
        queue.finish_one();
        let (activity, completed) = queue.activity();
        assert_eq!(activity, "idle");
        assert_eq!(completed, 1);
    }
}
