use std::cmp::Reverse;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use log::{debug, error, info};
use parking_lot::Mutex;

use crate::app::UiQueue;
use crate::detail::DetailQueue;
use crate::error::Result;
use crate::layout::ColumnLayout;
use crate::model::{DetailState, Pipeline, RawReview, Review, ReviewKey, SharedReview, Snapshot};
use crate::ui;

/// One render job: the snapshot to lay out and the viewport to fit.
pub struct RenderRequest {
    pub snapshot: Snapshot,
    pub rows: u16,
    pub cols: u16,
}

/// Case-insensitive glob allow-list. An empty pattern list allows
/// everything.
pub struct AllowList {
    set: Option<GlobSet>,
}

impl AllowList {
    pub fn new(patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self { set: None });
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
        }
        Ok(Self {
            set: Some(builder.build()?),
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.set.as_ref().map_or(true, |set| set.is_match(name))
    }
}

type EntityKey = (ReviewKey, String);

/// A merge deferred to the UI thread: entities carried over from a previous
/// pass are owned by the coordinator, so their snapshot data is folded in
/// only after the new layout has been handed over.
type DelayedMerge = (SharedReview, RawReview);

/// Turns snapshots into column layouts on its own thread.
///
/// Owns the identity map that keeps review entities alive across passes;
/// entries absent from the new snapshot simply drop out of the map.
pub struct Renderer {
    screens: usize,
    pipelines: AllowList,
    projects: AllowList,
    details_enabled: bool,
    details: Arc<DetailQueue>,
    ui: UiQueue,
    identity: HashMap<EntityKey, SharedReview>,
}

impl Renderer {
    pub fn new(
        screens: usize,
        pipeline_patterns: &[String],
        project_patterns: &[String],
        details_enabled: bool,
        details: Arc<DetailQueue>,
        ui: UiQueue,
    ) -> Result<Self> {
        Ok(Self {
            screens,
            pipelines: AllowList::new(pipeline_patterns)?,
            projects: AllowList::new(project_patterns)?,
            details_enabled,
            details,
            ui,
            identity: HashMap::new(),
        })
    }

    /// One full pass: entity resolution, packing, enrichment submission.
    pub fn render_pass(&mut self, request: &RenderRequest) -> (ColumnLayout, Vec<DelayedMerge>) {
        let (pipelines, delayed) = self.resolve_entities(request);

        let mut layout = ColumnLayout::new(self.screens);
        for pipeline in &pipelines {
            layout.place(ui::pipeline_card(pipeline), request.rows, request.cols);
            for review in &pipeline.reviews {
                layout.place(ui::review_card(&review.lock()), request.rows, request.cols);
            }
        }

        if self.details_enabled {
            self.submit_new_reviews(&pipelines);
        }

        debug!(
            "rendered snapshot #{}: {} pipelines, {} tracked reviews",
            request.snapshot.fetch_id,
            pipelines.len(),
            self.identity.len()
        );
        (layout, delayed)
    }

    /// Rebuilds the pipeline list, reusing review entities by identity.
    ///
    /// Entities constructed this pass are populated directly; entities
    /// carried over from the previous pass get a delayed merge instead so
    /// the UI thread never races the coordinator's own callback drain.
    fn resolve_entities(&mut self, request: &RenderRequest) -> (Vec<Pipeline>, Vec<DelayedMerge>) {
        let mut next: HashMap<EntityKey, SharedReview> = HashMap::new();
        let mut delayed = Vec::new();
        let mut pipelines = Vec::new();

        let mut raw_pipelines: Vec<_> = request
            .snapshot
            .document
            .pipelines
            .iter()
            .filter(|pipeline| self.pipelines.matches(&pipeline.name))
            .collect();
        raw_pipelines.sort_by(|a, b| a.name.cmp(&b.name));

        for raw_pipeline in raw_pipelines {
            let mut reviews: Vec<SharedReview> = Vec::new();
            for queue in &raw_pipeline.change_queues {
                for head in &queue.heads {
                    let Some(raw) = head.first() else { continue };
                    let Some(id) = raw.id.as_deref() else {
                        // No identity to track it under.
                        continue;
                    };
                    let project = raw.project.clone().unwrap_or_default();
                    if !self.projects.matches(&project) {
                        continue;
                    }

                    let key = ReviewKey::parse(id);
                    let entity_key = (key.clone(), project.clone());
                    let entity = if let Some(seen_this_pass) = next.get(&entity_key) {
                        seen_this_pass.clone()
                    } else if let Some(carried) = self.identity.remove(&entity_key) {
                        delayed.push((carried.clone(), raw.clone()));
                        carried
                    } else {
                        Arc::new(Mutex::new(Review::new(key, project.clone(), raw)))
                    };
                    next.insert(entity_key, entity.clone());
                    if !reviews.iter().any(|known| Arc::ptr_eq(known, &entity)) {
                        reviews.push(entity);
                    }
                }
            }
            reviews.sort_by_cached_key(|review| Reverse(review.lock().key.sort_key()));
            pipelines.push(Pipeline {
                name: raw_pipeline.name.clone(),
                description: raw_pipeline.description.clone(),
                reviews,
            });
        }

        // Old entries not in the new snapshot drop here.
        self.identity = next;
        (pipelines, delayed)
    }

    /// Larger review ids are enriched first; unparseable ids go last.
    fn submit_new_reviews(&self, pipelines: &[Pipeline]) {
        for pipeline in pipelines {
            for review in &pipeline.reviews {
                let (state, priority) = {
                    let guard = review.lock();
                    let priority = guard.key.numeric_id().map(|id| -id).unwrap_or(i64::MAX);
                    (guard.state, priority)
                };
                if state == DetailState::New {
                    self.details.submit(review.clone(), priority);
                }
            }
        }
    }
}

/// Spawns the render worker. Requests are strictly serialized; a panicking
/// pass is dropped and logged, and the coordinator's in-flight flag is
/// cleared either way.
pub fn spawn(mut renderer: Renderer, requests: Receiver<RenderRequest>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("render-worker".into())
        .spawn(move || {
            for request in requests.iter() {
                let ui = renderer.ui.clone();
                match panic::catch_unwind(AssertUnwindSafe(|| renderer.render_pass(&request))) {
                    Ok((layout, delayed)) => {
                        ui.push(move |app| {
                            app.install_layout(layout);
                            for (review, raw) in delayed {
                                review.lock().merge(&raw);
                            }
                            app.render_done();
                        });
                    }
                    Err(_) => {
                        error!(
                            "render pass for snapshot #{} dropped",
                            request.snapshot.fetch_id
                        );
                        ui.push(|app| app.render_done());
                    }
                }
            }
            info!("render worker stopped");
        })
        .expect("failed to spawn render worker")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatusDocument;

    fn snapshot(body: &str, fetch_id: u64) -> Snapshot {
        let document: StatusDocument = serde_json::from_str(body).unwrap();
        Snapshot { document, fetch_id }
    }

    fn renderer(pipelines: &[&str], projects: &[&str], details_enabled: bool) -> Renderer {
        let pipelines: Vec<String> = pipelines.iter().map(|s| s.to_string()).collect();
        let projects: Vec<String> = projects.iter().map(|s| s.to_string()).collect();
        Renderer::new(
            2,
            &pipelines,
            &projects,
            details_enabled,
            DetailQueue::new(),
            UiQueue::new(),
        )
        .unwrap()
    }

    const TWO_PIPELINES: &str = r#"{
        "pipelines": [
            {"name": "gate", "description": "Approved changes", "change_queues": []},
            {"name": "check", "description": "Newly uploaded changes",
             "change_queues": [{"heads": [[
                {"id": "100,2", "project": "x",
                 "jobs": [{"name": "unit", "remaining_time": 0, "voting": true}]}
             ]]}]}
        ]
    }"#;

    #[test]
    fn test_end_to_end_snapshot_to_layout() {
        let mut renderer = renderer(&[], &[], false);
        let (layout, delayed) = renderer.render_pass(&RenderRequest {
            snapshot: snapshot(TWO_PIPELINES, 1),
            rows: 40,
            cols: 120,
        });

        assert!(delayed.is_empty());
        let cards: Vec<_> = layout
            .columns()
            .iter()
            .flat_map(|column| column.cards.iter())
            .collect();
        // check header + its review + gate header.
        assert_eq!(cards.len(), 3);
        let review_card = cards
            .iter()
            .find(|card| card.focusable)
            .expect("one focusable review card");
        assert_eq!(review_card.key.as_ref().unwrap().display(), "100,2");

        let entity = renderer
            .identity
            .get(&(ReviewKey::parse("100,2"), "x".into()))
            .unwrap();
        let guard = entity.lock();
        assert_eq!(guard.completion(), 1.0);
        assert_eq!(guard.jobs.len(), 1);
        assert!(guard.jobs.contains_key("unit"));
    }

    #[test]
    fn test_pipelines_are_laid_out_in_name_order() {
        let mut renderer = renderer(&[], &[], false);
        let (layout, _) = renderer.render_pass(&RenderRequest {
            snapshot: snapshot(TWO_PIPELINES, 1),
            rows: 40,
            cols: 120,
        });
        let first_line = layout.columns()[0].cards[0].lines[0].to_string();
        assert_eq!(first_line, "check");
    }

    #[test]
    fn test_identity_survives_across_passes() {
        let mut renderer = renderer(&[], &[], false);
        let request = |fetch_id| RenderRequest {
            snapshot: snapshot(TWO_PIPELINES, fetch_id),
            rows: 40,
            cols: 120,
        };

        renderer.render_pass(&request(1));
        let first = renderer
            .identity
            .get(&(ReviewKey::parse("100,2"), "x".into()))
            .unwrap()
            .clone();

        let (_, delayed) = renderer.render_pass(&request(2));
        let second = renderer
            .identity
            .get(&(ReviewKey::parse("100,2"), "x".into()))
            .unwrap()
            .clone();

        assert!(Arc::ptr_eq(&first, &second));

        // The carried entity merges on the UI thread, not during the pass.
        assert_eq!(delayed.len(), 1);
        for (review, raw) in delayed {
            review.lock().merge(&raw);
        }
        // Still one job row; the update happened in place.
        assert_eq!(second.lock().jobs.len(), 1);
    }

    #[test]
    fn test_reviews_ordered_descending_within_pipeline() {
        let body = r#"{
            "pipelines": [{"name": "check", "description": "",
                "change_queues": [{"heads": [
                    [{"id": "99,1", "project": "x", "jobs": []}],
                    [{"id": "1234,5", "project": "x", "jobs": []}]
                ]}]}]
        }"#;
        let mut renderer = renderer(&[], &[], false);
        let (layout, _) = renderer.render_pass(&RenderRequest {
            snapshot: snapshot(body, 1),
            rows: 40,
            cols: 120,
        });
        let keys: Vec<String> = layout
            .columns()
            .iter()
            .flat_map(|column| column.cards.iter())
            .filter_map(|card| card.key.as_ref().map(ReviewKey::display))
            .collect();
        assert_eq!(keys, vec!["1234,5", "99,1"]);
    }

    #[test]
    fn test_pipeline_allow_list_is_case_insensitive() {
        let mut renderer = renderer(&["GATE"], &[], false);
        let (layout, _) = renderer.render_pass(&RenderRequest {
            snapshot: snapshot(TWO_PIPELINES, 1),
            rows: 40,
            cols: 120,
        });
        let cards: Vec<_> = layout
            .columns()
            .iter()
            .flat_map(|column| column.cards.iter())
            .collect();
        // Only the gate header survives the filter.
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].lines[0].to_string(), "gate");
    }

    #[test]
    fn test_project_allow_list_filters_reviews() {
        let mut renderer = renderer(&[], &["other-*"], false);
        let (layout, _) = renderer.render_pass(&RenderRequest {
            snapshot: snapshot(TWO_PIPELINES, 1),
            rows: 40,
            cols: 120,
        });
        assert!(layout
            .columns()
            .iter()
            .flat_map(|column| column.cards.iter())
            .all(|card| !card.focusable));
    }

    #[test]
    fn test_new_reviews_submitted_once_for_enrichment() {
        let mut renderer = renderer(&[], &[], true);
        let request = |fetch_id| RenderRequest {
            snapshot: snapshot(TWO_PIPELINES, fetch_id),
            rows: 40,
            cols: 120,
        };

        renderer.render_pass(&request(1));
        assert_eq!(renderer.details.len(), 1);
        let entity = renderer
            .identity
            .get(&(ReviewKey::parse("100,2"), "x".into()))
            .unwrap();
        assert_eq!(entity.lock().state, DetailState::Detailing);

        // A later pass never resubmits a review already past `New`.
        renderer.render_pass(&request(2));
        assert_eq!(renderer.details.len(), 1);
    }
}
