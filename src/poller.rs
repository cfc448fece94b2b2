use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;

use crate::error::{GateLensError, Result};
use crate::model::{Snapshot, StatusDocument};

#[derive(Default)]
struct PollerState {
    snapshot: Option<Snapshot>,
    fetch_count: u64,
    activity: String,
}

/// Holds the single most recent status snapshot.
///
/// The poller never schedules itself: it blocks until `trigger` is called,
/// performs one fetch, and goes back to waiting. A failed poll leaves the
/// held snapshot untouched; the next trigger tries again.
pub struct Poller {
    state: Mutex<PollerState>,
    trigger: Mutex<bool>,
    wakeup: Condvar,
    client: reqwest::blocking::Client,
    url: String,
    timeout: Duration,
}

impl Poller {
    pub fn new(url: String, poll_interval: Duration) -> Result<Arc<Self>> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("gatelens/0.1")
            .build()?;
        Ok(Arc::new(Self {
            state: Mutex::new(PollerState {
                activity: "waiting".into(),
                ..PollerState::default()
            }),
            trigger: Mutex::new(false),
            wakeup: Condvar::new(),
            client,
            url,
            // Half the poll interval so a stuck fetch can never overlap the
            // next trigger.
            timeout: poll_interval / 2,
        }))
    }

    /// Requests a poll. Repeated triggers while one is pending or in flight
    /// collapse into a single fetch.
    pub fn trigger(&self) {
        let mut pending = self.trigger.lock();
        if !*pending {
            *pending = true;
            self.wakeup.notify_one();
        }
    }

    /// Latest snapshot (if any poll has succeeded) and the fetch counter.
    pub fn latest(&self) -> (Option<Snapshot>, u64) {
        let state = self.state.lock();
        (state.snapshot.clone(), state.fetch_count)
    }

    /// (human-readable state, fetch count) for the status line.
    pub fn activity(&self) -> (String, u64) {
        let state = self.state.lock();
        (state.activity.clone(), state.fetch_count)
    }

    /// One GET against the status endpoint. Anything that is not a JSON
    /// mapping is a hard error for this poll.
    pub fn fetch_once(&self) -> Result<StatusDocument> {
        let value: Value = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()?
            .error_for_status()?
            .json()?;
        if !value.is_object() {
            return Err(GateLensError::BadStatusDocument);
        }
        Ok(serde_json::from_value(value)?)
    }

    pub(crate) fn poll(&self) {
        self.state.lock().activity = "fetching".into();
        match self.fetch_once() {
            Ok(document) => {
                let mut state = self.state.lock();
                state.fetch_count += 1;
                let fetch_id = state.fetch_count;
                // Replaced whole under the lock; readers never see a
                // half-updated snapshot.
                state.snapshot = Some(Snapshot { document, fetch_id });
                state.activity = "idle".into();
                debug!("snapshot #{fetch_id} fetched");
            }
            Err(err) => {
                warn!("status poll failed: {err}");
                self.state.lock().activity = format!("poll failed: {err}");
            }
        }
    }

    fn wait_for_trigger(&self, stop: &AtomicBool) -> bool {
        let mut pending = self.trigger.lock();
        loop {
            if stop.load(atomic::Ordering::Relaxed) {
                return false;
            }
            if *pending {
                *pending = false;
                return true;
            }
            self.wakeup
                .wait_for(&mut pending, Duration::from_millis(200));
        }
    }

    pub fn wake(&self) {
        self.wakeup.notify_all();
    }
}

/// Spawns the poll thread; exactly one fetch is ever in flight.
pub fn spawn(poller: Arc<Poller>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("poller".into())
        .spawn(move || {
            while poller.wait_for_trigger(&stop) {
                poller.poll();
            }
            info!("poller stopped");
        })
        .expect("failed to spawn poller")
}
