use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::detail::DetailQueue;
use crate::layout::ColumnLayout;
use crate::poller::Poller;
use crate::render::RenderRequest;

pub type UiCallback = Box<dyn FnOnce(&mut App) + Send>;

/// The one ordered queue through which every other thread reaches the UI.
///
/// Workers never touch UI state directly; they enqueue a closure here and
/// the coordinator applies it on its own thread at the next tick.
#[derive(Clone, Default)]
pub struct UiQueue {
    inner: Arc<Mutex<VecDeque<UiCallback>>>,
}

impl UiQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, callback: impl FnOnce(&mut App) + Send + 'static) {
        self.inner.lock().push_back(Box::new(callback));
    }

    fn drain(&self) -> Vec<UiCallback> {
        self.inner.lock().drain(..).collect()
    }
}

/// Single-threaded owner of all UI-facing state, driven by the main loop at
/// a roughly one-second tick.
pub struct App {
    pub layout: ColumnLayout,
    callbacks: UiQueue,
    poller: Arc<Poller>,
    details: Arc<DetailQueue>,
    render_tx: Sender<RenderRequest>,
    render_in_flight: bool,
    last_rendered: u64,
    last_activity: Instant,
    poll_interval: Duration,
    pub status_main: String,
    pub status_detail: String,
    should_quit: bool,
}

impl App {
    pub fn new(
        screens: usize,
        poller: Arc<Poller>,
        details: Arc<DetailQueue>,
        render_tx: Sender<RenderRequest>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            layout: ColumnLayout::new(screens),
            callbacks: UiQueue::new(),
            poller,
            details,
            render_tx,
            render_in_flight: false,
            last_rendered: 0,
            // Backdated so the first tick triggers a poll immediately.
            last_activity: Instant::now() - poll_interval,
            poll_interval,
            status_main: String::new(),
            status_detail: String::new(),
            should_quit: false,
        }
    }

    pub fn callbacks(&self) -> UiQueue {
        self.callbacks.clone()
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// One coordinator tick: drain callbacks, hand off a render if a newer
    /// snapshot arrived, trigger the poller when due, refresh status lines.
    /// Never blocks on poller or worker I/O.
    pub fn on_tick(&mut self, body_rows: u16, body_cols: u16) {
        self.drain_callbacks();

        let (snapshot, fetch_count) = self.poller.latest();
        if !self.render_in_flight && fetch_count > self.last_rendered {
            if let Some(snapshot) = snapshot {
                debug!("submitting render for snapshot #{fetch_count}");
                self.render_in_flight = true;
                self.last_rendered = fetch_count;
                self.last_activity = Instant::now();
                let _ = self.render_tx.send(RenderRequest {
                    snapshot,
                    rows: body_rows,
                    cols: body_cols,
                });
            }
        } else if !self.render_in_flight && self.last_activity.elapsed() >= self.poll_interval {
            self.poller.trigger();
            self.last_activity = Instant::now();
        }

        self.update_status();
    }

    fn drain_callbacks(&mut self) {
        for callback in self.callbacks.drain() {
            // One misbehaving callback must not take the drain down with it.
            if panic::catch_unwind(AssertUnwindSafe(|| callback(self))).is_err() {
                warn!("UI callback panicked; continuing");
            }
        }
    }

    fn update_status(&mut self) {
        let (state, fetch_count) = self.poller.activity();
        let countdown = self
            .poll_interval
            .saturating_sub(self.last_activity.elapsed());
        self.status_main = format!(
            "{state} | fetch #{fetch_count} | next poll in {}s",
            countdown.as_secs()
        );
        let (detail_state, completed) = self.details.activity();
        self.status_detail = format!(
            "details: {detail_state} | backlog {} | done {completed}",
            self.details.len()
        );
        if let Some(key) = self.layout.focused_key() {
            self.status_detail.push_str(&format!(" | focus {}", key.display()));
        }
    }

    /// Applied by the render worker's completion callback.
    pub fn install_layout(&mut self, layout: ColumnLayout) {
        self.layout = layout;
    }

    pub fn render_done(&mut self) {
        self.render_in_flight = false;
    }

    /// Re-queues the current snapshot so the next tick lays it out again,
    /// e.g. after a terminal resize.
    pub fn viewport_changed(&mut self) {
        self.last_rendered = self.last_rendered.saturating_sub(1);
    }

    /// Quit and refresh keys are handled here; horizontal movement at the
    /// focus boundary becomes a window shift inside the layout engine; any
    /// other key falls through.
    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
            }
            KeyCode::Char('r') | KeyCode::F(5) => {
                self.poller.trigger();
                self.last_activity = Instant::now();
            }
            KeyCode::Left => {
                self.layout.focus_left();
            }
            KeyCode::Right => {
                self.layout.focus_right();
            }
            KeyCode::Up => {
                self.layout.focus_vertical(-1);
            }
            KeyCode::Down => {
                self.layout.focus_vertical(1);
            }
            KeyCode::PageUp => {
                self.layout.focus_vertical(-5);
            }
            KeyCode::PageDown => {
                self.layout.focus_vertical(5);
            }
            _ => {}
        }
    }
}
