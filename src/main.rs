mod app;
mod cli;
mod config;
mod detail;
mod error;
mod gitops;
mod layout;
mod model;
mod poller;
mod render;
mod ui;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::info;
use ratatui::{backend::CrosstermBackend, Terminal};

use app::App;
use cli::Cli;
use config::Settings;
use detail::DetailQueue;
use poller::Poller;
use render::Renderer;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::resolve(&cli)?;

    if settings.once {
        env_logger::init();
        return poll_once(&settings);
    }

    init_file_logging()?;
    info!("starting gatelens against {}", settings.url);
    run(settings)
}

/// The alternate screen owns the terminal, so log output goes to a file
/// under the cache directory instead of stderr.
fn init_file_logging() -> Result<()> {
    let dir = dirs::cache_dir()
        .context("no cache directory available for logs")?
        .join("gatelens");
    std::fs::create_dir_all(&dir)?;
    let file = std::fs::File::create(dir.join("gatelens.log"))?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

/// Debug aid: one poll, parsed snapshot to stdout, no TUI.
fn poll_once(settings: &Settings) -> Result<()> {
    let poller = Poller::new(settings.url.clone(), settings.poll_interval)?;
    let document = poller.fetch_once()?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn run(settings: Settings) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let poller = Poller::new(settings.url.clone(), settings.poll_interval)?;
    let details = DetailQueue::new();
    let (render_tx, render_rx) = mpsc::channel();

    let mut app = App::new(
        settings.screens,
        poller.clone(),
        details.clone(),
        render_tx,
        settings.poll_interval,
    );
    let ui_queue = app.callbacks();

    let renderer = Renderer::new(
        settings.screens,
        &settings.pipelines,
        &settings.projects,
        settings.git.is_some(),
        details.clone(),
        ui_queue.clone(),
    )?;

    let poller_handle = poller::spawn(poller.clone(), stop.clone());
    let render_handle = render::spawn(renderer, render_rx);
    let detail_handle = settings
        .git
        .clone()
        .map(|git| detail::spawn(details.clone(), git, ui_queue, stop.clone()));

    let mut terminal = setup_terminal()?;
    let result = run_loop(&mut terminal, &mut app);
    restore_terminal(&mut terminal)?;

    // Unwind the workers at their next safe point.
    stop.store(true, Ordering::Relaxed);
    poller.wake();
    details.wake();
    drop(app); // closes the render channel
    let _ = poller_handle.join();
    let _ = render_handle.join();
    if let Some(handle) = detail_handle {
        let _ = handle.join();
    }

    info!("gatelens stopped");
    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    let tick_rate = Duration::from_secs(1);
    let input_poll = Duration::from_millis(100);
    let mut last_tick = Instant::now() - tick_rate;

    loop {
        if last_tick.elapsed() >= tick_rate {
            let size = terminal.size()?;
            app.on_tick(size.height.saturating_sub(ui::STATUS_ROWS), size.width);
            last_tick = Instant::now();
        }

        terminal.draw(|frame| ui::draw(frame, app))?;

        if event::poll(input_poll)? {
            match event::read()? {
                Event::Key(key) => {
                    if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                        app.handle_key(key);
                    }
                }
                Event::Resize(_, _) => {
                    app.viewport_changed();
                }
                _ => {}
            }
        }

        if app.should_quit() {
            break;
        }
    }

    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
