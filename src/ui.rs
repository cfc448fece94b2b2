use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Paragraph, Wrap};
use ratatui::Frame;

use crate::app::App;
use crate::layout::Card;
use crate::model::{DetailState, Pipeline, Review};

/// Rows reserved below the column area for the two status lines.
pub const STATUS_ROWS: u16 = 2;

fn header_style() -> Style {
    Style::default().add_modifier(Modifier::BOLD)
}

fn dim() -> Style {
    Style::default().add_modifier(Modifier::DIM)
}

fn result_style(result: Option<&str>, remaining_ms: u64) -> Style {
    match result {
        Some(r) if r.eq_ignore_ascii_case("success") => Style::default().fg(Color::Green),
        Some(r) if r.to_ascii_lowercase().contains("fail") => Style::default().fg(Color::Red),
        _ if remaining_ms > 0 => Style::default().fg(Color::Yellow),
        _ => Style::default(),
    }
}

fn format_remaining(ms: u64) -> String {
    let total = ms / 1000;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Header card for one pipeline: name, description, spacer.
pub fn pipeline_card(pipeline: &Pipeline) -> Card {
    let mut lines = vec![Line::styled(pipeline.name.clone(), header_style())];
    if !pipeline.description.is_empty() {
        lines.push(Line::styled(pipeline.description.clone(), dim()));
    }
    lines.push(Line::from(""));
    Card::new(lines, false, None)
}

/// Card for one review: identity, completion, job rows, and commit metadata
/// once enriched.
pub fn review_card(review: &Review) -> Card {
    let mut lines = Vec::new();

    let state_tag = match review.state {
        DetailState::New | DetailState::Detailing | DetailState::Detailed => None,
        DetailState::Ignored => Some("(ignored)"),
        DetailState::Errored => Some("(error)"),
    };
    let mut title = vec![
        Span::styled(review.key.display(), header_style()),
        Span::raw(" "),
        Span::raw(review.project.clone()),
    ];
    if let Some(tag) = state_tag {
        title.push(Span::raw(" "));
        title.push(Span::styled(tag, dim()));
    }
    lines.push(Line::from(title));

    if let Some(detail) = &review.detail {
        lines.push(Line::from(detail.summary.clone()));
        lines.push(Line::styled(detail.author.clone(), dim()));
    }

    lines.push(Line::styled(
        format!("{:3.0}% complete", review.completion() * 100.0),
        dim(),
    ));

    for job in review.jobs.values() {
        let status = match (&job.result, job.remaining_ms) {
            (Some(result), _) => result.clone(),
            (None, 0) => "queued".to_string(),
            (None, ms) => format_remaining(ms),
        };
        let style = result_style(job.result.as_deref(), job.remaining_ms);
        let mut spans = vec![
            Span::raw("  "),
            Span::raw(job.name.clone()),
            Span::raw(" "),
            Span::styled(status, style),
        ];
        if !job.voting {
            spans.push(Span::styled(" (non-voting)", dim()));
        }
        lines.push(Line::from(spans));
    }
    lines.push(Line::from(""));

    Card::new(lines, true, Some(review.key.clone()))
}

fn column_text(cards: &[Card], focused: Option<usize>) -> Text<'static> {
    let mut text = Text::default();
    for (idx, card) in cards.iter().enumerate() {
        for line in &card.lines {
            let mut line = line.clone();
            if focused == Some(idx) {
                line = line.patch_style(Style::default().add_modifier(Modifier::REVERSED));
            }
            text.lines.push(line);
        }
    }
    text
}

/// Paints the visible columns side by side plus the two status lines.
pub fn draw(frame: &mut Frame, app: &App) {
    let [body, status_main, status_detail] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(frame.size());

    draw_columns(frame, app, body);

    let (left, right) = app.layout.overflow();
    let mut main = String::new();
    if left {
        main.push_str("◀ ");
    }
    main.push_str(&app.status_main);
    if right {
        main.push_str(" ▶");
    }
    frame.render_widget(Paragraph::new(main).style(dim()), status_main);
    frame.render_widget(
        Paragraph::new(app.status_detail.clone()).style(dim()),
        status_detail,
    );
}

fn draw_columns(frame: &mut Frame, app: &App, area: Rect) {
    let visible = app.layout.visible();
    if visible.is_empty() {
        frame.render_widget(Paragraph::new("waiting for first snapshot...").style(dim()), area);
        return;
    }

    let constraints: Vec<Constraint> = visible
        .iter()
        .map(|_| Constraint::Ratio(1, visible.len() as u32))
        .collect();
    let areas = Layout::horizontal(constraints).split(area);

    let focus = app.layout.focus();
    for (slot, (column, slot_area)) in visible.iter().zip(areas.iter()).enumerate() {
        let absolute = app.layout.index() + slot;
        let focused_card = match focus {
            Some((col, card)) if col == absolute => Some(card),
            _ => None,
        };
        let paragraph = Paragraph::new(column_text(&column.cards, focused_card))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, *slot_area);
    }
}
