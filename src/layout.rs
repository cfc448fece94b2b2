use ratatui::text::Line;

use crate::model::ReviewKey;

/// One rendered item: a pipeline header or a review card.
///
/// Lines are styled up front by the render pass; the layout engine only
/// needs their wrapped height at a given column width.
pub struct Card {
    pub lines: Vec<Line<'static>>,
    pub focusable: bool,
    pub key: Option<ReviewKey>,
}

impl Card {
    pub fn new(lines: Vec<Line<'static>>, focusable: bool, key: Option<ReviewKey>) -> Self {
        Self {
            lines,
            focusable,
            key,
        }
    }

    /// Rendered height when wrapped at `width` columns.
    pub fn height(&self, width: u16) -> u16 {
        let width = width.max(1) as usize;
        self.lines
            .iter()
            .map(|line| {
                let w = line.width();
                if w == 0 {
                    1
                } else {
                    w.div_ceil(width) as u16
                }
            })
            .sum::<u16>()
            .max(1)
    }
}

#[derive(Default)]
pub struct Column {
    pub cards: Vec<Card>,
    pub height: u16,
}

impl Column {
    fn first_focusable(&self) -> Option<usize> {
        self.cards.iter().position(|card| card.focusable)
    }

    fn last_focusable(&self) -> Option<usize> {
        self.cards.iter().rposition(|card| card.focusable)
    }
}

/// Greedy column packer with a scrollable window of `screens` visible
/// columns.
///
/// Placement is first-fit over columns in creation order, so the caller
/// controls visible ordering by feeding cards in display order. `shift_left`
/// slides the window toward later columns, `shift_right` back toward the
/// first; both are no-ops at their boundary.
pub struct ColumnLayout {
    screens: usize,
    columns: Vec<Column>,
    index: usize,
    left_overflow: bool,
    right_overflow: bool,
    focus: Option<(usize, usize)>,
}

impl ColumnLayout {
    pub fn new(screens: usize) -> Self {
        let mut layout = Self {
            screens: screens.max(1),
            columns: Vec::new(),
            index: 0,
            left_overflow: false,
            right_overflow: false,
            focus: None,
        };
        layout.clear();
        layout
    }

    /// Drops every column beyond the initial window and re-seeds exactly
    /// `screens` empty columns at index 0.
    pub fn clear(&mut self) {
        self.columns.clear();
        self.columns
            .extend((0..self.screens).map(|_| Column::default()));
        self.index = 0;
        self.left_overflow = false;
        self.right_overflow = false;
        self.focus = None;
    }

    pub fn column_width(&self, viewport_cols: u16) -> u16 {
        (viewport_cols / self.screens as u16).max(1)
    }

    /// Places a card into the first column whose running height still fits
    /// the viewport, appending a new column when none does.
    pub fn place(&mut self, card: Card, viewport_rows: u16, viewport_cols: u16) {
        let height = card.height(self.column_width(viewport_cols));
        let slot = match self
            .columns
            .iter()
            .position(|column| column.height + height <= viewport_rows)
        {
            Some(slot) => slot,
            None => {
                self.columns.push(Column::default());
                self.columns.len() - 1
            }
        };

        if card.focusable && self.focus.is_none() {
            self.focus = Some((slot, self.columns[slot].cards.len()));
        }
        let column = &mut self.columns[slot];
        column.height += height;
        column.cards.push(card);
        self.update_overflow();
    }

    /// Slides the window one column toward the end. Returns false without
    /// touching any state when the window already shows the last column.
    pub fn shift_left(&mut self) -> bool {
        if self.index + self.screens >= self.columns.len() {
            return false;
        }
        self.index += 1;
        self.update_overflow();
        // Keep keyboard navigation continuous: land on the last focusable
        // card of the column that just scrolled in.
        let rightmost = self.index + self.screens - 1;
        if let Some(card) = self.columns[rightmost].last_focusable() {
            self.focus = Some((rightmost, card));
        }
        true
    }

    /// Slides the window one column back toward the first. Returns false
    /// without touching any state at index 0.
    pub fn shift_right(&mut self) -> bool {
        if self.index == 0 {
            return false;
        }
        self.index -= 1;
        self.update_overflow();
        if let Some(card) = self.columns[self.index].first_focusable() {
            self.focus = Some((self.index, card));
        }
        true
    }

    fn update_overflow(&mut self) {
        self.left_overflow = self.index > 0;
        self.right_overflow = self.columns.len() > self.index + self.screens;
    }

    /// (left, right) overflow indicator flags.
    pub fn overflow(&self) -> (bool, bool) {
        (self.left_overflow, self.right_overflow)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The columns currently inside the scroll window.
    pub fn visible(&self) -> &[Column] {
        let end = (self.index + self.screens).min(self.columns.len());
        &self.columns[self.index..end]
    }

    /// Focused card as (absolute column index, card index).
    pub fn focus(&self) -> Option<(usize, usize)> {
        self.focus
    }

    /// Moves focus one column left, shifting the window at the boundary.
    pub fn focus_left(&mut self) -> bool {
        let Some((col, _)) = self.focus else {
            return self.shift_right();
        };
        for candidate in (self.index..col).rev() {
            if let Some(card) = self.columns[candidate].first_focusable() {
                self.focus = Some((candidate, card));
                return true;
            }
        }
        self.shift_right()
    }

    /// Moves focus one column right, shifting the window at the boundary.
    pub fn focus_right(&mut self) -> bool {
        let Some((col, _)) = self.focus else {
            return self.shift_left();
        };
        let end = (self.index + self.screens).min(self.columns.len());
        for candidate in col + 1..end {
            if let Some(card) = self.columns[candidate].first_focusable() {
                self.focus = Some((candidate, card));
                return true;
            }
        }
        self.shift_left()
    }

    /// Moves focus `delta` focusable cards within the current column,
    /// clamped at the column edges.
    pub fn focus_vertical(&mut self, delta: isize) -> bool {
        let Some((col, card)) = self.focus else {
            return false;
        };
        let focusable: Vec<usize> = self.columns[col]
            .cards
            .iter()
            .enumerate()
            .filter(|(_, c)| c.focusable)
            .map(|(i, _)| i)
            .collect();
        let Some(at) = focusable.iter().position(|&i| i == card) else {
            return false;
        };
        let next = (at as isize + delta).clamp(0, focusable.len() as isize - 1) as usize;
        if next == at {
            return false;
        }
        self.focus = Some((col, focusable[next]));
        true
    }

    /// Key of the focused review card, if any.
    pub fn focused_key(&self) -> Option<&ReviewKey> {
        let (col, card) = self.focus?;
        self.columns.get(col)?.cards.get(card)?.key.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(height: u16) -> Card {
        let lines = (0..height).map(|_| Line::from("x")).collect();
        Card::new(lines, true, None)
    }

    fn heights(layout: &ColumnLayout) -> Vec<Vec<u16>> {
        layout
            .columns()
            .iter()
            .map(|column| {
                column
                    .cards
                    .iter()
                    .map(|card| card.lines.len() as u16)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_first_fit_is_deterministic() {
        let mut layout = ColumnLayout::new(2);
        for h in [4, 4, 4, 2] {
            layout.place(card(h), 10, 80);
        }
        // 4+4 fill column 0 to 8; the next 4 overflows into column 1; the 2
        // still fits back in column 0.
        assert_eq!(heights(&layout), vec![vec![4, 4, 2], vec![4]]);
    }

    #[test]
    fn test_overflow_appends_columns_and_flags_right() {
        let mut layout = ColumnLayout::new(1);
        for _ in 0..3 {
            layout.place(card(4), 5, 40);
        }
        assert_eq!(layout.columns().len(), 3);
        assert_eq!(layout.overflow(), (false, true));
    }

    #[test]
    fn test_oversized_card_still_gets_a_column() {
        let mut layout = ColumnLayout::new(1);
        layout.place(card(20), 5, 40);
        // Nothing fits a 20-row card in a 5-row viewport; it lands in a
        // fresh column anyway.
        assert_eq!(layout.columns().len(), 2);
        assert_eq!(layout.columns()[1].height, 20);
    }

    #[test]
    fn test_long_lines_wrap_into_extra_rows() {
        let wide = Card::new(vec![Line::from("abcdefghij")], false, None);
        assert_eq!(wide.height(4), 3);
        assert_eq!(wide.height(10), 1);
    }

    #[test]
    fn test_shift_boundaries_are_no_ops() {
        let mut layout = ColumnLayout::new(1);
        for _ in 0..3 {
            layout.place(card(4), 5, 40);
        }
        assert!(!layout.shift_right());
        assert_eq!(layout.index(), 0);

        assert!(layout.shift_left());
        assert!(layout.shift_left());
        // Window now shows the last column.
        assert!(!layout.shift_left());
        assert_eq!(layout.index(), 2);
    }

    #[test]
    fn test_shift_round_trip_restores_window_and_flags() {
        let mut layout = ColumnLayout::new(1);
        for _ in 0..3 {
            layout.place(card(4), 5, 40);
        }
        let before = (layout.index(), layout.overflow());
        assert!(layout.shift_left());
        assert!(layout.shift_right());
        assert_eq!((layout.index(), layout.overflow()), before);
    }

    #[test]
    fn test_shift_left_focuses_last_card_of_new_rightmost_column() {
        let mut layout = ColumnLayout::new(1);
        layout.place(card(2), 5, 40);
        layout.place(card(2), 5, 40);
        // Third and fourth cards overflow into column 1.
        layout.place(card(3), 5, 40);
        layout.place(card(2), 5, 40);

        assert!(layout.shift_left());
        assert_eq!(layout.focus(), Some((1, 1)));
    }

    #[test]
    fn test_horizontal_focus_shifts_at_the_window_edge() {
        let mut layout = ColumnLayout::new(1);
        for _ in 0..2 {
            layout.place(card(4), 5, 40);
        }
        assert_eq!(layout.focus(), Some((0, 0)));
        // Right at the rightmost visible column slides the window.
        assert!(layout.focus_right());
        assert_eq!(layout.index(), 1);
        // And back.
        assert!(layout.focus_left());
        assert_eq!(layout.index(), 0);
        // Left at the first column is swallowed by the boundary.
        assert!(!layout.focus_left());
    }

    #[test]
    fn test_vertical_focus_clamps_at_column_edges() {
        let mut layout = ColumnLayout::new(1);
        layout.place(card(1), 10, 40);
        layout.place(card(1), 10, 40);
        layout.place(card(1), 10, 40);

        assert!(!layout.focus_vertical(-1));
        assert!(layout.focus_vertical(2));
        assert_eq!(layout.focus(), Some((0, 2)));
        assert!(!layout.focus_vertical(1));
    }

    #[test]
    fn test_clear_reseeds_the_window() {
        let mut layout = ColumnLayout::new(2);
        for _ in 0..6 {
            layout.place(card(4), 5, 80);
        }
        layout.shift_left();
        layout.clear();
        assert_eq!(layout.columns().len(), 2);
        assert_eq!(layout.index(), 0);
        assert_eq!(layout.overflow(), (false, false));
        assert_eq!(layout.focus(), None);
    }
}
