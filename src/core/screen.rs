//! Screen buffer engine
//!
//! This module defines the console's output grid, the single-line input area
//! and the input lock. The grid is only mutated by applying directives.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::directive::Directive;

/// Smallest screen the server accepts
pub const MIN_ROWS: u16 = 20;
pub const MAX_ROWS: u16 = 50;
pub const MIN_COLUMNS: u16 = 64;
pub const MAX_COLUMNS: u16 = 132;

/// Requested screen geometry, sent to the server on authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub rows: u16,
    pub columns: u16,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self { rows: 24, columns: 80 }
    }
}

impl ScreenConfig {
    pub fn new(rows: u16, columns: u16) -> Self {
        Self { rows, columns }
    }

    /// Check the geometry against the range the server will accept
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_ROWS..=MAX_ROWS).contains(&self.rows) {
            return Err(format!(
                "rows must be between {} and {}, got {}",
                MIN_ROWS, MAX_ROWS, self.rows
            ));
        }
        if !(MIN_COLUMNS..=MAX_COLUMNS).contains(&self.columns) {
            return Err(format!(
                "columns must be between {} and {}, got {}",
                MIN_COLUMNS, MAX_COLUMNS, self.columns
            ));
        }
        Ok(())
    }
}

/// 24-bit color, stored as 0xRRGGBB
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rgb(pub u32);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0x000000);
    pub const GREEN: Rgb = Rgb(0x00ff00);
    pub const WHITE: Rgb = Rgb(0xffffff);

    /// Build from a wire value, discarding anything above 24 bits
    pub const fn from_wire(value: u32) -> Self {
        Rgb(value & 0x00ff_ffff)
    }

    pub const fn r(&self) -> u8 {
        ((self.0 >> 16) & 0xff) as u8
    }

    pub const fn g(&self) -> u8 {
        ((self.0 >> 8) & 0xff) as u8
    }

    pub const fn b(&self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// Convert to crossterm color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r(),
            g: self.g(),
            b: self.b(),
        }
    }
}

/// Default colors for blank output rows and the input line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
    pub output_fg: Rgb,
    pub output_bg: Rgb,
    pub input_fg: Rgb,
    pub input_bg: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            output_fg: Rgb::GREEN,
            output_bg: Rgb::BLACK,
            input_fg: Rgb::WHITE,
            input_bg: Rgb::BLACK,
        }
    }
}

/// A single cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub fg: Rgb,
    pub bg: Rgb,
}

impl Cell {
    pub fn blank(fg: Rgb, bg: Rgb) -> Self {
        Self { ch: ' ', fg, bg }
    }
}

/// A single row, always exactly `cols` cells wide
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(cols: u16, fg: Rgb, bg: Rgb) -> Self {
        Self {
            cells: vec![Cell::blank(fg, bg); cols as usize],
        }
    }

    pub fn clear(&mut self, fg: Rgb, bg: Rgb) {
        for cell in &mut self.cells {
            *cell = Cell::blank(fg, bg);
        }
    }

    /// Row contents as a string of exactly `cols` characters
    pub fn text(&self) -> String {
        self.cells.iter().map(|c| c.ch).collect()
    }

    /// Colors of the row, taken from the first cell
    pub fn colors(&self) -> (Rgb, Rgb) {
        self.cells
            .first()
            .map(|c| (c.fg, c.bg))
            .unwrap_or((Rgb::GREEN, Rgb::BLACK))
    }
}

/// The operator's input line
#[derive(Clone, Debug, Default)]
pub struct InputLine {
    text: String,
    max_chars: usize,
    locked: bool,
    /// A submission is in flight (or unacknowledged)
    pending: bool,
}

impl InputLine {
    pub fn new(max_chars: u16) -> Self {
        Self {
            text: String::new(),
            max_chars: max_chars as usize,
            locked: false,
            pending: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn has_pending(&self) -> bool {
        self.pending
    }

    /// Append a character; ignored while locked or full
    pub fn insert(&mut self, ch: char) -> bool {
        if self.locked || ch.is_control() || self.text.chars().count() >= self.max_chars {
            return false;
        }
        self.text.push(ch);
        true
    }

    pub fn backspace(&mut self) -> bool {
        if self.locked {
            return false;
        }
        self.text.pop().is_some()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Create the pending submission and lock the line
    pub fn lock_for_submission(&mut self) {
        self.pending = true;
        self.locked = true;
    }

    /// Drop the pending submission and unlock
    pub fn release(&mut self) {
        self.pending = false;
        self.locked = false;
    }

    fn reset(&mut self) {
        self.text.clear();
        self.release();
    }
}

/// Read-only view of the screen for renderers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenSnapshot {
    pub rows: Vec<RowSnapshot>,
    pub input: String,
    pub locked: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowSnapshot {
    pub text: String,
    pub fg: Rgb,
    pub bg: Rgb,
}

/// Console screen: output grid plus input line
pub struct ScreenBuffer {
    pub rows: u16,
    pub cols: u16,
    lines: Vec<Row>,
    input: InputLine,
    palette: Palette,
    /// Rows changed since the last render
    pub dirty_rows: HashSet<usize>,
    /// Force a full redraw
    pub full_redraw: bool,
    /// Input line changed since the last render
    pub input_dirty: bool,
}

impl ScreenBuffer {
    pub fn new(config: ScreenConfig) -> Self {
        Self::with_palette(config, Palette::default())
    }

    pub fn with_palette(config: ScreenConfig, palette: Palette) -> Self {
        let ScreenConfig { rows, columns } = config;
        Self {
            rows,
            cols: columns,
            lines: (0..rows)
                .map(|_| Row::new(columns, palette.output_fg, palette.output_bg))
                .collect(),
            input: InputLine::new(columns),
            palette,
            dirty_rows: HashSet::new(),
            full_redraw: true,
            input_dirty: true,
        }
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn input(&self) -> &InputLine {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputLine {
        self.input_dirty = true;
        &mut self.input
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.lines.get(index)
    }

    /// Text of a row (None when out of range)
    pub fn row_text(&self, index: usize) -> Option<String> {
        self.lines.get(index).map(Row::text)
    }

    /// Blank the grid and clear and unlock the input line
    pub fn reset(&mut self) {
        self.clear_output();
        self.input.reset();
        self.input_dirty = true;
    }

    /// Apply a single directive
    pub fn apply(&mut self, directive: &Directive) {
        match directive {
            Directive::ClearScreen => self.clear_output(),
            Directive::UnlockKeyboard => {
                self.input.release();
                self.input_dirty = true;
            }
            Directive::DeleteRow { row } => self.delete_row(*row),
            Directive::WriteRow {
                row,
                text,
                fg,
                bg,
                right_justified,
            } => self.write_row(*row, text, *fg, *bg, *right_justified),
        }
    }

    /// Apply a batch in arrival order
    pub fn apply_all<'a, I>(&mut self, directives: I)
    where
        I: IntoIterator<Item = &'a Directive>,
    {
        for directive in directives {
            self.apply(directive);
        }
    }

    /// Operator override: drop any pending submission and unlock
    pub fn force_unlock(&mut self) {
        self.input.release();
        self.input_dirty = true;
    }

    fn clear_output(&mut self) {
        let (fg, bg) = (self.palette.output_fg, self.palette.output_bg);
        for row in &mut self.lines {
            row.clear(fg, bg);
        }
        self.mark_all_dirty();
    }

    fn in_range(&self, row: i64) -> Option<usize> {
        if row >= 0 && row < self.rows as i64 {
            Some(row as usize)
        } else {
            None
        }
    }

    fn delete_row(&mut self, row: i64) {
        let Some(start) = self.in_range(row) else {
            return;
        };
        let last = self.lines.len() - 1;
        for i in start..last {
            self.lines.swap(i, i + 1);
            self.mark_dirty(i);
        }
        let (fg, bg) = (self.palette.output_fg, self.palette.output_bg);
        self.lines[last].clear(fg, bg);
        self.mark_dirty(last);
    }

    fn write_row(&mut self, row: i64, text: &str, fg: Rgb, bg: Rgb, right_justified: bool) {
        let Some(index) = self.in_range(row) else {
            return;
        };
        let cols = self.cols as usize;
        // Control characters would reach the operator's terminal verbatim
        let chars: Vec<char> = text
            .chars()
            .take(cols)
            .map(|ch| if ch.is_control() { ' ' } else { ch })
            .collect();
        let padding = cols - chars.len();

        let blanks = std::iter::repeat(' ').take(padding);
        let padded: Vec<char> = if right_justified {
            blanks.chain(chars).collect()
        } else {
            chars.into_iter().chain(blanks).collect()
        };

        let line = &mut self.lines[index];
        for (cell, ch) in line.cells.iter_mut().zip(padded) {
            *cell = Cell { ch, fg, bg };
        }
        self.mark_dirty(index);
    }

    /// Copy out the grid and input line
    pub fn snapshot(&self) -> ScreenSnapshot {
        ScreenSnapshot {
            rows: self
                .lines
                .iter()
                .map(|row| {
                    let (fg, bg) = row.colors();
                    RowSnapshot {
                        text: row.text(),
                        fg,
                        bg,
                    }
                })
                .collect(),
            input: self.input.text().to_string(),
            locked: self.input.is_locked(),
        }
    }

    pub fn mark_dirty(&mut self, row: usize) {
        self.dirty_rows.insert(row);
    }

    pub fn mark_all_dirty(&mut self) {
        self.full_redraw = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty_rows.clear();
        self.full_redraw = false;
        self.input_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen() -> ScreenBuffer {
        ScreenBuffer::new(ScreenConfig::default())
    }

    fn write(row: i64, text: &str) -> Directive {
        Directive::WriteRow {
            row,
            text: text.to_string(),
            fg: Rgb::GREEN,
            bg: Rgb::BLACK,
            right_justified: false,
        }
    }

    #[test]
    fn test_reset_blanks_grid() {
        let mut s = screen();
        s.apply(&write(3, "something"));
        s.input_mut().insert('x');
        s.input_mut().lock_for_submission();
        s.reset();

        let blank = " ".repeat(80);
        for r in 0..24 {
            assert_eq!(s.row_text(r).unwrap(), blank);
        }
        assert_eq!(s.input().text(), "");
        assert!(!s.input().is_locked());
        assert!(!s.input().has_pending());
    }

    #[test]
    fn test_write_row_pads_and_colors() {
        let mut s = screen();
        s.apply(&Directive::WriteRow {
            row: 0,
            text: "HELLO".into(),
            fg: Rgb::from_wire(0x00ff00),
            bg: Rgb::from_wire(0),
            right_justified: false,
        });

        let expected = format!("HELLO{}", " ".repeat(75));
        assert_eq!(s.row_text(0).unwrap(), expected);
        let row = s.row(0).unwrap();
        assert!(row.cells.iter().all(|c| c.fg == Rgb::GREEN && c.bg == Rgb::BLACK));
    }

    #[test]
    fn test_write_row_right_justified() {
        let mut s = screen();
        s.apply(&Directive::WriteRow {
            row: 5,
            text: "READY".into(),
            fg: Rgb::WHITE,
            bg: Rgb::BLACK,
            right_justified: true,
        });

        let text = s.row_text(5).unwrap();
        assert_eq!(text.chars().count(), 80);
        assert!(text.ends_with("READY"));
        assert!(text.starts_with(&" ".repeat(75)));
    }

    #[test]
    fn test_write_row_truncates() {
        let mut s = screen();
        let long: String = "0123456789".repeat(10);
        s.apply(&write(1, &long));
        assert_eq!(s.row_text(1).unwrap(), long[..80]);

        s.apply(&Directive::WriteRow {
            row: 2,
            text: long.clone(),
            fg: Rgb::GREEN,
            bg: Rgb::BLACK,
            right_justified: true,
        });
        assert_eq!(s.row_text(2).unwrap(), long[..80]);
    }

    #[test]
    fn test_write_row_blanks_control_characters() {
        let mut s = screen();
        s.apply(&write(0, "A\x1b[2J\nB\tC"));
        let text = s.row_text(0).unwrap();
        assert!(text.starts_with("A [2J B C"));
        assert_eq!(text.chars().count(), 80);
        assert!(!text.chars().any(|ch| ch.is_control()));
    }

    #[test]
    fn test_write_row_counts_characters_not_bytes() {
        let mut s = screen();
        s.apply(&write(0, "é"));
        let text = s.row_text(0).unwrap();
        assert_eq!(text.chars().count(), 80);
        assert!(text.starts_with('é'));
    }

    #[test]
    fn test_delete_row_shifts_up_and_blanks_last() {
        let mut s = screen();
        for r in 0..24 {
            s.apply(&write(r, &format!("line {}", r)));
        }
        s.apply(&Directive::DeleteRow { row: 10 });

        for r in 0..10 {
            assert!(s.row_text(r).unwrap().starts_with(&format!("line {} ", r)));
        }
        for r in 10..23 {
            assert!(s.row_text(r).unwrap().starts_with(&format!("line {} ", r + 1)));
        }
        assert_eq!(s.row_text(23).unwrap(), " ".repeat(80));
    }

    #[test]
    fn test_delete_last_row() {
        let mut s = screen();
        s.apply(&write(23, "bottom"));
        s.apply(&Directive::DeleteRow { row: 23 });
        assert_eq!(s.row_text(23).unwrap(), " ".repeat(80));
    }

    #[test]
    fn test_out_of_range_rows_are_ignored() {
        let mut s = screen();
        s.apply(&write(0, "keep"));
        let before = s.snapshot();

        s.apply(&write(24, "nope"));
        s.apply(&write(-1, "nope"));
        s.apply(&Directive::DeleteRow { row: 24 });
        s.apply(&Directive::DeleteRow { row: -3 });

        assert_eq!(s.snapshot(), before);
    }

    #[test]
    fn test_clear_screen_leaves_input() {
        let mut s = screen();
        s.apply(&write(0, "text"));
        s.input_mut().insert('a');
        s.input_mut().lock_for_submission();
        s.apply(&Directive::ClearScreen);

        assert_eq!(s.row_text(0).unwrap(), " ".repeat(80));
        assert_eq!(s.input().text(), "a");
        assert!(s.input().is_locked());
    }

    #[test]
    fn test_unlock_keyboard_clears_pending() {
        let mut s = screen();
        s.input_mut().lock_for_submission();
        assert!(s.input().has_pending());

        s.apply(&Directive::UnlockKeyboard);
        assert!(!s.input().is_locked());
        assert!(!s.input().has_pending());
    }

    #[test]
    fn test_replay_from_reset_is_identical() {
        let sequence = vec![
            write(0, "first"),
            write(1, "second"),
            Directive::DeleteRow { row: 0 },
            Directive::WriteRow {
                row: 23,
                text: "status".into(),
                fg: Rgb(0x00ffff),
                bg: Rgb(0x202020),
                right_justified: true,
            },
            Directive::ClearScreen,
            write(4, "after clear"),
            Directive::DeleteRow { row: 2 },
        ];

        let mut s = screen();
        s.apply_all(&sequence);
        let first = s.snapshot();

        s.reset();
        s.apply_all(&sequence);
        assert_eq!(s.snapshot(), first);
    }

    #[test]
    fn test_input_line_limits() {
        let mut input = InputLine::new(4);
        for ch in "abcdef".chars() {
            input.insert(ch);
        }
        assert_eq!(input.text(), "abcd");

        input.lock_for_submission();
        assert!(!input.insert('z'));
        assert!(!input.backspace());

        input.release();
        assert!(input.backspace());
        assert_eq!(input.text(), "abc");
    }

    #[test]
    fn test_screen_config_validation() {
        assert!(ScreenConfig::default().validate().is_ok());
        assert!(ScreenConfig::new(19, 80).validate().is_err());
        assert!(ScreenConfig::new(24, 133).validate().is_err());
        assert!(ScreenConfig::new(50, 132).validate().is_ok());
    }

    #[test]
    fn test_rgb_components() {
        let c = Rgb::from_wire(0xff12_3456);
        assert_eq!(c, Rgb(0x123456));
        assert_eq!((c.r(), c.g(), c.b()), (0x12, 0x34, 0x56));
    }
}
