//! Console renderer using crossterm
//!
//! Layout, top to bottom: the output grid, the input line, the status row.
//! The credential prompt is drawn over the grid.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};

use crate::core::console::Console;
use crate::core::screen::{Rgb, Row, ScreenBuffer};

use super::prompt::{CredentialPrompt, PromptField};
use super::UiState;

const STATUS_FG: Rgb = Rgb(0x000000);
const STATUS_BG: Rgb = Rgb(0xc0c0c0);
const ALERT_BG: Rgb = Rgb(0xff4040);
const PROMPT_FG: Rgb = Rgb(0xffffff);
const PROMPT_BG: Rgb = Rgb(0x00008b);

/// Terminal renderer
pub struct Renderer {
    initialized: bool,
    /// Status text last drawn; redrawn only on change
    last_status: Option<String>,
    /// The prompt was visible on the previous frame
    overlay_visible: bool,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            initialized: false,
            last_status: None,
            overlay_visible: false,
        }
    }

    /// Get terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        stdout.flush()?;
        self.initialized = true;
        Ok(())
    }

    /// Cleanup the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(stdout, ResetColor, SetAttribute(Attribute::Reset));
        let _ = execute!(stdout, Show, EnableLineWrap, LeaveAlternateScreen);
        let _ = stdout.flush();
        terminal::disable_raw_mode()?;
        println!();
        Ok(())
    }

    /// Render one frame
    pub fn render(&mut self, console: &mut Console, ui: &UiState) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = io::BufWriter::with_capacity(65536, stdout.lock());

        // Begin synchronized update
        write!(out, "\x1b[?2026h")?;
        queue!(out, Hide)?;

        let overlay = ui.prompt.is_some();
        let screen = console.screen();
        let full = screen.full_redraw || overlay || self.overlay_visible;

        if full {
            for index in 0..screen.rows {
                if let Some(row) = screen.row(index as usize) {
                    self.render_row(&mut out, index, row)?;
                }
            }
        } else {
            let mut dirty: Vec<usize> = screen.dirty_rows.iter().copied().collect();
            dirty.sort_unstable();
            for index in dirty {
                if let Some(row) = screen.row(index) {
                    self.render_row(&mut out, index as u16, row)?;
                }
            }
        }

        if full || screen.input_dirty {
            self.render_input(&mut out, screen)?;
        }

        let status = status_text(console, ui.message.as_deref());
        if full || self.last_status.as_deref() != Some(status.as_str()) {
            let alert = console.controller().failure_limit_reached();
            self.render_status(&mut out, screen, &status, alert)?;
            self.last_status = Some(status);
        }

        match &ui.prompt {
            Some(prompt) => self.render_prompt(&mut out, screen, prompt)?,
            None => {
                let col = screen.input().text().chars().count().min(screen.cols as usize - 1);
                if !screen.input().is_locked() {
                    queue!(out, MoveTo(col as u16, screen.rows), Show)?;
                }
            }
        }

        // End synchronized update
        write!(out, "\x1b[?2026l")?;
        out.flush()?;

        self.overlay_visible = overlay;
        console.screen_mut().clear_dirty();
        Ok(())
    }

    fn render_row<W: Write>(&self, out: &mut W, y: u16, row: &Row) -> io::Result<()> {
        queue!(out, MoveTo(0, y))?;
        let mut current: Option<(Rgb, Rgb)> = None;
        for cell in &row.cells {
            if current != Some((cell.fg, cell.bg)) {
                queue!(
                    out,
                    SetForegroundColor(cell.fg.to_crossterm()),
                    SetBackgroundColor(cell.bg.to_crossterm())
                )?;
                current = Some((cell.fg, cell.bg));
            }
            queue!(out, Print(cell.ch))?;
        }
        Ok(())
    }

    fn render_input<W: Write>(&self, out: &mut W, screen: &ScreenBuffer) -> io::Result<()> {
        let palette = screen.palette();
        let input = screen.input();
        let line = pad(input.text(), screen.cols as usize);
        queue!(
            out,
            MoveTo(0, screen.rows),
            SetForegroundColor(palette.input_fg.to_crossterm()),
            SetBackgroundColor(palette.input_bg.to_crossterm())
        )?;
        if input.is_locked() {
            queue!(out, SetAttribute(Attribute::Dim))?;
        }
        queue!(out, Print(line), SetAttribute(Attribute::Reset))?;
        Ok(())
    }

    fn render_status<W: Write>(
        &self,
        out: &mut W,
        screen: &ScreenBuffer,
        status: &str,
        alert: bool,
    ) -> io::Result<()> {
        let bg = if alert { ALERT_BG } else { STATUS_BG };
        queue!(
            out,
            MoveTo(0, screen.rows + 1),
            SetForegroundColor(STATUS_FG.to_crossterm()),
            SetBackgroundColor(bg.to_crossterm()),
            Print(pad(status, screen.cols as usize)),
            ResetColor
        )?;
        Ok(())
    }

    fn render_prompt<W: Write>(
        &self,
        out: &mut W,
        screen: &ScreenBuffer,
        prompt: &CredentialPrompt,
    ) -> io::Result<()> {
        let cols = screen.cols as usize;
        let width = (prompt.message.chars().count() + 4).clamp(40, cols);
        let x = ((cols - width) / 2) as u16;
        let y = screen.rows.saturating_sub(5) / 2;

        let user_line = format!(" Username: {}", prompt.username);
        let pass_line = format!(" Password: {}", prompt.masked_password());
        let lines = [
            String::new(),
            format!(" {}", prompt.message),
            String::new(),
            user_line.clone(),
            pass_line.clone(),
            String::new(),
        ];

        queue!(
            out,
            SetForegroundColor(PROMPT_FG.to_crossterm()),
            SetBackgroundColor(PROMPT_BG.to_crossterm())
        )?;
        for (i, line) in lines.iter().enumerate() {
            queue!(out, MoveTo(x, y + i as u16), Print(pad(line, width)))?;
        }
        queue!(out, ResetColor)?;

        let (line, dy) = match prompt.field {
            PromptField::Username => (&user_line, 3),
            PromptField::Password => (&pass_line, 4),
        };
        let cursor_x = x + (line.chars().count().min(width - 1)) as u16;
        queue!(out, MoveTo(cursor_x, y + dy), Show)?;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Status row: lock, poll and session indicators followed by the latest notice
pub fn status_text(console: &Console, message: Option<&str>) -> String {
    let controller = console.controller();
    let flag = |on: bool, name: &'static str| if on { name } else { "    " };

    let mut status = format!(
        " {} {} {} ",
        flag(console.screen().input().is_locked(), "LOCK"),
        flag(controller.is_polling(), "POLL"),
        flag(controller.is_authenticated(), "SESN"),
    );
    if controller.failure_limit_reached() {
        status.push_str(&format!(
            "| {} poll failures, Ctrl+R to retry ",
            controller.consecutive_failures()
        ));
    }
    if let Some(message) = message {
        status.push_str("| ");
        status.push_str(message);
    }
    status
}

/// Truncate or pad with spaces to exactly `width` chars
fn pad(text: &str, width: usize) -> String {
    let mut line: String = text.chars().take(width).collect();
    let len = line.chars().count();
    line.extend(std::iter::repeat(' ').take(width - len));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::directive::Directive;
    use crate::core::mock::ScriptedTransport;
    use crate::core::scheduler::Scheduler;
    use crate::core::screen::ScreenConfig;
    use crate::core::session::SessionController;
    use std::sync::Arc;

    fn console() -> Console {
        let config = ScreenConfig::default();
        let controller = SessionController::new(Arc::new(ScriptedTransport::default()), config);
        Console::new(controller, Scheduler::default(), ScreenBuffer::new(config))
    }

    #[test]
    fn test_pad() {
        assert_eq!(pad("abc", 5), "abc  ");
        assert_eq!(pad("abcdef", 3), "abc");
        assert_eq!(pad("", 2), "  ");
    }

    #[test]
    fn test_row_output_has_no_server_control_sequences() {
        let mut screen = ScreenBuffer::new(ScreenConfig::default());
        screen.apply(&Directive::WriteRow {
            row: 0,
            text: "A\x1b[2J\nB".into(),
            fg: Rgb::GREEN,
            bg: Rgb::BLACK,
            right_justified: false,
        });

        let mut out: Vec<u8> = Vec::new();
        let row = screen.row(0).unwrap();
        Renderer::new().render_row(&mut out, 0, row).unwrap();
        let written = String::from_utf8(out).unwrap();
        assert!(!written.contains("\x1b[2J"));
        assert!(!written.contains('\n'));
        assert!(written.contains("A [2J B"));
    }

    #[test]
    fn test_status_indicators() {
        let mut console = console();
        assert_eq!(status_text(&console, None).trim(), "");

        console.screen_mut().input_mut().lock_for_submission();
        let status = status_text(&console, Some("Server is refusing input"));
        assert!(status.contains("LOCK"));
        assert!(!status.contains("SESN"));
        assert!(status.ends_with("| Server is refusing input"));
    }
}
