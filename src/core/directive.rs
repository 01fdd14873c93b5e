//! Display directives
//!
//! Converts the server's `outputMessages` into [`Directive`] values for the
//! screen buffer.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::screen::Rgb;

const MESSAGE_TYPE_CLEAR_SCREEN: i64 = 0;
const MESSAGE_TYPE_UNLOCK_KEYBOARD: i64 = 1;
const MESSAGE_TYPE_DELETE_ROW: i64 = 2;
const MESSAGE_TYPE_WRITE_ROW: i64 = 3;

/// One server-issued instruction for the screen buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    ClearScreen,
    UnlockKeyboard,
    /// Remove a row, shifting the rows below it up
    DeleteRow { row: i64 },
    /// Replace a row with fixed-width text
    WriteRow {
        row: i64,
        text: String,
        fg: Rgb,
        bg: Rgb,
        right_justified: bool,
    },
}

/// Output message as it appears on the wire
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMessage {
    pub message_type: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_justified: Option<bool>,
}

impl OutputMessage {
    /// Decode into a directive. Missing WRITE_ROW colors fall back to the
    /// given defaults.
    pub fn to_directive(&self, default_fg: Rgb, default_bg: Rgb) -> Option<Directive> {
        match self.message_type {
            MESSAGE_TYPE_CLEAR_SCREEN => Some(Directive::ClearScreen),
            MESSAGE_TYPE_UNLOCK_KEYBOARD => Some(Directive::UnlockKeyboard),
            MESSAGE_TYPE_DELETE_ROW => match self.row_index {
                Some(row) => Some(Directive::DeleteRow { row }),
                None => {
                    warn!("DELETE_ROW without rowIndex, skipped");
                    None
                }
            },
            MESSAGE_TYPE_WRITE_ROW => match self.row_index {
                Some(row) => Some(Directive::WriteRow {
                    row,
                    text: self.text.clone().unwrap_or_default(),
                    fg: self.text_color.map(wire_color).unwrap_or(default_fg),
                    bg: self.background_color.map(wire_color).unwrap_or(default_bg),
                    right_justified: self.right_justified.unwrap_or(false),
                }),
                None => {
                    warn!("WRITE_ROW without rowIndex, skipped");
                    None
                }
            },
            other => {
                warn!("Unknown output message type {}, skipped", other);
                None
            }
        }
    }
}

fn wire_color(value: i64) -> Rgb {
    Rgb::from_wire(value as u32)
}

/// Decode a batch, preserving arrival order and skipping bad entries
pub fn decode_all(messages: &[OutputMessage], default_fg: Rgb, default_bg: Rgb) -> Vec<Directive> {
    messages
        .iter()
        .filter_map(|m| m.to_directive(default_fg, default_bg))
        .collect()
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Directive::ClearScreen => write!(f, "CLEAR_SCREEN"),
            Directive::UnlockKeyboard => write!(f, "UNLOCK_KEYBOARD"),
            Directive::DeleteRow { row } => write!(f, "DELETE_ROW {}", row),
            Directive::WriteRow {
                row,
                text,
                fg,
                bg,
                right_justified,
            } => write!(
                f,
                "WRITE_ROW {} fg=0x{:06x} bg=0x{:06x} right={} '{}'",
                row, fg.0, bg.0, right_justified, text
            ),
        }
    }
}
