//! User interface rendering and input handling.
//!
//! - **renderer**: Draws the console grid, input line and status row
//! - **keymapper**: Keyboard events to console actions
//! - **prompt**: Credential entry form

pub mod keymapper;
pub mod prompt;
pub mod renderer;

pub use keymapper::*;
pub use prompt::{CredentialPrompt, PromptAction};
pub use renderer::*;

/// Front-end state that is not part of the console itself
#[derive(Default)]
pub struct UiState {
    /// Credential form, while one is needed
    pub prompt: Option<CredentialPrompt>,
    /// Latest notification for the status row
    pub message: Option<String>,
}

impl UiState {
    pub fn notify(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }
}
