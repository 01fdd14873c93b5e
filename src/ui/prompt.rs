//! Credential prompt
//!
//! A two-field form shown whenever the session needs credentials.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::core::transport::Credentials;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptField {
    Username,
    Password,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptAction {
    None,
    Submit(Credentials),
    Quit,
}

pub struct CredentialPrompt {
    pub message: String,
    pub username: String,
    password: String,
    pub field: PromptField,
}

impl CredentialPrompt {
    /// New prompt. A known username pre-fills the form and focuses the password.
    pub fn new(message: &str, username: Option<&str>) -> Self {
        let username = username.unwrap_or_default().to_string();
        let field = if username.is_empty() {
            PromptField::Username
        } else {
            PromptField::Password
        };
        Self {
            message: message.to_string(),
            username,
            password: String::new(),
            field,
        }
    }

    /// Password masked for display
    pub fn masked_password(&self) -> String {
        "*".repeat(self.password.chars().count())
    }

    pub fn handle_key(&mut self, event: &KeyEvent) -> PromptAction {
        if event.modifiers.contains(KeyModifiers::CONTROL) {
            return match event.code {
                KeyCode::Char('q') | KeyCode::Char('c') => PromptAction::Quit,
                _ => PromptAction::None,
            };
        }

        match event.code {
            KeyCode::Char(ch) if !ch.is_control() => self.current_mut().push(ch),
            KeyCode::Backspace => {
                self.current_mut().pop();
            }
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => self.switch_field(),
            KeyCode::Enter => return self.enter(),
            _ => {}
        }
        PromptAction::None
    }

    fn enter(&mut self) -> PromptAction {
        match self.field {
            PromptField::Username => {
                if !self.username.is_empty() {
                    self.field = PromptField::Password;
                }
                PromptAction::None
            }
            PromptField::Password if self.username.is_empty() => {
                self.field = PromptField::Username;
                PromptAction::None
            }
            PromptField::Password => {
                let password = std::mem::take(&mut self.password);
                PromptAction::Submit(Credentials::new(self.username.clone(), password))
            }
        }
    }

    fn switch_field(&mut self) {
        self.field = match self.field {
            PromptField::Username => PromptField::Password,
            PromptField::Password => PromptField::Username,
        };
    }

    fn current_mut(&mut self) -> &mut String {
        match self.field {
            PromptField::Username => &mut self.username,
            PromptField::Password => &mut self.password,
        }
    }
}
