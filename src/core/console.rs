//! Console composition
//!
//! Ties the session controller, scheduler and screen buffer together and
//! keeps a bounded history of server log entries. The front end talks only
//! to [`Console`].

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use tracing::info;

use super::scheduler::Scheduler;
use super::screen::ScreenBuffer;
use super::session::{
    Completion, InputError, Outcome, PendingRequest, RequestError, SessionController,
    SessionEvent,
};
use super::transport::{Credentials, LogEntry};

/// Default number of log entries retained
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 200;

pub struct Console {
    controller: SessionController,
    scheduler: Scheduler,
    screen: ScreenBuffer,
    logs: VecDeque<LogEntry>,
    max_log_entries: usize,
}

impl Console {
    pub fn new(controller: SessionController, scheduler: Scheduler, screen: ScreenBuffer) -> Self {
        Self {
            controller,
            scheduler,
            screen,
            logs: VecDeque::new(),
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
        }
    }

    pub fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max;
        self.trim_logs();
        self
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn screen(&self) -> &ScreenBuffer {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut ScreenBuffer {
        &mut self.screen
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Retained log entries, oldest first
    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    /// Run a scheduler tick if one is due
    pub fn tick_if_due(&mut self, now: Instant) -> Option<PendingRequest> {
        if !self.scheduler.is_due(now) {
            return None;
        }
        self.tick()
    }

    pub fn tick(&mut self) -> Option<PendingRequest> {
        self.scheduler.tick(&mut self.controller)
    }

    /// Submit whatever is on the input line
    pub fn submit_input(&mut self) -> Result<PendingRequest, InputError> {
        let text = self.screen.input().text().to_string();
        self.controller.start_submit_input(&text, &mut self.screen)
    }

    pub fn login(&mut self, credentials: Credentials) {
        self.controller.provide_credentials(credentials);
    }

    /// Operator escape: unlock the input line without server involvement
    pub fn force_unlock(&mut self) {
        self.screen.force_unlock();
    }

    /// Re-arm polling after the failure limit was reached
    pub fn reset(&mut self) {
        self.controller.reset();
    }

    pub fn set_jump_keys(
        &mut self,
        settings: BTreeMap<u8, bool>,
    ) -> Result<PendingRequest, RequestError> {
        self.controller.start_set_jump_keys(settings)
    }

    pub fn dump(&mut self) -> Result<PendingRequest, RequestError> {
        self.controller.start_dump()
    }

    /// Apply a finished request
    pub fn complete(&mut self, completion: Completion) -> Outcome {
        let outcome = self.controller.complete(completion, &mut self.screen);
        if let Outcome::Poll(Ok(update)) = &outcome {
            for entry in &update.log_entries {
                info!(
                    "Server log {} {} {}: {}",
                    entry.timestamp, entry.category, entry.entity, entry.message
                );
                self.logs.push_back(entry.clone());
            }
            self.trim_logs();
        }
        outcome
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.controller.drain_events()
    }

    fn trim_logs(&mut self) {
        while self.logs.len() > self.max_log_entries {
            self.logs.pop_front();
        }
    }
}
