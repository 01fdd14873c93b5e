//! Session management
//!
//! Owns the single logical session with the console server: credentials,
//! client identity, poll failure tracking and the single-flight guards for
//! every request kind.
//!
//! Requests run in two phases. A `start_*` call checks the guards, marks the
//! request in flight and returns a [`PendingRequest`] future that only talks
//! to the transport. Whoever drives the future hands its [`Completion`] back
//! to [`SessionController::complete`], which is the only place results touch
//! session or screen state.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::directive::{decode_all, Directive};
use super::screen::{ScreenBuffer, ScreenConfig};
use super::transport::{
    ClientIdentity, ConsoleTransport, Credentials, JumpKeys, LogEntry, PollResponse,
    TransportError,
};

/// Consecutive poll failures tolerated before polling is suspended
pub const POLL_FAILURE_LIMIT: u32 = 5;

pub const INITIAL_PROMPT: &str = "Enter credentials for managing the console";
pub const REJECTED_PROMPT: &str = "Validation failed - re-enter credentials";

/// Highest jump key id
pub const MAX_JUMP_KEY: u8 = 36;

/// Whether jump key `id` is set in a composite value. Key 1 is the most
/// significant of the 36 bits.
pub fn jump_key_is_set(composite: u64, id: u8) -> bool {
    if !(1..=MAX_JUMP_KEY).contains(&id) {
        return false;
    }
    (composite >> (MAX_JUMP_KEY - id)) & 1 == 1
}

/// Authentication state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Authenticating,
    Authenticated,
    /// The last attempt was rejected by the server
    Failed,
}

/// Poll state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
}

/// Notifications for the front end
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials must be collected before the session can continue
    CredentialsRequired(String),
    Authenticated,
    /// The server no longer recognizes our identity
    SessionExpired,
    /// Poll failure limit reached; polling is suspended until reset
    Unreachable,
    /// 400 on input submission
    InputRejected(String),
    /// Any other refusal of input
    InputRefused(String),
    /// Input could not be delivered at all
    InputFailed(String),
    JumpKeysChanged(u64),
    DumpWritten(String),
    /// New server log entries arrived
    LogEntries(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication already in progress")]
    InProgress,
    #[error("no credentials available")]
    NoCredentials,
    #[error("credentials rejected ({0})")]
    Rejected(StatusCode),
    #[error("cannot contact server: {0}")]
    Network(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("a request is already in progress")]
    InProgress,
    #[error("no active session")]
    NotAuthenticated,
    #[error("polling suspended after repeated failures")]
    Suspended,
    #[error("session is no longer validated")]
    SessionExpired,
    #[error("poll failed ({consecutive} consecutive): {reason}")]
    Failed { consecutive: u32, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("previous input not yet acknowledged")]
    Pending,
    #[error("validation in progress - please wait")]
    Authenticating,
    #[error("no session active - input ignored")]
    NoSession,
    #[error("input rejected: {0}")]
    Rejected(String),
    #[error("session is no longer validated")]
    SessionInvalid,
    #[error("server is refusing input: {0}")]
    Refused(String),
    #[error("cannot submit console input: {0}")]
    Network(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("a request of this kind is already in progress")]
    InProgress,
    #[error("no active session")]
    NoSession,
    #[error("invalid jump key {0}, expected 1 to 36")]
    InvalidJumpKey(u8),
    #[error("session is no longer validated")]
    SessionExpired,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of a finished request, before it is applied
#[derive(Debug)]
pub enum Completion {
    Authenticate {
        credentials: Credentials,
        result: Result<ClientIdentity, TransportError>,
    },
    Poll {
        issued_under: ClientIdentity,
        result: Result<PollResponse, TransportError>,
    },
    SubmitInput {
        issued_under: ClientIdentity,
        /// Sequence number of the submission
        submission: u64,
        result: Result<(), TransportError>,
    },
    SetJumpKeys {
        issued_under: ClientIdentity,
        result: Result<JumpKeys, TransportError>,
    },
    Dump {
        issued_under: ClientIdentity,
        result: Result<String, TransportError>,
    },
}

/// An in-flight request
pub type PendingRequest = BoxFuture<'static, Completion>;

/// What a successful poll delivered
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollUpdate {
    /// Directives applied to the screen, in arrival order
    pub directives: Vec<Directive>,
    pub log_entries: Vec<LogEntry>,
    pub jump_key_settings: Option<u64>,
}

/// Effect of applying a completion
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Authenticate(Result<ClientIdentity, AuthError>),
    Poll(Result<PollUpdate, PollError>),
    SubmitInput(Result<(), InputError>),
    SetJumpKeys(Result<JumpKeys, RequestError>),
    Dump(Result<String, RequestError>),
    /// Issued under an identity that is no longer current
    Discarded,
}

/// The session state machine
pub struct SessionController {
    transport: Arc<dyn ConsoleTransport>,
    screen_config: ScreenConfig,
    identity: ClientIdentity,
    /// Credentials to authenticate with; kept after success for silent re-authentication
    credentials: Option<Credentials>,
    auth_state: AuthState,
    poll_state: PollState,
    /// Submission awaiting its response; unlocking the line abandons it
    outstanding_submission: Option<u64>,
    submissions: u64,
    setting_jump_keys: bool,
    dumping: bool,
    /// Prompt shown while credentials are being collected
    soliciting: Option<String>,
    consecutive_failures: u32,
    failure_limit: u32,
    unreachable_reported: bool,
    jump_keys: Option<u64>,
    events: VecDeque<SessionEvent>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn ConsoleTransport>, screen_config: ScreenConfig) -> Self {
        Self {
            transport,
            screen_config,
            identity: ClientIdentity::default(),
            credentials: None,
            auth_state: AuthState::Idle,
            poll_state: PollState::Idle,
            outstanding_submission: None,
            submissions: 0,
            setting_jump_keys: false,
            dumping: false,
            soliciting: None,
            consecutive_failures: 0,
            failure_limit: POLL_FAILURE_LIMIT,
            unreachable_reported: false,
            jump_keys: None,
            events: VecDeque::new(),
        }
    }

    pub fn with_failure_limit(mut self, limit: u32) -> Self {
        self.failure_limit = limit.max(1);
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    // ------------------------------------------------------------------
    // State queries
    // ------------------------------------------------------------------

    pub fn auth_state(&self) -> AuthState {
        self.auth_state
    }

    pub fn poll_state(&self) -> PollState {
        self.poll_state
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn screen_config(&self) -> ScreenConfig {
        self.screen_config
    }

    pub fn is_authenticated(&self) -> bool {
        !self.identity.is_empty()
    }

    pub fn is_authenticating(&self) -> bool {
        self.auth_state == AuthState::Authenticating
    }

    pub fn is_polling(&self) -> bool {
        self.poll_state == PollState::Polling
    }

    pub fn is_submitting(&self) -> bool {
        self.outstanding_submission.is_some()
    }

    pub fn auth_failed(&self) -> bool {
        self.auth_state == AuthState::Failed
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Prompt currently shown to the operator, if credentials are being collected
    pub fn soliciting(&self) -> Option<&str> {
        self.soliciting.as_deref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn failure_limit(&self) -> u32 {
        self.failure_limit
    }

    pub fn failure_limit_reached(&self) -> bool {
        self.consecutive_failures >= self.failure_limit
    }

    /// Last composite jump key value seen from the server
    pub fn jump_keys(&self) -> Option<u64> {
        self.jump_keys
    }

    /// Take all queued events
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Ask the operator for credentials. Clears a recorded rejection.
    pub fn solicit_credentials(&mut self, prompt: &str) {
        if self.auth_state == AuthState::Failed {
            self.auth_state = AuthState::Idle;
        }
        self.soliciting = Some(prompt.to_string());
        self.events
            .push_back(SessionEvent::CredentialsRequired(prompt.to_string()));
        info!("Soliciting credentials: {}", prompt);
    }

    /// Supply credentials, ending any solicitation
    pub fn provide_credentials(&mut self, credentials: Credentials) {
        debug!("Credentials provided for user {}", credentials.username);
        self.credentials = Some(credentials);
        self.soliciting = None;
    }

    /// Clear the poll failure counter, re-arming polling
    pub fn reset(&mut self) {
        if self.consecutive_failures > 0 {
            info!("Poll failure counter reset");
        }
        self.consecutive_failures = 0;
        self.unreachable_reported = false;
    }

    fn invalidate_identity(&mut self) {
        if !self.identity.is_empty() {
            info!("Session {} is no longer validated", self.identity);
        }
        self.identity = ClientIdentity::default();
        if self.auth_state == AuthState::Authenticated {
            self.auth_state = AuthState::Idle;
        }
        self.events.push_back(SessionEvent::SessionExpired);
    }

    // ------------------------------------------------------------------
    // Request starts
    // ------------------------------------------------------------------

    /// Begin `POST /session` with the current credentials
    pub fn start_authenticate(&mut self) -> Result<PendingRequest, AuthError> {
        if self.is_authenticating() || self.is_polling() {
            return Err(AuthError::InProgress);
        }
        let credentials = self.credentials.clone().ok_or(AuthError::NoCredentials)?;

        info!("Validating as {}", credentials.username);
        self.auth_state = AuthState::Authenticating;
        self.consecutive_failures = 0;
        self.unreachable_reported = false;

        let transport = Arc::clone(&self.transport);
        let screen = self.screen_config;
        Ok(async move {
            let result = transport.create_session(&credentials, screen).await;
            Completion::Authenticate {
                credentials,
                result,
            }
        }
        .boxed())
    }

    /// Begin `GET /poll`
    pub fn start_poll(&mut self) -> Result<PendingRequest, PollError> {
        if self.is_polling() || self.is_authenticating() {
            return Err(PollError::InProgress);
        }
        if !self.is_authenticated() {
            return Err(PollError::NotAuthenticated);
        }
        if self.failure_limit_reached() {
            return Err(PollError::Suspended);
        }

        self.poll_state = PollState::Polling;
        let transport = Arc::clone(&self.transport);
        let issued_under = self.identity.clone();
        Ok(async move {
            let result = transport.poll(&issued_under).await;
            Completion::Poll {
                issued_under,
                result,
            }
        }
        .boxed())
    }

    /// Begin `POST /message`, locking the input line until it completes
    pub fn start_submit_input(
        &mut self,
        text: &str,
        screen: &mut ScreenBuffer,
    ) -> Result<PendingRequest, InputError> {
        if screen.input().has_pending() {
            return Err(InputError::Pending);
        }
        if self.is_authenticating() {
            return Err(InputError::Authenticating);
        }
        if !self.is_authenticated() {
            screen.input_mut().clear();
            return Err(InputError::NoSession);
        }

        let text = text.trim().to_string();
        debug!("Submitting input ({} chars)", text.chars().count());
        screen.input_mut().lock_for_submission();
        self.submissions += 1;
        let submission = self.submissions;
        if self.outstanding_submission.replace(submission).is_some() {
            debug!("Abandoning unacknowledged input after unlock");
        }

        let transport = Arc::clone(&self.transport);
        let issued_under = self.identity.clone();
        Ok(async move {
            let result = transport.post_message(&issued_under, &text).await;
            Completion::SubmitInput {
                issued_under,
                submission,
                result,
            }
        }
        .boxed())
    }

    /// Begin `PUT /jumpkeys`
    pub fn start_set_jump_keys(
        &mut self,
        settings: BTreeMap<u8, bool>,
    ) -> Result<PendingRequest, RequestError> {
        if let Some(bad) = settings.keys().find(|id| !(1..=MAX_JUMP_KEY).contains(*id)) {
            return Err(RequestError::InvalidJumpKey(*bad));
        }
        if self.setting_jump_keys {
            return Err(RequestError::InProgress);
        }
        if !self.is_authenticated() {
            return Err(RequestError::NoSession);
        }

        self.setting_jump_keys = true;
        let transport = Arc::clone(&self.transport);
        let issued_under = self.identity.clone();
        Ok(async move {
            let result = transport.put_jump_keys(&issued_under, &settings).await;
            Completion::SetJumpKeys {
                issued_under,
                result,
            }
        }
        .boxed())
    }

    /// Begin `GET /dump`
    pub fn start_dump(&mut self) -> Result<PendingRequest, RequestError> {
        if self.dumping {
            return Err(RequestError::InProgress);
        }
        if !self.is_authenticated() {
            return Err(RequestError::NoSession);
        }

        self.dumping = true;
        let transport = Arc::clone(&self.transport);
        let issued_under = self.identity.clone();
        Ok(async move {
            let result = transport.dump(&issued_under).await;
            Completion::Dump {
                issued_under,
                result,
            }
        }
        .boxed())
    }

    // ------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------

    /// Apply a finished request to session and screen state
    pub fn complete(&mut self, completion: Completion, screen: &mut ScreenBuffer) -> Outcome {
        match completion {
            Completion::Authenticate {
                credentials,
                result,
            } => Outcome::Authenticate(self.finish_authenticate(credentials, result)),
            Completion::Poll {
                issued_under,
                result,
            } => {
                self.poll_state = PollState::Idle;
                if issued_under != self.identity {
                    debug!("Discarding poll issued under {}", issued_under);
                    return Outcome::Discarded;
                }
                Outcome::Poll(self.finish_poll(result, screen))
            }
            Completion::SubmitInput {
                issued_under,
                submission,
                result,
            } => {
                if self.outstanding_submission != Some(submission) {
                    debug!("Discarding response to abandoned input {}", submission);
                    return Outcome::Discarded;
                }
                self.outstanding_submission = None;
                // Text typed after an unlock is not the text that was sent
                let still_pending = screen.input().has_pending();
                screen.input_mut().release();
                if issued_under != self.identity {
                    debug!("Discarding input response issued under {}", issued_under);
                    return Outcome::Discarded;
                }
                Outcome::SubmitInput(self.finish_submit(result, still_pending, screen))
            }
            Completion::SetJumpKeys {
                issued_under,
                result,
            } => {
                self.setting_jump_keys = false;
                if issued_under != self.identity {
                    return Outcome::Discarded;
                }
                Outcome::SetJumpKeys(self.finish_jump_keys(result))
            }
            Completion::Dump {
                issued_under,
                result,
            } => {
                self.dumping = false;
                if issued_under != self.identity {
                    return Outcome::Discarded;
                }
                Outcome::Dump(self.finish_dump(result))
            }
        }
    }

    fn finish_authenticate(
        &mut self,
        credentials: Credentials,
        result: Result<ClientIdentity, TransportError>,
    ) -> Result<ClientIdentity, AuthError> {
        match result {
            Ok(identity) => {
                info!("Validated; client identity {}", identity);
                self.identity = identity.clone();
                self.auth_state = AuthState::Authenticated;
                self.credentials = Some(credentials);
                self.events.push_back(SessionEvent::Authenticated);
                Ok(identity)
            }
            Err(TransportError::HttpStatus(status)) => {
                warn!("Validation rejected: {}", status);
                self.identity = ClientIdentity::default();
                self.auth_state = AuthState::Failed;
                // Never retry rejected credentials
                if self.credentials.as_ref() == Some(&credentials) {
                    self.credentials = None;
                }
                Err(AuthError::Rejected(status))
            }
            Err(err) => {
                warn!("Validation could not reach server: {}", err);
                self.identity = ClientIdentity::default();
                self.auth_state = AuthState::Idle;
                Err(AuthError::Network(err.to_string()))
            }
        }
    }

    fn finish_poll(
        &mut self,
        result: Result<PollResponse, TransportError>,
        screen: &mut ScreenBuffer,
    ) -> Result<PollUpdate, PollError> {
        match result {
            Ok(response) => {
                self.consecutive_failures = 0;
                self.unreachable_reported = false;

                let palette = *screen.palette();
                let directives = decode_all(
                    response.output_messages(),
                    palette.output_fg,
                    palette.output_bg,
                );
                for directive in &directives {
                    debug!("Applying {}", directive);
                    screen.apply(directive);
                }

                if let Some(value) = response.jump_key_settings {
                    if self.jump_keys != Some(value) {
                        self.jump_keys = Some(value);
                        self.events.push_back(SessionEvent::JumpKeysChanged(value));
                    }
                }

                let log_entries = response.new_log_entries.unwrap_or_default();
                if !log_entries.is_empty() {
                    self.events
                        .push_back(SessionEvent::LogEntries(log_entries.len()));
                }

                Ok(PollUpdate {
                    directives,
                    log_entries,
                    jump_key_settings: response.jump_key_settings,
                })
            }
            Err(TransportError::HttpStatus(StatusCode::UNAUTHORIZED)) => {
                self.invalidate_identity();
                Err(PollError::SessionExpired)
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(
                    "Poll failed ({} of {}): {}",
                    self.consecutive_failures, self.failure_limit, err
                );
                if self.failure_limit_reached() && !self.unreachable_reported {
                    warn!("Poll failure limit reached - server may have been shut down");
                    self.unreachable_reported = true;
                    self.events.push_back(SessionEvent::Unreachable);
                }
                Err(PollError::Failed {
                    consecutive: self.consecutive_failures,
                    reason: err.to_string(),
                })
            }
        }
    }

    fn finish_submit(
        &mut self,
        result: Result<(), TransportError>,
        still_pending: bool,
        screen: &mut ScreenBuffer,
    ) -> Result<(), InputError> {
        let err = match result {
            Ok(()) => {
                if still_pending {
                    screen.input_mut().clear();
                }
                return Ok(());
            }
            Err(err) => err,
        };

        let error = match err {
            TransportError::HttpStatus(StatusCode::BAD_REQUEST) => {
                let reason = status_reason(StatusCode::BAD_REQUEST);
                self.events
                    .push_back(SessionEvent::InputRejected(reason.clone()));
                InputError::Rejected(reason)
            }
            TransportError::HttpStatus(StatusCode::UNAUTHORIZED) => {
                self.invalidate_identity();
                InputError::SessionInvalid
            }
            TransportError::HttpStatus(status) => {
                let reason = status_reason(status);
                self.events.push_back(SessionEvent::InputRefused(reason.clone()));
                InputError::Refused(reason)
            }
            other => {
                let reason = other.to_string();
                self.events.push_back(SessionEvent::InputFailed(reason.clone()));
                InputError::Network(reason)
            }
        };
        warn!("Input not accepted: {}", error);
        Err(error)
    }

    fn finish_jump_keys(
        &mut self,
        result: Result<JumpKeys, TransportError>,
    ) -> Result<JumpKeys, RequestError> {
        match result {
            Ok(keys) => {
                if let Some(value) = keys.composite_value {
                    self.jump_keys = Some(value);
                    self.events.push_back(SessionEvent::JumpKeysChanged(value));
                }
                Ok(keys)
            }
            Err(TransportError::HttpStatus(StatusCode::UNAUTHORIZED)) => {
                self.invalidate_identity();
                Err(RequestError::SessionExpired)
            }
            Err(err) => {
                warn!("Jump key update failed: {}", err);
                Err(err.into())
            }
        }
    }

    fn finish_dump(&mut self, result: Result<String, TransportError>) -> Result<String, RequestError> {
        match result {
            Ok(filename) => {
                info!("Dump written to {}", filename);
                self.events
                    .push_back(SessionEvent::DumpWritten(filename.clone()));
                Ok(filename)
            }
            Err(TransportError::HttpStatus(StatusCode::UNAUTHORIZED)) => {
                self.invalidate_identity();
                Err(RequestError::SessionExpired)
            }
            Err(err) => {
                warn!("Dump failed: {}", err);
                Err(err.into())
            }
        }
    }

    // ------------------------------------------------------------------
    // One-shot helpers
    // ------------------------------------------------------------------

    /// Authenticate and wait for the result
    pub async fn authenticate(
        &mut self,
        credentials: Credentials,
    ) -> Result<ClientIdentity, AuthError> {
        self.provide_credentials(credentials);
        let pending = self.start_authenticate()?;
        match pending.await {
            Completion::Authenticate {
                credentials,
                result,
            } => self.finish_authenticate(credentials, result),
            _ => Err(AuthError::InProgress),
        }
    }

    /// Poll once and apply the result to `screen`
    pub async fn poll(&mut self, screen: &mut ScreenBuffer) -> Result<PollUpdate, PollError> {
        let pending = self.start_poll()?;
        match self.complete(pending.await, screen) {
            Outcome::Poll(result) => result,
            _ => Err(PollError::SessionExpired),
        }
    }

    /// Submit input and wait for the server's answer
    pub async fn submit_input(
        &mut self,
        text: &str,
        screen: &mut ScreenBuffer,
    ) -> Result<(), InputError> {
        let pending = self.start_submit_input(text, screen)?;
        match self.complete(pending.await, screen) {
            Outcome::SubmitInput(result) => result,
            _ => Err(InputError::SessionInvalid),
        }
    }
}

fn status_reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_u16().to_string())
}
