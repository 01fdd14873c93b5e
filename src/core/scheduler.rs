//! Periodic tick driving authentication and polling
//!
//! Every tick looks at the controller once and takes at most one action.
//! Requests still in flight always win, so a slow long-poll simply causes
//! ticks to be skipped rather than queued.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::session::{PendingRequest, SessionController, INITIAL_PROMPT, REJECTED_PROMPT};

/// Default tick period
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// What a tick decided to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickAction {
    /// A request is in flight
    Busy,
    /// The operator is entering credentials
    AwaitingCredentials,
    SolicitCredentials(&'static str),
    Authenticate,
    Poll,
    /// Failure limit reached; nothing happens until reset
    Suspended,
}

pub struct Scheduler {
    interval: Duration,
    last_tick: Option<Instant>,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_tick: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Decide the action for the current controller state
    pub fn decide(controller: &SessionController) -> TickAction {
        if controller.is_authenticating() || controller.is_polling() {
            return TickAction::Busy;
        }
        if controller.soliciting().is_some() {
            return TickAction::AwaitingCredentials;
        }
        if !controller.is_authenticated() {
            if controller.auth_failed() {
                return TickAction::SolicitCredentials(REJECTED_PROMPT);
            }
            if !controller.has_credentials() {
                return TickAction::SolicitCredentials(INITIAL_PROMPT);
            }
            return TickAction::Authenticate;
        }
        if controller.failure_limit_reached() {
            return TickAction::Suspended;
        }
        TickAction::Poll
    }

    /// Run one tick. Returns the request it started, if any.
    pub fn tick(&mut self, controller: &mut SessionController) -> Option<PendingRequest> {
        self.last_tick = Some(Instant::now());

        let action = Self::decide(controller);
        trace!("Tick: {:?}", action);
        match action {
            TickAction::SolicitCredentials(prompt) => {
                controller.solicit_credentials(prompt);
                None
            }
            TickAction::Authenticate => match controller.start_authenticate() {
                Ok(pending) => Some(pending),
                Err(e) => {
                    debug!("Authentication not started: {}", e);
                    None
                }
            },
            TickAction::Poll => match controller.start_poll() {
                Ok(pending) => Some(pending),
                Err(e) => {
                    debug!("Poll not started: {}", e);
                    None
                }
            },
            TickAction::Busy | TickAction::AwaitingCredentials | TickAction::Suspended => None,
        }
    }

    /// Whether a tick is due at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_tick {
            Some(last) => now.duration_since(last) >= self.interval,
            None => true,
        }
    }

    /// Time left until the next tick is due
    pub fn time_until_due(&self, now: Instant) -> Duration {
        match self.last_tick {
            Some(last) => self.interval.saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock::ScriptedTransport;
    use crate::core::screen::{ScreenBuffer, ScreenConfig};
    use crate::core::session::{Outcome, SessionEvent};
    use crate::core::transport::{ClientIdentity, Credentials, TransportError};
    use reqwest::StatusCode;
    use std::sync::Arc;

    fn setup() -> (Arc<ScriptedTransport>, SessionController, ScreenBuffer) {
        let transport = Arc::new(ScriptedTransport::default());
        let controller = SessionController::new(transport.clone(), ScreenConfig::default());
        (transport, controller, ScreenBuffer::new(ScreenConfig::default()))
    }

    async fn run_tick(
        scheduler: &mut Scheduler,
        controller: &mut SessionController,
        screen: &mut ScreenBuffer,
    ) -> Option<Outcome> {
        let pending = scheduler.tick(controller)?;
        Some(controller.complete(pending.await, screen))
    }

    #[tokio::test]
    async fn test_startup_solicits_then_authenticates_then_polls() {
        let (transport, mut controller, mut screen) = setup();
        let mut scheduler = Scheduler::default();

        assert!(run_tick(&mut scheduler, &mut controller, &mut screen).await.is_none());
        assert_eq!(controller.soliciting(), Some(INITIAL_PROMPT));
        assert_eq!(
            controller.drain_events(),
            vec![SessionEvent::CredentialsRequired(INITIAL_PROMPT.into())]
        );

        // Still waiting on the operator
        assert_eq!(Scheduler::decide(&controller), TickAction::AwaitingCredentials);

        controller.provide_credentials(Credentials::new("admin", "admin"));
        transport.push_session(Ok(ClientIdentity::new("abc123")));
        let outcome = run_tick(&mut scheduler, &mut controller, &mut screen).await;
        assert!(matches!(outcome, Some(Outcome::Authenticate(Ok(_)))));

        let outcome = run_tick(&mut scheduler, &mut controller, &mut screen).await;
        assert!(matches!(outcome, Some(Outcome::Poll(Ok(_)))));
        assert_eq!(transport.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_credentials_resolicit() {
        let (transport, mut controller, mut screen) = setup();
        let mut scheduler = Scheduler::default();
        controller.provide_credentials(Credentials::new("admin", "wrong"));
        transport.push_session(Err(TransportError::HttpStatus(StatusCode::UNAUTHORIZED)));

        run_tick(&mut scheduler, &mut controller, &mut screen).await;
        assert_eq!(
            Scheduler::decide(&controller),
            TickAction::SolicitCredentials(REJECTED_PROMPT)
        );
        run_tick(&mut scheduler, &mut controller, &mut screen).await;
        assert_eq!(controller.soliciting(), Some(REJECTED_PROMPT));
        assert_eq!(transport.session_count(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_retries_authentication() {
        let (transport, mut controller, mut screen) = setup();
        let mut scheduler = Scheduler::default();
        controller.provide_credentials(Credentials::new("admin", "admin"));
        transport.push_session(Err(TransportError::Network("refused".into())));

        run_tick(&mut scheduler, &mut controller, &mut screen).await;
        assert_eq!(Scheduler::decide(&controller), TickAction::Authenticate);
    }

    #[tokio::test]
    async fn test_in_flight_poll_skips_ticks() {
        let (transport, mut controller, mut screen) = setup();
        let mut scheduler = Scheduler::default();
        transport.push_session(Ok(ClientIdentity::new("abc123")));
        controller
            .authenticate(Credentials::new("admin", "admin"))
            .await
            .unwrap();

        let pending = scheduler.tick(&mut controller).unwrap();
        for _ in 0..3 {
            assert!(scheduler.tick(&mut controller).is_none());
        }
        controller.complete(pending.await, &mut screen);
        assert_eq!(transport.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_reauthenticates_on_next_tick() {
        let (transport, mut controller, mut screen) = setup();
        let mut scheduler = Scheduler::default();
        transport.push_session(Ok(ClientIdentity::new("abc123")));
        controller
            .authenticate(Credentials::new("admin", "admin"))
            .await
            .unwrap();

        transport.push_poll(Err(TransportError::HttpStatus(StatusCode::UNAUTHORIZED)));
        run_tick(&mut scheduler, &mut controller, &mut screen).await;
        assert_eq!(Scheduler::decide(&controller), TickAction::Authenticate);

        transport.push_session(Ok(ClientIdentity::new("def456")));
        run_tick(&mut scheduler, &mut controller, &mut screen).await;
        assert_eq!(controller.identity().as_str(), "def456");
        assert_eq!(transport.session_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_limit_stops_polling() {
        let (transport, mut controller, mut screen) = setup();
        let mut scheduler = Scheduler::default();
        transport.push_session(Ok(ClientIdentity::new("abc123")));
        controller
            .authenticate(Credentials::new("admin", "admin"))
            .await
            .unwrap();
        controller.drain_events();

        for _ in 0..5 {
            transport.push_poll(Err(TransportError::Network("down".into())));
        }
        for _ in 0..10 {
            run_tick(&mut scheduler, &mut controller, &mut screen).await;
        }

        assert_eq!(transport.poll_count(), 5);
        assert_eq!(Scheduler::decide(&controller), TickAction::Suspended);
        assert_eq!(controller.drain_events(), vec![SessionEvent::Unreachable]);
    }

    #[test]
    fn test_due_tracking() {
        let (_, mut controller, _) = setup();
        let mut scheduler = Scheduler::new(Duration::from_millis(500));
        let start = Instant::now();
        assert!(scheduler.is_due(start));

        scheduler.tick(&mut controller);
        let now = Instant::now();
        assert!(!scheduler.is_due(now));
        assert!(scheduler.time_until_due(now) <= Duration::from_millis(500));
        assert!(scheduler.is_due(now + Duration::from_millis(500)));
    }
}
