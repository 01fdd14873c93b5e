//! Scripted transport for tests

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::screen::ScreenConfig;
use super::transport::{
    ClientIdentity, ConsoleTransport, Credentials, JumpKeys, PollResponse, TransportError,
};

/// A recorded request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateSession {
        username: String,
        rows: u16,
        columns: u16,
    },
    Poll {
        client: String,
    },
    PostMessage {
        client: String,
        text: String,
    },
    PutJumpKeys {
        client: String,
        settings: BTreeMap<u8, bool>,
    },
    Dump {
        client: String,
    },
}

/// Replays queued responses in order. An empty poll queue answers with an
/// empty poll result; an empty session queue answers with a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    sessions: Mutex<VecDeque<Result<ClientIdentity, TransportError>>>,
    polls: Mutex<VecDeque<Result<PollResponse, TransportError>>>,
    messages: Mutex<VecDeque<Result<(), TransportError>>>,
    jump_keys: Mutex<VecDeque<Result<JumpKeys, TransportError>>>,
    dumps: Mutex<VecDeque<Result<String, TransportError>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn push_session(&self, result: Result<ClientIdentity, TransportError>) {
        self.sessions.lock().unwrap().push_back(result);
    }

    pub fn push_poll(&self, result: Result<PollResponse, TransportError>) {
        self.polls.lock().unwrap().push_back(result);
    }

    pub fn push_message(&self, result: Result<(), TransportError>) {
        self.messages.lock().unwrap().push_back(result);
    }

    pub fn push_jump_keys(&self, result: Result<JumpKeys, TransportError>) {
        self.jump_keys.lock().unwrap().push_back(result);
    }

    pub fn push_dump(&self, result: Result<String, TransportError>) {
        self.dumps.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.count(|c| matches!(c, Call::Poll { .. }))
    }

    pub fn session_count(&self) -> usize {
        self.count(|c| matches!(c, Call::CreateSession { .. }))
    }

    pub fn message_count(&self) -> usize {
        self.count(|c| matches!(c, Call::PostMessage { .. }))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn unscripted() -> TransportError {
    TransportError::Network("no scripted response".into())
}

#[async_trait]
impl ConsoleTransport for ScriptedTransport {
    async fn create_session(
        &self,
        credentials: &Credentials,
        screen: ScreenConfig,
    ) -> Result<ClientIdentity, TransportError> {
        self.record(Call::CreateSession {
            username: credentials.username.clone(),
            rows: screen.rows,
            columns: screen.columns,
        });
        self.sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(unscripted()))
    }

    async fn poll(&self, client: &ClientIdentity) -> Result<PollResponse, TransportError> {
        self.record(Call::Poll {
            client: client.as_str().to_string(),
        });
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(PollResponse::default()))
    }

    async fn post_message(&self, client: &ClientIdentity, text: &str) -> Result<(), TransportError> {
        self.record(Call::PostMessage {
            client: client.as_str().to_string(),
            text: text.to_string(),
        });
        self.messages.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn put_jump_keys(
        &self,
        client: &ClientIdentity,
        settings: &BTreeMap<u8, bool>,
    ) -> Result<JumpKeys, TransportError> {
        self.record(Call::PutJumpKeys {
            client: client.as_str().to_string(),
            settings: settings.clone(),
        });
        self.jump_keys
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(unscripted()))
    }

    async fn dump(&self, client: &ClientIdentity) -> Result<String, TransportError> {
        self.record(Call::Dump {
            client: client.as_str().to_string(),
        });
        self.dumps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(unscripted()))
    }
}
