use std::fmt::{Display, Formatter};
use thiserror::Error;
use tracing::debug;

use crate::classify::{Classification, classify};
use crate::transport::NORMAL_CLOSURE;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingFirstMessage,
    Connected,
    Closed,
    Errored,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingFirstMessage => "attaching",
            Self::Connected => "connected",
            Self::Closed => "closed",
            Self::Errored => "error",
        }
    }

    fn is_pending(self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingFirstMessage)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Failure of one connection generation. Shown in the banner; never fatal to
/// the UI.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SessionError {
    #[error("{0}")]
    Handshake(String),
    #[error("{0}")]
    Remote(String),
    #[error("connection to the shell failed: {0}")]
    Transport(String),
    #[error("connection closed unexpectedly (code {code}): {reason}")]
    UnexpectedClose { code: u16, reason: String },
    #[error("no response from the shell after {0}s")]
    HandshakeTimeout(u64),
}

impl SessionError {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "Shell attach failed",
            Self::Remote(_) => "Shell reported an error",
            Self::Transport(_) => "Connection failed",
            Self::UnexpectedClose { .. } => "Connection closed",
            Self::HandshakeTimeout(_) => "Connection timed out",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SessionEvent {
    Connect,
    Reconnect,
    TransportOpen,
    Message(Vec<u8>),
    TransportError(String),
    TransportClosed { code: u16, reason: Option<String> },
    HandshakeTimeout { after_secs: u64 },
    ModalClosed,
}

/// Side effects the owner of the machine must carry out, in order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Effect {
    StartLoading,
    StopLoading,
    Render(Vec<u8>),
    FocusEmulator,
    ShowError(SessionError),
    /// Close the connection of a failed handshake; the screen stays.
    AbandonTransport,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub has_received_first_message: bool,
    pub last_error: Option<SessionError>,
    pub loading: bool,
}

impl SessionStatus {
    pub fn accepts_input(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn banner(&self) -> Option<String> {
        self.last_error.as_ref().map(ToString::to_string)
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            has_received_first_message: false,
            last_error: None,
            loading: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    status: SessionStatus,
    history: Vec<SessionState>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::default(),
            history: vec![SessionState::Idle],
        }
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn state(&self) -> SessionState {
        self.status.state
    }

    pub fn accepts_input(&self) -> bool {
        self.status.accepts_input()
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn dismiss_error(&mut self) {
        self.status.last_error = None;
    }

    pub fn apply(&mut self, event: SessionEvent) -> Vec<Effect> {
        let from = self.status.state;
        let mut effects = Vec::new();

        match event {
            SessionEvent::Connect | SessionEvent::Reconnect => {
                self.status.has_received_first_message = false;
                self.status.last_error = None;
                self.enter(SessionState::Connecting);
                self.status.loading = true;
                effects.push(Effect::StartLoading);
            }
            SessionEvent::ModalClosed => {
                self.stop_loading(&mut effects);
                self.status.has_received_first_message = false;
                self.status.last_error = None;
                self.enter(SessionState::Idle);
            }
            SessionEvent::TransportOpen => {
                if from == SessionState::Connecting {
                    self.enter(SessionState::AwaitingFirstMessage);
                } else {
                    debug!(state = %from, "ignoring transport open");
                }
            }
            SessionEvent::Message(payload) => self.on_message(from, payload, &mut effects),
            SessionEvent::TransportError(error) => {
                if from.is_pending() || from == SessionState::Connected {
                    self.fail(SessionError::Transport(error), &mut effects);
                } else {
                    debug!(state = %from, error = %error, "ignoring transport error");
                }
            }
            SessionEvent::TransportClosed { code, reason } => {
                self.on_close(from, code, reason, &mut effects)
            }
            SessionEvent::HandshakeTimeout { after_secs } => {
                if from.is_pending() {
                    self.fail(SessionError::HandshakeTimeout(after_secs), &mut effects);
                    effects.push(Effect::AbandonTransport);
                }
            }
        }

        if from != self.status.state {
            debug!(from = %from, to = %self.status.state, "session transition");
        }
        effects
    }

    fn on_message(&mut self, from: SessionState, payload: Vec<u8>, effects: &mut Vec<Effect>) {
        match from {
            SessionState::AwaitingFirstMessage => {
                self.status.has_received_first_message = true;
                match classify(&payload) {
                    Classification::ErrorText(text) => {
                        self.fail(SessionError::Handshake(text), effects);
                        effects.push(Effect::AbandonTransport);
                    }
                    Classification::Normal => {
                        self.stop_loading(effects);
                        self.enter(SessionState::Connected);
                        effects.push(Effect::Render(payload));
                        effects.push(Effect::FocusEmulator);
                    }
                }
            }
            SessionState::Connected => match classify(&payload) {
                Classification::ErrorText(text) => {
                    self.fail(SessionError::Remote(text), effects);
                }
                Classification::Normal => effects.push(Effect::Render(payload)),
            },
            other => {
                debug!(state = %other, bytes = payload.len(), "dropping inbound payload");
            }
        }
    }

    fn on_close(
        &mut self,
        from: SessionState,
        code: u16,
        reason: Option<String>,
        effects: &mut Vec<Effect>,
    ) {
        if from == SessionState::Idle {
            debug!(code, "ignoring close while idle");
            return;
        }

        if code == NORMAL_CLOSURE {
            self.stop_loading(effects);
            self.enter(SessionState::Closed);
            self.enter(SessionState::Idle);
            return;
        }

        if from == SessionState::Errored {
            debug!(code, "keeping earlier session error over close");
            return;
        }

        let reason = reason
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "no reason provided".to_string());
        self.fail(SessionError::UnexpectedClose { code, reason }, effects);
    }

    fn fail(&mut self, error: SessionError, effects: &mut Vec<Effect>) {
        self.stop_loading(effects);
        self.enter(SessionState::Errored);
        self.status.last_error = Some(error.clone());
        effects.push(Effect::ShowError(error));
    }

    fn stop_loading(&mut self, effects: &mut Vec<Effect>) {
        if self.status.loading {
            self.status.loading = false;
            effects.push(Effect::StopLoading);
        }
    }

    fn enter(&mut self, state: SessionState) {
        self.status.state = state;
        self.history.push(state);
    }
}
