//! Ownership of one shell modal's resources across connection generations.
//!
//! A generation is the emulator, transport and timers created for a single
//! connect or reconnect. At most one generation is live at a time; the
//! previous one is disposed completely before the next is created, and
//! asynchronous events carry the generation that produced them so that
//! late events from a disposed generation are dropped.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use crate::emulator::{Emulator, Vt100Emulator};
use crate::model::{Credential, SessionTarget, TerminalSize, Theme, WorkloadRef};
use crate::session::{Effect, SessionEvent, SessionMachine, SessionStatus};
use crate::target::{ShellAddress, TargetError, TargetResolver};
use crate::transport::{NORMAL_CLOSURE, Transport, TransportEvent, WsTransport};

pub type Generation = u64;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum GenerationEvent {
    Transport(TransportEvent),
    LoadingTick,
    HandshakeTimeout,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TaggedEvent {
    pub generation: Generation,
    pub event: GenerationEvent,
}

/// A running timer owned by a generation. Cancelling consumes the handle.
pub trait SessionTimer {
    fn cancel(self);
}

/// Factory for the resources of one generation.
pub trait SessionBackend {
    type Transport: Transport;
    type Emulator: Emulator;
    type Timer: SessionTimer;

    fn open_transport(&mut self, address: &ShellAddress, generation: Generation)
    -> Self::Transport;
    fn create_emulator(&mut self, size: TerminalSize, theme: Theme) -> Self::Emulator;
    fn start_loading(&mut self, generation: Generation) -> Self::Timer;
    fn start_deadline(&mut self, generation: Generation, after: Duration) -> Self::Timer;
}

/// Inputs read from outside the shell core, handed over at construction.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub credential: Credential,
    pub theme: Theme,
    pub handshake_timeout: Option<Duration>,
}

struct LiveGeneration<B: SessionBackend> {
    id: Generation,
    transport: B::Transport,
    emulator: B::Emulator,
    loading: Option<B::Timer>,
    deadline: Option<B::Timer>,
}

impl<B: SessionBackend> LiveGeneration<B> {
    fn stop_timers(&mut self) {
        if let Some(timer) = self.loading.take() {
            timer.cancel();
        }
        if let Some(timer) = self.deadline.take() {
            timer.cancel();
        }
    }

    fn dispose(mut self) {
        self.stop_timers();
        self.transport.close(NORMAL_CLOSURE);
        debug!(generation = self.id, "generation disposed");
    }
}

pub struct SessionLifecycle<B: SessionBackend> {
    backend: B,
    resolver: TargetResolver,
    context: SessionContext,
    machine: SessionMachine,
    live: Option<LiveGeneration<B>>,
    generation: Generation,
    size: TerminalSize,
    spinner_frame: usize,
}

impl<B: SessionBackend> SessionLifecycle<B> {
    pub fn new(
        backend: B,
        resolver: TargetResolver,
        context: SessionContext,
        size: TerminalSize,
    ) -> Self {
        Self {
            backend,
            resolver,
            context,
            machine: SessionMachine::new(),
            live: None,
            generation: 0,
            size,
            spinner_frame: 0,
        }
    }

    pub fn status(&self) -> &SessionStatus {
        self.machine.status()
    }

    pub fn spinner_frame(&self) -> usize {
        self.spinner_frame
    }

    pub fn emulator(&self) -> Option<&B::Emulator> {
        self.live.as_ref().map(|live| &live.emulator)
    }

    /// Builds a fresh target from the current selection and the context
    /// credential.
    pub fn target_for(
        &self,
        workload: &WorkloadRef,
        container: Option<&str>,
        shell: &str,
    ) -> Result<SessionTarget, TargetError> {
        self.resolver
            .target(workload, container, shell, &self.context.credential)
    }

    pub fn begin(&mut self, target: SessionTarget) -> Result<Generation, TargetError> {
        let address = self.resolver.checked_address(&target)?;
        Ok(self.start_generation(target, address, SessionEvent::Connect))
    }

    pub fn reconnect(&mut self, target: SessionTarget) -> Result<Generation, TargetError> {
        let address = self.resolver.checked_address(&target)?;
        Ok(self.start_generation(target, address, SessionEvent::Reconnect))
    }

    /// Disposes every resource of the live generation. Safe to repeat.
    pub fn end(&mut self) {
        let effects = self.machine.apply(SessionEvent::ModalClosed);
        self.run_effects(effects);
        if let Some(live) = self.live.take() {
            info!(generation = live.id, "shell session ended");
            debug!(history = ?self.machine.history(), "session transitions");
            live.dispose();
        }
    }

    pub fn handle(&mut self, tagged: TaggedEvent) {
        let Some(live) = self.live.as_mut() else {
            debug!(generation = tagged.generation, "no live generation, dropping event");
            return;
        };
        if live.id != tagged.generation {
            debug!(
                generation = tagged.generation,
                live = live.id,
                "dropping event from stale generation"
            );
            return;
        }

        let event = match tagged.event {
            GenerationEvent::LoadingTick => {
                if live.loading.is_some() {
                    self.spinner_frame = self.spinner_frame.wrapping_add(1);
                }
                return;
            }
            GenerationEvent::HandshakeTimeout => {
                let after_secs = self
                    .context
                    .handshake_timeout
                    .map(|timeout| timeout.as_secs())
                    .unwrap_or_default();
                SessionEvent::HandshakeTimeout { after_secs }
            }
            GenerationEvent::Transport(TransportEvent::Open) => SessionEvent::TransportOpen,
            GenerationEvent::Transport(TransportEvent::Message(bytes)) => {
                SessionEvent::Message(bytes)
            }
            GenerationEvent::Transport(TransportEvent::Error(error)) => {
                SessionEvent::TransportError(error)
            }
            GenerationEvent::Transport(TransportEvent::Close { code, reason }) => {
                SessionEvent::TransportClosed { code, reason }
            }
        };

        let effects = self.machine.apply(event);
        self.run_effects(effects);
    }

    /// Forwards keystrokes only while the session is connected.
    pub fn send_input(&mut self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return false;
        }
        if !self.machine.accepts_input() {
            debug!(
                state = %self.machine.state(),
                bytes = bytes.len(),
                "session not connected, dropping input"
            );
            return false;
        }
        match self.live.as_mut() {
            Some(live) => {
                live.transport.send(bytes);
                true
            }
            None => false,
        }
    }

    /// Re-fits the local grid. The remote pty keeps its attach-time size.
    pub fn resize(&mut self, size: TerminalSize) {
        self.size = size;
        if let Some(live) = self.live.as_mut() {
            live.emulator.resize(size);
        }
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.context.theme = theme;
        if let Some(live) = self.live.as_mut() {
            live.emulator.set_theme(theme);
        }
    }

    pub fn dismiss_error(&mut self) {
        self.machine.dismiss_error();
    }

    fn start_generation(
        &mut self,
        target: SessionTarget,
        address: ShellAddress,
        event: SessionEvent,
    ) -> Generation {
        if let Some(previous) = self.live.take() {
            info!(generation = previous.id, "replacing shell session");
            previous.dispose();
        }

        self.generation += 1;
        let id = self.generation;
        info!(generation = id, target = %target, address = %address, "starting shell session");

        let emulator = self.backend.create_emulator(self.size, self.context.theme);
        let transport = self.backend.open_transport(&address, id);
        self.live = Some(LiveGeneration {
            id,
            transport,
            emulator,
            loading: None,
            deadline: None,
        });
        self.spinner_frame = 0;

        let effects = self.machine.apply(event);
        self.run_effects(effects);

        if let Some(after) = self.context.handshake_timeout
            && let Some(live) = self.live.as_mut()
        {
            live.deadline = Some(self.backend.start_deadline(id, after));
        }
        id
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartLoading => {
                    if let Some(live) = self.live.as_mut()
                        && live.loading.is_none()
                    {
                        live.loading = Some(self.backend.start_loading(live.id));
                    }
                }
                Effect::StopLoading => {
                    if let Some(live) = self.live.as_mut() {
                        live.stop_timers();
                    }
                }
                Effect::Render(bytes) => {
                    if let Some(live) = self.live.as_mut() {
                        live.emulator.write(&bytes);
                    }
                }
                Effect::FocusEmulator => {
                    if let Some(live) = self.live.as_mut() {
                        live.emulator.focus();
                    }
                }
                Effect::ShowError(error) => {
                    warn!(generation = self.generation, error = %error, "shell session failed");
                }
                Effect::AbandonTransport => {
                    if let Some(live) = self.live.as_mut() {
                        debug!(generation = live.id, "closing transport of failed handshake");
                        live.transport.close(NORMAL_CLOSURE);
                    }
                }
            }
        }
    }
}

impl<B: SessionBackend> Drop for SessionLifecycle<B> {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.dispose();
        }
    }
}

/// Production backend: WebSocket transports, vt100 screens and tokio timers
/// that report through the session event channel.
pub struct TokioBackend {
    events: mpsc::UnboundedSender<TaggedEvent>,
    loading_tick: Duration,
    scrollback: usize,
}

impl TokioBackend {
    pub fn new(
        events: mpsc::UnboundedSender<TaggedEvent>,
        loading_tick: Duration,
        scrollback: usize,
    ) -> Self {
        Self {
            events,
            loading_tick: loading_tick.max(Duration::from_millis(16)),
            scrollback,
        }
    }
}

impl SessionBackend for TokioBackend {
    type Transport = WsTransport;
    type Emulator = Vt100Emulator;
    type Timer = TaskTimer;

    fn open_transport(&mut self, address: &ShellAddress, generation: Generation) -> WsTransport {
        WsTransport::open(address, generation, self.events.clone())
    }

    fn create_emulator(&mut self, size: TerminalSize, theme: Theme) -> Vt100Emulator {
        Vt100Emulator::new(size, self.scrollback, theme)
    }

    fn start_loading(&mut self, generation: Generation) -> TaskTimer {
        let events = self.events.clone();
        let period = self.loading_tick;
        TaskTimer(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let tick = TaggedEvent {
                    generation,
                    event: GenerationEvent::LoadingTick,
                };
                if events.send(tick).is_err() {
                    return;
                }
            }
        }))
    }

    fn start_deadline(&mut self, generation: Generation, after: Duration) -> TaskTimer {
        let events = self.events.clone();
        TaskTimer(tokio::spawn(async move {
            sleep(after).await;
            let _ = events.send(TaggedEvent {
                generation,
                event: GenerationEvent::HandshakeTimeout,
            });
        }))
    }
}

pub struct TaskTimer(JoinHandle<()>);

impl SessionTimer for TaskTimer {
    fn cancel(self) {
        self.0.abort();
    }
}

impl Drop for TaskTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContainerInfo;
    use crate::session::{SessionError, SessionState};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Default)]
    struct Ledger {
        log: Vec<String>,
        addresses: Vec<String>,
        live_transports: i32,
        live_emulators: i32,
        closes: HashMap<Generation, u32>,
        emulators_created: Generation,
        cancels: HashMap<(Generation, &'static str), u32>,
        leaked_timers: u32,
        sent: Vec<(Generation, Vec<u8>)>,
        written: Vec<(Generation, Vec<u8>)>,
        focused: Vec<Generation>,
        resized: Vec<(Generation, TerminalSize)>,
        themes: Vec<(Generation, Theme)>,
    }

    type Shared = Rc<RefCell<Ledger>>;

    struct FakeTransport {
        id: Generation,
        ledger: Shared,
        closed: bool,
    }

    impl Transport for FakeTransport {
        fn send(&mut self, bytes: &[u8]) {
            self.ledger.borrow_mut().sent.push((self.id, bytes.to_vec()));
        }

        fn close(&mut self, code: u16) {
            if self.closed {
                return;
            }
            self.closed = true;
            let mut ledger = self.ledger.borrow_mut();
            ledger.log.push(format!("close#{}:{code}", self.id));
            *ledger.closes.entry(self.id).or_default() += 1;
        }

        fn is_open(&self) -> bool {
            !self.closed
        }
    }

    impl Drop for FakeTransport {
        fn drop(&mut self) {
            self.ledger.borrow_mut().live_transports -= 1;
        }
    }

    struct FakeEmulator {
        id: Generation,
        ledger: Shared,
    }

    impl Emulator for FakeEmulator {
        fn write(&mut self, bytes: &[u8]) {
            self.ledger.borrow_mut().written.push((self.id, bytes.to_vec()));
        }

        fn resize(&mut self, size: TerminalSize) {
            self.ledger.borrow_mut().resized.push((self.id, size));
        }

        fn focus(&mut self) {
            self.ledger.borrow_mut().focused.push(self.id);
        }

        fn set_theme(&mut self, theme: Theme) {
            self.ledger.borrow_mut().themes.push((self.id, theme));
        }
    }

    impl Drop for FakeEmulator {
        fn drop(&mut self) {
            let mut ledger = self.ledger.borrow_mut();
            ledger.live_emulators -= 1;
            ledger.log.push(format!("drop-emulator#{}", self.id));
        }
    }

    struct FakeTimer {
        id: Generation,
        kind: &'static str,
        ledger: Shared,
        cancelled: bool,
    }

    impl SessionTimer for FakeTimer {
        fn cancel(mut self) {
            self.cancelled = true;
            *self
                .ledger
                .borrow_mut()
                .cancels
                .entry((self.id, self.kind))
                .or_default() += 1;
        }
    }

    impl Drop for FakeTimer {
        fn drop(&mut self) {
            if !self.cancelled {
                self.ledger.borrow_mut().leaked_timers += 1;
            }
        }
    }

    struct FakeBackend {
        ledger: Shared,
    }

    impl SessionBackend for FakeBackend {
        type Transport = FakeTransport;
        type Emulator = FakeEmulator;
        type Timer = FakeTimer;

        fn open_transport(
            &mut self,
            address: &ShellAddress,
            generation: Generation,
        ) -> FakeTransport {
            let mut ledger = self.ledger.borrow_mut();
            assert!(address.as_str().contains("/shell?"));
            ledger.log.push(format!("open#{generation}"));
            ledger.addresses.push(address.as_str().to_string());
            ledger.live_transports += 1;
            FakeTransport {
                id: generation,
                ledger: Rc::clone(&self.ledger),
                closed: false,
            }
        }

        fn create_emulator(&mut self, _size: TerminalSize, _theme: Theme) -> FakeEmulator {
            let mut ledger = self.ledger.borrow_mut();
            ledger.live_emulators += 1;
            ledger.emulators_created += 1;
            let id = ledger.emulators_created;
            ledger.log.push(format!("create-emulator#{id}"));
            FakeEmulator {
                id,
                ledger: Rc::clone(&self.ledger),
            }
        }

        fn start_loading(&mut self, generation: Generation) -> FakeTimer {
            FakeTimer {
                id: generation,
                kind: "loading",
                ledger: Rc::clone(&self.ledger),
                cancelled: false,
            }
        }

        fn start_deadline(&mut self, generation: Generation, _after: Duration) -> FakeTimer {
            FakeTimer {
                id: generation,
                kind: "deadline",
                ledger: Rc::clone(&self.ledger),
                cancelled: false,
            }
        }
    }

    fn workload() -> WorkloadRef {
        WorkloadRef {
            cluster: "local".to_string(),
            namespace: "default".to_string(),
            name: "web-0".to_string(),
            containers: vec![ContainerInfo::named("web"), ContainerInfo::named("proxy")],
        }
    }

    fn lifecycle(timeout: Option<Duration>) -> (SessionLifecycle<FakeBackend>, Shared) {
        let ledger = Shared::default();
        let backend = FakeBackend {
            ledger: Rc::clone(&ledger),
        };
        let resolver = TargetResolver::new("https://dash.local").unwrap();
        let context = SessionContext {
            credential: Credential::new("token"),
            theme: Theme::Dark,
            handshake_timeout: timeout,
        };
        (
            SessionLifecycle::new(backend, resolver, context, TerminalSize::default()),
            ledger,
        )
    }

    fn begin(session: &mut SessionLifecycle<FakeBackend>) -> Generation {
        let target = session.target_for(&workload(), None, "/bin/sh").unwrap();
        session.begin(target).unwrap()
    }

    fn reconnect(session: &mut SessionLifecycle<FakeBackend>) -> Generation {
        let target = session
            .target_for(&workload(), Some("proxy"), "/bin/bash")
            .unwrap();
        session.reconnect(target).unwrap()
    }

    fn transport(generation: Generation, event: TransportEvent) -> TaggedEvent {
        TaggedEvent {
            generation,
            event: GenerationEvent::Transport(event),
        }
    }

    fn message(generation: Generation, bytes: &[u8]) -> TaggedEvent {
        transport(generation, TransportEvent::Message(bytes.to_vec()))
    }

    fn close(generation: Generation, code: u16, reason: Option<&str>) -> TaggedEvent {
        transport(
            generation,
            TransportEvent::Close {
                code,
                reason: reason.map(str::to_string),
            },
        )
    }

    #[test]
    fn prompt_connects_and_renders() {
        let (mut session, ledger) = lifecycle(None);
        let id = begin(&mut session);
        assert_eq!(session.status().state, SessionState::Connecting);
        session.handle(transport(id, TransportEvent::Open));
        assert_eq!(session.status().state, SessionState::AwaitingFirstMessage);
        session.handle(message(id, b"$ "));

        assert_eq!(session.status().state, SessionState::Connected);
        assert_eq!(session.status().banner(), None);
        let ledger = ledger.borrow();
        assert_eq!(ledger.written.len(), 1);
        assert_eq!(ledger.written[0].1, b"$ ".to_vec());
        assert_eq!(ledger.focused.len(), 1);
        assert_eq!(ledger.cancels.get(&(id, "loading")), Some(&1));
    }

    #[test]
    fn handshake_error_shows_banner_and_keeps_terminal_empty() {
        let (mut session, ledger) = lifecycle(None);
        let id = begin(&mut session);
        session.handle(transport(id, TransportEvent::Open));
        session.handle(message(id, b"ERROR: container not found"));

        assert_eq!(session.status().state, SessionState::Errored);
        assert_eq!(
            session.status().banner().as_deref(),
            Some("ERROR: container not found")
        );
        assert!(ledger.borrow().written.is_empty());
        assert_eq!(ledger.borrow().cancels.get(&(id, "loading")), Some(&1));
    }

    #[test]
    fn failed_handshake_closes_transport_but_keeps_screen() {
        let (mut session, ledger) = lifecycle(None);
        let id = begin(&mut session);
        session.handle(transport(id, TransportEvent::Open));
        session.handle(message(id, b"ERROR: container not found"));

        {
            let ledger = ledger.borrow();
            assert_eq!(ledger.closes.get(&id), Some(&1));
            assert_eq!(ledger.live_emulators, 1);
            assert_eq!(ledger.log.last(), Some(&format!("close#{id}:1000")));
        }
        assert!(session.emulator().is_some());

        session.end();
        let ledger = ledger.borrow();
        assert_eq!(ledger.closes.get(&id), Some(&1));
        assert_eq!(ledger.live_emulators, 0);
    }

    #[test]
    fn clean_close_goes_idle_without_banner() {
        let (mut session, _ledger) = lifecycle(None);
        let id = begin(&mut session);
        session.handle(transport(id, TransportEvent::Open));
        session.handle(message(id, b"$ "));
        session.handle(close(id, 1000, None));

        assert_eq!(session.status().state, SessionState::Idle);
        assert_eq!(session.status().banner(), None);
    }

    #[test]
    fn abnormal_close_shows_reason() {
        let (mut session, _ledger) = lifecycle(None);
        let id = begin(&mut session);
        session.handle(transport(id, TransportEvent::Open));
        session.handle(message(id, b"$ "));
        session.handle(close(id, 1006, Some("abnormal closure")));

        assert_eq!(session.status().state, SessionState::Errored);
        assert!(
            session
                .status()
                .banner()
                .is_some_and(|banner| banner.contains("abnormal closure"))
        );
    }

    #[test]
    fn reconnect_while_connecting_closes_old_transport_first() {
        let (mut session, ledger) = lifecycle(None);
        let first = begin(&mut session);
        let second = reconnect(&mut session);
        assert_eq!(second, first + 1);

        let ledger = ledger.borrow();
        assert_eq!(
            ledger.log,
            vec![
                format!("create-emulator#{first}"),
                format!("open#{first}"),
                format!("close#{first}:1000"),
                format!("drop-emulator#{first}"),
                format!("create-emulator#{second}"),
                format!("open#{second}"),
            ]
        );
        assert_eq!(session.status().state, SessionState::Connecting);
        assert!(ledger.addresses[1].contains("container=proxy"));
    }

    #[test]
    fn end_twice_is_harmless() {
        let (mut session, ledger) = lifecycle(Some(Duration::from_secs(30)));
        let id = begin(&mut session);
        session.end();
        session.end();

        let ledger = ledger.borrow();
        assert_eq!(ledger.closes.get(&id), Some(&1));
        assert_eq!(ledger.live_transports, 0);
        assert_eq!(ledger.live_emulators, 0);
        assert_eq!(ledger.leaked_timers, 0);
        assert_eq!(session.status().state, SessionState::Idle);
    }

    #[test]
    fn repeated_reconnects_keep_one_live_generation() {
        let (mut session, ledger) = lifecycle(Some(Duration::from_secs(30)));
        begin(&mut session);
        for round in 0..25 {
            let id = reconnect(&mut session);
            if round % 3 == 0 {
                session.handle(transport(id, TransportEvent::Open));
                session.handle(message(id, b"$ "));
            }
            let ledger = ledger.borrow();
            assert_eq!(ledger.live_transports, 1, "round {round}");
            assert_eq!(ledger.live_emulators, 1, "round {round}");
        }
        session.end();

        let ledger = ledger.borrow();
        assert_eq!(ledger.live_transports, 0);
        assert_eq!(ledger.live_emulators, 0);
        assert_eq!(ledger.leaked_timers, 0);
        assert!(ledger.closes.values().all(|count| *count == 1));
    }

    #[test]
    fn loading_timer_cancelled_once_on_every_exit_path() {
        let cases: Vec<(&str, Vec<TransportEvent>)> = vec![
            (
                "first message",
                vec![TransportEvent::Open, TransportEvent::Message(b"$ ".to_vec())],
            ),
            ("transport error", vec![TransportEvent::Error("refused".to_string())]),
            (
                "close",
                vec![
                    TransportEvent::Open,
                    TransportEvent::Close {
                        code: 1000,
                        reason: None,
                    },
                ],
            ),
            ("teardown", vec![]),
        ];

        for (name, events) in cases {
            let (mut session, ledger) = lifecycle(Some(Duration::from_secs(30)));
            let id = begin(&mut session);
            for event in events {
                session.handle(transport(id, event));
            }
            session.end();
            session.end();

            let ledger = ledger.borrow();
            assert_eq!(ledger.cancels.get(&(id, "loading")), Some(&1), "{name}");
            assert_eq!(ledger.cancels.get(&(id, "deadline")), Some(&1), "{name}");
            assert_eq!(ledger.leaked_timers, 0, "{name}");
        }
    }

    #[test]
    fn input_flows_only_while_connected() {
        let (mut session, ledger) = lifecycle(None);
        assert!(!session.send_input(b"idle"));

        let id = begin(&mut session);
        assert!(!session.send_input(b"connecting"));
        session.handle(transport(id, TransportEvent::Open));
        assert!(!session.send_input(b"awaiting"));
        session.handle(message(id, b"$ "));
        assert!(session.send_input(b"ls\r"));
        session.handle(message(id, b"ERROR: session expired"));
        assert!(!session.send_input(b"after error"));

        let ledger = ledger.borrow();
        assert_eq!(ledger.sent, vec![(id, b"ls\r".to_vec())]);
    }

    #[test]
    fn stale_generation_events_are_dropped() {
        let (mut session, ledger) = lifecycle(None);
        let first = begin(&mut session);
        let second = reconnect(&mut session);

        session.handle(transport(first, TransportEvent::Open));
        session.handle(message(first, b"old prompt"));
        session.handle(close(first, 1006, Some("old")));
        assert_eq!(session.status().state, SessionState::Connecting);
        assert!(ledger.borrow().written.is_empty());

        session.handle(transport(second, TransportEvent::Open));
        session.handle(message(second, b"$ "));
        assert_eq!(session.status().state, SessionState::Connected);
    }

    #[test]
    fn handshake_timeout_fails_pending_session() {
        let (mut session, ledger) = lifecycle(Some(Duration::from_secs(12)));
        let id = begin(&mut session);
        session.handle(transport(id, TransportEvent::Open));
        session.handle(TaggedEvent {
            generation: id,
            event: GenerationEvent::HandshakeTimeout,
        });

        assert_eq!(
            session.status().last_error,
            Some(SessionError::HandshakeTimeout(12))
        );
        assert_eq!(ledger.borrow().cancels.get(&(id, "deadline")), Some(&1));
        assert_eq!(ledger.borrow().closes.get(&id), Some(&1));
        assert_eq!(ledger.borrow().live_emulators, 1);
    }

    #[test]
    fn spinner_advances_only_while_loading() {
        let (mut session, _ledger) = lifecycle(None);
        let id = begin(&mut session);
        let tick = TaggedEvent {
            generation: id,
            event: GenerationEvent::LoadingTick,
        };
        session.handle(tick.clone());
        session.handle(tick.clone());
        assert_eq!(session.spinner_frame(), 2);

        session.handle(transport(id, TransportEvent::Open));
        session.handle(message(id, b"$ "));
        session.handle(tick);
        assert_eq!(session.spinner_frame(), 2);
    }

    #[test]
    fn target_errors_leave_current_generation_alone() {
        let (mut session, ledger) = lifecycle(None);
        let id = begin(&mut session);
        let error = session
            .target_for(&workload(), Some("missing"), "/bin/sh")
            .unwrap_err();
        assert!(matches!(error, TargetError::UnknownContainer { .. }));

        let mut broken = session.target_for(&workload(), None, "/bin/sh").unwrap();
        broken.shell.clear();
        assert_eq!(
            session.reconnect(broken).unwrap_err(),
            TargetError::MissingField("shell")
        );
        assert_eq!(
            ledger.borrow().log,
            vec![format!("create-emulator#{id}"), format!("open#{id}")]
        );
        assert_eq!(ledger.borrow().live_transports, 1);
        assert!(ledger.borrow().closes.is_empty());
    }

    #[test]
    fn resize_and_theme_apply_to_live_emulator_only() {
        let (mut session, ledger) = lifecycle(None);
        session.resize(TerminalSize::new(100, 30));
        assert!(ledger.borrow().resized.is_empty());

        let id = begin(&mut session);
        session.resize(TerminalSize::new(120, 40));
        session.set_theme(Theme::Light);

        let ledger = ledger.borrow();
        assert_eq!(ledger.resized.len(), 1);
        assert_eq!(ledger.resized, vec![(id, TerminalSize::new(120, 40))]);
        assert_eq!(ledger.themes, vec![(id, Theme::Light)]);
        assert!(ledger.sent.is_empty());
    }
}
