use crate::input::Action;
use crate::model::{ContainerInfo, Theme, WorkloadRef, normalize_shell_token};
use crate::session::{SessionState, SessionStatus};
use chrono::Local;

pub const DEFAULT_SHELLS: [&str; 2] = ["/bin/sh", "/bin/bash"];

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    /// Keys go to the remote shell.
    Terminal,
    /// One command key after the leader chord.
    Leader,
    /// No live shell: session commands are bound directly.
    Control,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    None,
    Connect {
        container: Option<String>,
        shell: String,
    },
    Reconnect {
        container: Option<String>,
        shell: String,
    },
    CloseSession,
    SendInput(Vec<u8>),
    SetTheme(Theme),
    DismissError,
}

/// What the UI needs from the session, copied after every event.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionView {
    pub state: SessionState,
    pub loading: bool,
    pub spinner_frame: usize,
    pub banner: Option<Banner>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Banner {
    pub title: String,
    pub text: String,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            loading: false,
            spinner_frame: 0,
            banner: None,
        }
    }
}

pub struct App {
    running: bool,
    show_help: bool,
    leader: bool,
    status: String,
    theme: Theme,
    server: String,
    workload: WorkloadRef,
    selected_container: usize,
    shells: Vec<String>,
    selected_shell: usize,
    session: SessionView,
}

impl App {
    pub fn new(
        workload: WorkloadRef,
        shells: Vec<String>,
        default_shell: Option<&str>,
        theme: Theme,
        server: String,
    ) -> Self {
        let shells = normalize_shells(shells, default_shell);
        let selected_shell = default_shell
            .map(normalize_shell_token)
            .and_then(|shell| shells.iter().position(|candidate| *candidate == shell))
            .unwrap_or(0);

        Self {
            running: true,
            show_help: false,
            leader: false,
            status: "Press Enter to open a shell".to_string(),
            theme,
            server,
            workload,
            selected_container: 0,
            shells,
            selected_shell,
            session: SessionView::default(),
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> InputMode {
        if self.leader {
            InputMode::Leader
        } else if !self.show_help && self.session.state == SessionState::Connected {
            InputMode::Terminal
        } else {
            InputMode::Control
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn workload(&self) -> &WorkloadRef {
        &self.workload
    }

    pub fn session(&self) -> &SessionView {
        &self.session
    }

    pub fn containers(&self) -> &[ContainerInfo] {
        &self.workload.containers
    }

    pub fn selected_container_index(&self) -> Option<usize> {
        (!self.workload.containers.is_empty()).then_some(self.selected_container)
    }

    pub fn selected_container(&self) -> Option<&ContainerInfo> {
        self.workload.containers.get(self.selected_container)
    }

    pub fn selected_shell(&self) -> &str {
        self.shells
            .get(self.selected_shell)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SHELLS[0])
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn select_container(&mut self, name: &str) -> bool {
        match self
            .workload
            .containers
            .iter()
            .position(|container| container.name == name)
        {
            Some(index) => {
                self.selected_container = index;
                true
            }
            None => false,
        }
    }

    /// Applies a theme that changed outside the UI. Returns whether it differed.
    pub fn set_theme(&mut self, theme: Theme) -> bool {
        if self.theme == theme {
            return false;
        }
        self.theme = theme;
        self.status = format!("Theme: {}", theme.label());
        true
    }

    pub fn sync_session(&mut self, status: &SessionStatus, spinner_frame: usize) {
        let previous = self.session.state;
        self.session = SessionView {
            state: status.state,
            loading: status.loading,
            spinner_frame,
            banner: status
                .last_error
                .as_ref()
                .zip(status.banner())
                .map(|(error, text)| Banner {
                    title: error.title().to_string(),
                    text,
                }),
        };

        if previous == status.state {
            return;
        }
        let now = Local::now().format("%H:%M:%S");
        match status.state {
            SessionState::Connecting => {
                self.status = format!("Connecting to {}…", self.selection_label());
            }
            SessionState::AwaitingFirstMessage => {
                self.status = "Waiting for the shell to answer…".to_string();
            }
            SessionState::Connected => {
                self.status = format!("Connected {} at {now}", self.selection_label());
            }
            SessionState::Errored => {
                let title = status
                    .last_error
                    .as_ref()
                    .map(|error| error.title())
                    .unwrap_or("Session failed");
                self.status = format!("{title} at {now}. r reconnect, Esc dismiss");
            }
            SessionState::Idle | SessionState::Closed => {
                self.leader = false;
                self.status = format!("Session closed at {now}. Enter to reconnect");
            }
        }
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if self.leader && !matches!(action, Action::StartLeader) {
            self.leader = false;
        }

        if self.show_help && !matches!(action, Action::ToggleHelp) {
            self.show_help = false;
        }

        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            Action::StartLeader => {
                self.leader = true;
                self.status = "Leader: r reconnect  x close  t theme  c container  s shell  ? help"
                    .to_string();
                AppCommand::None
            }
            Action::CancelLeader => {
                self.status = "Back to shell".to_string();
                AppCommand::None
            }
            Action::Connect => {
                if self.session.state == SessionState::Idle {
                    AppCommand::Connect {
                        container: self.selected_container().map(|info| info.name.clone()),
                        shell: self.selected_shell().to_string(),
                    }
                } else {
                    self.reconnect_command()
                }
            }
            Action::Reconnect => self.reconnect_command(),
            Action::CloseSession => {
                if self.session.state == SessionState::Idle {
                    self.status = "No open session".to_string();
                }
                AppCommand::CloseSession
            }
            Action::ToggleTheme => {
                self.theme = self.theme.toggled();
                self.status = format!("Theme: {}", self.theme.label());
                AppCommand::SetTheme(self.theme)
            }
            Action::NextContainer => {
                self.move_container_selection(1);
                AppCommand::None
            }
            Action::PrevContainer => {
                self.move_container_selection(-1);
                AppCommand::None
            }
            Action::NextShell => {
                if !self.shells.is_empty() {
                    self.selected_shell = (self.selected_shell + 1) % self.shells.len();
                }
                self.status = format!(
                    "Shell {} selected, reconnect to apply",
                    self.selected_shell()
                );
                AppCommand::None
            }
            Action::DismissBanner => {
                if self.session.banner.is_some() {
                    self.session.banner = None;
                    self.status = "Error dismissed".to_string();
                    AppCommand::DismissError
                } else {
                    AppCommand::None
                }
            }
            Action::ToggleHelp => {
                self.show_help = !self.show_help;
                AppCommand::None
            }
            Action::Forward(bytes) => AppCommand::SendInput(bytes),
        }
    }

    fn reconnect_command(&mut self) -> AppCommand {
        AppCommand::Reconnect {
            container: self.selected_container().map(|info| info.name.clone()),
            shell: self.selected_shell().to_string(),
        }
    }

    fn move_container_selection(&mut self, delta: isize) {
        let len = self.workload.containers.len();
        if len == 0 {
            self.status = format!("{} has no containers", self.workload.qualified_name());
            return;
        }
        let next = (self.selected_container as isize + delta).rem_euclid(len as isize);
        self.selected_container = next as usize;
        self.status = format!(
            "Container {} selected, reconnect to apply",
            self.workload.containers[self.selected_container].name
        );
    }

    fn selection_label(&self) -> String {
        let container = self
            .selected_container()
            .map(|info| info.name.as_str())
            .unwrap_or("-");
        format!(
            "{}:{} ({})",
            self.workload.qualified_name(),
            container,
            self.selected_shell()
        )
    }
}

fn normalize_shells(shells: Vec<String>, default_shell: Option<&str>) -> Vec<String> {
    let mut normalized = Vec::new();
    let candidates = default_shell
        .map(str::to_string)
        .into_iter()
        .chain(shells)
        .chain(DEFAULT_SHELLS.iter().map(|shell| shell.to_string()));
    for shell in candidates {
        let shell = normalize_shell_token(&shell);
        if !shell.is_empty() && !normalized.contains(&shell) {
            normalized.push(shell);
        }
    }
    normalized
}
