mod app;
mod classify;
mod cli;
mod config;
mod emulator;
mod input;
mod k8s;
mod lifecycle;
mod model;
mod session;
mod target;
mod transport;
mod ui;

use anyhow::{Context, Result, bail};
use app::{App, AppCommand, InputMode};
use clap::Parser;
use cli::CliArgs;
use config::{ConfigWatcher, PodtermConfig};
use crossterm::event::{
    DisableBracketedPaste, EnableBracketedPaste, Event, EventStream, KeyEventKind,
    KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use emulator::Vt100Emulator;
use futures::StreamExt;
use k8s::KubeGateway;
use lifecycle::{SessionBackend, SessionContext, SessionLifecycle, TaggedEvent, TokioBackend};
use model::{ContainerInfo, Credential, WorkloadRef};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::Path;
use std::sync::Mutex;
use target::TargetResolver;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
const KUBE_TIMEOUT: Duration = Duration::from_secs(5);
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

struct SessionSettings {
    resolver: TargetResolver,
    context: SessionContext,
    loading_tick: Duration,
    scrollback: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref())?;

    let mut watcher = ConfigWatcher::discover();
    let config = watcher.load_current().unwrap_or_else(|error| {
        warn!(error = %compact_error(&error), "ignoring unreadable config");
        PodtermConfig::default()
    });
    if let Some(source) = config.source.as_deref() {
        info!(source, "loaded config");
    }

    let server = args
        .server
        .clone()
        .or_else(|| config.server.clone())
        .context("no dashboard server configured; pass --server or set `server` in podterm.yaml")?;
    let resolver = TargetResolver::new(&server)
        .with_context(|| format!("invalid dashboard server '{server}'"))?;

    let gateway = connect_gateway(&args).await;
    let namespace = resolve_namespace(&args, gateway.as_ref());
    let cluster = resolve_cluster(&args, &config, gateway.as_ref())?;
    let workload = load_workload(&args, gateway.as_ref(), &cluster, &namespace).await?;

    let credential = Credential::new(
        args.token
            .clone()
            .or_else(|| config.token.clone())
            .unwrap_or_default(),
    );
    if credential.is_empty() {
        warn!("no token configured; pass --token or set PODTERM_TOKEN");
    }

    let theme = args.theme.or(config.theme).unwrap_or_default();
    let default_shell = args.shell.clone().or_else(|| config.default_shell.clone());
    let mut app = App::new(
        workload,
        config.shells.clone(),
        default_shell.as_deref(),
        theme,
        resolver.base().to_string(),
    );

    let settings = SessionSettings {
        resolver,
        context: SessionContext {
            credential,
            theme,
            handshake_timeout: (config.handshake_timeout_secs > 0)
                .then(|| Duration::from_secs(config.handshake_timeout_secs)),
        },
        loading_tick: Duration::from_millis(config.loading_tick_ms),
        scrollback: config.scrollback,
    };

    run(&mut app, settings, &mut watcher, args.container).await
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = builder.with_writer(Mutex::new(file)).try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::sink).try_init();
        }
    }

    Ok(())
}

async fn connect_gateway(args: &CliArgs) -> Option<KubeGateway> {
    if args.no_kube {
        return None;
    }

    match timeout(KUBE_TIMEOUT, KubeGateway::connect(args.context.clone())).await {
        Ok(Ok(gateway)) => {
            debug!(
                context = gateway.context(),
                cluster = gateway.cluster_url(),
                "using kube context"
            );
            Some(gateway)
        }
        Ok(Err(error)) => {
            warn!(error = %compact_error(&error), "kubernetes API unavailable");
            None
        }
        Err(_) => {
            warn!("timed out connecting to the kubernetes API");
            None
        }
    }
}

fn resolve_namespace(args: &CliArgs, gateway: Option<&KubeGateway>) -> String {
    args.namespace
        .clone()
        .or_else(|| gateway.map(|gateway| gateway.default_namespace().to_string()))
        .unwrap_or_else(|| "default".to_string())
}

fn resolve_cluster(
    args: &CliArgs,
    config: &PodtermConfig,
    gateway: Option<&KubeGateway>,
) -> Result<String> {
    if let Some(cluster) = args.cluster.clone().or_else(|| config.cluster.clone()) {
        return Ok(cluster);
    }
    match gateway {
        Some(gateway) => Ok(gateway.context().to_string()),
        None => bail!("no cluster id; pass --cluster or set `cluster` in podterm.yaml"),
    }
}

async fn load_workload(
    args: &CliArgs,
    gateway: Option<&KubeGateway>,
    cluster: &str,
    namespace: &str,
) -> Result<WorkloadRef> {
    if let Some(gateway) = gateway {
        match timeout(KUBE_TIMEOUT, gateway.workload(cluster, namespace, &args.pod)).await {
            Ok(Ok(workload)) => return Ok(workload),
            Ok(Err(error)) if args.container.is_none() => return Err(error),
            Ok(Err(error)) => {
                warn!(
                    error = %compact_error(&error),
                    "container listing failed, using --container"
                );
            }
            Err(_) if args.container.is_none() => {
                bail!("timed out fetching pod {namespace}/{}", args.pod)
            }
            Err(_) => warn!("timed out fetching pod, using --container"),
        }
    }

    let Some(container) = args.container.clone() else {
        bail!("container listing unavailable; pass --container");
    };
    Ok(WorkloadRef {
        cluster: cluster.to_string(),
        namespace: namespace.to_string(),
        name: args.pod.clone(),
        containers: vec![ContainerInfo::named(container)],
    })
}

async fn run(
    app: &mut App,
    settings: SessionSettings,
    watcher: &mut ConfigWatcher,
    container: Option<String>,
) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, settings, watcher, container).await;
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableBracketedPaste,
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)
            .context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        DisableBracketedPaste,
        LeaveAlternateScreen
    )
    .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    settings: SessionSettings,
    watcher: &mut ConfigWatcher,
    container: Option<String>,
) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TaggedEvent>();
    let area = terminal.size().context("failed to read terminal size")?;
    let backend = TokioBackend::new(event_tx, settings.loading_tick, settings.scrollback);
    let mut session = SessionLifecycle::new(
        backend,
        settings.resolver,
        settings.context,
        ui::terminal_size(area.width, area.height),
    );

    let container = container.or_else(|| app.selected_container().map(|info| info.name.clone()));
    if let Some(name) = container.as_deref() {
        app.select_container(name);
    }
    let shell = app.selected_shell().to_string();
    execute_app_command(app, &mut session, AppCommand::Connect { container, shell });

    let mut reader = EventStream::new();
    let mut config_ticker = interval(CONFIG_POLL_INTERVAL);
    config_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        app.sync_session(session.status(), session.spinner_frame());
        terminal
            .draw(|frame| ui::render(frame, app, session.emulator()))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        let application_cursor = session
                            .emulator()
                            .is_some_and(Vt100Emulator::application_cursor);
                        if let Some(action) = input::map_key(app.mode(), key, application_cursor) {
                            if !matches!(action, input::Action::Forward(_)) {
                                debug!("action={action:?}");
                            }
                            let command = app.apply_action(action);
                            execute_app_command(app, &mut session, command);
                        }
                    }
                    Some(Ok(Event::Paste(text))) => {
                        if app.mode() == InputMode::Terminal {
                            let bracketed = session
                                .emulator()
                                .is_some_and(Vt100Emulator::bracketed_paste);
                            session.send_input(&input::paste_bytes(&text, bracketed));
                        }
                    }
                    Some(Ok(Event::Resize(width, height))) => {
                        session.resize(ui::terminal_size(width, height));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            Some(tagged) = event_rx.recv() => {
                session.handle(tagged);
            }
            _ = config_ticker.tick() => {
                reload_config(app, &mut session, watcher);
            }
        }
    }

    session.end();
    Ok(())
}

fn execute_app_command<B: SessionBackend>(
    app: &mut App,
    session: &mut SessionLifecycle<B>,
    command: AppCommand,
) {
    match command {
        AppCommand::None => {}
        AppCommand::Connect { container, shell } => {
            let result = session
                .target_for(app.workload(), container.as_deref(), &shell)
                .and_then(|target| session.begin(target));
            if let Err(error) = result {
                warn!(%error, "cannot open shell");
                app.set_status(format!("Cannot open shell: {error}"));
            }
        }
        AppCommand::Reconnect { container, shell } => {
            let result = session
                .target_for(app.workload(), container.as_deref(), &shell)
                .and_then(|target| session.reconnect(target));
            if let Err(error) = result {
                warn!(%error, "cannot reconnect shell");
                app.set_status(format!("Cannot reconnect: {error}"));
            }
        }
        AppCommand::CloseSession => session.end(),
        AppCommand::SendInput(bytes) => {
            session.send_input(&bytes);
        }
        AppCommand::SetTheme(theme) => session.set_theme(theme),
        AppCommand::DismissError => session.dismiss_error(),
    }
}

fn reload_config<B: SessionBackend>(
    app: &mut App,
    session: &mut SessionLifecycle<B>,
    watcher: &mut ConfigWatcher,
) {
    match watcher.reload_if_changed() {
        Ok(Some(config)) => {
            if let Some(theme) = config.theme
                && app.set_theme(theme)
            {
                info!(theme = theme.label(), "theme changed in config");
                session.set_theme(theme);
            }
        }
        Ok(None) => {}
        Err(error) => {
            app.set_status(format!("config reload failed: {}", compact_error(&error)));
        }
    }
}

fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join(": ")
}
