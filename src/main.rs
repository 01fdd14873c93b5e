//! pollterm - a terminal client for poll/validate REST system consoles
//!
//! pollterm authenticates against a console server, long-polls it for screen
//! directives and log entries, and sends operator input back one line at a
//! time.
//!
//! # Quick Start
//!
//! ```text
//! pollterm                          # Server from ~/.pollterm/config.toml
//! pollterm http://host:8080         # Explicit server
//! pollterm -u admin --rows 30 host  # Pre-filled user, taller screen
//! ```
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | Enter | Send input line |
//! | Esc | Unlock input line |
//! | Ctrl+D | Request a server dump |
//! | Ctrl+R | Resume polling after failures |
//! | Ctrl+Q | Quit |

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossterm::event::{self, Event, KeyEventKind};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pollterm::config::{self, Config};
use pollterm::core::console::Console;
use pollterm::core::scheduler::Scheduler;
use pollterm::core::screen::{ScreenBuffer, ScreenConfig};
use pollterm::core::session::{
    Completion, Outcome, PendingRequest, SessionController, SessionEvent,
};
use pollterm::core::transport::HttpTransport;
use pollterm::ui::{CredentialPrompt, KeyAction, KeyMapper, PromptAction, Renderer, UiState};

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    server_url: Option<String>,
    username: Option<String>,
    config_path: Option<PathBuf>,
    interval_ms: Option<u64>,
    rows: Option<u16>,
    columns: Option<u16>,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Input event poll timeout
const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(20);

fn print_version() {
    eprintln!("pollterm {}", VERSION);
}

fn print_help() {
    eprintln!("pollterm {} - terminal client for REST system consoles", VERSION);
    eprintln!();
    eprintln!("Usage: pollterm [OPTIONS] [SERVER_URL]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -u, --user <NAME>     Pre-fill the credential prompt");
    eprintln!("  -c, --config <PATH>   Configuration file");
    eprintln!("  -i, --interval <MS>   Poll interval in milliseconds (100-5000)");
    eprintln!("      --rows <N>        Screen rows (20-50)");
    eprintln!("      --columns <N>     Screen columns (64-132)");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Enter                 Send input line");
    eprintln!("  Esc                   Unlock input line");
    eprintln!("  Ctrl+U                Clear input line");
    eprintln!("  Ctrl+D                Request a server dump");
    eprintln!("  Ctrl+R                Resume polling after repeated failures");
    eprintln!("  Ctrl+Q                Quit");
    eprintln!();
    eprintln!("Configuration: ~/.pollterm/config.toml");
    eprintln!("Log file:      ~/.pollterm/pollterm.log (level from RUST_LOG)");
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("Missing argument for {}", flag))?;
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", flag, value))
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-u" | "--user" => {
                i += 1;
                let name = args.get(i).ok_or("Missing argument for --user")?;
                cli.username = Some(name.clone());
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("Missing argument for --config")?;
                cli.config_path = Some(PathBuf::from(path));
            }
            "-i" | "--interval" => {
                i += 1;
                cli.interval_ms = Some(parse_number("--interval", args.get(i))?);
            }
            "--rows" => {
                i += 1;
                cli.rows = Some(parse_number("--rows", args.get(i))?);
            }
            "--columns" => {
                i += 1;
                cli.columns = Some(parse_number("--columns", args.get(i))?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            url => {
                if cli.server_url.is_some() {
                    return Err(format!("Unexpected argument: {}", url));
                }
                cli.server_url = Some(url.to_string());
            }
        }
        i += 1;
    }

    Ok(cli)
}

/// Command line flags override the file
fn apply_overrides(config: &mut Config, cli: &CliArgs) {
    if let Some(url) = &cli.server_url {
        config.server_url = url.clone();
    }
    if let Some(user) = &cli.username {
        config.username = Some(user.clone());
    }
    if let Some(ms) = cli.interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(rows) = cli.rows {
        config.screen.rows = rows;
    }
    if let Some(columns) = cli.columns {
        config.screen.columns = columns;
    }
}

/// Log to `~/.pollterm/pollterm.log`
fn init_logging() {
    let log_path = config::data_dir()
        .map(|dir| dir.join("pollterm.log"))
        .unwrap_or_else(|| PathBuf::from("pollterm.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let cli = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("pollterm {} starting...", VERSION);

    let mut config = match &cli.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    apply_overrides(&mut config, &cli);
    config.validate()?;

    info!("Server: {}", config.server_url);
    info!(
        "Screen: {}x{}, poll interval {:?}",
        config.screen.columns,
        config.screen.rows,
        config.poll_interval()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let transport = HttpTransport::new(&config.server_url)?;
    let controller = SessionController::new(Arc::new(transport), config.screen)
        .with_failure_limit(config.poll_failure_limit);
    let screen = ScreenBuffer::with_palette(config.screen, config.palette());
    let mut console = Console::new(controller, Scheduler::new(config.poll_interval()), screen)
        .with_max_log_entries(config.max_log_entries);

    let (cols, rows) = Renderer::size()?;
    check_terminal_size(config.screen, cols, rows);

    let mut renderer = Renderer::new();
    renderer.init()?;

    let result = run_main_loop(&mut console, &mut renderer, runtime.handle(), &config);

    renderer.cleanup()?;
    runtime.shutdown_timeout(Duration::from_millis(100));

    if let Err(e) = &result {
        error!("Exiting with error: {:#}", e);
    }
    info!("pollterm exiting");
    result
}

fn check_terminal_size(screen: ScreenConfig, cols: u16, rows: u16) {
    info!("Terminal size: {}x{}", cols, rows);
    // Grid plus input line and status row
    if cols < screen.columns || rows < screen.rows + 2 {
        warn!(
            "Terminal {}x{} is smaller than the console {}x{}",
            cols,
            rows,
            screen.columns,
            screen.rows + 2
        );
    }
}

/// Run a request on the runtime; its completion lands in the inbox
fn dispatch(handle: &Handle, inbox: &UnboundedSender<Completion>, pending: PendingRequest) {
    let tx = inbox.clone();
    handle.spawn(async move {
        let _ = tx.send(pending.await);
    });
}

/// Main event loop
fn run_main_loop(
    console: &mut Console,
    renderer: &mut Renderer,
    handle: &Handle,
    config: &Config,
) -> anyhow::Result<()> {
    let (tx, mut rx): (UnboundedSender<Completion>, UnboundedReceiver<Completion>) =
        mpsc::unbounded_channel();
    let mut ui = UiState::default();

    loop {
        // Apply finished requests
        while let Ok(completion) = rx.try_recv() {
            let outcome = console.complete(completion);
            report_outcome(&mut ui, outcome);
        }

        for event in console.drain_events() {
            handle_session_event(&mut ui, event, config);
        }

        if let Some(pending) = console.tick_if_due(Instant::now()) {
            dispatch(handle, &tx, pending);
        }

        renderer.render(console, &ui)?;

        if !event::poll(EVENT_POLL_TIMEOUT)? {
            continue;
        }
        match event::read()? {
            Event::Key(key_event) => {
                if key_event.kind != KeyEventKind::Press {
                    continue;
                }

                if let Some(prompt) = ui.prompt.as_mut() {
                    match prompt.handle_key(&key_event) {
                        PromptAction::Submit(credentials) => {
                            console.login(credentials);
                            ui.prompt = None;
                            ui.notify("Validating...");
                        }
                        PromptAction::Quit => break,
                        PromptAction::None => {}
                    }
                    continue;
                }

                let Some(action) = KeyMapper::map(&key_event) else {
                    continue;
                };
                if action == KeyAction::Quit {
                    info!("Quit requested");
                    break;
                }
                handle_action(console, &mut ui, handle, &tx, action);
            }
            Event::Resize(cols, rows) => {
                check_terminal_size(console.controller().screen_config(), cols, rows);
                console.screen_mut().mark_all_dirty();
            }
            _ => {}
        }
    }

    Ok(())
}

fn handle_action(
    console: &mut Console,
    ui: &mut UiState,
    handle: &Handle,
    tx: &UnboundedSender<Completion>,
    action: KeyAction,
) {
    match action {
        KeyAction::Insert(ch) => {
            console.screen_mut().input_mut().insert(ch);
        }
        KeyAction::Backspace => {
            console.screen_mut().input_mut().backspace();
        }
        KeyAction::ClearInput => {
            if !console.screen().input().is_locked() {
                console.screen_mut().input_mut().clear();
            }
        }
        KeyAction::Submit => match console.submit_input() {
            Ok(pending) => dispatch(handle, tx, pending),
            Err(e) => ui.notify(capitalize(&e.to_string())),
        },
        KeyAction::ForceUnlock => {
            console.force_unlock();
            debug!("Input line unlocked by operator");
        }
        KeyAction::Dump => match console.dump() {
            Ok(pending) => {
                ui.notify("Dump requested");
                dispatch(handle, tx, pending);
            }
            Err(e) => ui.notify(capitalize(&e.to_string())),
        },
        KeyAction::ResetPolling => {
            console.reset();
            ui.notify("Polling resumed");
        }
        KeyAction::Quit => {}
    }
}

fn handle_session_event(ui: &mut UiState, event: SessionEvent, config: &Config) {
    match event {
        SessionEvent::CredentialsRequired(message) => {
            ui.prompt = Some(CredentialPrompt::new(&message, config.username.as_deref()));
        }
        SessionEvent::Authenticated => ui.notify("Session validated"),
        SessionEvent::SessionExpired => ui.notify("Session expired - revalidating"),
        SessionEvent::Unreachable => {
            ui.notify("Cannot reach server - it may have been shut down")
        }
        SessionEvent::InputRejected(reason) => ui.notify(format!("Input rejected: {}", reason)),
        SessionEvent::InputRefused(reason) => {
            ui.notify(format!("Server is refusing input: {}", reason))
        }
        SessionEvent::InputFailed(reason) => {
            ui.notify(format!("Cannot submit console input: {}", reason))
        }
        SessionEvent::JumpKeysChanged(value) => debug!("Jump keys now 0o{:012o}", value),
        SessionEvent::DumpWritten(file) => ui.notify(format!("Dump written to {}", file)),
        SessionEvent::LogEntries(count) => debug!("{} new log entries", count),
    }
}

fn report_outcome(ui: &mut UiState, outcome: Outcome) {
    match outcome {
        Outcome::Authenticate(Err(e)) => ui.notify(capitalize(&e.to_string())),
        Outcome::SetJumpKeys(Err(e)) | Outcome::Dump(Err(e)) => {
            ui.notify(capitalize(&e.to_string()))
        }
        _ => {}
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
