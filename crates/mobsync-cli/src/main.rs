//! Command-line front end for mobsync.
//!
//! Inspects the local configuration and runs one-off interactions against the
//! automation backend. Every interaction command starts a session, performs
//! its single operation, and terminates the session again.
//!
//! # Usage
//!
//! ```bash
//! # Show the capability set an Android session would start with
//! mobsync caps
//! mobsync -p ios caps
//!
//! # Config file management
//! mobsync config path
//! mobsync config init
//! mobsync config show
//!
//! # Check that the backend answers
//! mobsync ping
//!
//! # Tap an element by accessibility id (waits until it is interactable)
//! mobsync tap login-button
//!
//! # Locate by another strategy
//! mobsync tap "//android.widget.Button[@text='OK']" --by xpath
//!
//! # Type into a field, read it back
//! mobsync type email qa@example.com
//! mobsync read email
//!
//! # Instant probes and soft waits print true/false
//! mobsync is-displayed spinner
//! mobsync wait-gone spinner -o 15000
//!
//! # Gestures
//! mobsync scroll down
//! mobsync tap-at 120 640
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use mobsync_core::backend_client::BackendClient;
use mobsync_core::capability::{assemble, Platform};
use mobsync_core::config::{default_config_path, ConfigError, MobsyncConfig};
use mobsync_core::driver::DriverError;
use mobsync_core::gesture::{Direction, Point};
use mobsync_core::interaction::{InteractionError, Interactor, StabilityProbe};
use mobsync_core::locator::Locator;
use mobsync_core::manager::{SessionError, SessionManager};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Mobile app automation from the command line.
#[derive(Parser)]
#[command(name = "mobsync")]
#[command(about = "Run synchronized Android/iOS automation commands against a backend")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.mobsync/config.json)
    #[arg(short, long, env = "MOBSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Target platform: android or ios
    #[arg(short, long, default_value = "android", env = "MOBSYNC_PLATFORM")]
    platform: Platform,

    /// Backend host (overrides config)
    #[arg(long, env = "MOBSYNC_HOST")]
    host: Option<String>,

    /// Backend port (overrides config)
    #[arg(long, env = "MOBSYNC_PORT")]
    port: Option<u16>,

    /// Wait timeout in milliseconds (overrides config)
    #[arg(short = 'o', long, env = "MOBSYNC_TIMEOUT")]
    timeout: Option<u64>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "MOBSYNC_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    AccessibilityId,
    Id,
    Xpath,
    ClassName,
    Text,
}

#[derive(Args)]
struct Selector {
    /// Value to locate the element by
    selector: String,
    /// Locator strategy
    #[arg(short, long, value_enum, default_value_t = Strategy::AccessibilityId)]
    by: Strategy,
}

impl Selector {
    fn locator(&self) -> Locator {
        let value = self.selector.as_str();
        match self.by {
            Strategy::AccessibilityId => Locator::accessibility_id(value),
            Strategy::Id => Locator::id(value),
            Strategy::Xpath => Locator::xpath(value),
            Strategy::ClassName => Locator::class_name(value),
            Strategy::Text => Locator::text(value),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the capability set a session would be started with
    Caps,

    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check that the backend is reachable
    Ping,

    /// Wait until an element is interactable, then tap it
    Tap(Selector),

    /// Wait until an element is visible, clear it and type text
    Type {
        #[command(flatten)]
        selector: Selector,
        /// Text to type
        text: String,
    },

    /// Wait until an element is visible and print its text
    Read(Selector),

    /// Print whether an element is displayed right now
    IsDisplayed(Selector),

    /// Print whether an element is enabled right now
    IsEnabled(Selector),

    /// Wait for an element to disappear; prints true or false
    WaitGone(Selector),

    /// Wait until the screen content stops changing
    Stable {
        /// How long the content must stay unchanged, in milliseconds
        #[arg(long, default_value = "1500")]
        min_stable: u64,
    },

    /// Scroll or swipe: up, down, left, right
    Scroll {
        direction: Direction,
    },

    /// Tap at absolute screen coordinates
    TapAt {
        x: i32,
        y: i32,
    },

    /// Terminate and relaunch the app under test
    RestartApp,

    /// Send the app to the background for a while
    Background {
        /// Seconds to stay in the background
        #[arg(default_value = "3")]
        seconds: u64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// Sessions are keyed by thread, so every await must stay on this one.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn init_logging(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let target = log_file.and_then(|path| Some((path.parent()?, path.file_name()?)));
    match target {
        Some((dir, name)) => {
            let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
            let appender = tracing_appender::rolling::never(dir, name);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[derive(Debug)]
enum CliError {
    Config(String),
    Connection(String),
    ActionFailed(String),
    Protocol(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::ActionFailed(_) => ExitCode::from(1),
            CliError::Connection(_) => ExitCode::from(2),
            CliError::Protocol(_) => ExitCode::from(3),
            CliError::Config(_) => ExitCode::from(4),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Connection(msg) => write!(f, "Connection error: {}", msg),
            CliError::ActionFailed(msg) => write!(f, "Action failed: {}", msg),
            CliError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<SessionError> for CliError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Config(_) => CliError::Config(e.to_string()),
            SessionError::Startup(
                DriverError::NotConnected | DriverError::ConnectionLost(_) | DriverError::Io(_),
            ) => CliError::Connection(e.to_string()),
            _ => CliError::ActionFailed(e.to_string()),
        }
    }
}

impl From<InteractionError> for CliError {
    fn from(e: InteractionError) -> Self {
        CliError::ActionFailed(e.to_string())
    }
}

fn config_path(cli: &Cli) -> Result<PathBuf, CliError> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(default_config_path()?),
    }
}

/// The file config with command-line overrides applied.
fn effective_config(cli: &Cli) -> Result<MobsyncConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => MobsyncConfig::load_from(path)?,
        None => MobsyncConfig::load(),
    };
    if let Some(host) = &cli.host {
        config.backend.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.backend.port = port;
    }
    if let Some(timeout) = cli.timeout {
        config.waits.timeout_ms = timeout;
    }
    config.validate()?;
    Ok(config)
}

fn print_json(value: &serde_json::Value) -> Result<(), CliError> {
    let out = serde_json::to_string_pretty(value).map_err(|e| CliError::Protocol(e.to_string()))?;
    println!("{}", out);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Config { action } => return config_command(&cli, action),
        Command::Caps => return print_capabilities(&cli),
        _ => {}
    }

    let config = effective_config(&cli)?;
    debug!(host = %config.backend.host, port = config.backend.port, "using backend");

    match &cli.command {
        Command::Ping => ping(&cli, &config).await,
        Command::Tap(sel) => {
            let locator = sel.locator();
            let target = locator.to_string();
            interact(&cli, &config, "tap", &target, |ui| async move {
                ui.click(locator).await.map(|()| None)
            })
            .await
        }
        Command::Type { selector, text } => {
            let locator = selector.locator();
            let target = locator.to_string();
            let text = text.clone();
            interact(&cli, &config, "type", &target, |ui| async move {
                ui.type_text(locator, &text).await.map(|()| None)
            })
            .await
        }
        Command::Read(sel) => {
            let locator = sel.locator();
            let target = locator.to_string();
            interact(&cli, &config, "read", &target, |ui| async move {
                ui.read_text(locator).await.map(|text| Some(serde_json::Value::String(text)))
            })
            .await
        }
        Command::IsDisplayed(sel) => {
            let locator = sel.locator();
            let target = locator.to_string();
            interact(&cli, &config, "is-displayed", &target, |ui| async move {
                Ok(Some(serde_json::Value::Bool(ui.is_displayed(locator).await)))
            })
            .await
        }
        Command::IsEnabled(sel) => {
            let locator = sel.locator();
            let target = locator.to_string();
            interact(&cli, &config, "is-enabled", &target, |ui| async move {
                Ok(Some(serde_json::Value::Bool(ui.is_enabled(locator).await)))
            })
            .await
        }
        Command::WaitGone(sel) => {
            let locator = sel.locator();
            let target = locator.to_string();
            interact(&cli, &config, "wait-gone", &target, |ui| async move {
                Ok(Some(serde_json::Value::Bool(ui.wait_for_gone(locator).await)))
            })
            .await
        }
        Command::Stable { min_stable } => {
            let probe = StabilityProbe {
                min_stable: Duration::from_millis(*min_stable),
                ..StabilityProbe::default()
            };
            interact(&cli, &config, "stable", "screen", |ui| async move {
                ui.wait_for_stable_screen(probe).await.map(|()| None)
            })
            .await
        }
        Command::Scroll { direction } => {
            let direction = *direction;
            interact(&cli, &config, "scroll", direction.name(), |ui| async move {
                ui.scroll(direction).await.map(|()| None)
            })
            .await
        }
        Command::TapAt { x, y } => {
            let point = Point::new(*x, *y);
            interact(&cli, &config, "tap-at", &point.to_string(), |ui| async move {
                ui.tap_at(point).await.map(|()| None)
            })
            .await
        }
        Command::RestartApp => app_lifecycle(&cli, &config, None).await,
        Command::Background { seconds } => {
            app_lifecycle(&cli, &config, Some(Duration::from_secs(*seconds))).await
        }
        Command::Config { .. } | Command::Caps => Ok(()),
    }
}

fn config_command(cli: &Cli, action: &ConfigAction) -> Result<(), CliError> {
    match action {
        ConfigAction::Path => {
            println!("{}", config_path(cli)?.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = effective_config(cli)?;
            let value = serde_json::to_value(&config).map_err(|e| CliError::Protocol(e.to_string()))?;
            print_json(&value)
        }
        ConfigAction::Init { force } => {
            let path = config_path(cli)?;
            if path.exists() && !force {
                return Err(CliError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| CliError::Config(e.to_string()))?;
            }
            MobsyncConfig::default().save_to(&path)?;
            if !cli.quiet {
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }
    }
}

fn print_capabilities(cli: &Cli) -> Result<(), CliError> {
    let config = effective_config(cli)?;
    let caps = assemble(cli.platform, config.profile(cli.platform), &config.port_pool())
        .map_err(|e| CliError::Config(e.to_string()))?;
    print_json(&caps.to_json())
}

async fn ping(cli: &Cli, config: &MobsyncConfig) -> Result<(), CliError> {
    let host_port = format!("{}:{}", config.backend.host, config.backend.port);
    let addr = tokio::net::lookup_host(&host_port)
        .await
        .map_err(|e| CliError::Connection(format!("{}: {}", host_port, e)))?
        .next()
        .ok_or_else(|| CliError::Connection(format!("could not resolve {}", host_port)))?;

    let start = Instant::now();
    let mut client = BackendClient::new(addr);
    client
        .connect()
        .await
        .map_err(|e| CliError::Connection(format!("{}: {}", host_port, e)))?;
    client
        .heartbeat()
        .await
        .map_err(|e| CliError::Protocol(e.to_string()))?;
    client.disconnect();

    report(cli, "ping", &host_port, None, start.elapsed())
}

/// Runs `op` inside a fresh session on the configured platform.
async fn interact<F, Fut>(
    cli: &Cli,
    config: &MobsyncConfig,
    label: &str,
    target: &str,
    op: F,
) -> Result<(), CliError>
where
    F: FnOnce(Interactor) -> Fut,
    Fut: Future<Output = Result<Option<serde_json::Value>, InteractionError>>,
{
    let manager = SessionManager::from_config(config);
    let start = Instant::now();
    let value = manager.with_session(cli.platform, op).await??;
    report(cli, label, target, value, start.elapsed())
}

async fn app_lifecycle(
    cli: &Cli,
    config: &MobsyncConfig,
    background: Option<Duration>,
) -> Result<(), CliError> {
    let manager = SessionManager::from_config(config);
    let start = Instant::now();
    let guard = manager.scoped(cli.platform).await?;
    let app_id = guard.session().capabilities().app_id().to_string();
    let result = match background {
        Some(duration) => manager.background_app(duration).await,
        None => manager.restart_app().await,
    };
    guard.release().await;
    result?;

    let label = if background.is_some() { "background" } else { "restart-app" };
    report(cli, label, &app_id, None, start.elapsed())
}

/// Prints the command result: the value on stdout, a timing line on stderr.
fn report(
    cli: &Cli,
    label: &str,
    target: &str,
    value: Option<serde_json::Value>,
    elapsed: Duration,
) -> Result<(), CliError> {
    if cli.format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "success": true,
            "action": label,
            "target": target,
            "value": value,
            "elapsed_ms": elapsed.as_millis() as u64,
        }));
    }

    match value {
        Some(serde_json::Value::String(text)) => println!("{}", text),
        Some(other) => println!("{}", other),
        None => {}
    }
    if !cli.quiet {
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3fZ");
        eprintln!("|{}|{}|{}|{}ms|", now, label, target, elapsed.as_millis());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_defaults_to_accessibility_id() {
        let cli = Cli::try_parse_from(["mobsync", "tap", "login"]).unwrap();
        let Command::Tap(sel) = cli.command else {
            panic!("expected tap");
        };
        assert_eq!(sel.locator(), Locator::accessibility_id("login"));
    }

    #[test]
    fn selector_strategy_flag() {
        let cli = Cli::try_parse_from(["mobsync", "read", "//Button", "--by", "xpath"]).unwrap();
        let Command::Read(sel) = cli.command else {
            panic!("expected read");
        };
        assert_eq!(sel.locator(), Locator::xpath("//Button"));
    }

    #[test]
    fn platform_flag_parses() {
        let cli = Cli::try_parse_from(["mobsync", "-p", "ios", "caps"]).unwrap();
        assert_eq!(cli.platform, Platform::Ios);
        assert!(Cli::try_parse_from(["mobsync", "-p", "symbian", "caps"]).is_err());
    }

    #[test]
    fn startup_connection_errors_map_to_exit_code_two() {
        let err = CliError::from(SessionError::Startup(DriverError::ConnectionLost(
            "refused".into(),
        )));
        assert!(matches!(err, CliError::Connection(_)));
        let err = CliError::from(SessionError::Startup(DriverError::SessionNotCreated(
            "no device".into(),
        )));
        assert!(matches!(err, CliError::ActionFailed(_)));
    }
}
