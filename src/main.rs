mod builtins;
mod cache;
mod config;
mod dispatch;
mod enhancer;
mod generator;
mod matcher;
mod project;
mod store;
mod template;
mod transcript;
mod types;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::Config;
use dispatch::Dispatcher;
use generator::ClaudeCli;
use project::Project;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;
use std::time::Duration;
use store::{KvStore, SqliteStore};
use tracing_subscriber::EnvFilter;
use types::{Event, HookInput};

#[derive(Parser, Debug)]
#[command(
    name = "bumpers",
    about = "Rule-driven guardrails for AI coding assistant hooks",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Rule file (default: search the project root)
    #[arg(long, env = "BUMPERS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the cache and state database
    #[arg(long, env = "BUMPERS_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Host CLI used to enhance messages
    #[arg(long, env = "BUMPERS_CLAUDE_BIN", default_value = "claude", global = true)]
    claude_bin: String,

    /// Log level, overridden by BUMPERS_LOG
    #[arg(long, value_enum, default_value = "warn", global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Handle one hook event from stdin (the default)
    Hook,
    /// Load the rule file and report entries that would be dropped
    Validate,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

fn init_tracing(level: LogLevel) {
    // stdout carries the hook response; logs go to stderr.
    let filter = EnvFilter::try_from_env("BUMPERS_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level.directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    io::stdin()
        .read_to_end(&mut buffer)
        .context("reading hook input from stdin")?;
    Ok(buffer)
}

fn default_data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "bumpers").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Open the shared database. Failure only disables enhancement and the
/// built-in flags.
fn open_store(data_dir: Option<&Path>) -> Option<Rc<dyn KvStore>> {
    let Some(dir) = data_dir.map(Path::to_path_buf).or_else(default_data_dir) else {
        tracing::warn!("no data directory available, running without cache");
        return None;
    };
    match SqliteStore::open(&dir) {
        Ok(store) => {
            tracing::debug!(db = %store.db_path().display(), "opened store");
            Some(Rc::new(store))
        }
        Err(e) => {
            tracing::warn!(error = %e, "opening store, running without cache");
            None
        }
    }
}

fn load_config(cli: &Cli, project: &Project) -> Result<Config> {
    let path = Config::locate(cli.config.as_deref(), project.root.as_deref())?;
    let config = Config::load(&path)?;
    for warning in &config.warnings {
        tracing::warn!(config = %path.display(), "dropped {warning}");
    }
    Ok(config)
}

fn run_hook(cli: &Cli) -> Result<()> {
    let input = read_stdin()?;
    if std::env::var("BUMPERS_SKIP").is_ok_and(|v| v == "1") {
        return Ok(());
    }
    let hook_input: HookInput =
        serde_json::from_slice(&input).context("parsing hook input")?;

    let cwd = hook_input
        .cwd
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(PathBuf::from);
    let project = Project::discover(cwd.as_deref());
    let config = load_config(cli, &project)?;
    let store = open_store(cli.data_dir.as_deref());
    let generator = ClaudeCli::new(
        cli.claude_bin.as_str(),
        Duration::from_secs(config.generate_timeout_secs),
        project.root.clone(),
    );

    let event = Event::classify(hook_input);
    let response = Dispatcher::new(config, project, store, &generator).dispatch(&event)?;
    if let Some(output) = response.render().context("serializing hook output")? {
        println!("{output}");
    }
    Ok(())
}

/// Returns the exit code: 1 if any entry was dropped.
fn run_validate(cli: &Cli) -> Result<i32> {
    let project = Project::discover(None);
    let path = Config::locate(cli.config.as_deref(), project.root.as_deref())?;
    let config = Config::load(&path)?;
    for warning in &config.warnings {
        println!("warning: {warning}");
    }
    println!(
        "{}: {} rules, {} commands, {} session notes",
        path.display(),
        config.rules.len(),
        config.commands.len(),
        config.session.len()
    );
    Ok(if config.warnings.is_empty() { 0 } else { 1 })
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    let result = match cli.command.unwrap_or(Commands::Hook) {
        Commands::Hook => run_hook(&cli).map(|()| 0),
        Commands::Validate => run_validate(&cli),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("bumpers: {err:#}");
            process::exit(1);
        }
    }
}
