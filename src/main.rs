//! patchops command-line shell.
//!
//! Every subcommand maps onto one command handler in the library; results are
//! printed as pretty JSON so other tools can consume them.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use patchops::commands::{components, maintenance, steam};
use patchops::config::AppConfig;
use patchops::models::{ComponentId, OperationStatus};
use patchops::{logging, AppState};

#[derive(Parser)]
#[command(name = "patchops")]
#[command(about = "Install and manage Black Ops III community add-ons", long_about = None)]
struct Cli {
    /// Game directory (overrides settings and Steam library detection)
    #[arg(long, env = "PATCHOPS_GAME_DIR", global = true)]
    game_dir: Option<PathBuf>,

    /// Never touch the network; only cached or local files are used
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show every component with its detected state
    Status,
    /// Identify which BlackOps3.exe is currently on disk
    Variant,
    /// Download, validate and install a component
    Install {
        /// Component id (t7-patch, dxvk-gplasync, bo3-enhanced, reforged)
        component: String,
        /// Local dump archive or directory for components that need one
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// Remove a component and restore the files it replaced
    Uninstall { component: String },
    /// Inspect or edit the game's Steam launch options
    #[command(subcommand)]
    LaunchOptions(LaunchOptionsCommand),
    /// Inspect or edit the game's compatibility tool mapping
    #[command(subcommand)]
    Compat(CompatCommand),
    /// Rename legacy `.bak` backups of managed files to the current suffix
    ConvertBackups {
        /// Perform the renames instead of only listing them
        #[arg(long)]
        apply: bool,
    },
    /// Compare installed files against their recorded hashes
    Verify,
}

#[derive(Subcommand)]
enum LaunchOptionsCommand {
    Show,
    Set { value: String },
    Clear,
}

#[derive(Subcommand)]
enum CompatCommand {
    /// Map the game to a tool (defaults to the configured one)
    Set { tool: Option<String> },
    Clear,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(err) => eprintln!("Error serializing output: {}", err),
    }
}

fn exit_on_err<T>(result: Result<T, String>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    }
}

/// Prints progress lines to stderr until the operation reaches a final state.
fn spawn_progress_printer(state: AppState, id: ComponentId) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = None;
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let Some(progress) = state.addons.get_progress(id) else {
                continue;
            };
            let line = format!(
                "{:?} {:.0}% {}",
                progress.status,
                progress.progress_percent,
                progress.current_file.as_deref().unwrap_or("")
            );
            if last.as_ref() != Some(&line) {
                eprintln!("{}", line);
                last = Some(line);
            }
            if matches!(
                progress.status,
                OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
            ) {
                break;
            }
        }
    })
}

fn parse_component(component: &str) -> ComponentId {
    exit_on_err(component.parse::<ComponentId>())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading settings: {}", err);
            process::exit(1);
        }
    };
    if let Some(dir) = cli.game_dir {
        config.game_directory = Some(dir);
    }
    config.offline |= cli.offline;

    if let Err(err) = logging::init(&config.log_dir, true) {
        eprintln!("Warning: logging disabled: {}", err);
    }

    let state = match AppState::initialize(config) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    };

    let interrupt = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            interrupt.addons.cancel_all();
        }
    });

    match cli.command {
        Command::Status => print_json(&exit_on_err(components::list_components(&state))),
        Command::Variant => print_json(&exit_on_err(components::executable_variant(&state))),
        Command::Install { component, dump } => {
            let printer = spawn_progress_printer(state.clone(), parse_component(&component));
            let result = components::install_component(&component, dump, &state).await;
            printer.abort();
            print_json(&exit_on_err(result));
        }
        Command::Uninstall { component } => {
            let printer = spawn_progress_printer(state.clone(), parse_component(&component));
            let result = components::uninstall_component(&component, &state).await;
            printer.abort();
            print_json(&exit_on_err(result));
        }
        Command::LaunchOptions(LaunchOptionsCommand::Show) => {
            match exit_on_err(steam::show_launch_options(&state)) {
                Some(value) => println!("{}", value),
                None => println!("(no launch options)"),
            }
        }
        Command::LaunchOptions(LaunchOptionsCommand::Set { value }) => {
            exit_on_err(steam::set_launch_options(&value, &state));
            println!("Launch options updated");
        }
        Command::LaunchOptions(LaunchOptionsCommand::Clear) => {
            exit_on_err(steam::clear_launch_options(&state));
            println!("Launch options cleared");
        }
        Command::Compat(CompatCommand::Set { tool }) => {
            let tool = exit_on_err(steam::set_compat_tool(tool.as_deref(), &state));
            println!("Compatibility tool set to {}", tool);
        }
        Command::Compat(CompatCommand::Clear) => {
            exit_on_err(steam::clear_compat_tool(&state));
            println!("Compatibility tool mapping cleared");
        }
        Command::ConvertBackups { apply } => {
            print_json(&exit_on_err(maintenance::convert_backups(apply, &state)))
        }
        Command::Verify => print_json(&exit_on_err(maintenance::verify_installation(&state))),
    }
}
