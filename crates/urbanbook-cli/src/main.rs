//! urbanbook - command-line access to an Urban Services session.
//!
//! Logs in against the booking backend, keeps the token between runs and
//! checks on start whether the persisted session is still valid.

mod app;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;
use urbanbook_core::Config;

/// Log file name in the cache directory
const LOG_FILE: &str = "urbanbook.log";

/// Exit status for an unrecognized command
const USAGE_EXIT_CODE: u8 = 2;

const USAGE: &str = "\
Usage: urbanbook [COMMAND]

Commands:
  login [EMAIL]   Log in and persist the session token
  logout          End the session and clear cached data
  whoami          Validate the persisted session and show the user (default)
  status          Show local session state without contacting the server
";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`), and to a log
/// file in the cache directory when one is available.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match Config::default().cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Login(Option<String>),
    Logout,
    Whoami,
    Status,
    Help,
}

impl Command {
    /// Parse arguments after the program name; `None` for an unknown command.
    fn parse(args: &[String]) -> Option<Self> {
        match args.first().map(String::as_str) {
            None | Some("whoami") => Some(Command::Whoami),
            Some("login") => Some(Command::Login(args.get(1).cloned())),
            Some("logout") => Some(Command::Logout),
            Some("status") => Some(Command::Status),
            Some("-h" | "--help" | "help") => Some(Command::Help),
            Some(_) => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    // Dropped on return, which flushes the log file
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Some(Command::Help) => {
            print!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Some(command) => command,
        None => {
            eprint!("Unknown command: {}\n\n{}", args[0], USAGE);
            return ExitCode::from(USAGE_EXIT_CODE);
        }
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let mut app = App::new()?;
    info!(?command, "urbanbook starting");

    match command {
        Command::Login(email) => app.login(email).await,
        Command::Logout => app.logout().await,
        Command::Whoami => app.whoami().await,
        Command::Status => app.status(),
        Command::Help => Ok(()),
    }
}
