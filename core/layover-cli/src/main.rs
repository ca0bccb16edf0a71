//! layover: lays agent configuration over a project for the length of one run.
//!
//! Every invocation is an independent process. Coordination with other invocations
//! on the same project happens entirely on disk (see `layover-core`).
//!
//! ## Subcommands
//!
//! - `run`: overlay, run a command, restore when the last session exits
//! - `status`: sessions, lock liveness and snapshots per project
//! - `recover`: run the crash recovery scanner explicitly
//! - `restore`: force a restore when no session is live
//! - `history`: finished sessions, newest first

mod history;
mod logging;
mod recover;
mod restore;
mod run;
mod status;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use layover_core::{SessionOrchestrator, StorageConfig};

#[derive(Parser)]
#[command(name = "layover")]
#[command(about = "Overlay agent configuration onto a project and restore it afterwards")]
#[command(version)]
struct Cli {
    /// Log recovery and restore activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Storage root (defaults to $LAYOVER_HOME, then ~/.layover)
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the overlay, run a command, restore when the last session exits
    Run {
        /// Project directory (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,

        /// Target agent tool
        #[arg(long, default_value = "claude")]
        target: String,

        /// Template directory with agents/, commands/ and rules/
        #[arg(long, value_name = "DIR")]
        templates: Option<PathBuf>,

        /// Command to run while the overlay is applied
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Show sessions, lock liveness and snapshots
    Status {
        /// Limit output to one project
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Restore orphaned sessions and run maintenance
    Recover {
        /// Also scan this project for interrupted restores
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,

        /// Run maintenance even if it ran recently
        #[arg(long)]
        force_maintenance: bool,

        #[arg(long)]
        json: bool,
    },

    /// Restore a project nobody is attached to
    Restore {
        /// Project directory (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,
    },

    /// List finished sessions, newest first
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let storage = match cli.home {
        Some(root) => StorageConfig::with_root(root),
        None => match StorageConfig::from_env() {
            Ok(storage) => storage,
            Err(e) => {
                eprintln!("layover: {e}");
                return ExitCode::FAILURE;
            }
        },
    };
    let _logging_guard = logging::init(&storage.logs_dir(), cli.verbose);

    let result = SessionOrchestrator::with_storage(storage)
        .map_err(String::from)
        .and_then(|orchestrator| dispatch(&orchestrator, cli.command));

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "layover failed");
            eprintln!("layover: {e}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(orchestrator: &SessionOrchestrator, command: Commands) -> Result<ExitCode, String> {
    match command {
        Commands::Run {
            project,
            target,
            templates,
            command,
        } => run::run(
            orchestrator,
            run::RunArgs {
                project: resolve_project(project)?,
                target,
                templates,
                command,
            },
        ),
        Commands::Status { project, json } => status::run(orchestrator, project.as_deref(), json),
        Commands::Recover {
            project,
            force_maintenance,
            json,
        } => recover::run(orchestrator, project.as_deref(), force_maintenance, json),
        Commands::Restore { project } => restore::run(orchestrator, &resolve_project(project)?),
        Commands::History { limit, json } => history::run(orchestrator, limit, json),
    }
}

fn resolve_project(project: Option<PathBuf>) -> Result<PathBuf, String> {
    match project {
        Some(path) => Ok(path),
        None => std::env::current_dir()
            .map_err(|e| format!("Failed to determine current directory: {e}")),
    }
}
