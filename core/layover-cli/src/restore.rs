use std::path::Path;
use std::process::ExitCode;

use layover_core::{ConfigFileAction, SessionOrchestrator};

/// Forced restore for a project whose sessions are all gone.
pub fn run(orchestrator: &SessionOrchestrator, project: &Path) -> Result<ExitCode, String> {
    orchestrator.storage().ensure_dirs()?;
    let Some(report) = orchestrator.restore_project(project)? else {
        println!("Nothing to restore for {}.", project.display());
        return Ok(ExitCode::SUCCESS);
    };

    match &report.restore {
        Some(restore) => {
            let config_file = match restore.config_file {
                ConfigFileAction::CoveredByTree => "in tree",
                ConfigFileAction::Restored => "restored",
                ConfigFileAction::Removed => "removed",
            };
            println!(
                "Restored {} from snapshot {} (config file {config_file}).",
                restore.config_dir.display(),
                restore.session_id
            );
        }
        None => println!("Session retired without a restore."),
    }
    if report.unhidden > 0 {
        println!("Cleared skip-worktree on {} file(s).", report.unhidden);
    }
    Ok(ExitCode::SUCCESS)
}
