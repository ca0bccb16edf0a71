use std::path::Path;
use std::process::ExitCode;

use layover_core::SessionOrchestrator;

pub fn run(
    orchestrator: &SessionOrchestrator,
    project: Option<&Path>,
    force_maintenance: bool,
    json: bool,
) -> Result<ExitCode, String> {
    orchestrator.storage().ensure_dirs()?;
    let stats = orchestrator.recover(project, force_maintenance);

    if json {
        let rendered = serde_json::to_string_pretty(&stats)
            .map_err(|e| format!("Failed to serialize recovery stats: {e}"))?;
        println!("{rendered}");
    } else if !stats.has_activity() && !stats.maintenance_ran {
        println!("Nothing to recover.");
    } else {
        println!("orphaned sessions restored  {}", stats.orphaned_sessions_restored);
        println!("orphaned sessions failed    {}", stats.orphaned_sessions_failed);
        println!("stale sessions removed      {}", stats.stale_sessions_removed);
        println!("interrupted restores        {}", stats.interrupted_restores_recovered);
        println!("restore temps removed       {}", stats.restore_temps_removed);
        if stats.maintenance_ran {
            println!("history entries pruned      {}", stats.history_pruned);
            println!("deleted projects collected  {}", stats.projects_collected);
        }
        for error in &stats.errors {
            eprintln!("error: {error}");
        }
    }

    Ok(if stats.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
