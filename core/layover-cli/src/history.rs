use std::process::ExitCode;

use layover_core::{SessionOrchestrator, SessionStatus};

pub fn run(orchestrator: &SessionOrchestrator, limit: usize, json: bool) -> Result<ExitCode, String> {
    let entries = orchestrator.history(Some(limit));

    if json {
        let rendered = serde_json::to_string_pretty(&entries)
            .map_err(|e| format!("Failed to serialize history: {e}"))?;
        println!("{rendered}");
        return Ok(ExitCode::SUCCESS);
    }

    if entries.is_empty() {
        println!("No finished sessions.");
    }
    for entry in &entries {
        let status = match entry.status {
            SessionStatus::Completed => "completed",
            SessionStatus::Recovered => "recovered",
            SessionStatus::Failed => "FAILED",
        };
        println!(
            "{}  {:<9}  {:<7}  {}  {}",
            entry.finished_at.format("%Y-%m-%d %H:%M:%S"),
            status,
            entry.backup.target,
            entry.backup.session_id,
            entry.backup.project_path
        );
    }
    Ok(ExitCode::SUCCESS)
}
