//! `layover status`: per-project session and snapshot overview.

use std::path::Path;
use std::process::ExitCode;

use layover_core::process::process_name;
use layover_core::{Liveness, ProjectHash, ProjectStatus, SessionOrchestrator};
use serde_json::{json, Value};

pub fn run(
    orchestrator: &SessionOrchestrator,
    project: Option<&Path>,
    json: bool,
) -> Result<ExitCode, String> {
    let hashes = match project {
        Some(project) => vec![ProjectHash::of(project)],
        None => orchestrator.known_projects(),
    };
    let statuses: Vec<ProjectStatus> = hashes.iter().map(|h| orchestrator.status(h)).collect();

    if json {
        let payload: Vec<Value> = statuses.iter().map(to_json).collect();
        let rendered = serde_json::to_string_pretty(&payload)
            .map_err(|e| format!("Failed to serialize status: {e}"))?;
        println!("{rendered}");
        return Ok(ExitCode::SUCCESS);
    }

    if statuses.is_empty() {
        println!("No projects with layover state.");
    }
    for status in &statuses {
        print_status(status);
    }
    Ok(ExitCode::SUCCESS)
}

fn project_path(status: &ProjectStatus) -> Option<String> {
    status
        .session
        .backup_ref
        .as_ref()
        .map(|r| r.project_path.clone())
        .or_else(|| {
            status
                .snapshots
                .iter()
                .find_map(|s| s.manifest.as_ref().map(|m| m.project_path.clone()))
        })
}

fn liveness_label(liveness: Liveness) -> &'static str {
    match liveness {
        Liveness::Alive => "alive",
        Liveness::AliveOtherUser => "alive (other user)",
        Liveness::Dead => "dead",
    }
}

fn print_status(status: &ProjectStatus) {
    println!(
        "{}  {}",
        status.hash,
        project_path(status).unwrap_or_else(|| "(unknown path)".to_string())
    );

    match &status.session.backup_ref {
        Some(backup_ref) => println!(
            "  session   {} ({}, since {})",
            backup_ref.session_id,
            backup_ref.target,
            backup_ref.created_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None if status.session.locks.is_empty() => println!("  session   none"),
        None => println!("  session   starting"),
    }
    for lock in &status.session.locks {
        let name = lock
            .liveness
            .is_alive()
            .then(|| process_name(lock.pid))
            .flatten()
            .unwrap_or_default();
        println!("  pid {:>7} {} {}", lock.pid, liveness_label(lock.liveness), name);
    }
    if let Some(pid) = status.session.restore_claimed_by {
        println!("  restoring by pid {pid}");
    }

    for snapshot in &status.snapshots {
        let marker = if status.latest.as_deref() == Some(snapshot.session_id.as_str()) {
            "*"
        } else {
            " "
        };
        let created = snapshot
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        let overlay = snapshot
            .manifest
            .as_ref()
            .map(|m| {
                m.agents.added.len()
                    + m.agents.overridden.len()
                    + m.commands.added.len()
                    + m.commands.overridden.len()
            })
            .unwrap_or(0);
        println!(
            " {marker}snapshot  {} {} tree={} overlay_files={}",
            snapshot.session_id, created, snapshot.has_config_tree, overlay
        );
    }
    if status.has_secrets {
        println!("  secrets   held");
    }
}

fn to_json(status: &ProjectStatus) -> Value {
    let locks: Vec<Value> = status
        .session
        .locks
        .iter()
        .map(|lock| {
            json!({
                "pid": lock.pid,
                "liveness": liveness_label(lock.liveness),
                "target": lock.lock.as_ref().map(|l| l.target.clone()),
                "started_at": lock.lock.as_ref().map(|l| l.started_at.to_rfc3339()),
            })
        })
        .collect();
    let snapshots: Vec<Value> = status
        .snapshots
        .iter()
        .map(|snapshot| {
            json!({
                "session_id": snapshot.session_id,
                "path": snapshot.snapshot_dir,
                "created_at": snapshot.created_at.map(|t| t.to_rfc3339()),
                "has_config_tree": snapshot.has_config_tree,
                "manifest": snapshot.manifest,
            })
        })
        .collect();

    json!({
        "hash": status.hash.as_str(),
        "project_path": project_path(status),
        "backup_ref": status.session.backup_ref,
        "locks": locks,
        "restore_claimed_by": status.session.restore_claimed_by,
        "snapshots": snapshots,
        "latest": status.latest,
        "has_secrets": status.has_secrets,
    })
}
