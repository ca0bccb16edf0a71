//! `layover run`: the full lifecycle around one child process.
//!
//! Termination signals are forwarded to the child; the session is finished once the
//! child has exited. Before the child exists (or after it has been reaped) the signal
//! handler finishes the session itself.

use std::path::PathBuf;
use std::process::{Command, ExitCode, ExitStatus};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use layover_core::{ActiveSession, SessionOrchestrator, StorageConfig, Target, TemplateSet};

/// Conventional exit status after SIGINT.
const INTERRUPTED_EXIT: u8 = 130;

pub struct RunArgs {
    pub project: PathBuf,
    pub target: String,
    pub templates: Option<PathBuf>,
    pub command: Vec<String>,
}

/// Shared between the main thread and the signal handler.
#[derive(Default)]
struct SignalState {
    child_pid: AtomicU32,
    interrupted: AtomicBool,
    /// Whoever takes the session out finishes it.
    pending: Mutex<Option<(SessionOrchestrator, ActiveSession)>>,
}

impl SignalState {
    fn take_pending(&self) -> Option<(SessionOrchestrator, ActiveSession)> {
        match self.pending.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

pub fn run(orchestrator: &SessionOrchestrator, args: RunArgs) -> Result<ExitCode, String> {
    let Some((program, program_args)) = args.command.split_first() else {
        return Err("No command given".to_string());
    };
    let target = orchestrator.config().target(&args.target)?;
    let templates = load_templates(orchestrator.storage(), &target, args.templates.as_deref())?;

    let state = Arc::new(SignalState::default());
    let handler_state = Arc::clone(&state);
    ctrlc::set_handler(move || on_signal(&handler_state))
        .map_err(|e| format!("Failed to install signal handler: {e}"))?;

    let session = orchestrator.start(&args.project, &target, &templates)?;
    tracing::info!(
        project = %session.hash,
        first = session.is_first,
        session_id = session.backup_ref.as_ref().map(|r| r.session_id.as_str()).unwrap_or("-"),
        "Session started"
    );
    set_pending(&state, orchestrator, &session);

    if state.interrupted.load(Ordering::SeqCst) {
        finish_pending(&state)?;
        return Ok(ExitCode::from(INTERRUPTED_EXIT));
    }

    let mut child = match Command::new(program)
        .args(program_args)
        .current_dir(&session.project_dir)
        .env("LAYOVER_PROJECT_HASH", session.hash.as_str())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            finish_pending(&state)?;
            return Err(format!("Failed to start {program}: {e}"));
        }
    };
    state.child_pid.store(child.id(), Ordering::SeqCst);
    if state.interrupted.load(Ordering::SeqCst) {
        terminate(child.id());
    }

    let waited = child.wait();
    state.child_pid.store(0, Ordering::SeqCst);
    finish_pending(&state)?;

    let status = waited.map_err(|e| format!("Failed to wait for {program}: {e}"))?;
    Ok(exit_code(status))
}

fn load_templates(
    storage: &StorageConfig,
    target: &Target,
    explicit: Option<&std::path::Path>,
) -> Result<TemplateSet, String> {
    if let Some(dir) = explicit {
        if !dir.is_dir() {
            return Err(format!("Template directory not found: {}", dir.display()));
        }
        return Ok(TemplateSet::load_dir(dir)?);
    }
    let default_dir = storage.root().join("templates").join(&target.name);
    if default_dir.is_dir() {
        Ok(TemplateSet::load_dir(&default_dir)?)
    } else {
        Ok(TemplateSet::empty())
    }
}

fn set_pending(state: &SignalState, orchestrator: &SessionOrchestrator, session: &ActiveSession) {
    let entry = Some((orchestrator.clone(), session.clone()));
    match state.pending.lock() {
        Ok(mut guard) => *guard = entry,
        Err(poisoned) => *poisoned.into_inner() = entry,
    }
}

/// Finishes the session unless the signal handler already did.
fn finish_pending(state: &SignalState) -> Result<(), String> {
    let Some((orchestrator, session)) = state.take_pending() else {
        return Ok(());
    };
    let outcome = orchestrator.finish(&session)?;
    if outcome.restored {
        tracing::info!(project = %session.hash, "Last session out; project restored");
    } else {
        tracing::info!(
            project = %session.hash,
            live = ?outcome.live_pids,
            "Other sessions still attached; overlay left in place"
        );
    }
    Ok(())
}

fn on_signal(state: &SignalState) {
    state.interrupted.store(true, Ordering::SeqCst);

    let pid = state.child_pid.load(Ordering::SeqCst);
    if pid != 0 {
        tracing::info!(pid, "Forwarding termination to child");
        terminate(pid);
        return;
    }

    // No child: either we are still starting, or the main thread is already
    // finishing. Only act if the session is still pending.
    if state.take_pending().is_some_and(|(orchestrator, session)| {
        if let Err(e) = orchestrator.finish(&session) {
            tracing::error!(project = %session.hash, error = %e, "Failed to finish session on signal");
        }
        true
    }) {
        std::process::exit(i32::from(INTERRUPTED_EXIT));
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(pid, error = %std::io::Error::last_os_error(), "Failed to signal child");
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32) {
    tracing::debug!(pid, "Signal forwarding unsupported on this platform");
}

/// Mirrors the child's exit; death by signal N becomes 128 + N.
fn exit_code(status: ExitStatus) -> ExitCode {
    if let Some(code) = status.code() {
        return ExitCode::from(code.clamp(0, 255) as u8);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitCode::from((128 + signal).clamp(0, 255) as u8);
        }
    }
    ExitCode::FAILURE
}
