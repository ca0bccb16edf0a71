mod common;

use std::path::Path;
use std::process::Command;

use common::Sandbox;
use layover_core::{GitVisibilityGuard, Target, Template, TemplateKind, TemplateSet};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.email=test@example.com",
            "-c",
            "user.name=Test",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .expect("Failed to run git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).to_string()
}

/// A repository with a committed `.claude/settings.json`.
fn repo() -> Sandbox {
    let sandbox = Sandbox::new();
    sandbox.write(".claude/settings.json", "{\"committed\":true}\n");
    sandbox.write("README.md", "hello\n");
    git(&sandbox.project, &["init", "-q"]);
    git(&sandbox.project, &["add", "."]);
    git(&sandbox.project, &["commit", "-q", "-m", "init"]);
    sandbox
}

#[test]
fn hidden_changes_do_not_show_in_status() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let sandbox = repo();
    let guard = GitVisibilityGuard::for_targets(&Target::builtins());

    let hidden = guard.hide(&sandbox.project).expect("project is a repository");
    assert_eq!(hidden.files, vec![".claude/settings.json"]);

    sandbox.write(".claude/settings.json", "{\"overlay\":true}\n");
    assert_eq!(git(&sandbox.project, &["status", "--porcelain"]), "");
}

#[test]
fn fresh_guard_unhides_from_index_alone() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let sandbox = repo();
    GitVisibilityGuard::for_targets(&Target::builtins()).hide(&sandbox.project);
    sandbox.write(".claude/settings.json", "{\"edited\":true}\n");

    // A different process, with no memory of what was hidden.
    let unhidden = GitVisibilityGuard::for_targets(&Target::builtins()).unhide(&sandbox.project);

    assert_eq!(unhidden, 1);
    let status = git(&sandbox.project, &["status", "--porcelain"]);
    assert!(status.contains(".claude/settings.json"), "{status}");
}

#[test]
fn files_outside_config_paths_are_untouched() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let sandbox = repo();
    GitVisibilityGuard::for_targets(&Target::builtins()).hide(&sandbox.project);

    sandbox.write("README.md", "changed\n");
    let status = git(&sandbox.project, &["status", "--porcelain"]);
    assert!(status.contains("README.md"), "{status}");
}

#[test]
fn outside_a_repository_is_a_no_op() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let sandbox = Sandbox::new();
    let guard = GitVisibilityGuard::for_targets(&Target::builtins());
    assert!(guard.hide(&sandbox.project).is_none());
    assert_eq!(guard.unhide(&sandbox.project), 0);
}

#[test]
fn session_lifecycle_leaves_index_clean() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let sandbox = repo();
    let orchestrator = sandbox.orchestrator();
    let target = Target::builtins().remove(0);
    let templates = TemplateSet::new(vec![Template {
        kind: TemplateKind::Agent,
        name: "reviewer.md".to_string(),
        content: "review".to_string(),
    }]);

    let session = orchestrator
        .start(&sandbox.project, &target, &templates)
        .unwrap();
    assert!(session.hidden.is_some());
    sandbox.write(".claude/settings.json", "{\"overlay\":true}\n");
    assert_eq!(git(&sandbox.project, &["status", "--porcelain", "--", ".claude/settings.json"]), "");

    assert!(orchestrator.finish(&session).unwrap().restored);

    let flags = git(&sandbox.project, &["ls-files", "-v"]);
    assert!(flags.lines().all(|line| !line.starts_with('S')), "{flags}");
    assert_eq!(git(&sandbox.project, &["status", "--porcelain"]), "");
}
