//! Drive the reconciler towards a selected target: probe, preview the
//! configuration changes, confirm, run, summarize.

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use dialoguer::Confirm;
use similar::{ChangeTag, TextDiff};

use crate::Context;
use crate::artifacts::ArtifactSet;
use crate::commands::status;
use crate::config::NvupConfig;
use crate::logfile;
use crate::privilege;
use crate::probe::{self, SystemSnapshot};
use crate::reconciler::{self, DriverTarget, Reconciler, SystemHooks};
use crate::ui;

pub fn run(ctx: &Context, target: DriverTarget) -> Result<()> {
    privilege::require_root(&format!("converging to {}", target.describe()))?;

    let config = NvupConfig::load()?;

    ui::header(&format!("Target: {}", target.describe()));

    let snapshot = probe::probe().context("system probe failed")?;
    status::print_snapshot(&snapshot);
    for advisory in snapshot.advisories() {
        ui::warn(&advisory);
    }

    let artifacts = ArtifactSet::new();
    preview_artifact_changes(ctx, &target, &artifacts, &snapshot)?;

    if !ctx.assume_yes {
        if !console::user_attended() {
            bail!("no terminal attached for confirmation; re-run with --yes");
        }
        let proceed = Confirm::new()
            .with_prompt("Continue?")
            .default(true)
            .interact()?;
        if !proceed {
            bail!("aborted by operator");
        }
    }

    let backend = aptkit::backend::default_backend()?;
    let mut hooks = SystemHooks::new(&config, &snapshot, &artifacts, ctx.assume_yes);
    let report = Reconciler::new(&backend, &artifacts, &snapshot, &mut hooks).run(&target)?;

    ui::section("Summary");
    if report.changes.is_empty() {
        ui::dim("nothing to change");
    }
    for change in &report.changes {
        ui::success(change);
    }
    for advisory in &report.advisories {
        ui::warn(advisory);
    }

    println!();
    ui::success(&format!("System converged to: {}", target.describe()));
    if logfile::is_active() {
        ui::dim(&format!("full transcript: {}", logfile::LOG_PATH));
    }
    Ok(())
}

/// Show what the configuration artifacts will look like after the run,
/// with a line diff for files that change.
fn preview_artifact_changes(
    ctx: &Context,
    target: &DriverTarget,
    artifacts: &ArtifactSet,
    snapshot: &SystemSnapshot,
) -> Result<()> {
    if ctx.quiet {
        return Ok(());
    }

    ui::section("Configuration Changes");

    let mut any = false;
    for (artifact, desired) in reconciler::artifact_plan(target, artifacts, snapshot) {
        match desired {
            Some(content) => {
                if !artifact.needs_write(&content)? {
                    ui::dim(&format!("{} unchanged", artifact.path().display()));
                    continue;
                }
                any = true;
                match artifact.current()? {
                    None => {
                        println!("  {} {}", "+".green(), artifact.path().display());
                        for line in content.lines() {
                            println!("      {}", line.green());
                        }
                    }
                    Some(current) => {
                        println!("  {} {}", "~".yellow(), artifact.path().display());
                        print_diff(&current, &content, ctx.verbose > 0);
                    }
                }
            }
            None => {
                if artifact.current()?.is_some() {
                    any = true;
                    println!("  {} {}", "-".red(), artifact.path().display());
                } else {
                    ui::dim(&format!("{} already absent", artifact.path().display()));
                }
            }
        }
    }

    if !any {
        ui::dim("all configuration artifacts already in desired state");
    }
    Ok(())
}

fn print_diff(current: &str, desired: &str, show_context: bool) {
    let diff = TextDiff::from_lines(current, desired);
    for change in diff.iter_all_changes() {
        let line = change.value().trim_end();
        match change.tag() {
            ChangeTag::Delete => println!("      {} {}", "-".red(), line.red()),
            ChangeTag::Insert => println!("      {} {}", "+".green(), line.green()),
            ChangeTag::Equal if show_context => println!("        {}", line.dimmed()),
            ChangeTag::Equal => {}
        }
    }
}
