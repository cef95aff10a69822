//! `rigup-cli` – the `rigup` command
//!
//! Run from a project root.  It:
//!
//! 1. Parses flags and loads `rigup.toml` (defaults when absent).
//! 2. Detects which external tools are on `PATH`.
//! 3. Converges toolchain, package manager, kernel limits, config files,
//!    containers, dependencies and the one-time reset, in that order.
//! 4. Starts the mode's dev task in the foreground.
//! 5. Prints a summary; every fatal error comes with the commands that fix it
//!    by hand.
//!
//! Ctrl-C stops the run before the next step; the running child receives the
//! signal from the terminal directly.

mod args;
mod config;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use colored::Colorize;
use rigup_hal::{
    CommandTemplate, DockerRuntime, Escalation, ProcSysctl, ShellPackageManager, ShellRunner, ShellTaskRunner,
    ShellVersionManager, SudoEscalation,
};
use rigup_kernel::CapabilityManager;
use rigup_runtime::orchestrator::REPORT_FILE;
use rigup_runtime::{Collaborators, FileTemplate, Orchestrator, RunReport, StepStatus};
use rigup_types::{ConvergenceOutcome, RigError};
use tracing::warn;

use crate::args::Cli;
use crate::config::{CONFIG_FILE, Config};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); RIGUP_LOG_FORMAT=json switches to
    // newline-delimited JSON.  Logs go to stderr so the summary on stdout
    // stays readable.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("RIGUP_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init();
    }

    print_banner();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after the current step …".yellow().bold());
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; interrupts will kill rigup immediately");
    }

    let root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            print_failure(
                &RigError::io(Path::new("."), &e).with_remedy([r#"cd "$(git rev-parse --show-toplevel)" && rigup"#]),
            );
            return ExitCode::FAILURE;
        }
    };
    let config_path = cli.config.clone().unwrap_or_else(|| root.join(CONFIG_FILE));
    let cfg = match config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            print_failure(&e);
            return ExitCode::FAILURE;
        }
    };
    if config_path.exists() {
        println!("  Config loaded from {}", config_path.display().to_string().bold());
    } else {
        println!("  {}", format!("No {CONFIG_FILE}; using built-in defaults.").dimmed());
    }

    let plan = cfg.plan(&root);
    let escalation = SudoEscalation::detect(ShellRunner);
    let capabilities = CapabilityManager::detect(plan.tools.all(), escalation.available());
    let collab = collaborators(&cfg, &root, escalation);

    let mut orchestrator = Orchestrator::new(plan, collab, capabilities).with_interrupt(interrupted);
    let report = orchestrator.run(&cli.run_options());
    print_summary(&report);
    println!(
        "  {}",
        format!("Report: {}", orchestrator.plan().state_path(REPORT_FILE).display()).dimmed()
    );

    match &report.failure {
        None => ExitCode::SUCCESS,
        Some(RigError::Interrupted { .. }) => ExitCode::from(130),
        Some(_) => ExitCode::FAILURE,
    }
}

/// Process-backed collaborators for the real machine.
fn collaborators(cfg: &Config, root: &Path, escalation: SudoEscalation<ShellRunner>) -> Collaborators {
    Collaborators {
        versions: Box::new(ShellVersionManager::new(
            ShellRunner,
            CommandTemplate::new(&cfg.toolchain.install),
            CommandTemplate::new(&cfg.toolchain.activate),
            &cfg.toolchain.query,
        )),
        package_manager: Box::new(ShellPackageManager::new(
            ShellRunner,
            CommandTemplate::new(&cfg.package_manager.ensure),
            &cfg.package_manager.query,
            &cfg.package_manager.install,
        )),
        containers: Box::new(DockerRuntime::new(ShellRunner).with_program(&cfg.containers.program)),
        tasks: Box::new(ShellTaskRunner::new(ShellRunner, &cfg.tasks.program)),
        escalation: Box::new(escalation),
        sysctl: Box::new(ProcSysctl::new()),
        templates: Box::new(FileTemplate::new(root)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("  {} {}", "rigup".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Local development environment reconciler");
    println!();
}

fn print_summary(report: &RunReport) {
    println!();
    for step in &report.steps {
        let line = match &step.status {
            StepStatus::Skipped { reason } => {
                format!("  {} {} {}", "–".dimmed(), step.resource, format!("skipped ({reason})").dimmed())
            }
            StepStatus::Finished { outcome } => {
                let mark = match outcome {
                    ConvergenceOutcome::AlreadySatisfied => "✓".dimmed(),
                    ConvergenceOutcome::Converged => "✓".green().bold(),
                    ConvergenceOutcome::ConvergedWithWarning(_) => "!".yellow().bold(),
                    ConvergenceOutcome::Failed(_) if step.optional => "!".yellow().bold(),
                    ConvergenceOutcome::Failed(_) => "✗".red().bold(),
                };
                format!("  {mark} {} {}", step.resource, outcome.label().dimmed())
            }
        };
        println!("{line}");
    }

    let attention: Vec<_> = report.attention().collect();
    if !attention.is_empty() {
        println!();
        println!("  {}", "Needs attention:".yellow().bold());
        for step in attention {
            match step.outcome() {
                Some(ConvergenceOutcome::ConvergedWithWarning(reason)) => {
                    println!("    • {}: {reason}", step.resource);
                }
                Some(ConvergenceOutcome::Failed(err)) if step.optional => {
                    println!("    • {} (advisory): {err}", step.resource);
                    for cmd in err.remedy() {
                        println!("        {}", cmd.bold());
                    }
                }
                _ => {}
            }
        }
    }

    println!();
    match &report.failure {
        None => println!(
            "  {} {} action(s)",
            "✓ Environment ready.".green().bold(),
            report.total_actions()
        ),
        Some(err) => print_failure(err),
    }
}

fn print_failure(err: &RigError) {
    println!("  {} {err}", "✗".red().bold());
    let remedy = err.remedy();
    if !remedy.is_empty() {
        println!("  To fix it by hand, run:");
        for cmd in remedy {
            println!("    {}", cmd.bold());
        }
    }
}
