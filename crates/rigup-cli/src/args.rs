//! Command-line flags.

use std::path::PathBuf;

use clap::Parser;
use rigup_runtime::RunOptions;

/// Bring this checkout's development environment to a known-good state, then
/// start the dev process.
#[derive(Debug, Parser)]
#[command(name = "rigup")]
#[command(version)]
pub struct Cli {
    /// Start only the backend dev server.
    #[arg(long)]
    pub server_only: bool,

    /// Start only the frontend dev server.
    #[arg(long)]
    pub front_only: bool,

    /// Do not run the one-time data reset.
    #[arg(long)]
    pub skip_reset: bool,

    /// Do not install dependencies, even if the lockfile changed.
    #[arg(long)]
    pub skip_install: bool,

    /// Run the data reset again even if it already ran.
    #[arg(long, conflicts_with = "skip_reset")]
    pub force_reset: bool,

    /// Configuration file (default: ./rigup.toml).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Mode conflicts are left for the orchestrator so they are reported
    /// like any other configuration error.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            server_only: self.server_only,
            front_only: self.front_only,
            skip_reset: self.skip_reset,
            skip_install: self.skip_install,
            force_reset: self.force_reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn no_flags_is_default_run() {
        let cli = Cli::try_parse_from(["rigup"]).unwrap();
        assert_eq!(cli.run_options(), RunOptions::default());
        assert!(cli.config.is_none());
    }

    #[test]
    fn both_modes_parse_and_are_passed_through() {
        let cli = Cli::try_parse_from(["rigup", "--server-only", "--front-only"]).unwrap();
        let opts = cli.run_options();
        assert!(opts.server_only && opts.front_only);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = Cli::try_parse_from(["rigup", "--turbo"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn help_exits_zero() {
        let err = Cli::try_parse_from(["rigup", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn config_path_is_accepted() {
        let cli = Cli::try_parse_from(["rigup", "--config", "ci/rigup.toml", "--skip-install"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("ci/rigup.toml")));
        assert!(cli.run_options().skip_install);
    }
}
