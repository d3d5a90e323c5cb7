use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::tracer::decoder::ReportPolicy;

#[derive(Parser, Debug)]
#[command(name = "watchtrace")]
#[command(about = "Trace the file accesses, opens and closes of a command and its children")]
#[command(version)]
pub struct Cli {
    /// Command to trace, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Which access checks and opens to report
    #[arg(long, value_enum, value_name = "POLICY")]
    pub policy: Option<PolicyArg>,

    /// TOML config file (default: ~/.watchtrace/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// JSONL output file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Disable colored terminal output
    #[arg(long)]
    pub no_color: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Maximum bytes read for one path argument
    #[arg(long, value_name = "BYTES")]
    pub max_path: Option<usize>,

    /// Trace only the launched process, not its children
    #[arg(long)]
    pub no_follow_forks: bool,

    /// Exit with the traced command's status (128 + signal if it was killed)
    #[arg(long)]
    pub propagate_exit_code: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Report access checks and opens without write intent
    ReadOnly,
    /// Report only access checks and opens that ask for write access
    WriteIntent,
    /// Report everything
    All,
}

impl From<PolicyArg> for ReportPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::ReadOnly => ReportPolicy::ReadOnly,
            PolicyArg::WriteIntent => ReportPolicy::WriteIntent,
            PolicyArg::All => ReportPolicy::All,
        }
    }
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command.is_empty() {
            anyhow::bail!("Command is required");
        }

        if let Some(config) = &self.config {
            if !crate::config::expand_tilde(config).exists() {
                anyhow::bail!("Config file does not exist: {}", config.display());
            }
        }

        if self.max_path == Some(0) {
            anyhow::bail!("--max-path must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_keeps_its_own_flags() {
        let cli = Cli::try_parse_from(["watchtrace", "-v", "ls", "-la", "/tmp"]).unwrap();
        assert_eq!(cli.command, vec!["ls", "-la", "/tmp"]);
        assert_eq!(cli.verbose, 1);
        assert!(cli.policy.is_none());
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["watchtrace", "--no-color"]).is_err());
    }

    #[test]
    fn policy_values() {
        let cli =
            Cli::try_parse_from(["watchtrace", "--policy", "write-intent", "true"]).unwrap();
        assert_eq!(cli.policy, Some(PolicyArg::WriteIntent));
        assert_eq!(ReportPolicy::from(PolicyArg::All), ReportPolicy::All);
        assert!(Cli::try_parse_from(["watchtrace", "--policy", "writes", "true"]).is_err());
    }

    #[test]
    fn trace_knobs() {
        let cli = Cli::try_parse_from([
            "watchtrace",
            "--max-path",
            "64",
            "--no-follow-forks",
            "--propagate-exit-code",
            "-o",
            "/tmp/out.jsonl",
            "sh",
            "-c",
            "exit 3",
        ])
        .unwrap();
        assert_eq!(cli.max_path, Some(64));
        assert!(cli.no_follow_forks);
        assert!(cli.propagate_exit_code);
        assert_eq!(cli.output, Some(PathBuf::from("/tmp/out.jsonl")));
        assert_eq!(cli.command, vec!["sh", "-c", "exit 3"]);
    }

    #[test]
    fn zero_path_budget_is_rejected() {
        let cli = Cli::try_parse_from(["watchtrace", "--max-path", "0", "true"]).unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn config_path_with_tilde_is_expanded() {
        let Ok(home) = std::env::var("HOME") else {
            return;
        };
        let Ok(file) = tempfile::Builder::new()
            .prefix(".watchtrace-cli-")
            .suffix(".toml")
            .tempfile_in(&home)
        else {
            return;
        };
        let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
        let quoted = format!("~/{name}");

        let cli = Cli::try_parse_from(["watchtrace", "--config", quoted.as_str(), "true"]).unwrap();
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn missing_config_file_is_rejected() {
        let cli = Cli::try_parse_from([
            "watchtrace",
            "--config",
            "/nonexistent/watchtrace.toml",
            "true",
        ])
        .unwrap();
        assert!(cli.validate().is_err());
    }
}
