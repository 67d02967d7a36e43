use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "courier")]
#[command(about = "Collect, archive and deliver files by FTP", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "courier.toml")]
    pub config: PathBuf,

    /// Host name used to pick the [hosts."<name>"] section
    #[arg(long, env = "COURIER_HOSTNAME")]
    pub hostname: Option<String>,

    /// Stage and archive, but only log what would be uploaded
    #[arg(long)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum Commands {
    /// Run the full pipeline once (default)
    Run,
    /// Show which files would be staged, without touching anything
    Plan,
    /// Print configuration values
    PrintConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["courier"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("courier.toml"));
        assert!(!cli.dry_run);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_flags_and_command() {
        let cli = Cli::try_parse_from([
            "courier",
            "-c",
            "/etc/courier.toml",
            "--hostname",
            "edge-01",
            "--dry-run",
            "plan",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/courier.toml"));
        assert_eq!(cli.hostname.as_deref(), Some("edge-01"));
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Some(Commands::Plan)));
    }
}
