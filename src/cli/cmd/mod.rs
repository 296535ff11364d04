pub mod backup;
pub mod snapshot;
pub mod vm;

use anyhow::Result;
use clap::{Parser, Subcommand};
use snapkeep::config::Config;

#[derive(Debug, Parser)]
#[command(name = "snapkeep")]
#[command(about = "VM snapshot and OVA backup with per-class retention", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Snapshot or export VMs, then apply retention
    Backup(backup::BackupArgs),

    /// Snapshot inspection
    #[command(subcommand)]
    Snapshot(SnapshotCommand),

    /// VM inspection
    #[command(subcommand)]
    Vm(VmCommand),
}

#[derive(Debug, Subcommand)]
pub enum SnapshotCommand {
    /// List snapshots of a VM (short: ls)
    #[command(alias = "ls")]
    List(snapshot::ListSnapshotArgs),
}

#[derive(Debug, Subcommand)]
pub enum VmCommand {
    /// List VMs visible in the selected environment (short: ls)
    #[command(alias = "ls")]
    List(vm::ListVmArgs),
}

pub async fn run_cli() -> Result<()> {
    // arguments first: --help/--version and usage errors must not touch
    // the config file
    let cli = Cli::parse();

    let config = Config::load().await?;

    match cli.command {
        Command::Backup(args) => backup::run_backup(&config, args).await,
        Command::Snapshot(cmd) => match cmd {
            SnapshotCommand::List(args) => snapshot::run_list_snapshots(&config, args).await,
        },
        Command::Vm(cmd) => match cmd {
            VmCommand::List(args) => vm::run_list_vms(&config, args).await,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_help_is_handled_at_parse_time() {
        let err = Cli::try_parse_from(["snapkeep", "--help"]).expect_err("help exits parse");
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_backup_args_parse() {
        let cli = Cli::try_parse_from([
            "snapkeep", "backup", "-e", "lab", "-n", "vmA", "-t", "ova",
        ])
        .expect("parse");
        assert!(matches!(cli.command, Command::Backup(_)));
    }

    #[test]
    fn test_snapshot_list_alias_parses() {
        let cli = Cli::try_parse_from(["snapkeep", "snapshot", "ls", "vmA"]).expect("parse");
        assert!(matches!(
            cli.command,
            Command::Snapshot(SnapshotCommand::List(_))
        ));
    }
}
