use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::{Args, ValueEnum};
use snapkeep::api::engine::EngineClient;
use snapkeep::backup::{BackupKind, BackupRunner};
use snapkeep::config::Config;
use tokio_util::sync::CancellationToken;

use crate::ui::message::{message_info, message_warn};

#[derive(Clone, Debug, Args)]
pub struct BackupArgs {
    /// Environment to run against [default: the configured default]
    #[arg(long = "environment", short = 'e')]
    environment: Option<String>,

    /// Back up a single named VM [default: all VMs except HostedEngine]
    #[arg(long = "name", short = 'n')]
    name: Option<String>,

    /// Backup type
    #[arg(long = "type", short = 't', value_enum, default_value_t = BackupType::Snapshot)]
    backup_type: BackupType,

    /// Include memory state in the snapshot (weekly retention class)
    #[arg(long = "keep-memory", short = 'm')]
    keep_memory: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackupType {
    Snapshot,
    Ova,
}

pub async fn run_backup(config: &Config, args: BackupArgs) -> Result<()> {
    let env = config.environment(args.environment.as_deref())?.clone();

    // a stuck poll must stay interruptible
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    message_info(format!("connecting to the engine API of {}", env.name));
    let api = Arc::new(EngineClient::connect(env.engine_config()).await?);

    let kind = match args.backup_type {
        BackupType::Snapshot => BackupKind::Snapshot {
            keep_memory: args.keep_memory,
        },
        BackupType::Ova => BackupKind::Ova,
    };

    let runner = BackupRunner::new(api, env, Local::now().date_naive(), cancel)?;
    let report = runner.run(args.name.as_deref(), kind).await?;

    if report.failed > 0 {
        message_warn(format!(
            "{} of {} VMs failed, see the log for details",
            report.failed,
            report.failed + report.succeeded
        ));
    } else {
        message_info(format!("backed up {} VM(s)", report.succeeded));
    }

    Ok(())
}
