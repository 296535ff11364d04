use anyhow::Result;
use clap::Args;
use snapkeep::api::{Snapshot, VirtApi};
use snapkeep::api::engine::EngineClient;
use snapkeep::config::Config;
use snapkeep::naming::SnapshotLabel;

#[derive(Clone, Debug, Args)]
pub struct ListSnapshotArgs {
    /// Environment to run against [default: the configured default]
    #[arg(long = "environment", short = 'e')]
    environment: Option<String>,

    /// Name of the VM whose snapshots to list
    name: String,
}

pub async fn run_list_snapshots(config: &Config, args: ListSnapshotArgs) -> Result<()> {
    let env = config.environment(args.environment.as_deref())?;
    let api = EngineClient::connect(env.engine_config()).await?;

    let vm = api.vm_by_name(&args.name).await?;
    let snapshots = api.list_snapshots(&vm.id).await?;

    println!(
        "{:<38} {:<8} {:<8} {:<12} {}",
        "id", "status", "class", "date", "description"
    );
    for snapshot in snapshots {
        println!("{}", snapshot_row(&snapshot));
    }

    Ok(())
}

/// One listing row; class and date come from the parsed label, or `-` for
/// descriptions that are not ours (the engine's "Active VM", manual
/// snapshots).
fn snapshot_row(snapshot: &Snapshot) -> String {
    let (class, date) = match SnapshotLabel::parse(&snapshot.description) {
        Some(label) => (
            label.class.to_string(),
            label.date.format("%Y-%m-%d").to_string(),
        ),
        None => ("-".to_string(), "-".to_string()),
    };

    format!(
        "{:<38} {:<8} {:<8} {:<12} {}",
        snapshot.id, snapshot.status, class, date, snapshot.description
    )
}
