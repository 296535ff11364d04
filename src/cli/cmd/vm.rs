use anyhow::Result;
use clap::Args;
use snapkeep::api::VirtApi;
use snapkeep::api::engine::EngineClient;
use snapkeep::config::Config;

#[derive(Clone, Debug, Args)]
pub struct ListVmArgs {
    /// Environment to run against [default: the configured default]
    #[arg(long = "environment", short = 'e')]
    environment: Option<String>,
}

pub async fn run_list_vms(config: &Config, args: ListVmArgs) -> Result<()> {
    let env = config.environment(args.environment.as_deref())?;
    let api = EngineClient::connect(env.engine_config()).await?;

    let vms = api.list_vms().await?;
    println!("{:<38} {}", "id", "name");
    for vm in vms {
        println!("{:<38} {}", vm.id, vm.name);
    }

    Ok(())
}
