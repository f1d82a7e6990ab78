use clap::Args;
use modelbox::ServerStatus;

#[derive(Args, Debug)]
pub struct StatusArgs {}

pub async fn execute(_args: StatusArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let state = runtime.state();

    match runtime.status().await {
        ServerStatus::Running => println!("running on {}", runtime.options().server_base_url()),
        ServerStatus::Stopped => println!("installed, not running"),
        ServerStatus::NotInstalled => println!("not installed (run `modelbox setup`)"),
    }
    println!("sandbox: {}", state.root.display());
    println!("provisioned: {}", state.is_provisioned);
    println!("runtime installed: {}", state.is_runtime_installed);

    if let Some(record) = runtime.last_error() {
        println!("last error: {} (while {})", record.message, record.phase.describe());
        println!("hint: {}", record.code.remediation());
    }
    Ok(())
}
