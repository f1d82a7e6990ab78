use clap::Args;

#[derive(Args, Debug)]
pub struct StopArgs {}

pub async fn execute(_args: StopArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    runtime.stop().await;
    println!("stopped");
    Ok(())
}
