use clap::Args;

#[derive(Args, Debug)]
pub struct StartArgs {}

pub async fn execute(_args: StartArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    match runtime.start().await {
        Ok(()) => {
            println!("server ready on {}", runtime.options().server_base_url());
            Ok(())
        }
        Err(_) => Err(crate::cli::report_failure(&runtime)),
    }
}
