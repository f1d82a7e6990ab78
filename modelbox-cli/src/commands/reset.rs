use clap::Args;

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Actually delete; without this flag the command only explains itself
    #[arg(long)]
    pub force: bool,
}

pub async fn execute(args: ResetArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;

    if !args.force {
        anyhow::bail!(
            "this deletes everything under {} including downloaded models; \
             rerun with --force to proceed",
            runtime.state().root.display()
        );
    }

    runtime.reset().await?;
    println!("sandbox removed");
    Ok(())
}
