use std::io::Write;

use clap::Args;

#[derive(Args, Debug)]
pub struct PullArgs {
    /// Model name, e.g. `llama3.2:1b`
    pub name: String,
}

pub async fn execute(args: PullArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;

    runtime
        .api()?
        .pull_model(&args.name, |event| {
            match (event.completed, event.total) {
                (Some(completed), Some(total)) if total > 0 => {
                    let percent = completed * 100 / total;
                    print!("\r{}: {percent:3}%", event.status);
                }
                _ => print!("\r{:<48}", event.status),
            }
            let _ = std::io::stdout().flush();
        })
        .await?;

    println!("\npulled {}", args.name);
    Ok(())
}
