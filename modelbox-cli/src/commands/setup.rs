use std::io::Write;

use clap::Args;

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Print each progress event on its own line instead of a single bar
    #[arg(long)]
    pub plain: bool,
}

pub async fn execute(args: SetupArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<modelbox::ProvisionEvent>();
    let plain = args.plain;
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if plain {
                println!("[{:3}%] {}", event.percent, event.message);
            } else {
                print!("\r[{:3}%] {:<64}", event.percent, event.message);
                let _ = std::io::stdout().flush();
            }
        }
        if !plain {
            println!();
        }
    });

    let result = runtime.setup(Some(tx)).await;
    let _ = printer.await;

    match result {
        Ok(()) => {
            println!("sandbox ready at {}", runtime.state().root.display());
            Ok(())
        }
        Err(_) => Err(crate::cli::report_failure(&runtime)),
    }
}
