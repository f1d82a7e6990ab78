use clap::Args;

#[derive(Args, Debug)]
pub struct ModelsArgs {}

pub async fn execute(_args: ModelsArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let runtime = global.create_runtime()?;
    let models = runtime.api()?.list_models().await?;

    if models.is_empty() {
        println!("no models installed (run `modelbox pull <name>`)");
        return Ok(());
    }
    for model in models {
        let size_gib = model.size as f64 / (1024.0 * 1024.0 * 1024.0);
        println!("{:<40} {:>8.2} GiB", model.name, size_gib);
    }
    Ok(())
}
