mod cli;
mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "modelbox",
    version,
    about = "Provision and supervise a local AI inference server"
)]
struct Cli {
    #[command(flatten)]
    global: cli::GlobalFlags,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision the sandbox and install the server binary
    Setup(commands::setup::SetupArgs),
    /// Start the server and wait until it answers
    Start(commands::start::StartArgs),
    /// Stop the supervised server
    Stop(commands::stop::StopArgs),
    /// Restart the supervised server
    Restart(commands::restart::RestartArgs),
    /// Show server and sandbox status
    Status(commands::status::StatusArgs),
    /// List installed models
    Models(commands::models::ModelsArgs),
    /// Pull a model from the registry
    Pull(commands::pull::PullArgs),
    /// Delete the entire sandbox
    Reset(commands::reset::ResetArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    modelbox::init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Setup(args) => commands::setup::execute(args, &cli.global).await,
        Command::Start(args) => commands::start::execute(args, &cli.global).await,
        Command::Stop(args) => commands::stop::execute(args, &cli.global).await,
        Command::Restart(args) => commands::restart::execute(args, &cli.global).await,
        Command::Status(args) => commands::status::execute(args, &cli.global).await,
        Command::Models(args) => commands::models::execute(args, &cli.global).await,
        Command::Pull(args) => commands::pull::execute(args, &cli.global).await,
        Command::Reset(args) => commands::reset::execute(args, &cli.global).await,
    }
}
