//! GDA CLI - wildfire deposition on glaciers and its albedo signature.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "gda-cli",
    version,
    about = "Glacier deposition and albedo toolkit"
)]
struct Cli {
    #[command(subcommand)]
    command: gda_cmd::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    gda_cmd::run(cli.command).await
}
