use anyhow::Context;
use clap::Parser;

use modelcache_lib::commands::{self, Cli};
use modelcache_lib::AppController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let controller = AppController::new().context("Failed to initialize application")?;

    commands::run(&controller, cli.command).await?;
    Ok(())
}
