use anyhow::Result;
use clap::Parser;
use fastap::cli::{loss, Cli, Commands};
use log::info;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.command {
        Commands::Loss(args) => {
            loss::run(args)?;
        }
    }

    info!("Done");
    Ok(())
}
