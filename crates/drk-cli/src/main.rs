//! drk - signed document packages CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use drk_cli::cmd;
use drk_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { output, force } => cmd::keygen::keygen(output, force),
        Commands::Create {
            source,
            version,
            output,
            meta,
        } => cmd::package::create(&source, &version, output, meta).await,
        Commands::Delta {
            base,
            source,
            version,
            output,
            meta,
        } => cmd::package::delta(&base, &source, &version, output, meta).await,
        Commands::Verify { package, deep } => cmd::package::verify(&package, deep).await,
        Commands::Apply { package, target } => cmd::package::apply(&package, &target).await,
        Commands::Rollback { target, backup } => cmd::package::rollback(&target, backup).await,
        Commands::Inspect { package, json } => cmd::package::inspect(&package, json).await,
        Commands::List { dir } => cmd::catalog::list(dir).await,
        Commands::Stats { dir } => cmd::catalog::stats(dir).await,
        Commands::Registry { command } => cmd::registry::run(command).await,
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
