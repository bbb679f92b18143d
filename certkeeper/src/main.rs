mod cache;
mod cli;
mod config;
mod defaults;
mod issuer;
mod persist;
mod reload;
mod renewal;
mod scheduler;
mod status;

#[cfg(test)]
mod test_support;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("info")
            }
        }))
        .with_target(false)
        .init();

    tracing::debug!("Certkeeper v{}", env!("CARGO_PKG_VERSION"));

    match cli.run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", console::style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
