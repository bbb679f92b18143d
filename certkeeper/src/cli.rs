use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crate::cache::CredentialCache;
use crate::config::{CertDescriptor, MainConfig};
use crate::defaults::DEFAULT_CONFIG_PATH;
use crate::reload::{Reloader, ShellReloader};
use crate::renewal::{BatchOptions, RenewalEngine};
use crate::{scheduler, status};

/// Certkeeper - renews X.509 certificates from a secret-issuance backend
#[derive(Parser, Debug)]
#[command(name = "certkeeper")]
#[command(version)]
#[command(about = "Renews X.509 certificates ahead of expiry and reloads the services using them")]
pub struct Cli {
    /// Main configuration file
    #[arg(long, global = true, env = "CERTKEEPER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Renew certificates without running reload commands
    #[arg(long, global = true)]
    pub no_reload: bool,

    /// Show debug output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Check and renew certificates continuously (default)
    Run,

    /// Run one renewal batch and exit
    Once {
        /// Renew only the certificate described by this file (implies --fail-fast)
        #[arg(long, value_name = "PATH")]
        cert_config: Option<PathBuf>,

        /// Stop at the first failure
        #[arg(long)]
        fail_fast: bool,
    },

    /// Show cached certificates and whether they are due for renewal
    Status,
}

impl Cli {
    pub fn run(self) -> Result<ExitCode, Box<dyn std::error::Error>> {
        let Cli {
            config: config_path,
            no_reload,
            command,
            ..
        } = self;
        let reloader: Arc<dyn Reloader> = Arc::new(ShellReloader);

        match command.unwrap_or(Commands::Run) {
            Commands::Run => {
                let options = BatchOptions {
                    no_reload,
                    fail_fast: false,
                };
                let rt = tokio::runtime::Runtime::new()?;
                rt.block_on(async {
                    let shutdown = scheduler::spawn_shutdown_listener();
                    scheduler::run_continuously(config_path, options, reloader, shutdown).await
                })?;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Once {
                cert_config,
                fail_fast,
            } => {
                let config = MainConfig::load_from_file(&config_path)?;
                let options = BatchOptions {
                    no_reload,
                    fail_fast: fail_fast || cert_config.is_some(),
                };
                let engine = RenewalEngine::from_config(&config, reloader)?;
                let rt = tokio::runtime::Runtime::new()?;
                let result = match cert_config {
                    Some(path) => {
                        let descriptor = CertDescriptor::load_from_file(&path)?;
                        rt.block_on(engine.run_batch(&[descriptor], options))
                    }
                    None => {
                        let set = config.load_descriptors()?;
                        rt.block_on(engine.run_set(set, options))
                    }
                };

                if result.is_success() {
                    Ok(ExitCode::SUCCESS)
                } else {
                    for failure in &result.errors {
                        eprintln!("{}: {}", failure.identity, failure.error);
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
            Commands::Status => {
                let config = MainConfig::load_from_file(&config_path)?;
                let set = config.load_descriptors()?;
                status::print_report(&CredentialCache::new(&config.cache_dir), &set);
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
