use bridge::config::{Cli, Command};
use bridge::{cli as validate_cli, gateway, logging, signing, worker_agent};
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init(&cli.log_level, std::path::Path::new("./logs")) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Gateway(args) => {
            let signer = match signing::load_or_generate(args.chain.signer_key_path.as_deref().unwrap_or_else(|| std::path::Path::new("./signer.key"))) {
                Ok(signer) => signer,
                Err(err) => {
                    log::error!("failed to load signer key: {err}");
                    return ExitCode::FAILURE;
                }
            };
            gateway::run(args, signer).await
        }
        Command::Worker(args) => {
            let signer = match signing::load_or_generate(args.chain.signer_key_path.as_deref().unwrap_or_else(|| std::path::Path::new("./signer.key"))) {
                Ok(signer) => signer,
                Err(err) => {
                    log::error!("failed to load signer key: {err}");
                    return ExitCode::FAILURE;
                }
            };
            worker_agent::run(args, signer).await
        }
        Command::Validate(args) => {
            let signer = match signing::load_or_generate(args.chain.signer_key_path.as_deref().unwrap_or_else(|| std::path::Path::new("./signer.key"))) {
                Ok(signer) => signer,
                Err(err) => {
                    log::error!("signer key validation failed: {err}");
                    return ExitCode::from(validate_cli::EXIT_VALIDATION_ERROR);
                }
            };
            return validate_cli::run(args, signer).await;
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
