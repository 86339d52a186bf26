//! One-shot config and signer-key validation: a pre-flight check run before
//! a gateway or worker process starts for real, so a misconfiguration shows
//! up as a clean exit code instead of a confusing runtime failure.

use crate::config::ValidateArgs;
use bridge_common::chain::{ChainClient, JsonRpcChainClient};
use bridge_common::crypto::SignerKey;
use log::{error, info};
use std::process::ExitCode;

/// Config and signer key are well-formed.
pub const EXIT_OK: u8 = 0;
/// Config or signer key failed a local, offline check.
pub const EXIT_VALIDATION_ERROR: u8 = 2;
/// Config passed local checks but the chain RPC endpoint did not respond.
pub const EXIT_CHAIN_UNREACHABLE: u8 = 3;

pub async fn run(args: ValidateArgs, signer: SignerKey) -> ExitCode {
    if let Err(message) = validate_config(&args) {
        error!("{message}");
        return ExitCode::from(EXIT_VALIDATION_ERROR);
    }
    info!("signer wallet: {}", signer.wallet());

    let chain = JsonRpcChainClient::new(args.chain.chain_rpc.clone(), args.chain.contract_package.clone());
    if check_chain_reachable(&chain, &args.chain.chain_rpc).await {
        ExitCode::from(EXIT_OK)
    } else {
        ExitCode::from(EXIT_CHAIN_UNREACHABLE)
    }
}

/// Local, offline checks on the parsed CLI arguments.
fn validate_config(args: &ValidateArgs) -> Result<(), String> {
    if args.chain.contract_package.trim().is_empty() {
        return Err("--contract-package must not be empty".to_string());
    }
    if args.chain.chain_rpc.trim().is_empty() {
        return Err("--chain-rpc must not be empty".to_string());
    }
    if let Some(listen_addr) = &args.listen_addr {
        if listen_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(format!("--listen-addr {listen_addr} is not a valid IP address"));
        }
    }
    Ok(())
}

/// Returns whether the chain RPC endpoint responded at all.
async fn check_chain_reachable(chain: &dyn ChainClient, chain_rpc: &str) -> bool {
    match chain.query_events("worker_registry", None).await {
        Ok(_) => {
            info!("chain reachable at {chain_rpc}");
            true
        }
        Err(err) => {
            error!("chain unreachable at {chain_rpc}: {err}");
            false
        }
    }
}
