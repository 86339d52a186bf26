//! Staker-side node agent: submits the stake-and-register transaction,
//! waits for the dispatcher to hand back a join token via the chain event
//! stream, then heartbeats the gateway's worker-connect endpoint until
//! interrupted. This never talks to the worker registry directly — it only
//! ever sees what the chain and the gateway choose to tell it.

use crate::config::WorkerArgs;
use bridge_common::chain::{events, ChainClient, JsonRpcChainClient};
use bridge_common::chain::abi;
use bridge_common::crypto::SignerKey;
use bridge_common::seal_token::{generate_challenge, SealToken};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

pub async fn run(args: WorkerArgs, signer: SignerKey) -> anyhow::Result<std::process::ExitCode> {
    let chain: Arc<dyn ChainClient> = Arc::new(JsonRpcChainClient::new(args.chain.chain_rpc.clone(), args.chain.contract_package.clone()));
    run_with_chain(args, signer, chain).await
}

async fn run_with_chain(args: WorkerArgs, signer: SignerKey, chain: Arc<dyn ChainClient>) -> anyhow::Result<std::process::ExitCode> {
    let registry_object = format!("{}::worker_registry", args.chain.contract_package);
    let seal_token = mint_seal_token(&signer);

    info!("registering worker {} with {} tokens", args.node_id, args.amount_tokens);
    let call = abi::stake_and_register_worker(&registry_object, &args.stake_coin_object, &args.node_id, &seal_token.encode());
    chain.execute_transaction_block(call, &signer).await?;

    let join_token = await_join_token(chain.as_ref(), &args.node_id, Duration::from_secs(args.join_poll_secs)).await?;
    info!("worker {} received join token ({} bytes), starting heartbeat loop against {}", args.node_id, join_token.len(), args.gateway_url);

    run_heartbeat_loop(&args, &signer).await
}

fn mint_seal_token(signer: &SignerKey) -> SealToken {
    let challenge = generate_challenge();
    let signature = signer.sign(&challenge);
    SealToken { wallet_address: signer.wallet(), signature, challenge }
}

/// Poll `worker_registry` events for our own `JoinTokenSetEvent`. The
/// dispatcher emits this once per worker registration, so this loop runs
/// until the match is found or the chain call itself errors out.
async fn await_join_token(chain: &dyn ChainClient, node_id: &str, poll_interval: Duration) -> anyhow::Result<String> {
    let mut cursor: Option<String> = None;
    loop {
        let page = chain.query_events("worker_registry", cursor.as_deref()).await?;
        for raw in &page.events {
            if let Some(events::ChainEvent::JoinTokenSet { event, .. }) = events::parse_event(raw)? {
                if event.node_id == node_id {
                    return Ok(event.join_token);
                }
            }
        }
        if page.next_cursor.is_some() {
            cursor = page.next_cursor;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn run_heartbeat_loop(args: &WorkerArgs, signer: &SignerKey) -> anyhow::Result<std::process::ExitCode> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
    let connect_url = format!("{}/v1-worker/connect", args.gateway_url.trim_end_matches('/'));
    let mut ticker = tokio::time::interval(Duration::from_secs(args.heartbeat_interval_secs));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let token = mint_seal_token(signer);
                match client
                    .post(&connect_url)
                    .header("Authorization", format!("Bearer {}", token.encode()))
                    .header("X-Worker-Node-Id", args.node_id.clone())
                    .send()
                    .await
                {
                    Ok(resp) if resp.status().is_success() => info!("heartbeat ok for worker {}", args.node_id),
                    Ok(resp) => warn!("heartbeat rejected for worker {}: {}", args.node_id, resp.status()),
                    Err(err) => warn!("heartbeat request failed for worker {}: {err}", args.node_id),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("worker agent for {} shutting down", args.node_id);
                return Ok(std::process::ExitCode::from(130));
            }
        }
    }
}
