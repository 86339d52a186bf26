//! CLI surface and layered configuration, composed from one `clap::Args`
//! struct per concern the way the discovery protocol composes
//! `DiscoveryConfig`.

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bridge", version, about = "Blockchain-authenticated Kubernetes control plane bridge")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Logging verbosity: error, warn, info, debug, trace.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the authenticating gateway, chain event listener, K8s dispatcher
    /// and response correlator.
    Gateway(GatewayArgs),
    /// Run the staker-side worker registration flow and node agent
    /// supervision.
    Worker(WorkerArgs),
    /// One-shot config and signer-key validation; exits 0 on success, 2 on
    /// a validation error, 3 if the chain is unreachable.
    Validate(ValidateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ChainArgs {
    /// Chain package id used to filter events (required).
    #[arg(long)]
    pub contract_package: String,

    /// JSON-RPC HTTP endpoint for the chain (required).
    #[arg(long)]
    pub chain_rpc: String,

    /// WebSocket endpoint for `subscribeEvent` push delivery.
    #[arg(long)]
    pub chain_ws: Option<String>,

    /// Path to the signer key used to sign outbound chain transactions.
    #[arg(long)]
    pub signer_key_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct GatewayListenArgs {
    /// Bind address for the gateway (required).
    #[arg(long)]
    pub listen_addr: String,

    /// Bind port for the gateway.
    #[arg(long, default_value_t = default_listen_port())]
    pub listen_port: u16,

    /// Allow a TLS-less loopback listener for local kubectl tests
    /// Explicit opt-in, never inferred from the bind address.
    #[arg(long, default_value_t = false)]
    pub allow_loopback_http: bool,
}

const fn default_listen_port() -> u16 {
    8080
}

#[derive(Args, Debug, Clone)]
pub struct StakeThresholdArgs {
    /// Minimum stake, in whole tokens, to register as a worker node.
    #[arg(long, default_value_t = bridge_common::config::DEFAULT_STAKE_MIN_NODE_TOKENS)]
    pub stake_min_node: f64,

    /// Minimum stake, in whole tokens, to hold any K8s capability at all.
    #[arg(long, default_value_t = bridge_common::config::DEFAULT_STAKE_MIN_USER_TOKENS)]
    pub stake_min_user: f64,

    /// Minimum stake, in whole tokens, for the admin-all tier.
    #[arg(long, default_value_t = bridge_common::config::DEFAULT_STAKE_MIN_ADMIN_TOKENS)]
    pub stake_min_admin: f64,
}

#[derive(Args, Debug, Clone)]
pub struct TimeoutArgs {
    /// T_stake: stake-validation cache TTL, in seconds.
    #[arg(long, default_value_t = 300)]
    pub stake_cache_ttl_secs: u64,

    /// T_challenge: maximum seal-token clock skew, in seconds.
    #[arg(long, default_value_t = 300)]
    pub challenge_ttl_secs: u64,

    /// T_chain_roundtrip: how long a chain-mode gateway request blocks.
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// T_response_ttl: how long an on-chain response record stays valid.
    #[arg(long, default_value_t = 300)]
    pub response_ttl_secs: u64,

    /// T_hb_timeout: worker heartbeat timeout before moving offline.
    #[arg(long, default_value_t = 90)]
    pub heartbeat_timeout_secs: u64,

    /// Maximum chain-mode request payload before the gateway returns 413.
    #[arg(long, default_value_t = bridge_common::config::DEFAULT_MAX_PAYLOAD_BYTES)]
    pub max_payload_bytes: usize,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "kebab-case")]
pub enum Mode {
    Direct,
    Chain,
    Hybrid,
}

#[derive(Args, Debug)]
pub struct GatewayArgs {
    #[command(flatten)]
    pub chain: ChainArgs,

    #[command(flatten)]
    pub listen: GatewayListenArgs,

    #[command(flatten)]
    pub stake: StakeThresholdArgs,

    #[command(flatten)]
    pub timeouts: TimeoutArgs,

    /// Direct-mode proxy target: a kubectl-compatible control plane endpoint.
    #[arg(long)]
    pub control_plane_url: String,

    /// Path to the control plane's kubeconfig, used by the dispatcher.
    #[arg(long)]
    pub kubeconfig: PathBuf,

    /// Request routing mode.
    #[arg(long, value_enum, default_value_t = Mode::Hybrid)]
    pub mode: Mode,

    /// Directory for the registry snapshot and optional stake cache
    /// persistence.
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// PEM certificate chain for the gateway's TLS listener. Required
    /// unless `--allow-loopback-http` is set and `--listen-addr` is a
    /// loopback address.
    #[arg(long)]
    pub tls_cert_path: Option<PathBuf>,

    /// PEM private key matching `--tls-cert-path`.
    #[arg(long)]
    pub tls_key_path: Option<PathBuf>,

    /// Install a Prometheus recorder and serve it on `/metrics`.
    #[arg(long, default_value_t = false)]
    pub metrics_enabled: bool,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub chain: ChainArgs,

    /// This node's unique worker id.
    #[arg(long)]
    pub node_id: String,

    /// Stake amount to register with, in whole tokens.
    #[arg(long)]
    pub amount_tokens: f64,

    /// Object id of the coin to stake.
    #[arg(long)]
    pub stake_coin_object: String,

    /// How often to poll the chain for our own `JoinTokenSetEvent` while
    /// waiting to be assigned a token, in seconds.
    #[arg(long, default_value_t = 2)]
    pub join_poll_secs: u64,

    /// How often to send a heartbeat to the gateway once active, in seconds.
    #[arg(long, default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// The gateway's HTTPS base URL, used for the heartbeat admin endpoint.
    #[arg(long)]
    pub gateway_url: String,

    /// Control plane endpoint the node agent joins against.
    #[arg(long)]
    pub control_plane_url: String,

    /// Path to the control plane's kubeconfig.
    #[arg(long)]
    pub kubeconfig: PathBuf,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub chain: ChainArgs,

    #[arg(long)]
    pub listen_addr: Option<String>,
}
