//! Authenticating Gateway: the HTTPS front door kubectl talks to. Verifies
//! a seal token, resolves it to a capability set, checks the requested verb
//! against it, and routes the request either straight through to the
//! control plane (`direct` mode) or onto the chain (`chain` mode), with
//! `hybrid` mode sending reads direct and writes to chain.

mod parse;
mod tls;

use crate::auth::StakeError;
use crate::config::{GatewayArgs, Mode};
use crate::correlator::{await_response, AwaitOutcome, Correlator};
use crate::dispatcher::kubectl::RealKubectlRunner;
use crate::dispatcher::Dispatcher;
use crate::registry::WorkerRegistry;
use crate::signing::TxSubmitter;
use crate::{auth::StakeValidator, listener};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use base64::{engine::general_purpose::STANDARD, Engine};
use bridge_common::chain::{abi, ChainClient, JsonRpcChainClient};
use bridge_common::crypto::SignerKey;
use bridge_common::k8s::{K8sApiRequest, Priority};
use bridge_common::seal_token::{SealToken, SealTokenError};
use bridge_common::stake::TierThresholds;
use bridge_common::status::{ErrorKind, KubeStatus};
use anyhow::Context;
use log::{info, warn};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct GatewayState {
    mode: Mode,
    validator: Arc<StakeValidator>,
    registry: Arc<WorkerRegistry>,
    correlator: Arc<Correlator>,
    submitter: Arc<TxSubmitter>,
    http_client: reqwest::Client,
    control_plane_url: String,
    k8s_scheduler_object: String,
    max_payload_bytes: usize,
    request_timeout: Duration,
    challenge_ttl: Duration,
    draining: AtomicBool,
    metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

fn kube_error(kind: ErrorKind, message: impl Into<String>) -> HttpResponse {
    let status = KubeStatus::failure(kind, message);
    HttpResponse::build(actix_web::http::StatusCode::from_u16(status.code).unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)).json(status)
}

fn extract_seal_token(req: &HttpRequest) -> Result<SealToken, SealTokenError> {
    if let Some(header) = req.headers().get("Authorization").and_then(|v| v.to_str().ok()) {
        if let Some(encoded) = header.strip_prefix("Bearer ") {
            return SealToken::decode(encoded);
        }
    }
    if let Some(header) = req.headers().get("X-Kubectl-Token").and_then(|v| v.to_str().ok()) {
        return SealToken::decode(header);
    }

    let wallet = req.headers().get("X-Seal-Wallet").and_then(|v| v.to_str().ok());
    let signature = req.headers().get("X-Seal-Signature").and_then(|v| v.to_str().ok());
    let challenge = req.headers().get("X-Seal-Challenge").and_then(|v| v.to_str().ok());
    match (wallet, signature, challenge) {
        (Some(w), Some(s), Some(c)) => SealToken::from_parts(w, s, c),
        _ => Err(SealTokenError::MissingToken),
    }
}

async fn handle(req: HttpRequest, body: web::Bytes, state: web::Data<GatewayState>) -> HttpResponse {
    let started = Instant::now();
    let response = handle_inner(req, body, state).await;

    metrics::histogram!("gateway_request_duration_seconds").record(started.elapsed().as_secs_f64());
    metrics::counter!("gateway_requests_total", "status" => response.status().as_u16().to_string()).increment(1);
    response
}

async fn handle_inner(req: HttpRequest, body: web::Bytes, state: web::Data<GatewayState>) -> HttpResponse {
    if req.path() == "/metrics" {
        if let Some(handle) = &state.metrics_handle {
            return HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(handle.render());
        }
    }

    if state.draining.load(Ordering::SeqCst) {
        return kube_error(ErrorKind::ChainUnavailable, "gateway is draining for shutdown");
    }

    if body.len() > state.max_payload_bytes {
        return kube_error(ErrorKind::PayloadTooLarge, "request payload exceeds the configured maximum");
    }

    let token = match extract_seal_token(&req) {
        Ok(token) => token,
        Err(SealTokenError::MissingToken) => return kube_error(ErrorKind::MissingToken, "no seal token present"),
        Err(err) => return kube_error(ErrorKind::InvalidSignature, err.to_string()),
    };

    if let Err(err) = token.validate(state.challenge_ttl) {
        let kind = match err {
            SealTokenError::ExpiredChallenge { .. } => ErrorKind::ExpiredChallenge,
            _ => ErrorKind::InvalidSignature,
        };
        return kube_error(kind, err.to_string());
    }

    let (capabilities, _amount) = match state.validator.validate(token.wallet_address, 0).await {
        Ok(result) => result,
        Err(StakeError::InsufficientStake { amount_tokens, required_tokens }) => {
            return kube_error(
                ErrorKind::InsufficientStake,
                format!("wallet holds {amount_tokens} tokens, below the minimum of {required_tokens}"),
            );
        }
        Err(StakeError::ChainUnavailable(err)) => return kube_error(ErrorKind::ChainUnavailable, err.to_string()),
    };

    if !capabilities.is_authenticated() {
        return kube_error(ErrorKind::InsufficientStake, "wallet holds no stake");
    }

    if is_worker_connect_path(req.path()) {
        return handle_worker_connect(&state, &req, &token);
    }

    let query: HashMap<String, String> = web::Query::from_query(req.query_string()).map(|q: web::Query<HashMap<String, String>>| q.into_inner()).unwrap_or_default();
    let parsed = match parse::parse_path(req.method().as_str(), req.path(), &query, body.to_vec()) {
        Ok(parsed) => parsed,
        Err(status) => return HttpResponse::build(actix_web::http::StatusCode::from_u16(status.code).unwrap()).json(status),
    };

    if !capabilities.allows(&parsed.resource, parsed.verb.capability_action()) {
        return kube_error(ErrorKind::PermissionDenied, format!("capability {}:{} not granted", parsed.resource, parsed.verb.capability_action()));
    }

    let route_to_chain = match state.mode {
        Mode::Direct => false,
        Mode::Chain => true,
        Mode::Hybrid => parsed.verb.is_mutating(),
    };

    if route_to_chain {
        dispatch_via_chain(&state, &req, &token, parsed).await
    } else {
        proxy_direct(&state, &req, &token, parsed).await
    }
}

/// `/v1-<program>/connect` is the worker-node heartbeat surface: a staker's
/// node agent authenticates with its owner wallet's seal token and the
/// registry records the liveness signal directly, without going through the
/// chain event loop at all.
fn is_worker_connect_path(path: &str) -> bool {
    path.starts_with("/v1-") && path.ends_with("/connect")
}

fn handle_worker_connect(state: &GatewayState, req: &HttpRequest, token: &SealToken) -> HttpResponse {
    let Some(node_id) = req.headers().get("X-Worker-Node-Id").and_then(|v| v.to_str().ok()) else {
        return kube_error(ErrorKind::BadRequest, "X-Worker-Node-Id header is required to connect");
    };

    let Some(summary) = state.registry.summary(node_id) else {
        return kube_error(ErrorKind::NotFound, format!("worker {node_id} is not registered"));
    };
    if summary.owner != token.wallet_address {
        return kube_error(ErrorKind::PermissionDenied, "seal token wallet does not own this worker");
    }

    if let Err(err) = state.registry.record_heartbeat(node_id, Instant::now()) {
        return kube_error(ErrorKind::BadRequest, err.to_string());
    }
    HttpResponse::Ok().finish()
}

async fn proxy_direct(state: &GatewayState, req: &HttpRequest, token: &SealToken, parsed: bridge_common::k8s::ParsedRequest) -> HttpResponse {
    let url = format!("{}{}", state.control_plane_url.trim_end_matches('/'), req.uri());
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .expect("actix Method is always a valid HTTP method");
    let mut builder = state.http_client.request(method, &url);

    for (name, value) in req.headers() {
        let name_lower = name.as_str().to_ascii_lowercase();
        if name_lower == "authorization" || name_lower == "x-kubectl-token" || name_lower.starts_with("x-seal-") || name_lower == "host" {
            continue;
        }
        if let Ok(value) = value.to_str() {
            builder = builder.header(name.as_str(), value);
        }
    }
    builder = builder.header("X-Forwarded-Wallet", token.wallet_address.to_hex());

    match builder.body(parsed.payload).send().await {
        Ok(response) => {
            let status = actix_web::http::StatusCode::from_u16(response.status().as_u16()).unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
            let mut builder = HttpResponse::build(status);
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    builder.insert_header((name.as_str(), value));
                }
            }
            match response.bytes().await {
                Ok(body) => builder.body(body),
                Err(err) => kube_error(ErrorKind::DispatchFailed, err.to_string()),
            }
        }
        Err(err) => kube_error(ErrorKind::ChainUnavailable, format!("control plane proxy failed: {err}")),
    }
}

async fn dispatch_via_chain(state: &GatewayState, req: &HttpRequest, token: &SealToken, parsed: bridge_common::k8s::ParsedRequest) -> HttpResponse {
    let request_id = Uuid::new_v4().to_string();
    let method = parsed.verb.http_method();
    let payload_b64 = STANDARD.encode(&parsed.payload);

    let k8s_request = K8sApiRequest {
        request_id: request_id.clone(),
        method,
        path: req.path().to_string(),
        namespace: parsed.namespace.clone(),
        resource_type: parsed.resource.clone(),
        name: parsed.name.clone(),
        payload: parsed.payload.clone(),
        requester: token.wallet_address.to_hex(),
        seal_token_ref: token.encode(),
        timestamp_ms: now_unix_ms(),
        priority: Priority::Normal,
    };

    let call = abi::submit_k8s_request(
        &state.k8s_scheduler_object,
        &method.to_string(),
        &k8s_request.path,
        &k8s_request.namespace,
        &k8s_request.resource_type,
        k8s_request.name.as_deref(),
        &payload_b64,
    );

    if let Err(err) = state.submitter.submit(call).await {
        return kube_error(ErrorKind::ChainUnavailable, err.to_string());
    }

    let handle = match state.correlator.register(request_id.clone(), state.request_timeout, Instant::now()) {
        Ok(handle) => handle,
        Err(err) => return kube_error(ErrorKind::DispatchFailed, err.to_string()),
    };
    match await_response(handle, &state.correlator, state.request_timeout).await {
        AwaitOutcome::Response(response) => {
            let status = actix_web::http::StatusCode::from_u16(response.status_code).unwrap_or(actix_web::http::StatusCode::OK);
            HttpResponse::build(status).body(response.body)
        }
        AwaitOutcome::Timeout | AwaitOutcome::Cancelled => kube_error(ErrorKind::Timeout, format!("no response for request {request_id} within {:?}", state.request_timeout)),
    }
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis() as u64
}

/// Run the gateway until SIGINT, then drain for at most `T_drain` before
/// the listener tears down. New requests during drain see a 503 rather than
/// connection resets, because the `draining` flag flips before the listener
/// stops accepting connections.
pub async fn run(args: GatewayArgs, signer: SignerKey) -> anyhow::Result<std::process::ExitCode> {
    let cert_path = args.tls_cert_path.clone();
    let key_path = args.tls_key_path.clone();
    let chain: Arc<dyn ChainClient> = Arc::new(JsonRpcChainClient::new(args.chain.chain_rpc.clone(), args.chain.contract_package.clone()));

    let thresholds = TierThresholds {
        user_min_tokens: args.stake.stake_min_user,
        admin_min_tokens: args.stake.stake_min_admin,
        ..TierThresholds::default()
    };
    let validator = Arc::new(StakeValidator::new(
        chain.clone(),
        thresholds,
        Duration::from_secs(args.timeouts.stake_cache_ttl_secs),
        bridge_common::config::default_stale_grace(),
    ));
    let registry = Arc::new(WorkerRegistry::new((args.stake.stake_min_node * bridge_common::config::COIN_VALUE as f64) as u64));
    let correlator = Arc::new(Correlator::new());

    // One submitter per signing identity, shared between the dispatcher's
    // event-driven path and the gateway's own request-handling path, so
    // the two can never submit two chain transactions for this wallet
    // concurrently and race the chain's nonce assignment.
    let submitter = Arc::new(TxSubmitter::new(chain.clone(), signer));

    let (events_tx, events_rx) = tokio::sync::mpsc::channel(bridge_common::config::DEFAULT_QUEUE_MAX);
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        submitter.clone(),
        correlator.clone(),
        args.kubeconfig.clone(),
        Arc::new(RealKubectlRunner),
        format!("{}::worker_registry", args.chain.contract_package),
        format!("{}::k8s_scheduler", args.chain.contract_package),
        Duration::from_secs(args.timeouts.response_ttl_secs),
        bridge_common::config::DEFAULT_MAX_INFLIGHT,
    ));

    tokio::spawn(listener::run_poll(chain.clone(), events_tx.clone(), bridge_common::config::default_poll_interval()));
    if let Some(ws_url) = args.chain.chain_ws.clone() {
        let events_tx = events_tx.clone();
        tokio::spawn(async move { listener::run_push(ws_url, events_tx).await });
    }
    tokio::spawn(dispatcher.clone().run(events_rx));

    {
        let registry = registry.clone();
        let heartbeat_timeout = Duration::from_secs(args.timeouts.heartbeat_timeout_secs);
        let remove_after = bridge_common::config::default_worker_remove_after();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                let now = Instant::now();
                registry.sweep_heartbeat_timeouts(now, heartbeat_timeout);
                registry.purge_stale_offline(now, remove_after);
            }
        });
    }
    {
        let correlator = correlator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bridge_common::config::default_correlator_sweep_interval());
            loop {
                ticker.tick().await;
                correlator.sweep(Instant::now());
            }
        });
    }

    let metrics_handle = if args.metrics_enabled {
        let (recorder, _exporter) = metrics_exporter_prometheus::PrometheusBuilder::new().build().context("failed to build prometheus recorder")?;
        let handle = recorder.handle();
        metrics::set_global_recorder(Box::new(recorder)).context("failed to install prometheus recorder")?;
        info!("prometheus metrics enabled on /metrics");
        Some(handle)
    } else {
        None
    };

    let http_client = reqwest::Client::builder().timeout(Duration::from_secs(args.timeouts.request_timeout_secs)).build()?;
    let state = web::Data::new(GatewayState {
        mode: args.mode,
        validator,
        registry,
        correlator,
        submitter,
        http_client,
        control_plane_url: args.control_plane_url.clone(),
        k8s_scheduler_object: format!("{}::k8s_scheduler", args.chain.contract_package),
        max_payload_bytes: args.timeouts.max_payload_bytes,
        request_timeout: Duration::from_secs(args.timeouts.request_timeout_secs),
        challenge_ttl: Duration::from_secs(args.timeouts.challenge_ttl_secs),
        draining: AtomicBool::new(false),
        metrics_handle,
    });

    let draining_flag = state.clone();
    let bind_addr: IpAddr = args.listen.listen_addr.parse()?;
    let server = HttpServer::new(move || App::new().app_data(state.clone()).default_service(web::route().to(handle)))
        .shutdown_timeout(bridge_common::config::default_drain_timeout().as_secs())
        .disable_signals();

    let server = if let (Some(cert), Some(key)) = (cert_path, key_path) {
        rustls::crypto::ring::default_provider().install_default().ok();
        let tls_config = tls::load_server_config(&cert, &key)?;
        server.bind_rustls_0_23((bind_addr, args.listen.listen_port), tls_config)?
    } else if args.listen.allow_loopback_http && bind_addr.is_loopback() {
        warn!("binding a TLS-less loopback listener; never do this outside local testing");
        server.bind((bind_addr, args.listen.listen_port))?
    } else {
        anyhow::bail!("refusing to bind a non-loopback listener without --tls-cert-path/--tls-key-path");
    };

    info!("gateway listening on {}:{} in {:?} mode", args.listen.listen_addr, args.listen.listen_port, args.mode);
    let running = server.run();
    let handle = running.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("gateway received SIGINT, draining for up to {:?}", bridge_common::config::default_drain_timeout());
            draining_flag.draining.store(true, Ordering::SeqCst);
            handle.stop(true).await;
        }
    });
    running.await?;
    info!("gateway shutdown complete");
    Ok(std::process::ExitCode::from(130))
}
