//! In-process scenario tests exercising more than one component together,
//! mirroring the integration style under `daemon/tests/` in the corpus this
//! crate is adapted from: build the real components, drive them with
//! in-memory fakes for the chain RPC client and the `kubectl` subprocess,
//! never a live chain or cluster.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bridge::auth::StakeValidator;
use bridge::correlator::{await_response, AwaitOutcome, Correlator, CorrelatorError};
use bridge::dispatcher::kubectl::{CommandOutput, CommandRunner};
use bridge::dispatcher::Dispatcher;
use bridge::registry::{WorkerRegistry, WorkerStatus};
use bridge::signing::TxSubmitter;
use bridge_common::chain::abi::ContractCall;
use bridge_common::chain::client::{ChainClientError, EventPage, TxResult};
use bridge_common::chain::events::{ChainEvent, K8sApiRequestScheduledEvent, RawEvent, WorkerRegisteredEvent};
use bridge_common::chain::ChainClient;
use bridge_common::crypto::SignerKey;
use bridge_common::k8s::{HttpMethod, Priority};
use bridge_common::stake::{StakeRecord, StakeStatus, StakeType, TierThresholds};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A chain client whose owned-objects answer is keyed by wallet, and whose
/// RPC calls can be switched off mid-test to simulate an outage.
struct FakeChain {
    stakes: std::collections::HashMap<String, u64>,
    calls: AtomicU64,
    down: AtomicBool,
}

impl FakeChain {
    fn new() -> Self {
        Self { stakes: std::collections::HashMap::new(), calls: AtomicU64::new(0), down: AtomicBool::new(false) }
    }

    fn with_stake(mut self, wallet_hex: &str, tokens: f64) -> Self {
        self.stakes.insert(wallet_hex.to_string(), (tokens * bridge_common::config::COIN_VALUE as f64) as u64);
        self
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn query_events(&self, _module: &str, _cursor: Option<&str>) -> Result<EventPage, ChainClientError> {
        Ok(EventPage { events: Vec::<RawEvent>::new(), next_cursor: None })
    }

    async fn execute_transaction_block(&self, _call: ContractCall, _signer: &SignerKey) -> Result<TxResult, ChainClientError> {
        Ok(TxResult { digest: "d".into() })
    }

    async fn get_owned_objects(&self, wallet_hex: &str) -> Result<Vec<StakeRecord>, ChainClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(ChainClientError::Unavailable { attempts: 3 });
        }
        let amount = self.stakes.get(wallet_hex).copied().unwrap_or(0);
        let wallet = bridge_common::crypto::WalletAddress::from_hex(wallet_hex).unwrap();
        Ok(vec![StakeRecord { staker_address: wallet, node_id: None, amount, status: StakeStatus::Active, stake_type: StakeType::User }])
    }
}

struct RecordingRunner {
    invocations: Mutex<Vec<Vec<String>>>,
}

impl RecordingRunner {
    fn new() -> Self {
        Self { invocations: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, argv: &[String], _kubeconfig: &std::path::Path, _stdin: Option<&[u8]>) -> io::Result<CommandOutput> {
        self.invocations.lock().unwrap().push(argv.to_vec());
        Ok(CommandOutput { success: true, stdout: b"{\"items\":[]}".to_vec(), stderr: Vec::new() })
    }
}

fn k8s_scheduled(request_id: &str) -> ChainEvent {
    ChainEvent::K8sApiRequestScheduled {
        digest: format!("d-{request_id}"),
        timestamp_ms: 1,
        event: K8sApiRequestScheduledEvent {
            request_id: request_id.to_string(),
            method: HttpMethod::Get,
            path: "/api/v1/pods".to_string(),
            namespace: "default".to_string(),
            resource_type: "pods".to_string(),
            name: None,
            payload_b64: STANDARD.encode(b""),
            requester: "0xabc".to_string(),
            seal_token_ref: "ref".to_string(),
            priority: Priority::Normal,
        },
    }
}

/// Scenario 1: tokens for three wallets at 0.3 / 1.5 / 10 tokens. Reads
/// should come back 403 / 200 / 200; writes 403 / 200 / 200 (tier-equivalent
/// of the spec's 200-or-201).
#[tokio::test]
async fn tiered_permission_matches_expected_outcomes_per_wallet() {
    let w1 = SignerKey::generate().wallet();
    let w2 = SignerKey::generate().wallet();
    let w3 = SignerKey::generate().wallet();
    let chain = Arc::new(FakeChain::new().with_stake(&w1.to_hex(), 0.3).with_stake(&w2.to_hex(), 1.5).with_stake(&w3.to_hex(), 10.0));
    let validator = StakeValidator::new(chain, TierThresholds::default(), Duration::from_secs(300), Duration::from_secs(60));

    for (wallet, expect_authenticated) in [(w1, false), (w2, true), (w3, true)] {
        let (caps, _amount) = validator.validate(wallet, 0).await.unwrap();
        assert_eq!(caps.is_authenticated(), expect_authenticated, "GET pods for {wallet}");
        if expect_authenticated {
            assert!(caps.allows("pods", "read"));
        }
    }

    // POST /api/v1/pods is a write: W1 still rejected, W2 (user tier) and
    // W3 (admin tier) both granted.
    for (wallet, expect_write) in [(w1, false), (w2, true), (w3, true)] {
        let (caps, _amount) = validator.validate(wallet, 0).await.unwrap();
        assert_eq!(caps.allows("pods", "write"), expect_write, "POST pods for {wallet}");
    }
}

/// Scenario 2: end-to-end worker onboarding from a `WorkerRegisteredEvent`
/// through to `active` on first heartbeat.
#[tokio::test]
async fn worker_onboarding_reaches_active_on_first_heartbeat() {
    let registry = Arc::new(WorkerRegistry::new(0));
    let chain = Arc::new(FakeChain::new());
    let runner = Arc::new(RecordingRunner::new());
    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::new(TxSubmitter::new(chain, SignerKey::generate())),
        Arc::new(Correlator::new()),
        PathBuf::from("/tmp/kubeconfig"),
        runner,
        "0xregistry".to_string(),
        "0xscheduler".to_string(),
        Duration::from_secs(300),
        4,
    );

    let owner = SignerKey::generate().wallet();
    dispatcher
        .handle_event(ChainEvent::WorkerRegistered {
            digest: "d1".into(),
            timestamp_ms: 1,
            event: WorkerRegisteredEvent { node_id: "worker-001".into(), owner: owner.to_hex(), amount: bridge_common::config::COIN_VALUE },
        })
        .await;
    assert_eq!(registry.summary("worker-001").unwrap().status, WorkerStatus::Pending);

    // The dispatcher issued a `set_join_token` transaction as a side effect
    // of registration; the listener feeding that event back is exercised
    // separately, so here the staker's own view of the token is simulated
    // directly through the registry, matching what the worker agent does
    // once it observes its `JoinTokenSetEvent`.
    registry.assign_join_token("worker-001", "join-token-abc".to_string()).unwrap();
    registry.record_heartbeat("worker-001", Instant::now()).unwrap();

    assert_eq!(registry.summary("worker-001").unwrap().status, WorkerStatus::Active);
}

/// Scenario 3: during a chain outage within `T_stale_grace`, a wallet with a
/// warm cache entry keeps succeeding while a wallet never queried fails.
#[tokio::test]
async fn chain_outage_serves_cached_wallets_and_rejects_uncached_ones() {
    let cached_wallet = SignerKey::generate().wallet();
    let uncached_wallet = SignerKey::generate().wallet();
    let chain = Arc::new(FakeChain::new().with_stake(&cached_wallet.to_hex(), 2.0));
    let validator = StakeValidator::new(chain.clone(), TierThresholds::default(), Duration::from_secs(300), Duration::from_secs(60));

    // Warm the cache for `cached_wallet` before the outage.
    validator.validate(cached_wallet, 0).await.unwrap();

    chain.down.store(true, Ordering::SeqCst);

    let cached_result = validator.validate(cached_wallet, 0).await;
    assert!(cached_result.is_ok(), "cached wallet should be served from the stale-grace cache");

    let uncached_result = validator.validate(uncached_wallet, 0).await;
    assert!(matches!(uncached_result, Err(bridge::auth::StakeError::ChainUnavailable(_))), "uncached wallet has nothing to fall back on");
}

/// Scenario 4: the listener's at-least-once delivery can redeliver the same
/// `K8sApiRequestScheduledEvent`; the dispatcher must still run `kubectl`
/// exactly once and record exactly one chain response.
#[tokio::test]
async fn replaying_a_k8s_request_event_dispatches_kubectl_once() {
    let registry = Arc::new(WorkerRegistry::new(0));
    let chain = Arc::new(FakeChain::new());
    let runner = Arc::new(RecordingRunner::new());
    let dispatcher = Dispatcher::new(
        registry,
        Arc::new(TxSubmitter::new(chain.clone(), SignerKey::generate())),
        Arc::new(Correlator::new()),
        PathBuf::from("/tmp/kubeconfig"),
        runner.clone(),
        "0xregistry".to_string(),
        "0xscheduler".to_string(),
        Duration::from_secs(300),
        4,
    );

    dispatcher.handle_event(k8s_scheduled("r1")).await;
    dispatcher.handle_event(k8s_scheduled("r1")).await;

    assert_eq!(runner.invocations.lock().unwrap().len(), 1);
    assert_eq!(chain.calls.load(Ordering::SeqCst), 0, "get_owned_objects is never called by the dispatcher path");
}

/// Scenario 5: a correlator wait past its timeout resolves to `Timeout`
/// (the gateway's 504), and a chain response that arrives afterward is
/// dropped cleanly rather than corrupting state for a later request.
#[tokio::test]
async fn correlator_timeout_then_late_response_is_dropped_cleanly() {
    let correlator = Correlator::new();
    let handle = correlator.register("r1".to_string(), Duration::from_millis(20), Instant::now()).unwrap();

    let outcome = await_response(handle, &correlator, Duration::from_millis(20)).await;
    assert_eq!(outcome, AwaitOutcome::Timeout);
    assert!(correlator.is_empty(), "the timed-out entry must have been cleaned up");

    // The chain response shows up late; it must not panic or resurrect state.
    correlator.complete(bridge_common::k8s::K8sApiResponse { request_id: "r1".to_string(), status_code: 200, body: vec![], processed_at_ms: 0, expires_at_ms: 0 });
    assert!(correlator.is_empty());

    // The correlator is still usable for a fresh request afterward.
    let handle2 = correlator.register("r2".to_string(), Duration::from_secs(5), Instant::now()).unwrap();
    correlator.complete(bridge_common::k8s::K8sApiResponse { request_id: "r2".to_string(), status_code: 200, body: b"ok".to_vec(), processed_at_ms: 1, expires_at_ms: 2 });
    let outcome = await_response(handle2, &correlator, Duration::from_secs(5)).await;
    assert!(matches!(outcome, AwaitOutcome::Response(_)));
}

/// A second `register()` for a `request_id` already in flight must fail
/// rather than silently displace the first registrant's handle: the first
/// caller's response must still arrive, and the intruding second caller
/// must not receive anything at all.
#[tokio::test]
async fn duplicate_registration_fails_and_first_caller_still_completes() {
    let correlator = Correlator::new();
    let now = Instant::now();

    let first = correlator.register("r1".to_string(), Duration::from_secs(5), now).unwrap();
    let err = correlator.register("r1".to_string(), Duration::from_secs(5), now).unwrap_err();
    assert_eq!(err, CorrelatorError::DuplicateRequest("r1".to_string()));

    correlator.complete(bridge_common::k8s::K8sApiResponse { request_id: "r1".to_string(), status_code: 200, body: b"ok".to_vec(), processed_at_ms: 1, expires_at_ms: 2 });
    let outcome = await_response(first, &correlator, Duration::from_secs(5)).await;
    assert!(matches!(outcome, AwaitOutcome::Response(_)), "the original registrant must still be the one woken");
}

/// Scenario 6: shutdown drain. Every in-flight correlator registration gets
/// a terminal outcome (response or timeout) rather than being silently
/// cancelled when the sweep that models shutdown runs.
#[tokio::test]
async fn shutdown_drain_resolves_every_in_flight_request() {
    let correlator = Arc::new(Correlator::new());
    let now = Instant::now();

    let mut handles = Vec::new();
    for i in 0..5 {
        handles.push(correlator.register(format!("r{i}"), Duration::from_millis(50), now).unwrap());
    }

    // Two requests get a real response before the drain deadline passes...
    correlator.complete(bridge_common::k8s::K8sApiResponse { request_id: "r0".to_string(), status_code: 200, body: vec![], processed_at_ms: 0, expires_at_ms: 0 });
    correlator.complete(bridge_common::k8s::K8sApiResponse { request_id: "r1".to_string(), status_code: 200, body: vec![], processed_at_ms: 0, expires_at_ms: 0 });

    // ...and the drain's own sweep times out whatever's left, matching what
    // the gateway's periodic correlator sweep does during a live shutdown.
    correlator.sweep(now + Duration::from_millis(100));

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(await_response(handle, &correlator, Duration::from_millis(10)).await);
    }

    let responded = outcomes.iter().filter(|o| matches!(o, AwaitOutcome::Response(_))).count();
    let timed_out = outcomes.iter().filter(|o| matches!(o, AwaitOutcome::Timeout)).count();
    assert_eq!(responded, 2, "the two completed requests must surface their response");
    assert_eq!(timed_out, 3, "every other in-flight request must resolve, never hang");
}
