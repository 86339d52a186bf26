//! K8s Dispatcher: turns each allow-listed chain event into the matching
//! registry mutation, `kubectl` invocation, or correlator delivery, bounded
//! by a fixed concurrency limit so one slow worker can't starve the others.

pub mod kubectl;

use crate::correlator::Correlator;
use crate::registry::{RegistryError, WorkerRegistry, WorkerStatus};
use crate::signing::TxSubmitter;
use base64::{engine::general_purpose::STANDARD, Engine};
use bridge_common::chain::abi;
use bridge_common::chain::events::ChainEvent;
use bridge_common::chain::ChainClientError;
use bridge_common::crypto::WalletAddress;
use bridge_common::k8s::K8sApiResponse;
use dashmap::DashSet;
use kubectl::{build_command, CommandRunner};
use log::{error, info, warn};
use rand::RngCore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    submitter: Arc<TxSubmitter>,
    correlator: Arc<Correlator>,
    kubeconfig: PathBuf,
    runner: Arc<dyn CommandRunner>,
    worker_registry_object: String,
    k8s_scheduler_object: String,
    response_ttl: Duration,
    inflight: Arc<Semaphore>,
    /// `request_id`s already run against `kubectl`, so a chain event
    /// redelivered under the at-least-once guarantee triggers the
    /// subprocess at most once.
    dispatched_requests: DashSet<String>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<WorkerRegistry>,
        submitter: Arc<TxSubmitter>,
        correlator: Arc<Correlator>,
        kubeconfig: PathBuf,
        runner: Arc<dyn CommandRunner>,
        worker_registry_object: impl Into<String>,
        k8s_scheduler_object: impl Into<String>,
        response_ttl: Duration,
        max_inflight: usize,
    ) -> Self {
        Self {
            registry,
            submitter,
            correlator,
            kubeconfig,
            runner,
            worker_registry_object: worker_registry_object.into(),
            k8s_scheduler_object: k8s_scheduler_object.into(),
            response_ttl,
            inflight: Arc::new(Semaphore::new(max_inflight)),
            dispatched_requests: DashSet::new(),
        }
    }

    /// Drain `events` until the channel closes, handling each one on its own
    /// task gated by the shared concurrency permit. Queue depth is bounded
    /// by the channel's own capacity, supplied by the caller.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ChainEvent>) {
        while let Some(event) = events.recv().await {
            let permit = self.inflight.clone().acquire_owned().await.expect("semaphore is never closed");
            let this = self.clone();
            tokio::spawn(async move {
                this.handle_event(event).await;
                drop(permit);
            });
        }
    }

    pub async fn handle_event(&self, event: ChainEvent) {
        let kind = event_kind(&event);
        let started = std::time::Instant::now();

        let result = match event {
            ChainEvent::WorkerRegistered { event, .. } => self.on_worker_registered(event).await,
            ChainEvent::JoinTokenSet { event, .. } => self.on_join_token_set(event),
            ChainEvent::WorkerStatusChanged { event, .. } => self.on_worker_status_changed(event),
            ChainEvent::K8sApiRequestScheduled { event, .. } => self.on_k8s_request_scheduled(event).await,
            ChainEvent::K8sApiResult { event, timestamp_ms, .. } => {
                self.on_k8s_result(event, timestamp_ms);
                Ok(())
            }
            ChainEvent::WorkerAssigned { event, .. } => {
                info!("worker {} assigned to request {}", event.node_id, event.request_id);
                Ok(())
            }
            ChainEvent::StakeDeposited { event, .. } => {
                info!("observed stake deposit of {} from {}", event.amount, event.staker_address);
                Ok(())
            }
        };

        metrics::histogram!("dispatcher_event_duration_seconds", "event" => kind).record(started.elapsed().as_secs_f64());
        match &result {
            Ok(()) => metrics::counter!("dispatcher_events_total", "event" => kind, "outcome" => "ok").increment(1),
            Err(_) => metrics::counter!("dispatcher_events_total", "event" => kind, "outcome" => "error").increment(1),
        }

        if let Err(err) = result {
            error!("dispatcher failed to handle event: {err}");
        }
    }

    async fn on_worker_registered(&self, event: bridge_common::chain::events::WorkerRegisteredEvent) -> Result<(), DispatchError> {
        let owner = WalletAddress::from_hex(&event.owner).map_err(|e| DispatchError::Malformed(e.to_string()))?;
        match self.registry.register(&event.node_id, owner, event.amount) {
            Ok(()) | Err(RegistryError::ConflictingWorker(_)) => {}
            Err(err) => return Err(DispatchError::Registry(err)),
        }

        let mut token_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token_bytes);
        let join_token = hex::encode(token_bytes);

        let call = abi::set_join_token(&self.worker_registry_object, &event.node_id, &join_token);
        self.submitter.submit(call).await?;
        info!("issued join token for worker {}", event.node_id);
        Ok(())
    }

    fn on_join_token_set(&self, event: bridge_common::chain::events::JoinTokenSetEvent) -> Result<(), DispatchError> {
        match self.registry.assign_join_token(&event.node_id, event.join_token) {
            Ok(()) | Err(RegistryError::UnknownWorker(_)) => Ok(()),
            Err(err) => Err(DispatchError::Registry(err)),
        }
    }

    fn on_worker_status_changed(&self, event: bridge_common::chain::events::WorkerStatusChangedEvent) -> Result<(), DispatchError> {
        let status = parse_status(&event.new_status).ok_or_else(|| DispatchError::Malformed(format!("unknown status {}", event.new_status)))?;
        match self.registry.update_status(&event.node_id, status) {
            Ok(()) | Err(RegistryError::UnknownWorker(_)) => Ok(()),
            Err(err) => Err(DispatchError::Registry(err)),
        }
    }

    async fn on_k8s_request_scheduled(&self, event: bridge_common::chain::events::K8sApiRequestScheduledEvent) -> Result<(), DispatchError> {
        if !self.dispatched_requests.insert(event.request_id.clone()) {
            info!("dropping replayed k8s request {}: already dispatched", event.request_id);
            return Ok(());
        }

        let payload = STANDARD.decode(event.payload_b64.as_bytes()).map_err(|e| DispatchError::Malformed(e.to_string()))?;
        let command = build_command(event.method, &event.resource_type, &event.namespace, event.name.as_deref(), &payload);

        let (status_code, body) = match self.runner.run(&command.argv, &self.kubeconfig, command.stdin.as_deref()).await {
            Ok(output) if output.success => (200u16, output.stdout),
            Ok(output) => {
                warn!("kubectl failed for request {}: {}", event.request_id, String::from_utf8_lossy(&output.stderr));
                (500u16, output.stderr)
            }
            Err(err) => {
                error!("failed to spawn kubectl for request {}: {err}", event.request_id);
                (500u16, err.to_string().into_bytes())
            }
        };

        let body_b64 = STANDARD.encode(&body);
        let call = abi::store_k8s_response(&event.request_id, status_code, &body_b64);
        self.submitter.submit(call).await?;
        Ok(())
    }

    fn on_k8s_result(&self, event: bridge_common::chain::events::K8sApiResultEvent, timestamp_ms: u64) {
        let Ok(body) = STANDARD.decode(event.body_b64.as_bytes()) else {
            warn!("dropping chain response for {} with unparseable payload", event.request_id);
            return;
        };
        self.correlator.complete(K8sApiResponse {
            request_id: event.request_id,
            status_code: event.status_code,
            body,
            processed_at_ms: timestamp_ms,
            expires_at_ms: timestamp_ms + self.response_ttl.as_millis() as u64,
        });
    }

    /// Exposed so the worker subcommand's own onboarding flow (outside the
    /// event loop) can reuse the same object ids the dispatcher was built
    /// with when it submits the initial `stake_and_register_worker` call.
    pub fn k8s_scheduler_object(&self) -> &str {
        &self.k8s_scheduler_object
    }
}

fn event_kind(event: &ChainEvent) -> &'static str {
    match event {
        ChainEvent::WorkerRegistered { .. } => "worker_registered",
        ChainEvent::JoinTokenSet { .. } => "join_token_set",
        ChainEvent::WorkerStatusChanged { .. } => "worker_status_changed",
        ChainEvent::K8sApiRequestScheduled { .. } => "k8s_api_request_scheduled",
        ChainEvent::K8sApiResult { .. } => "k8s_api_result",
        ChainEvent::WorkerAssigned { .. } => "worker_assigned",
        ChainEvent::StakeDeposited { .. } => "stake_deposited",
    }
}

fn parse_status(raw: &str) -> Option<WorkerStatus> {
    match raw.to_ascii_lowercase().as_str() {
        "pending" => Some(WorkerStatus::Pending),
        "active" => Some(WorkerStatus::Active),
        "busy" => Some(WorkerStatus::Busy),
        "offline" => Some(WorkerStatus::Offline),
        "slashed" => Some(WorkerStatus::Slashed),
        _ => None,
    }
}

#[derive(thiserror::Error, Debug)]
enum DispatchError {
    #[error("registry rejected the transition: {0}")]
    Registry(#[from] RegistryError),
    #[error("chain call failed: {0}")]
    Chain(#[from] ChainClientError),
    #[error("malformed event payload: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_common::chain::client::{EventPage, TxResult};
    use bridge_common::chain::events::{JoinTokenSetEvent, K8sApiRequestScheduledEvent, K8sApiResultEvent, RawEvent, WorkerRegisteredEvent, WorkerStatusChangedEvent};
    use bridge_common::chain::ChainClient;
    use bridge_common::crypto::SignerKey;
    use bridge_common::k8s::{HttpMethod, Priority};
    use bridge_common::stake::StakeRecord;
    use kubectl::CommandOutput;
    use std::io;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeChain {
        calls: AsyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn query_events(&self, _module: &str, _cursor: Option<&str>) -> Result<EventPage, ChainClientError> {
            Ok(EventPage { events: Vec::<RawEvent>::new(), next_cursor: None })
        }

        async fn execute_transaction_block(&self, call: bridge_common::chain::abi::ContractCall, _signer: &SignerKey) -> Result<TxResult, ChainClientError> {
            self.calls.lock().await.push(call.function.to_string());
            Ok(TxResult { digest: "d".into() })
        }

        async fn get_owned_objects(&self, _wallet_hex: &str) -> Result<Vec<StakeRecord>, ChainClientError> {
            Ok(vec![])
        }
    }

    struct RecordingRunner {
        invocations: Mutex<Vec<Vec<String>>>,
        success: bool,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, argv: &[String], _kubeconfig: &std::path::Path, _stdin: Option<&[u8]>) -> io::Result<CommandOutput> {
            self.invocations.lock().unwrap().push(argv.to_vec());
            if self.success {
                Ok(CommandOutput { success: true, stdout: b"{\"items\":[]}".to_vec(), stderr: vec![] })
            } else {
                Ok(CommandOutput { success: false, stdout: vec![], stderr: b"not found".to_vec() })
            }
        }
    }

    fn dispatcher(chain: Arc<FakeChain>, runner: Arc<RecordingRunner>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(WorkerRegistry::new(0)),
            Arc::new(TxSubmitter::new(chain, SignerKey::generate())),
            Arc::new(Correlator::new()),
            PathBuf::from("/tmp/kubeconfig"),
            runner,
            "0xregistry".to_string(),
            "0xscheduler".to_string(),
            Duration::from_secs(300),
            4,
        )
    }

    #[tokio::test]
    async fn worker_registered_issues_join_token_and_registers() {
        let chain = Arc::new(FakeChain { calls: AsyncMutex::new(vec![]) });
        let runner = Arc::new(RecordingRunner { invocations: Mutex::new(vec![]), success: true });
        let dispatcher = dispatcher(chain.clone(), runner);

        let owner = SignerKey::generate().wallet();
        dispatcher
            .handle_event(ChainEvent::WorkerRegistered {
                digest: "d1".into(),
                timestamp_ms: 1,
                event: WorkerRegisteredEvent { node_id: "w1".into(), owner: owner.to_hex(), amount: 10 },
            })
            .await;

        assert!(dispatcher.registry.summary("w1").is_some());
        assert_eq!(chain.calls.lock().await.as_slice(), ["set_join_token"]);
    }

    #[tokio::test]
    async fn join_token_set_is_idempotent_for_unknown_worker() {
        let chain = Arc::new(FakeChain { calls: AsyncMutex::new(vec![]) });
        let runner = Arc::new(RecordingRunner { invocations: Mutex::new(vec![]), success: true });
        let dispatcher = dispatcher(chain, runner);

        dispatcher
            .handle_event(ChainEvent::JoinTokenSet {
                digest: "d1".into(),
                timestamp_ms: 1,
                event: JoinTokenSetEvent { node_id: "ghost".into(), join_token: "t".into() },
            })
            .await;
        // No panic, no error surfaced: an event for a worker this replica
        // hasn't seen register yet is simply not actionable here.
    }

    #[tokio::test]
    async fn k8s_request_scheduled_runs_kubectl_and_submits_response() {
        let chain = Arc::new(FakeChain { calls: AsyncMutex::new(vec![]) });
        let runner = Arc::new(RecordingRunner { invocations: Mutex::new(vec![]), success: true });
        let dispatcher = dispatcher(chain.clone(), runner.clone());

        dispatcher
            .handle_event(ChainEvent::K8sApiRequestScheduled {
                digest: "d1".into(),
                timestamp_ms: 1,
                event: K8sApiRequestScheduledEvent {
                    request_id: "r1".into(),
                    method: HttpMethod::Get,
                    path: "/api/v1/pods".into(),
                    namespace: "default".into(),
                    resource_type: "pods".into(),
                    name: None,
                    payload_b64: STANDARD.encode(b""),
                    requester: "0xabc".into(),
                    seal_token_ref: "ref".into(),
                    priority: Priority::Normal,
                },
            })
            .await;

        assert_eq!(runner.invocations.lock().unwrap().len(), 1);
        assert_eq!(chain.calls.lock().await.as_slice(), ["store_k8s_response"]);
    }

    #[tokio::test]
    async fn kubectl_failure_still_submits_a_response() {
        let chain = Arc::new(FakeChain { calls: AsyncMutex::new(vec![]) });
        let runner = Arc::new(RecordingRunner { invocations: Mutex::new(vec![]), success: false });
        let dispatcher = dispatcher(chain.clone(), runner);

        dispatcher
            .handle_event(ChainEvent::K8sApiRequestScheduled {
                digest: "d1".into(),
                timestamp_ms: 1,
                event: K8sApiRequestScheduledEvent {
                    request_id: "r1".into(),
                    method: HttpMethod::Delete,
                    path: "/api/v1/pods/web-0".into(),
                    namespace: "default".into(),
                    resource_type: "pods".into(),
                    name: Some("web-0".into()),
                    payload_b64: STANDARD.encode(b""),
                    requester: "0xabc".into(),
                    seal_token_ref: "ref".into(),
                    priority: Priority::Normal,
                },
            })
            .await;

        assert_eq!(chain.calls.lock().await.as_slice(), ["store_k8s_response"]);
    }

    #[tokio::test]
    async fn k8s_result_wakes_the_correlator() {
        let chain = Arc::new(FakeChain { calls: AsyncMutex::new(vec![]) });
        let runner = Arc::new(RecordingRunner { invocations: Mutex::new(vec![]), success: true });
        let dispatcher = dispatcher(chain, runner);

        let handle = dispatcher.correlator.register("r1".into(), Duration::from_secs(5), std::time::Instant::now()).unwrap();
        dispatcher
            .handle_event(ChainEvent::K8sApiResult {
                digest: "d1".into(),
                timestamp_ms: 1_000,
                event: K8sApiResultEvent { request_id: "r1".into(), status_code: 200, body_b64: STANDARD.encode(b"ok") },
            })
            .await;

        let outcome = crate::correlator::await_response(handle, &dispatcher.correlator, Duration::from_secs(1)).await;
        assert_eq!(outcome, crate::correlator::AwaitOutcome::Response(K8sApiResponse {
            request_id: "r1".into(),
            status_code: 200,
            body: b"ok".to_vec(),
            processed_at_ms: 1_000,
            expires_at_ms: 1_000 + 300_000,
        }));
    }

    #[tokio::test]
    async fn replayed_k8s_request_runs_kubectl_exactly_once() {
        let chain = Arc::new(FakeChain { calls: AsyncMutex::new(vec![]) });
        let runner = Arc::new(RecordingRunner { invocations: Mutex::new(vec![]), success: true });
        let dispatcher = dispatcher(chain.clone(), runner.clone());

        let event = || ChainEvent::K8sApiRequestScheduled {
            digest: "d1".into(),
            timestamp_ms: 1,
            event: K8sApiRequestScheduledEvent {
                request_id: "r1".into(),
                method: HttpMethod::Get,
                path: "/api/v1/pods".into(),
                namespace: "default".into(),
                resource_type: "pods".into(),
                name: None,
                payload_b64: STANDARD.encode(b""),
                requester: "0xabc".into(),
                seal_token_ref: "ref".into(),
                priority: Priority::Normal,
            },
        };

        dispatcher.handle_event(event()).await;
        dispatcher.handle_event(event()).await;

        assert_eq!(runner.invocations.lock().unwrap().len(), 1, "kubectl must run exactly once despite redelivery");
        assert_eq!(chain.calls.lock().await.as_slice(), ["store_k8s_response"], "only the first delivery writes a chain response");
    }

    #[tokio::test]
    async fn worker_status_changed_transitions_registry() {
        let chain = Arc::new(FakeChain { calls: AsyncMutex::new(vec![]) });
        let runner = Arc::new(RecordingRunner { invocations: Mutex::new(vec![]), success: true });
        let dispatcher = dispatcher(chain, runner);

        dispatcher.registry.register("w1", SignerKey::generate().wallet(), 10).unwrap();
        dispatcher.registry.assign_join_token("w1", "t".into()).unwrap();
        dispatcher.registry.record_heartbeat("w1", std::time::Instant::now()).unwrap();

        dispatcher
            .handle_event(ChainEvent::WorkerStatusChanged {
                digest: "d1".into(),
                timestamp_ms: 1,
                event: WorkerStatusChangedEvent { node_id: "w1".into(), new_status: "Busy".into(), timestamp_ms: 1 },
            })
            .await;

        assert_eq!(dispatcher.registry.summary("w1").unwrap().status, WorkerStatus::Busy);
    }
}
