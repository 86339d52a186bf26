//! Chain Event Listener: pulls allow-listed events off the chain, in poll
//! mode over JSON-RPC or push mode over a websocket subscription, and
//! forwards them in dispatch order to the dispatcher's queue.

use bridge_common::chain::events::{is_allow_listed, parse_event, sort_for_dispatch, ChainEvent, RawEvent};
use bridge_common::chain::ChainClient;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// The on-chain modules this system ever needs to hear from.
pub const LISTENED_MODULES: &[&str] = &["worker_registry", "k8s_scheduler", "k8s_gateway"];

/// Poll every module over JSON-RPC on a fixed interval, advancing each
/// module's cursor only after its batch has been fully forwarded. A
/// subscriber that disconnects before delivery sees the same batch again
/// next tick, which is the at-least-once guarantee this bridge relies on.
pub async fn run_poll(chain: Arc<dyn ChainClient>, sender: mpsc::Sender<ChainEvent>, poll_interval: Duration) {
    let mut cursors: HashMap<&'static str, Option<String>> = LISTENED_MODULES.iter().map(|m| (*m, None)).collect();
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        ticker.tick().await;
        for module in LISTENED_MODULES {
            let cursor = cursors.get(module).cloned().flatten();
            let page = match chain.query_events(module, cursor.as_deref()).await {
                Ok(page) => page,
                Err(err) => {
                    warn!("poll of module {module} failed, will retry next tick: {err}");
                    continue;
                }
            };

            let mut batch = parse_batch(&page.events);
            sort_for_dispatch(&mut batch);

            for event in batch {
                if sender.send(event).await.is_err() {
                    info!("listener shutting down: dispatcher channel closed");
                    return;
                }
            }
            cursors.insert(module, page.next_cursor);
        }
    }
}

fn parse_batch(raw_events: &[RawEvent]) -> Vec<ChainEvent> {
    let mut batch = Vec::with_capacity(raw_events.len());
    for raw in raw_events {
        if !is_allow_listed(&raw.event_type) {
            debug!("skipping event outside the allow-list: {}", raw.event_type);
            continue;
        }
        match parse_event(raw) {
            Ok(Some(event)) => batch.push(event),
            Ok(None) => debug!("skipping event with unrecognized type: {}", raw.event_type),
            Err(err) => warn!("failed to decode allow-listed event {}: {err}", raw.event_type),
        }
    }
    batch
}

/// Subscribe to the chain's event websocket, forwarding events as they
/// arrive. Reconnects with a capped exponential backoff (1s up to 30s) and
/// resumes from the last digest seen so a brief disconnect doesn't replay
/// the entire history, though a gap is still closed by the poll-mode
/// listener's cursor sweep running alongside it in `hybrid` push+poll setups.
pub async fn run_push(ws_url: String, sender: mpsc::Sender<ChainEvent>) {
    let mut backoff = Duration::from_secs(1);
    const MAX_BACKOFF: Duration = Duration::from_secs(30);
    let mut last_digest: Option<String> = None;

    loop {
        info!("connecting to chain event stream at {ws_url}");
        match tokio_tungstenite::connect_async(&ws_url).await {
            Ok((mut stream, _response)) => {
                backoff = Duration::from_secs(1);
                let subscribe = serde_json::json!({
                    "method": "subscribeEvent",
                    "modules": LISTENED_MODULES,
                    "resumeAfter": last_digest,
                });
                if stream.send(Message::Text(subscribe.to_string())).await.is_err() {
                    warn!("failed to send subscribe request, reconnecting");
                    tokio::time::sleep(backoff).await;
                    continue;
                }

                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            if let Some(digest) = handle_push_message(&text, &sender).await {
                                last_digest = Some(digest);
                            }
                        }
                        Ok(Message::Close(_)) => {
                            warn!("chain event stream closed by the server");
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!("chain event stream error: {err}");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                error!("failed to connect to chain event stream: {err}");
            }
        }

        if sender.is_closed() {
            info!("listener shutting down: dispatcher channel closed");
            return;
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn handle_push_message(text: &str, sender: &mpsc::Sender<ChainEvent>) -> Option<String> {
    let raw: RawEvent = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("dropping unparseable push message: {err}");
            return None;
        }
    };

    if !is_allow_listed(&raw.event_type) {
        return None;
    }

    match parse_event(&raw) {
        Ok(Some(event)) => {
            let digest = event.digest().to_string();
            if sender.send(event).await.is_err() {
                return None;
            }
            Some(digest)
        }
        Ok(None) => None,
        Err(err) => {
            warn!("failed to decode pushed event {}: {err}", raw.event_type);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_common::chain::client::{EventPage, TxResult};
    use bridge_common::chain::{abi::ContractCall, ChainClientError};
    use bridge_common::crypto::SignerKey;
    use bridge_common::stake::StakeRecord;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedChain {
        pages: Mutex<HashMap<String, Vec<EventPage>>>,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ChainClient for ScriptedChain {
        async fn query_events(&self, module: &str, _cursor: Option<&str>) -> Result<EventPage, ChainClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut pages = self.pages.lock().unwrap();
            let queue = pages.entry(module.to_string()).or_default();
            Ok(if queue.is_empty() { EventPage { events: vec![], next_cursor: None } } else { queue.remove(0) })
        }

        async fn execute_transaction_block(&self, _call: ContractCall, _signer: &SignerKey) -> Result<TxResult, ChainClientError> {
            unimplemented!("not exercised by the listener")
        }

        async fn get_owned_objects(&self, _wallet_hex: &str) -> Result<Vec<StakeRecord>, ChainClientError> {
            unimplemented!("not exercised by the listener")
        }
    }

    fn raw(event_type: &str, ts: u64, digest: &str) -> RawEvent {
        RawEvent {
            event_type: event_type.to_string(),
            package_id: "0xabc".into(),
            sender: "0xsender".into(),
            parsed_json: json!({ "staker_address": "0xabc", "amount": 1 }),
            timestamp_ms: ts,
            transaction_digest: digest.to_string(),
        }
    }

    #[test]
    fn parse_batch_skips_non_allow_listed_events() {
        let events = vec![
            raw("0x2::worker_registry::StakeDepositedEvent", 1, "d1"),
            raw("0x2::other_module::UnrelatedEvent", 2, "d2"),
        ];
        let batch = parse_batch(&events);
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn poll_forwards_events_in_dispatch_order() {
        let mut pages = HashMap::new();
        pages.insert("worker_registry".to_string(), vec![EventPage {
            events: vec![raw("0x2::worker_registry::StakeDepositedEvent", 5, "z"), raw("0x2::worker_registry::StakeDepositedEvent", 1, "a")],
            next_cursor: Some("cursor-1".into()),
        }]);
        let chain: Arc<dyn ChainClient> = Arc::new(ScriptedChain { pages: Mutex::new(pages), calls: AtomicU32::new(0) });
        let (tx, mut rx) = mpsc::channel(16);

        let handle = tokio::spawn(run_poll(chain, tx, Duration::from_millis(5)));
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        handle.abort();

        assert_eq!(first.timestamp_ms(), 1);
        assert_eq!(second.timestamp_ms(), 5);
    }
}
