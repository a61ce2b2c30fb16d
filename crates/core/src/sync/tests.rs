use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::*;
use crate::commit_log::CommitLog;
use crate::errors::{Error, Result};
use crate::interactions::{HandlerRegistry, InteractionHandler};
use crate::persistence::{decode_record, LoadedRecords, MemoryStore, PersistenceStore};
use crate::profile::{EventType, OperationType, PropertyCache};
use crate::rpc::{RpcCall, RpcMethod, RpcResponse, Transport};

/// Transport that replays queued outcomes and records every batch it was given.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    outcomes: Mutex<VecDeque<Result<RpcResponse>>>,
    batches: Mutex<Vec<SentBatch>>,
}

#[derive(Debug, Clone)]
pub(crate) struct SentBatch {
    pub endpoint: String,
    pub calls: Vec<RpcCall>,
    pub screen_name: String,
}

impl SentBatch {
    pub fn methods(&self) -> Vec<RpcMethod> {
        self.calls.iter().map(RpcCall::method).collect()
    }

    pub fn call(&self, method: RpcMethod) -> Option<&RpcCall> {
        self.calls.iter().find(|call| call.method() == method)
    }
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, outcome: Result<RpcResponse>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn batches(&self) -> Vec<SentBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        endpoint: &str,
        calls: &[RpcCall],
        screen_name: &str,
    ) -> Result<RpcResponse> {
        self.batches.lock().unwrap().push(SentBatch {
            endpoint: endpoint.to_string(),
            calls: calls.to_vec(),
            screen_name: screen_name.to_string(),
        });
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RpcResponse::default()))
    }
}

/// Store whose writes always fail.
struct BrokenStore;

impl PersistenceStore for BrokenStore {
    fn load(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn save(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
        Err(Error::persistence("disk full"))
    }
}

struct Fixture {
    transport: Arc<ScriptedTransport>,
    store: Arc<MemoryStore>,
    reachability: Arc<ReachabilityFlag>,
    state: ProfileState,
    coordinator: SyncCoordinator,
}

fn fixture_with(records: LoadedRecords, handlers: HandlerRegistry) -> Fixture {
    let transport = ScriptedTransport::new();
    let store = Arc::new(MemoryStore::new());
    let reachability = Arc::new(ReachabilityFlag::default());
    let request_log = records.request_log.clone();
    let state = ProfileState::from_records(records, None);
    let coordinator = SyncCoordinator::new(
        request_log,
        "https://profiles.example",
        transport.clone(),
        store.clone(),
        reachability.clone(),
        handlers,
    );
    Fixture {
        transport,
        store,
        reachability,
        state,
        coordinator,
    }
}

fn fixture() -> Fixture {
    fixture_with(LoadedRecords::default(), HandlerRegistry::new())
}

fn set_locally(state: &ProfileState, name: &str, value: &str) {
    state.live_log().set_property(name, &[value]);
    state.cache_mut().set_values(name, &[value]);
    state.request_update();
}

fn profile_response(profile_id: &str) -> RpcResponse {
    RpcResponse::default().with_result(
        "0",
        json!({ "id": "0", "result": { "profileId": profile_id } }),
    )
}

const PLAIN: CycleKind = CycleKind::Plain {
    refresh_cache: false,
};

#[tokio::test]
async fn end_to_end_set_is_delivered_and_logs_drained() {
    let mut fx = fixture();
    set_locally(&fx.state, "hobby", "tennis");
    fx.transport
        .respond(Ok(profile_response("P1").with_result("2", json!({ "id": "2", "result": {} }))));

    let report = fx.coordinator.run_cycle(&PLAIN, &fx.state).await.unwrap();

    assert_eq!(report.status, CycleStatus::Completed);
    assert_eq!(report.set, 1);
    assert_eq!(fx.state.cache().values("hobby"), Some(&["tennis".to_string()][..]));
    assert!(fx.coordinator.request_log().is_empty());
    assert!(fx.state.live_log().is_empty());
    assert!(!fx.state.has_pending_entries());
    assert!(!fx.state.update_required());
    assert_eq!(fx.state.profile_id(), "P1");
    assert_eq!(fx.state.sync_state(), SyncState::Idle);

    let batches = fx.transport.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0].endpoint,
        "https://profiles.example/DG/DEFAULT/rest/rpc/?"
    );
    assert_eq!(
        batches[0].methods(),
        vec![RpcMethod::GetProfile, RpcMethod::SetProperties]
    );
    assert_eq!(
        batches[0].call(RpcMethod::SetProperties).and_then(RpcCall::params),
        Some(&json!({ "properties": { "hobby": ["tennis"] } }))
    );
}

#[tokio::test]
async fn plain_cycle_sends_no_screen_name() {
    let mut fx = fixture();
    fx.state.set_screen_name("checkout");
    set_locally(&fx.state, "hobby", "tennis");

    fx.coordinator.run_cycle(&PLAIN, &fx.state).await.unwrap();

    assert_eq!(fx.transport.batches()[0].screen_name, "");
    assert_eq!(fx.state.screen_name(), "checkout");
}

#[tokio::test]
async fn failed_cycle_keeps_entries_for_the_next_one() {
    let mut fx = fixture();
    set_locally(&fx.state, "hobby", "tennis");
    fx.transport.respond(Err(Error::status(503, "unavailable")));

    let err = fx.coordinator.run_cycle(&PLAIN, &fx.state).await.unwrap_err();
    assert_eq!(err.status_code(), Some(503));
    let pending = fx.coordinator.request_log().property_entry("hobby").unwrap();
    assert_eq!(pending.operation(), OperationType::Set);
    assert!(fx.state.has_pending_entries());
    assert_eq!(fx.state.sync_state(), SyncState::Idle);

    // written while the failed batch was in flight
    fx.state.live_log().add_property("tags", &["new"]);

    fx.transport.respond(Ok(profile_response("P1")));
    let report = fx.coordinator.run_cycle(&PLAIN, &fx.state).await.unwrap();
    assert_eq!((report.added, report.set), (1, 1));
    assert!(fx.coordinator.request_log().is_empty());

    let retried = &fx.transport.batches()[1];
    assert_eq!(
        retried.methods(),
        vec![
            RpcMethod::GetProfile,
            RpcMethod::AddProperties,
            RpcMethod::SetProperties
        ]
    );
}

#[tokio::test]
async fn unreachable_network_leaves_everything_untouched() {
    let mut fx = fixture();
    set_locally(&fx.state, "hobby", "tennis");
    fx.reachability.set_reachable(false);

    let err = fx.coordinator.run_cycle(&PLAIN, &fx.state).await.unwrap_err();
    assert!(matches!(err, Error::Unreachable));
    assert_eq!(fx.state.live_log().len(), 1);
    assert!(fx.coordinator.request_log().is_empty());
    assert!(fx.state.update_required());
    assert!(fx.transport.batches().is_empty());
}

#[tokio::test]
async fn empty_plain_cycle_is_skipped_without_network() {
    let mut fx = fixture();
    let report = fx.coordinator.run_cycle(&PLAIN, &fx.state).await.unwrap();
    assert_eq!(report.status, CycleStatus::Skipped);
    assert!(fx.transport.batches().is_empty());
}

#[tokio::test]
async fn events_expand_into_uniquely_identified_calls() {
    let mut fx = fixture();
    fx.state.live_log().record_event(EventType::Click, "i1");
    fx.state.live_log().record_event(EventType::Click, "i1");

    let report = fx.coordinator.run_cycle(&PLAIN, &fx.state).await.unwrap();
    assert_eq!(report.events, 2);
    let batch = &fx.transport.batches()[0];
    let ids: Vec<&str> = batch.calls.iter().map(RpcCall::id).collect();
    assert_eq!(ids, vec!["0", "5", "6"]);
}

#[tokio::test]
async fn profile_change_clears_the_cache() {
    let mut cache = PropertyCache::new();
    cache.set_values("x", &["1"]);
    let records = LoadedRecords {
        cache,
        profile_id: "A".to_string(),
        ..LoadedRecords::default()
    };
    let mut fx = fixture_with(records, HandlerRegistry::new());
    fx.transport.respond(Ok(profile_response("B")));

    let report = fx
        .coordinator
        .run_cycle(&CycleKind::Plain { refresh_cache: true }, &fx.state)
        .await
        .unwrap();

    assert!(report.profile_changed);
    assert_eq!(fx.state.cache().first_value("x"), "");
    assert_eq!(fx.state.profile_id(), "B");
    assert_eq!(fx.store.load("id").unwrap(), Some(b"B".to_vec()));
}

#[tokio::test]
async fn first_profile_assignment_keeps_the_cache() {
    let mut fx = fixture();
    set_locally(&fx.state, "x", "1");
    fx.transport.respond(Ok(RpcResponse::default().with_result(
        "0",
        json!({ "id": "0", "result": { "profileId": "A", "domainGroupId": "dg-7" } }),
    )));

    let report = fx.coordinator.run_cycle(&PLAIN, &fx.state).await.unwrap();

    assert!(!report.profile_changed);
    assert_eq!(fx.state.profile_id(), "A");
    assert_eq!(fx.state.cache().first_value("x"), "1");
    assert_eq!(fx.state.cache().domain_group(), Some("dg-7"));

    // later batches go to the domain group endpoint
    set_locally(&fx.state, "y", "2");
    fx.coordinator.run_cycle(&PLAIN, &fx.state).await.unwrap();
    assert_eq!(
        fx.transport.batches()[1].endpoint,
        "https://profiles.example/DG/dg-7/rest/rpc/?"
    );
}

#[tokio::test]
async fn refresh_cycle_replaces_the_cache_with_the_snapshot() {
    let mut fx = fixture();
    fx.state.cache_mut().set_values("stale", &["old"]);
    fx.transport.respond(Ok(profile_response("P1").with_result(
        "3",
        json!({ "id": "3", "result": { "properties": { "a": ["1"], "b": ["2", "3"] } } }),
    )));

    let report = fx
        .coordinator
        .run_cycle(&CycleKind::Plain { refresh_cache: true }, &fx.state)
        .await
        .unwrap();

    assert_eq!(report.properties.len(), 2);
    let cache = fx.state.cache();
    assert_eq!(cache.values("stale"), None);
    assert_eq!(cache.first_value("a"), "1");
    assert_eq!(cache.values("b"), Some(&["2".to_string(), "3".to_string()][..]));
    drop(cache);

    let batch = &fx.transport.batches()[0];
    assert_eq!(
        batch.call(RpcMethod::GetProperties).and_then(RpcCall::params),
        Some(&json!({}))
    );
}

struct Recorder {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl InteractionHandler for Recorder {
    fn on_load(&mut self) {
        self.log.lock().unwrap().push(format!("load:{}", self.name));
    }

    fn on_destroy(&mut self) {
        self.log.lock().unwrap().push(format!("destroy:{}", self.name));
    }
}

fn recording_registry(log: &Arc<Mutex<Vec<String>>>) -> HandlerRegistry {
    let log = Arc::clone(log);
    let mut registry = HandlerRegistry::new();
    registry.register("Lightbox", move |context| {
        Box::new(Recorder {
            name: context.interaction_id().to_string(),
            log: Arc::clone(&log),
        })
    });
    registry
}

fn interactions_response() -> RpcResponse {
    profile_response("P1")
        .with_result(
            "3",
            json!({ "id": "3", "result": { "properties": { "score": ["10"] } } }),
        )
        .with_result(
            "4",
            json!({
                "id": "4",
                "result": {
                    "interactions": [
                        {
                            "id": "int-1",
                            "pluginClass": "Plugins.Lightbox",
                            "parameters": [
                                { "locale": "en_US", "parameter": [{ "id": "title", "value": ["Hi"] }] }
                            ]
                        },
                        { "id": "int-2", "pluginClass": "Unknown", "parameters": [] }
                    ],
                    "connections": [
                        { "id": "crm", "parameters": [{ "parameter": [{ "id": "key", "value": ["k"] }] }] }
                    ]
                }
            }),
        )
}

#[tokio::test]
async fn interaction_cycle_applies_incrementally_and_resolves_handlers() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut fx = fixture_with(LoadedRecords::default(), recording_registry(&log));
    fx.state.cache_mut().set_values("kept", &["yes"]);
    fx.state.cache_mut().set_values("score", &["1"]);
    let fingerprint = fx.state.cache().fingerprint();
    fx.transport.respond(Ok(interactions_response()));

    let kind = CycleKind::Interactions {
        screen_name: "home".to_string(),
        locale: Some("en_US".to_string()),
    };
    let report = fx.coordinator.run_cycle(&kind, &fx.state).await.unwrap();

    assert_eq!(fx.state.cache().first_value("kept"), "yes");
    assert_eq!(fx.state.cache().first_value("score"), "10");

    assert_eq!(report.interactions.len(), 1);
    let resolved = &report.interactions[0];
    assert_eq!(resolved.context.interaction_id(), "int-1");
    assert_eq!(resolved.context.parameter("title"), Some(&["Hi".to_string()][..]));
    assert_eq!(fx.state.connection("crm").map(|c| c.id().to_string()), Some("crm".to_string()));
    assert_eq!(report.connections.len(), 1);

    let batch = &fx.transport.batches()[0];
    assert_eq!(batch.screen_name, "home");
    assert_eq!(
        batch.methods(),
        vec![
            RpcMethod::GetProfile,
            RpcMethod::GetProperties,
            RpcMethod::CreateEvent
        ]
    );
    assert_eq!(
        batch.call(RpcMethod::GetProperties).and_then(RpcCall::params),
        Some(&json!({ "hash": [fingerprint] }))
    );
    assert_eq!(
        batch.call(RpcMethod::CreateEvent).map(RpcCall::id),
        Some("4")
    );

    fx.state.install_handlers(report.interactions);
    fx.state.destroy_handlers();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["load:int-1".to_string(), "destroy:int-1".to_string()]
    );
}

#[tokio::test]
async fn interaction_cycle_without_connections_empties_the_list() {
    let mut fx = fixture();
    fx.state
        .replace_connections(vec![crate::interactions::Connection::new("old", Default::default())]);
    fx.transport.respond(Ok(profile_response("P1")));

    let kind = CycleKind::Interactions {
        screen_name: "home".to_string(),
        locale: None,
    };
    fx.coordinator.run_cycle(&kind, &fx.state).await.unwrap();
    assert!(fx.state.connections().is_empty());
}

#[tokio::test]
async fn labels_refresh_replaces_labels() {
    let mut fx = fixture();
    fx.transport.respond(Ok(profile_response("P1").with_result(
        "1",
        json!({ "id": "1", "result": { "properties": { "hobby": { "en": "Hobby" } } } }),
    )));

    assert!(fx.coordinator.refresh_labels(&fx.state).await.unwrap());
    assert_eq!(fx.state.labels().get("hobby"), Some(&json!({ "en": "Hobby" })));
    assert_eq!(
        fx.transport.batches()[0].methods(),
        vec![RpcMethod::GetProfile, RpcMethod::GetPropertyLabels]
    );
}

#[tokio::test]
async fn persist_writes_dirty_records_once() {
    let mut fx = fixture();
    set_locally(&fx.state, "hobby", "tennis");
    assert!(fx.state.needs_persist());

    fx.coordinator.persist(&fx.state).unwrap();
    assert!(!fx.state.needs_persist());
    assert_eq!(
        fx.store.keys(),
        vec!["cache", "commitlog", "requestcommitlog"]
    );
    let saved: CommitLog = decode_record(&fx.store.load("commitlog").unwrap().unwrap()).unwrap();
    assert_eq!(saved.len(), 1);

    // merge empties the live log and fills the request log; both must be rewritten
    fx.transport.respond(Err(Error::transport("reset")));
    let _ = fx.coordinator.run_cycle(&PLAIN, &fx.state).await;
    assert!(fx.state.needs_persist());
    fx.coordinator.persist(&fx.state).unwrap();
    let request: CommitLog =
        decode_record(&fx.store.load("requestcommitlog").unwrap().unwrap()).unwrap();
    let live: CommitLog = decode_record(&fx.store.load("commitlog").unwrap().unwrap()).unwrap();
    assert_eq!(request.len(), 1);
    assert!(live.is_empty());
}

#[tokio::test]
async fn failed_persist_keeps_records_dirty() {
    let state = ProfileState::default();
    state.live_log().set_property("hobby", &["tennis"]);
    let mut coordinator = SyncCoordinator::new(
        CommitLog::new(),
        "https://profiles.example",
        ScriptedTransport::new(),
        Arc::new(BrokenStore),
        Arc::new(AlwaysReachable),
        HandlerRegistry::new(),
    );

    let err = coordinator.persist(&state).unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
    assert!(state.needs_persist());
    assert!(state.live_log().is_modified());
}

#[tokio::test]
async fn worker_runs_jobs_in_order_and_tick_schedules_delivery() {
    let fx = fixture();
    let state = Arc::new(fx.state);
    let (worker, queue) = SyncWorker::new(fx.coordinator, Arc::clone(&state));
    set_locally(&state, "hobby", "tennis");

    tick(&state, &queue).unwrap();
    let persisted = queue
        .submit_with_signal(|done| SyncJob::Persist { done })
        .unwrap();
    let handle = tokio::spawn(worker.run());

    assert!(persisted.await.unwrap());
    let batches = fx.transport.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0].methods(),
        vec![RpcMethod::GetProfile, RpcMethod::SetProperties]
    );
    assert!(!state.needs_persist());
    assert!(queue.is_idle());

    // nothing pending: the tick queues nothing
    tick(&state, &queue).unwrap();
    assert!(queue.is_idle());

    let stopped = queue
        .submit_with_signal(|done| SyncJob::Shutdown { done })
        .unwrap();
    assert!(stopped.await.unwrap());
    handle.await.unwrap();
    assert!(matches!(
        queue.submit(SyncJob::Persist { done: None }),
        Err(Error::WorkerStopped)
    ));
}
