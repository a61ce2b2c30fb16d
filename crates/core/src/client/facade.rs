//! Application-facing profile client.

use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::config::ClientConfig;
use crate::errors::{Error, Result};
use crate::interactions::{Connection, HandlerRegistry};
use crate::persistence::{load_records, MemoryStore, PersistenceStore};
use crate::profile::{normalize_values, EventType, PropertyMap, PAGEVIEW_EVENT};
use crate::rpc::Transport;
use crate::sync::{
    tick, AlwaysReachable, CycleKind, ProfileState, Reachability, SyncCoordinator, SyncJob,
    SyncQueue, SyncState, SyncWorker,
};

const SCREEN_NAME_PROPERTY: &str = "screenName";
const LOCATION_PROPERTY: &str = "location";
const INTERACTION_ID_PROPERTY: &str = "interactionId";

/// Collaborators for a [`ProfileClient`].
pub struct ProfileClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn PersistenceStore>>,
    reachability: Option<Arc<dyn Reachability>>,
    handlers: HandlerRegistry,
}

impl ProfileClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Durable store. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn reachability(mut self, reachability: Arc<dyn Reachability>) -> Self {
        self.reachability = Some(reachability);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Loads the persisted records and starts the worker and the tick task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<ProfileClient> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("ProfileClient must be started inside a tokio runtime"))?;
        let transport = self
            .transport
            .ok_or_else(|| Error::config("No transport configured"))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let reachability = self
            .reachability
            .unwrap_or_else(|| Arc::new(AlwaysReachable));

        let mut records = load_records(store.as_ref());
        let request_log = std::mem::take(&mut records.request_log);
        debug!(
            "[ProfileSync] Loaded profile '{}' with {} live and {} request entries",
            records.profile_id,
            records.live_log.len(),
            request_log.len()
        );

        let state = Arc::new(ProfileState::from_records(
            records,
            self.config.locale.clone(),
        ));
        state.request_update();

        let coordinator = SyncCoordinator::new(
            request_log,
            self.config.host_name.clone(),
            transport,
            store,
            reachability,
            self.handlers,
        );
        state.mirror_request_log(coordinator.request_log());

        let (worker, queue) = SyncWorker::new(coordinator, Arc::clone(&state));
        let worker_task = runtime.spawn(worker.run());
        let ticker_task = runtime.spawn(run_ticker(
            Arc::clone(&state),
            queue.clone(),
            self.config.sync_interval,
        ));
        info!(
            "[ProfileSync] Client started for {} (every {:?})",
            self.config.host_name, self.config.sync_interval
        );

        Ok(ProfileClient {
            config: self.config,
            state,
            queue,
            tasks: Mutex::new(Some(ClientTasks {
                worker: worker_task,
                ticker: ticker_task,
            })),
        })
    }
}

struct ClientTasks {
    worker: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

async fn run_ticker(state: Arc<ProfileState>, queue: SyncQueue, period: std::time::Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if tick(&state, &queue).is_err() {
            debug!("[ProfileSync] Worker gone, stopping ticks");
            break;
        }
    }
}

/// Screen named by a page view: `screenName`, else `location`, without a leading `/`.
/// Empty values count as absent.
fn screen_name_from(properties: &HashMap<String, String>) -> Option<String> {
    [SCREEN_NAME_PROPERTY, LOCATION_PROPERTY]
        .iter()
        .filter_map(|key| properties.get(*key))
        .find(|name| !name.is_empty())
        .map(|name| name.strip_prefix('/').unwrap_or(name).to_string())
}

/// Mirror of the visitor profile: reads come from the local cache, writes are buffered and
/// delivered by the background worker.
pub struct ProfileClient {
    config: ClientConfig,
    state: Arc<ProfileState>,
    queue: SyncQueue,
    tasks: Mutex<Option<ClientTasks>>,
}

impl ProfileClient {
    pub fn builder(config: ClientConfig) -> ProfileClientBuilder {
        ProfileClientBuilder {
            config,
            transport: None,
            store: None,
            reachability: None,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn profile_value(&self, name: &str) -> String {
        self.state.cache().first_value(name)
    }

    pub fn profile_values(&self, name: &str) -> Option<Vec<String>> {
        self.state.cache().values(name).map(<[String]>::to_vec)
    }

    pub fn profile_properties(&self) -> PropertyMap {
        self.state.cache().all_properties().clone()
    }

    pub fn add_profile_value(&self, name: &str, value: &str) {
        self.add_profile_values(name, &[value]);
    }

    /// Buffers an ADD and merges the values into the cache right away.
    pub fn add_profile_values<S: AsRef<str>>(&self, name: &str, values: &[S]) {
        let values = normalize_values(values);
        if name.is_empty() || values.is_empty() {
            return;
        }
        self.state.live_log().add_property(name, &values);
        self.state.cache_mut().add_values(name, &values);
        self.state.request_update();
    }

    pub fn set_profile_value(&self, name: &str, value: &str) {
        self.set_profile_values(name, &[value]);
    }

    /// Buffers a SET and replaces the cached values right away.
    pub fn set_profile_values<S: AsRef<str>>(&self, name: &str, values: &[S]) {
        let values = normalize_values(values);
        if name.is_empty() || values.is_empty() {
            return;
        }
        self.state.live_log().set_property(name, &values);
        self.state.cache_mut().set_values(name, &values);
        self.state.request_update();
    }

    /// Handles an application event.
    ///
    /// `PAGEVIEW` switches screens (keeping the current one when no name is given) and fetches that
    /// screen's interactions. `VIEW`, `CLICK` and
    /// `CONVERSION` need an `interactionId` property and are buffered. Anything else is ignored.
    pub fn create_event(&self, event_type: &str, properties: &HashMap<String, String>) {
        if event_type == PAGEVIEW_EVENT {
            self.state.destroy_handlers();
            if let Some(screen_name) = screen_name_from(properties) {
                self.state.set_screen_name(&screen_name);
            }
            let screen_name = self.state.screen_name();

            let kind = CycleKind::Interactions {
                screen_name,
                locale: self.state.locale(),
            };
            if let Err(e) = self.queue.submit(SyncJob::Cycle { kind, done: None }) {
                warn!("[ProfileSync] Page view not scheduled: {}", e);
            }
            return;
        }

        let Ok(event_type) = event_type.parse::<EventType>() else {
            debug!("[ProfileSync] Ignoring event '{}'", event_type);
            return;
        };
        match properties
            .get(INTERACTION_ID_PROPERTY)
            .filter(|id| !id.is_empty())
        {
            Some(interaction_id) => {
                self.state.live_log().record_event(event_type, interaction_id);
                self.state.request_update();
            }
            None => debug!("[ProfileSync] {} event without interaction id ignored", event_type),
        }
    }

    pub fn screen_name(&self) -> String {
        self.state.screen_name()
    }

    /// Locale used for interaction parameters from the next page view on. Blank clears it.
    pub fn set_locale(&self, locale: &str) {
        let locale = Some(locale.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        self.state.set_locale(locale);
    }

    pub fn locale(&self) -> Option<String> {
        self.state.locale()
    }

    pub fn domain_group(&self) -> Option<String> {
        self.state.cache().domain_group().map(str::to_string)
    }

    pub fn profile_id(&self) -> Option<String> {
        Some(self.state.profile_id()).filter(|id| !id.is_empty())
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.state.connections()
    }

    pub fn connection(&self, id: &str) -> Option<Connection> {
        self.state.connection(id)
    }

    /// Interaction ids of the handlers loaded for the current screen.
    pub fn active_interactions(&self) -> Vec<String> {
        self.state.active_interaction_ids()
    }

    pub fn sync_state(&self) -> SyncState {
        self.state.sync_state()
    }

    /// Cached property labels. Also schedules a background refresh.
    pub fn property_labels(&self) -> Map<String, Value> {
        if let Err(e) = self.queue.submit(SyncJob::RefreshLabels { done: None }) {
            warn!("[ProfileSync] Labels refresh not scheduled: {}", e);
        }
        self.state.labels()
    }

    /// Refreshes the labels and waits for the result.
    pub async fn refresh_property_labels(&self) -> Result<Map<String, Value>> {
        let receiver = self
            .queue
            .submit_with_signal(|done| SyncJob::RefreshLabels { done })?;
        receiver.await.map_err(|_| Error::WorkerStopped)?;
        Ok(self.state.labels())
    }

    /// Delivers buffered writes now. Returns whether the cycle succeeded.
    pub async fn update(&self) -> bool {
        self.await_signal(self.schedule_update(false)).await
    }

    /// Delivers buffered writes and replaces the cache with the server's properties.
    pub async fn load_profile_values(&self) -> bool {
        self.await_signal(self.schedule_update(true)).await
    }

    /// Queues a plain cycle; the receiver yields its outcome.
    pub fn schedule_update(&self, refresh_cache: bool) -> Result<oneshot::Receiver<bool>> {
        self.queue.submit_with_signal(|done| SyncJob::Cycle {
            kind: CycleKind::Plain { refresh_cache },
            done,
        })
    }

    /// Runs the periodic checks once.
    pub fn tick(&self) -> Result<()> {
        tick(&self.state, &self.queue)
    }

    /// Writes every dirty record and waits for it.
    pub async fn persist_now(&self) -> bool {
        let receiver = self
            .queue
            .submit_with_signal(|done| SyncJob::Persist { done });
        self.await_signal(receiver).await
    }

    /// Stops the ticks, lets queued jobs finish, persists and stops the worker.
    pub async fn shutdown(&self) -> Result<()> {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tasks) = tasks else {
            return Ok(());
        };
        tasks.ticker.abort();

        let stopped = self
            .queue
            .submit_with_signal(|done| SyncJob::Shutdown { done });
        let persisted = self.await_signal(stopped).await;
        if tasks.worker.await.is_err() {
            warn!("[ProfileSync] Worker task ended abnormally");
        }
        self.state.destroy_handlers();
        info!("[ProfileSync] Client stopped");

        if persisted {
            Ok(())
        } else {
            Err(Error::persistence("Final persist failed"))
        }
    }

    async fn await_signal(&self, receiver: Result<oneshot::Receiver<bool>>) -> bool {
        match receiver {
            Ok(receiver) => receiver.await.unwrap_or(false),
            Err(e) => {
                warn!("[ProfileSync] Job not scheduled: {}", e);
                false
            }
        }
    }
}

impl Drop for ProfileClient {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = tasks {
            tasks.ticker.abort();
            let _ = self.queue.submit(SyncJob::Shutdown { done: None });
        }
    }
}
