//! One sync cycle: merge the live log, send the batch, apply the response.

use log::{debug, info, warn};
use std::sync::Arc;

use super::reachability::Reachability;
use super::state::{ProfileState, SyncState};
use crate::commit_log::CommitLog;
use crate::errors::{Error, Result};
use crate::interactions::{
    parse_connections, Connection, HandlerRegistry, InteractionContext, ResolvedInteraction,
};
use crate::persistence::{save_profile_id, save_record, PersistenceStore, RecordKey};
use crate::profile::{OperationType, PropertyMap};
use crate::rpc::{
    build_labels_calls, build_update_calls, endpoint_url, CallId, RpcCall, RpcResponse,
    Transport, LABELS_CALL_ID,
};

/// Batch shape of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleKind {
    /// Deliver buffered writes; with `refresh_cache` also pull a full property snapshot.
    Plain { refresh_cache: bool },
    /// Register a screen view and fetch its interactions plus changed properties.
    Interactions {
        screen_name: String,
        locale: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Nothing to send and nothing requested.
    Skipped,
    Completed,
}

/// Outcome of a successful cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub status: CycleStatus,
    pub added: usize,
    pub set: usize,
    pub events: usize,
    pub profile_changed: bool,
    pub properties: PropertyMap,
    pub interactions: Vec<ResolvedInteraction>,
    pub connections: Vec<Connection>,
}

impl CycleReport {
    fn new(status: CycleStatus) -> Self {
        Self {
            status,
            added: 0,
            set: 0,
            events: 0,
            profile_changed: false,
            properties: PropertyMap::new(),
            interactions: Vec::new(),
            connections: Vec::new(),
        }
    }
}

/// Owns the request log and the collaborators a cycle needs.
pub struct SyncCoordinator {
    request_log: CommitLog,
    host_name: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn PersistenceStore>,
    reachability: Arc<dyn Reachability>,
    handlers: HandlerRegistry,
}

impl SyncCoordinator {
    pub fn new(
        request_log: CommitLog,
        host_name: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn PersistenceStore>,
        reachability: Arc<dyn Reachability>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            request_log,
            host_name: host_name.into(),
            transport,
            store,
            reachability,
            handlers,
        }
    }

    pub fn request_log(&self) -> &CommitLog {
        &self.request_log
    }

    /// Runs one cycle. On error nothing from the response was applied and the request log still
    /// holds everything that was merged into it.
    pub async fn run_cycle(
        &mut self,
        kind: &CycleKind,
        state: &ProfileState,
    ) -> Result<CycleReport> {
        if !self.reachability.is_reachable() {
            debug!("[ProfileSync] Network unreachable, cycle skipped");
            return Err(Error::Unreachable);
        }

        state.clear_update_required();
        state.set_sync_state(SyncState::Merging);
        {
            let mut live_log = state.live_log();
            self.request_log.merge(&mut live_log);
        }
        state.mirror_request_log(&self.request_log);

        let result = self.exchange(kind, state).await;
        state.set_sync_state(SyncState::Idle);
        result
    }

    async fn exchange(&mut self, kind: &CycleKind, state: &ProfileState) -> Result<CycleReport> {
        let to_add = self.request_log.entries_by_operation(OperationType::Add);
        let to_set = self.request_log.entries_by_operation(OperationType::Set);
        let events = self.request_log.events();

        let refresh_cache = matches!(kind, CycleKind::Plain { refresh_cache: true });
        if matches!(kind, CycleKind::Plain { .. })
            && !refresh_cache
            && to_add.is_empty()
            && to_set.is_empty()
            && events.is_empty()
        {
            debug!("[ProfileSync] Nothing to send");
            return Ok(CycleReport::new(CycleStatus::Skipped));
        }

        let mut report = CycleReport::new(CycleStatus::Completed);
        report.added = to_add.len();
        report.set = to_set.len();
        report.events = events.iter().map(|event| event.count() as usize).sum();

        let mut calls = build_update_calls(&to_add, &to_set, &events);
        let screen_name = match kind {
            CycleKind::Plain { .. } => {
                if refresh_cache {
                    calls.push(RpcCall::get_properties(CallId::GetProperties as u32, None));
                }
                // plain batches are not tied to a screen
                String::new()
            }
            CycleKind::Interactions { screen_name, .. } => {
                let fingerprint = state.cache().fingerprint();
                calls.push(RpcCall::get_properties(
                    CallId::GetProperties as u32,
                    Some(&fingerprint),
                ));
                calls.push(RpcCall::page_view(CallId::Interactions as u32));
                screen_name.clone()
            }
        };

        let endpoint = self.endpoint(state);
        debug!(
            "[ProfileSync] Sending {} calls (add={} set={} events={}) to {}",
            calls.len(),
            report.added,
            report.set,
            report.events,
            endpoint
        );
        state.set_sync_state(SyncState::AwaitingResponse);
        let response = self
            .transport
            .execute(&endpoint, &calls, &screen_name)
            .await
            .inspect_err(|e| warn!("[ProfileSync] Batch failed, keeping buffered entries: {}", e))?;

        state.set_sync_state(SyncState::Applying);
        report.profile_changed = self.apply_profile(&response, state);

        let properties_id = CallId::GetProperties.key();
        match kind {
            CycleKind::Plain { .. } => {
                if let Some(properties) = response.properties(&properties_id) {
                    let mut cache = state.cache_mut();
                    cache.clear();
                    cache.set_all(&properties);
                    report.properties = properties;
                }
            }
            CycleKind::Interactions { locale, .. } => {
                if let Some(properties) = response.properties(&properties_id) {
                    let mut cache = state.cache_mut();
                    for (name, values) in &properties {
                        cache.set_values(name, values);
                    }
                    report.properties = properties;
                }
                let contexts = response
                    .interactions(&CallId::Interactions.key())
                    .iter()
                    .filter_map(|interaction| {
                        InteractionContext::from_value(interaction, locale.as_deref())
                    })
                    .collect();
                report.interactions = self.handlers.instantiate_all(contexts);

                let connections = response
                    .connections(&CallId::Interactions.key())
                    .map(parse_connections)
                    .unwrap_or_default();
                state.replace_connections(connections.clone());
                report.connections = connections;
            }
        }

        self.request_log.clear();
        self.request_log.mark_modified();
        state.mirror_request_log(&self.request_log);
        debug!(
            "[ProfileSync] Cycle applied: profile_changed={} properties={} interactions={}",
            report.profile_changed,
            report.properties.len(),
            report.interactions.len()
        );
        Ok(report)
    }

    /// Sends a `getProfile` + `getPropertyLabels` batch and replaces the labels.
    pub async fn refresh_labels(&mut self, state: &ProfileState) -> Result<bool> {
        if !self.reachability.is_reachable() {
            return Err(Error::Unreachable);
        }
        let endpoint = self.endpoint(state);
        let response = self
            .transport
            .execute(&endpoint, &build_labels_calls(), &state.screen_name())
            .await?;

        self.apply_profile(&response, state);
        match response.raw_properties(&LABELS_CALL_ID.to_string()) {
            Some(labels) => {
                debug!("[ProfileSync] Received {} property labels", labels.len());
                state.replace_labels(labels);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies the profile identity. Returns true when a stored id was replaced by another.
    fn apply_profile(&self, response: &RpcResponse, state: &ProfileState) -> bool {
        let Some(profile) = response.profile() else {
            return false;
        };

        let mut changed = false;
        if let Some(new_id) = profile.profile_id.filter(|id| !id.is_empty()) {
            let current = state.profile_id();
            if new_id != current {
                state.replace_profile_id(&new_id);
                if current.is_empty() {
                    info!("[ProfileSync] Profile id assigned: {}", new_id);
                } else {
                    info!("[ProfileSync] Profile id changed from {} to {}", current, new_id);
                    state.cache_mut().clear();
                    changed = true;
                }
                match save_profile_id(self.store.as_ref(), &new_id) {
                    Ok(()) => {
                        state.take_profile_id_dirty();
                    }
                    Err(e) => warn!("[ProfileStore] Failed to save profile id: {}", e),
                }
            }
        }

        if let Some(domain_group) = profile.domain_group_id.filter(|group| !group.is_empty()) {
            let mut cache = state.cache_mut();
            if cache.domain_group() != Some(domain_group.as_str()) {
                cache.set_domain_group(domain_group);
            }
        }
        changed
    }

    /// Writes every record that changed since it was last written.
    ///
    /// A record whose write fails is flagged again so the next persist retries it.
    pub fn persist(&mut self, state: &ProfileState) -> Result<()> {
        let store = self.store.as_ref();
        let mut first_error = None;

        let live_log = {
            let mut live_log = state.live_log();
            live_log.is_dirty_since_last_check().then(|| live_log.clone())
        };
        if let Some(live_log) = live_log {
            if let Err(e) = save_record(store, RecordKey::CommitLog, &live_log) {
                state.live_log().mark_modified();
                record_failure(&mut first_error, RecordKey::CommitLog, e);
            }
        }

        if self.request_log.is_dirty_since_last_check() {
            if let Err(e) = save_record(store, RecordKey::RequestCommitLog, &self.request_log) {
                self.request_log.mark_modified();
                record_failure(&mut first_error, RecordKey::RequestCommitLog, e);
            }
            state.mirror_request_log(&self.request_log);
        }

        let cache = {
            let mut cache = state.cache_mut();
            cache.is_dirty_since_last_check().then(|| cache.clone())
        };
        if let Some(cache) = cache {
            if let Err(e) = save_record(store, RecordKey::Cache, &cache) {
                state.cache_mut().mark_modified();
                record_failure(&mut first_error, RecordKey::Cache, e);
            }
        }

        if state.take_profile_id_dirty() {
            if let Err(e) = save_profile_id(store, &state.profile_id()) {
                state.mark_profile_id_dirty();
                record_failure(&mut first_error, RecordKey::ProfileId, e);
            }
        }

        if state.take_labels_dirty() {
            if let Err(e) = save_record(store, RecordKey::Labels, &state.labels()) {
                state.mark_labels_dirty();
                record_failure(&mut first_error, RecordKey::Labels, e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn endpoint(&self, state: &ProfileState) -> String {
        let cache = state.cache();
        endpoint_url(&self.host_name, cache.domain_group())
    }
}

fn record_failure(first_error: &mut Option<Error>, key: RecordKey, error: Error) {
    warn!("[ProfileStore] Failed to save record '{}': {}", key.as_str(), error);
    first_error.get_or_insert(error);
}
