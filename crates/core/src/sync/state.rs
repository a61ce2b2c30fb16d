//! State shared between the application-facing client and the sync worker.

use log::debug;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::commit_log::CommitLog;
use crate::interactions::{Connection, ResolvedInteraction};
use crate::persistence::LoadedRecords;
use crate::profile::PropertyCache;

/// Phase of the sync cycle currently running on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Merging,
    AwaitingResponse,
    Applying,
}

/// Live log, cache and identity of the mirrored profile.
///
/// The request log is not here: only the worker touches it. Its emptiness and dirtiness are
/// mirrored into atomics so the tick can look at them without queueing.
pub struct ProfileState {
    live_log: Mutex<CommitLog>,
    cache: RwLock<PropertyCache>,
    profile_id: RwLock<String>,
    profile_id_dirty: AtomicBool,
    labels: RwLock<Map<String, Value>>,
    labels_dirty: AtomicBool,
    connections: RwLock<Vec<Connection>>,
    handlers: Mutex<Vec<ResolvedInteraction>>,
    screen_name: RwLock<String>,
    locale: RwLock<Option<String>>,
    sync_state: RwLock<SyncState>,
    update_required: AtomicBool,
    request_log_pending: AtomicBool,
    request_log_dirty: AtomicBool,
}

impl Default for ProfileState {
    fn default() -> Self {
        Self::from_records(LoadedRecords::default(), None)
    }
}

impl ProfileState {
    pub fn from_records(records: LoadedRecords, locale: Option<String>) -> Self {
        Self {
            live_log: Mutex::new(records.live_log),
            cache: RwLock::new(records.cache),
            profile_id: RwLock::new(records.profile_id),
            profile_id_dirty: AtomicBool::new(false),
            labels: RwLock::new(records.labels),
            labels_dirty: AtomicBool::new(false),
            connections: RwLock::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            screen_name: RwLock::new(String::new()),
            locale: RwLock::new(locale),
            sync_state: RwLock::new(SyncState::Idle),
            update_required: AtomicBool::new(false),
            request_log_pending: AtomicBool::new(false),
            request_log_dirty: AtomicBool::new(false),
        }
    }

    pub fn live_log(&self) -> MutexGuard<'_, CommitLog> {
        self.live_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache(&self) -> RwLockReadGuard<'_, PropertyCache> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache_mut(&self) -> RwLockWriteGuard<'_, PropertyCache> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn profile_id(&self) -> String {
        read(&self.profile_id).clone()
    }

    /// Stores a new profile id. Returns the previous one.
    pub fn replace_profile_id(&self, profile_id: &str) -> String {
        let mut current = write(&self.profile_id);
        self.profile_id_dirty.store(true, Ordering::SeqCst);
        std::mem::replace(&mut *current, profile_id.to_string())
    }

    pub fn take_profile_id_dirty(&self) -> bool {
        self.profile_id_dirty.swap(false, Ordering::SeqCst)
    }

    pub fn mark_profile_id_dirty(&self) {
        self.profile_id_dirty.store(true, Ordering::SeqCst);
    }

    pub fn labels(&self) -> Map<String, Value> {
        read(&self.labels).clone()
    }

    pub fn replace_labels(&self, labels: Map<String, Value>) {
        *write(&self.labels) = labels;
        self.labels_dirty.store(true, Ordering::SeqCst);
    }

    pub fn take_labels_dirty(&self) -> bool {
        self.labels_dirty.swap(false, Ordering::SeqCst)
    }

    pub fn mark_labels_dirty(&self) {
        self.labels_dirty.store(true, Ordering::SeqCst);
    }

    pub fn connections(&self) -> Vec<Connection> {
        read(&self.connections).clone()
    }

    pub fn connection(&self, id: &str) -> Option<Connection> {
        if id.is_empty() {
            return None;
        }
        read(&self.connections)
            .iter()
            .find(|connection| connection.id() == id)
            .cloned()
    }

    pub fn replace_connections(&self, connections: Vec<Connection>) {
        *write(&self.connections) = connections;
    }

    /// Destroys the current handlers, then loads and keeps the new ones.
    pub fn install_handlers(&self, mut handlers: Vec<ResolvedInteraction>) {
        let mut current = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        for resolved in current.iter_mut() {
            resolved.handler.on_destroy();
        }
        for resolved in handlers.iter_mut() {
            debug!(
                "[ProfileSync] Loading handler '{}' for interaction '{}'",
                resolved.context.handler_name(),
                resolved.context.interaction_id()
            );
            resolved.handler.on_load();
        }
        *current = handlers;
    }

    pub fn destroy_handlers(&self) {
        let mut current = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        for resolved in current.iter_mut() {
            resolved.handler.on_destroy();
        }
        current.clear();
    }

    pub fn active_interaction_ids(&self) -> Vec<String> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|resolved| resolved.context.interaction_id().to_string())
            .collect()
    }

    pub fn screen_name(&self) -> String {
        read(&self.screen_name).clone()
    }

    pub fn set_screen_name(&self, screen_name: &str) {
        *write(&self.screen_name) = screen_name.to_string();
    }

    pub fn locale(&self) -> Option<String> {
        read(&self.locale).clone()
    }

    pub fn set_locale(&self, locale: Option<String>) {
        *write(&self.locale) = locale;
    }

    pub fn sync_state(&self) -> SyncState {
        *read(&self.sync_state)
    }

    pub(crate) fn set_sync_state(&self, state: SyncState) {
        *write(&self.sync_state) = state;
    }

    /// Raises the delivery intent; the next tick runs a cycle.
    pub fn request_update(&self) {
        self.update_required.store(true, Ordering::SeqCst);
    }

    pub fn update_required(&self) -> bool {
        self.update_required.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_update_required(&self) {
        self.update_required.store(false, Ordering::SeqCst);
    }

    pub(crate) fn mirror_request_log(&self, request_log: &CommitLog) {
        self.request_log_pending
            .store(!request_log.is_empty(), Ordering::SeqCst);
        self.request_log_dirty
            .store(request_log.is_modified(), Ordering::SeqCst);
    }

    /// True when either log holds entries not yet confirmed by the server.
    pub fn has_pending_entries(&self) -> bool {
        self.request_log_pending.load(Ordering::SeqCst) || !self.live_log().is_empty()
    }

    /// True when any record changed since it was last written. Does not reset any flag.
    pub fn needs_persist(&self) -> bool {
        self.live_log().is_modified()
            || self.cache().is_modified()
            || self.request_log_dirty.load(Ordering::SeqCst)
            || self.profile_id_dirty.load(Ordering::SeqCst)
            || self.labels_dirty.load(Ordering::SeqCst)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
