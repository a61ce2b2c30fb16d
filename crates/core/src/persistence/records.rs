//! Versioned encoding of the persisted records.

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::store::PersistenceStore;
use crate::commit_log::CommitLog;
use crate::errors::{Error, Result};
use crate::profile::PropertyCache;

pub const RECORD_VERSION: u32 = 1;

/// Names of the durable records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    CommitLog,
    RequestCommitLog,
    Cache,
    ProfileId,
    Labels,
}

impl RecordKey {
    pub const ALL: [RecordKey; 5] = [
        Self::CommitLog,
        Self::RequestCommitLog,
        Self::Cache,
        Self::ProfileId,
        Self::Labels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommitLog => "commitlog",
            Self::RequestCommitLog => "requestcommitlog",
            Self::Cache => "cache",
            Self::ProfileId => "id",
            Self::Labels => "labels",
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    data: Value,
}

/// Wraps a structured record in the `{"version", "data"}` envelope.
pub fn encode_record<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = EnvelopeRef {
        version: RECORD_VERSION,
        data: value,
    };
    serde_json::to_vec(&envelope).map_err(|e| Error::Codec(e.to_string()))
}

pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))?;
    if envelope.version != RECORD_VERSION {
        return Err(Error::Codec(format!(
            "Unsupported record version {}",
            envelope.version
        )));
    }
    serde_json::from_value(envelope.data).map_err(|e| Error::Codec(e.to_string()))
}

pub fn decode_profile_id(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::Codec(e.to_string()))
}

/// Durable state as found at startup.
#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    pub live_log: CommitLog,
    pub request_log: CommitLog,
    pub cache: PropertyCache,
    pub profile_id: String,
    pub labels: Map<String, Value>,
}

/// Reads every record. Missing or undecodable records come back empty.
pub fn load_records(store: &dyn PersistenceStore) -> LoadedRecords {
    LoadedRecords {
        live_log: load_or_default(store, RecordKey::CommitLog),
        request_log: load_or_default(store, RecordKey::RequestCommitLog),
        cache: load_or_default(store, RecordKey::Cache),
        profile_id: load_profile_id(store),
        labels: load_or_default(store, RecordKey::Labels),
    }
}

fn load_or_default<T: DeserializeOwned + Default>(
    store: &dyn PersistenceStore,
    key: RecordKey,
) -> T {
    match store.load(key.as_str()) {
        Ok(Some(bytes)) => decode_record(&bytes).unwrap_or_else(|e| {
            warn!("[ProfileStore] Discarding record '{}': {}", key.as_str(), e);
            T::default()
        }),
        Ok(None) => T::default(),
        Err(e) => {
            warn!("[ProfileStore] Failed to load record '{}': {}", key.as_str(), e);
            T::default()
        }
    }
}

fn load_profile_id(store: &dyn PersistenceStore) -> String {
    let key = RecordKey::ProfileId.as_str();
    match store.load(key) {
        Ok(Some(bytes)) => decode_profile_id(&bytes).unwrap_or_else(|e| {
            warn!("[ProfileStore] Discarding record '{}': {}", key, e);
            String::new()
        }),
        Ok(None) => String::new(),
        Err(e) => {
            warn!("[ProfileStore] Failed to load record '{}': {}", key, e);
            String::new()
        }
    }
}

pub fn save_record<T: Serialize>(
    store: &dyn PersistenceStore,
    key: RecordKey,
    value: &T,
) -> Result<()> {
    store.save(key.as_str(), &encode_record(value)?)
}

/// Writes the profile id. Empty ids are never written.
pub fn save_profile_id(store: &dyn PersistenceStore, profile_id: &str) -> Result<()> {
    if profile_id.is_empty() {
        return Ok(());
    }
    store.save(RecordKey::ProfileId.as_str(), profile_id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit_log::CommitEntry;
    use crate::persistence::MemoryStore;
    use crate::profile::{EventType, OperationType};

    #[test]
    fn commit_log_round_trip_keeps_provenance() {
        let mut log = CommitLog::new();
        log.add_property("hobbies", &["tennis"]);
        log.set_property("city", &["Utrecht"]);
        log.record_event(EventType::Conversion, "i9");

        let decoded: CommitLog = decode_record(&encode_record(&log).unwrap()).unwrap();
        assert_eq!(decoded.entries(), log.entries());
        assert_eq!(
            decoded.property_entry("hobbies").map(|e| e.operation()),
            Some(OperationType::Add)
        );
        assert!(matches!(decoded.entries()[2], CommitEntry::Event(_)));
        // loaded state is already durable
        assert!(!decoded.is_modified());
    }

    #[test]
    fn rejects_unknown_versions() {
        let bytes = br#"{"version":7,"data":{"entries":[]}}"#;
        let err = decode_record::<CommitLog>(bytes).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn corrupt_records_load_as_empty() {
        let store = MemoryStore::new();
        store.save("commitlog", b"not json").unwrap();
        store.save("id", b"P1").unwrap();
        let mut cache = PropertyCache::new();
        cache.set_values("x", &["1"]);
        save_record(&store, RecordKey::Cache, &cache).unwrap();

        let loaded = load_records(&store);
        assert!(loaded.live_log.is_empty());
        assert_eq!(loaded.profile_id, "P1");
        assert_eq!(loaded.cache.first_value("x"), "1");
        assert!(loaded.labels.is_empty());
    }

    #[test]
    fn empty_profile_id_is_not_written() {
        let store = MemoryStore::new();
        save_profile_id(&store, "").unwrap();
        assert!(store.keys().is_empty());
        save_profile_id(&store, "P1").unwrap();
        assert_eq!(store.keys(), vec!["id".to_string()]);
    }
}
