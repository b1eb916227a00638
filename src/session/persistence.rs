//! Persisted session record.
//!
//! The record on disk carries connection metadata only. Credentials,
//! tokens, and live market or account data never appear here; the struct
//! has exactly the fields below and the schema test pins that down.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::Result;

/// Non-sensitive session metadata persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionRecord {
    pub session_id: String,
    pub last_connection_time: DateTime<Utc>,
    pub connection_attempts: u32,
    pub auto_reconnect_enabled: bool,
}

impl PersistedSessionRecord {
    /// A record is fresh while its last connection falls within the TTL
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_connection_time <= ttl
    }
}

/// What the startup path should do with the persisted session
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// Fresh record with auto-reconnect enabled: reconnect immediately
    AutoConnect(PersistedSessionRecord),
    /// Fresh record, auto-reconnect off: surface a one-click resume
    Available(PersistedSessionRecord),
    /// No record, or record older than the TTL: full manual login
    None,
}

/// JSON-file backed store for the session record
pub struct SessionStore {
    path: PathBuf,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        let path = config.storage_path.clone().unwrap_or_else(default_path);
        Self {
            path,
            ttl: Duration::minutes(config.ttl_minutes),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the record. A missing file is a clean first run; a corrupt
    /// file is logged and treated the same way.
    pub fn load(&self) -> Option<PersistedSessionRecord> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), "failed to read session record: {e}");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), "corrupt session record, ignoring: {e}");
                None
            }
        }
    }

    /// Write the record atomically (temp file then rename)
    pub fn save(&self, record: &PersistedSessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), session_id = %record.session_id, "session record saved");
        Ok(())
    }

    /// Remove the record; a missing file is already the desired state
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Decide the startup path from the persisted record and the TTL
    pub fn resume_decision(&self, now: DateTime<Utc>) -> Resume {
        let Some(record) = self.load() else {
            return Resume::None;
        };

        if !record.is_fresh(self.ttl, now) {
            debug!(
                session_id = %record.session_id,
                last = %record.last_connection_time,
                "persisted session expired, requiring manual login"
            );
            return Resume::None;
        }

        if record.auto_reconnect_enabled {
            Resume::AutoConnect(record)
        } else {
            Resume::Available(record)
        }
    }

    /// Flip the auto-reconnect flag, creating a stale placeholder record
    /// when none exists so the preference survives without implying a
    /// resumable session.
    pub fn set_auto_reconnect(&self, enabled: bool) -> Result<()> {
        let mut record = self.load().unwrap_or_else(|| PersistedSessionRecord {
            session_id: String::new(),
            last_connection_time: DateTime::<Utc>::MIN_UTC,
            connection_attempts: 0,
            auto_reconnect_enabled: enabled,
        });
        record.auto_reconnect_enabled = enabled;
        self.save(&record)
    }
}

fn default_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("brokersync")
        .join("session.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(dir: &std::path::Path) -> SessionStore {
        SessionStore::new(&SessionConfig {
            ttl_minutes: 30,
            auto_reconnect: true,
            storage_path: Some(dir.join("session.json")),
        })
    }

    fn record(minutes_ago: i64, auto: bool) -> PersistedSessionRecord {
        PersistedSessionRecord {
            session_id: "sess-1".to_string(),
            last_connection_time: Utc::now() - Duration::minutes(minutes_ago),
            connection_attempts: 0,
            auto_reconnect_enabled: auto,
        }
    }

    #[test]
    fn test_schema_has_exactly_the_persisted_fields() {
        let json = serde_json::to_value(record(0, true)).expect("serialize");
        let obj = json.as_object().expect("object");

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "autoReconnectEnabled",
                "connectionAttempts",
                "lastConnectionTime",
                "sessionId",
            ]
        );

        // Nothing credential-shaped may ever land in this record
        let raw = json.to_string().to_lowercase();
        for forbidden in ["password", "token", "credential", "secret", "account"] {
            assert!(!raw.contains(forbidden), "record leaked {forbidden}");
        }
    }

    #[test]
    fn test_round_trip_and_clear() {
        let dir = std::env::temp_dir().join(format!("brokersync-test-{}", uuid::Uuid::new_v4()));
        let store = store_at(&dir);

        assert!(store.load().is_none());

        let rec = record(5, true);
        store.save(&rec).expect("save");
        assert_eq!(store.load(), Some(rec));

        store.clear().expect("clear");
        assert!(store.load().is_none());
        store.clear().expect("clear is idempotent");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_record_treated_as_missing() {
        let dir = std::env::temp_dir().join(format!("brokersync-test-{}", uuid::Uuid::new_v4()));
        let store = store_at(&dir);

        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(store.path(), "{not json").expect("write");
        assert!(store.load().is_none());
        assert_eq!(store.resume_decision(Utc::now()), Resume::None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_resume_decisions_respect_ttl_and_flag() {
        let dir = std::env::temp_dir().join(format!("brokersync-test-{}", uuid::Uuid::new_v4()));
        let store = store_at(&dir);
        let now = Utc::now();

        // Fresh + auto-reconnect: reconnect immediately
        store.save(&record(10, true)).expect("save");
        assert!(matches!(
            store.resume_decision(now),
            Resume::AutoConnect(_)
        ));

        // Fresh, auto-reconnect off: offer resume
        store.save(&record(10, false)).expect("save");
        assert!(matches!(store.resume_decision(now), Resume::Available(_)));

        // Stale: manual login regardless of the flag
        store.save(&record(31, true)).expect("save");
        assert_eq!(store.resume_decision(now), Resume::None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_toggle_without_record_stays_unresumable() {
        let dir = std::env::temp_dir().join(format!("brokersync-test-{}", uuid::Uuid::new_v4()));
        let store = store_at(&dir);

        store.set_auto_reconnect(true).expect("toggle");
        let rec = store.load().expect("placeholder record");
        assert!(rec.auto_reconnect_enabled);
        // Placeholder is ancient, so it never auto-connects
        assert_eq!(store.resume_decision(Utc::now()), Resume::None);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
