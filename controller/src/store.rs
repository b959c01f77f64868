use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use gateway_common::{
    AcStateEvent, NodeStatusRecord, PersistenceGateway, SettingKey, StoreError, StoredSettings,
};

type NodeTable = BTreeMap<String, NodeStatusRecord>;

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    settings_path: PathBuf,
    events_path: PathBuf,
    nodes_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            settings_path: data_dir.join("settings.json"),
            events_path: data_dir.join("ac_events.jsonl"),
            nodes_path: data_dir.join("nodes.json"),
        }
    }
}

impl PersistenceGateway for JsonFileStore {
    fn load_settings(&mut self) -> Result<StoredSettings, StoreError> {
        load_json(&self.settings_path)
    }

    fn save_setting(&mut self, key: SettingKey, value: &str) -> Result<(), StoreError> {
        let mut settings: StoredSettings = load_json(&self.settings_path)?;
        settings.insert(key.as_str().to_string(), value.to_string());
        save_json(&self.settings_path, &settings)?;
        debug!("saved {}={value}", key.as_str());
        Ok(())
    }

    fn append_state_event(&mut self, event: &AcStateEvent) -> Result<(), StoreError> {
        ensure_parent(&self.events_path)?;
        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn last_state_event(&mut self) -> Result<Option<AcStateEvent>, StoreError> {
        let raw = match fs::read_to_string(&self.events_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        for line in raw.lines().rev().filter(|line| !line.trim().is_empty()) {
            match serde_json::from_str::<AcStateEvent>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(err) => warn!("skipping unreadable AC event line: {err}"),
            }
        }
        Ok(None)
    }

    fn upsert_node_status(&mut self, record: &NodeStatusRecord) -> Result<(), StoreError> {
        let mut nodes: NodeTable = load_json(&self.nodes_path)?;
        nodes.insert(record.node_id.0.to_string(), record.clone());
        save_json(&self.nodes_path, &nodes)
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    match fs::read(path) {
        Ok(raw) => Ok(serde_json::from_slice::<T>(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}

/// Writes through a temporary sibling so a crash never leaves half a file.
fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let payload = serde_json::to_vec_pretty(value)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, payload)?;
    fs::rename(&staging, path)?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use gateway_common::{HealthState, NodeId};

    use super::*;

    fn wall(minute: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 1)
            .unwrap()
            .and_hms_opt(12, minute, 0)
            .unwrap()
    }

    #[test]
    fn missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(&dir.path().join("data"));

        assert!(store.load_settings().unwrap().is_empty());
        assert_eq!(store.last_state_event().unwrap(), None);
    }

    #[test]
    fn settings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path());
        store.save_setting(SettingKey::MaxTemp, "80.0").unwrap();
        store.save_setting(SettingKey::AcAllowed, "True").unwrap();
        store.save_setting(SettingKey::MaxTemp, "81.0").unwrap();

        let mut reopened = JsonFileStore::new(dir.path());
        let settings = reopened.load_settings().unwrap();
        assert_eq!(settings.get("max_temp").map(String::as_str), Some("81.0"));
        assert_eq!(settings.get("ac_allowed").map(String::as_str), Some("True"));
    }

    #[test]
    fn last_event_is_the_newest_readable_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path());
        store
            .append_state_event(&AcStateEvent::at(wall(0), true))
            .unwrap();
        store
            .append_state_event(&AcStateEvent::at(wall(5), false))
            .unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("ac_events.jsonl"))
            .unwrap();
        writeln!(file, "{{ truncated").unwrap();

        let last = store.last_state_event().unwrap().unwrap();
        assert!(!last.state);
        assert_eq!(last.timestamp(), wall(5));
    }

    #[test]
    fn node_status_is_upserted_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path());
        let mut record = NodeStatusRecord {
            node_id: NodeId(1),
            name: "AC_Interface".to_string(),
            status: HealthState::Online,
            last_seen: Some(wall(0)),
            last_message: Some("k1".to_string()),
        };
        store.upsert_node_status(&record).unwrap();
        record.status = HealthState::Offline;
        store.upsert_node_status(&record).unwrap();

        let nodes: NodeTable = load_json(&dir.path().join("nodes.json")).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes["1"].status, HealthState::Offline);
    }
}
