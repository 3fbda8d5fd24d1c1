/// Tab record persistence over chrome.storage.local
///
/// `StorageData` is the plain document that lives under the `tabRecords`,
/// `sessions` and `currentSessionId` keys. `TabRecordStore` owns one copy of it
/// in memory and writes it back through a `StorageArea` after every change.
use crate::error::{Error, Result};
use crate::host::StorageArea;
use crate::suspended_url::validate_url;
use crate::tab_data::{SessionInfo, TabRecord, now_millis};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub const TAB_RECORDS_KEY: &str = "tabRecords";
pub const SESSIONS_KEY: &str = "sessions";
pub const CURRENT_SESSION_KEY: &str = "currentSessionId";

/// Root storage structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageData {
    #[serde(default)]
    pub tab_records: HashMap<String, TabRecord>,
    #[serde(default)]
    pub sessions: HashMap<String, SessionInfo>,
    #[serde(default)]
    pub current_session_id: Option<String>,
}

impl StorageData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, keeping session counts in step
    pub fn upsert_record(&mut self, record: TabRecord, now: i64) {
        let previous_session = self
            .tab_records
            .insert(record.record_id.clone(), record.clone())
            .map(|old| old.session_id)
            .filter(|old| *old != record.session_id);

        self.refresh_session(&record.session_id, now);
        if let Some(old) = previous_session {
            self.refresh_session(&old, now);
        }
    }

    pub fn remove_record(&mut self, record_id: &str, now: i64) -> bool {
        match self.tab_records.remove(record_id) {
            Some(record) => {
                self.refresh_session(&record.session_id, now);
                true
            }
            None => false,
        }
    }

    /// Records of one session ordered by creation time
    pub fn records_in_session(&self, session_id: &str) -> Vec<TabRecord> {
        let records = self
            .tab_records
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        sorted_by_creation(records)
    }

    pub fn all_records(&self) -> Vec<TabRecord> {
        sorted_by_creation(self.tab_records.values().cloned().collect())
    }

    /// Drop a session and all its records; returns how many records went
    pub fn clear_session(&mut self, session_id: &str) -> usize {
        let before = self.tab_records.len();
        self.tab_records.retain(|_, r| r.session_id != session_id);
        self.sessions.remove(session_id);
        before - self.tab_records.len()
    }

    /// Drop every record. The current session survives with a zero count.
    pub fn clear_all(&mut self, now: i64) -> usize {
        let removed = self.tab_records.len();
        self.tab_records.clear();

        let current = self
            .current_session_id
            .as_ref()
            .and_then(|id| self.sessions.get(id).cloned().map(|info| (id.clone(), info)));
        self.sessions.clear();
        if let Some((id, mut info)) = current {
            info.tab_count = 0;
            info.last_updated = now;
            self.sessions.insert(id, info);
        }
        removed
    }

    /// Create the session entry if missing and recount its records
    pub fn refresh_session(&mut self, session_id: &str, now: i64) {
        let count = self
            .tab_records
            .values()
            .filter(|r| r.session_id == session_id)
            .count();
        let info = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionInfo::new(now));
        info.tab_count = count;
        info.last_updated = now;
    }

    fn to_items(&self) -> Result<Vec<(String, Value)>> {
        Ok(vec![
            (TAB_RECORDS_KEY.to_string(), serde_json::to_value(&self.tab_records)?),
            (SESSIONS_KEY.to_string(), serde_json::to_value(&self.sessions)?),
            (
                CURRENT_SESSION_KEY.to_string(),
                serde_json::to_value(&self.current_session_id)?,
            ),
        ])
    }
}

fn validate_record(record: &TabRecord) -> Result<()> {
    if record.record_id.trim().is_empty() {
        return Err(Error::validation("Record has no recordId"));
    }
    if record.session_id.trim().is_empty() {
        return Err(Error::validation(format!(
            "Record {} has no sessionId",
            record.record_id
        )));
    }
    validate_url(&record.original_url)
}

fn sorted_by_creation(mut records: Vec<TabRecord>) -> Vec<TabRecord> {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    records
}

/// Durable `recordId -> TabRecord` map.
///
/// Mutations apply to the in-memory copy immediately and are acknowledged once
/// the storage area has accepted the write. The `restored` flag is guarded by
/// claims: a record can be claimed by one restoration at a time.
pub struct TabRecordStore {
    area: Rc<dyn StorageArea>,
    data: RefCell<StorageData>,
    claimed: RefCell<HashSet<String>>,
}

impl TabRecordStore {
    /// Load persisted state. Unreadable records are dropped with a warning.
    pub async fn open(area: Rc<dyn StorageArea>) -> Result<Self> {
        let mut data = StorageData::new();

        if let Some(Value::Object(entries)) = area.get(TAB_RECORDS_KEY).await? {
            for (record_id, value) in entries {
                match serde_json::from_value::<TabRecord>(value) {
                    Ok(record) => {
                        data.tab_records.insert(record_id, record);
                    }
                    Err(e) => warn!("Skipping unreadable record {}: {}", record_id, e),
                }
            }
        }

        if let Some(value) = area.get(SESSIONS_KEY).await? {
            match serde_json::from_value(value) {
                Ok(sessions) => data.sessions = sessions,
                Err(e) => warn!("Session table unreadable, rebuilding: {}", e),
            }
        }

        if let Some(Value::String(current)) = area.get(CURRENT_SESSION_KEY).await? {
            data.current_session_id = Some(current);
        }

        let now = now_millis();
        let session_ids: HashSet<String> = data
            .tab_records
            .values()
            .map(|r| r.session_id.clone())
            .collect();
        for session_id in session_ids {
            data.refresh_session(&session_id, now);
        }

        debug!(
            "Opened store with {} records in {} sessions",
            data.tab_records.len(),
            data.sessions.len()
        );

        Ok(TabRecordStore {
            area,
            data: RefCell::new(data),
            claimed: RefCell::new(HashSet::new()),
        })
    }

    pub async fn put(&self, record: TabRecord) -> Result<()> {
        validate_record(&record)?;

        debug!("Storing record {} ({})", record.record_id, record.original_url);
        self.data.borrow_mut().upsert_record(record, now_millis());
        self.flush().await
    }

    /// Upsert several records with a single write.
    ///
    /// Invalid records are left out and handed back with their error; the
    /// `Err` case is reserved for the write itself failing.
    pub async fn put_batch(&self, records: Vec<TabRecord>) -> Result<Vec<(TabRecord, Error)>> {
        let mut rejected = Vec::new();
        let mut accepted = 0;
        {
            let now = now_millis();
            let mut data = self.data.borrow_mut();
            for record in records {
                match validate_record(&record) {
                    Ok(()) => {
                        data.upsert_record(record, now);
                        accepted += 1;
                    }
                    Err(e) => rejected.push((record, e)),
                }
            }
        }

        if accepted > 0 {
            debug!("Storing {} records in one batch", accepted);
            self.flush().await?;
        }
        Ok(rejected)
    }

    pub fn get(&self, record_id: &str) -> Result<TabRecord> {
        self.data
            .borrow()
            .tab_records
            .get(record_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("record {}", record_id)))
    }

    pub fn list_by_session(&self, session_id: &str) -> Vec<TabRecord> {
        self.data.borrow().records_in_session(session_id)
    }

    pub fn list_all(&self) -> Vec<TabRecord> {
        self.data.borrow().all_records()
    }

    pub async fn delete(&self, record_id: &str) -> Result<()> {
        let removed = self.data.borrow_mut().remove_record(record_id, now_millis());
        if removed {
            self.flush().await?;
        }
        Ok(())
    }

    /// Remove every record, or only those of `session_id`
    pub async fn clear(&self, session_id: Option<&str>) -> Result<usize> {
        let removed = {
            let mut data = self.data.borrow_mut();
            match session_id {
                Some(id) => data.clear_session(id),
                None => data.clear_all(now_millis()),
            }
        };
        self.flush().await?;
        Ok(removed)
    }

    /// Reserve a record for restoration.
    ///
    /// Returns `Ok(false)` when the record is already restored or another
    /// restoration holds it.
    pub fn claim(&self, record_id: &str) -> Result<bool> {
        let data = self.data.borrow();
        let record = data
            .tab_records
            .get(record_id)
            .ok_or_else(|| Error::not_found(format!("record {}", record_id)))?;
        if record.restored {
            return Ok(false);
        }
        Ok(self.claimed.borrow_mut().insert(record_id.to_string()))
    }

    /// Release a claim, flipping `restored` when the restoration went through
    pub async fn finish_claim(&self, record_id: &str, restored: bool) -> Result<()> {
        self.claimed.borrow_mut().remove(record_id);
        if !restored {
            return Ok(());
        }

        let changed = {
            let mut data = self.data.borrow_mut();
            match data.tab_records.get_mut(record_id) {
                Some(record) => {
                    record.restored = true;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.flush().await?;
        }
        Ok(())
    }

    /// Latest unrestored, non-backup record captured from a live tab
    pub fn find_by_host_tab(&self, host_tab_id: i32) -> Option<TabRecord> {
        self.data
            .borrow()
            .all_records()
            .into_iter()
            .rev()
            .find(|r| r.host_tab_id == Some(host_tab_id) && !r.restored && !r.all_tabs_backup)
    }

    pub fn suspended_count(&self) -> usize {
        self.data
            .borrow()
            .tab_records
            .values()
            .filter(|r| !r.restored && !r.all_tabs_backup)
            .count()
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.data.borrow().current_session_id.clone()
    }

    pub async fn set_current_session(&self, session_id: &str) -> Result<()> {
        {
            let mut data = self.data.borrow_mut();
            data.current_session_id = Some(session_id.to_string());
            data.refresh_session(session_id, now_millis());
        }
        self.flush().await
    }

    /// Make sure a session entry exists, optionally naming it
    pub async fn register_session(&self, session_id: &str, name: Option<String>) -> Result<()> {
        {
            let mut data = self.data.borrow_mut();
            data.refresh_session(session_id, now_millis());
            if let Some(name) = name {
                if let Some(info) = data.sessions.get_mut(session_id) {
                    info.name = Some(name);
                }
            }
        }
        self.flush().await
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.data.borrow().sessions.contains_key(session_id)
    }

    /// Sessions, most recently updated first
    pub fn sessions(&self) -> Vec<(String, SessionInfo)> {
        let mut sessions: Vec<(String, SessionInfo)> = self
            .data
            .borrow()
            .sessions
            .iter()
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect();
        sessions.sort_by(|a, b| {
            b.1.last_updated
                .cmp(&a.1.last_updated)
                .then_with(|| a.0.cmp(&b.0))
        });
        sessions
    }

    async fn flush(&self) -> Result<()> {
        let items = self.data.borrow().to_items()?;
        self.area.set(items).await.inspect_err(|e| {
            error!("Failed to persist tab records: {}", e);
        })
    }
}
