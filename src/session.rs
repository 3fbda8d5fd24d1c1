/// Session ids, export/import and all-tabs backups
use crate::error::{Error, Result};
use crate::host::TabHost;
use crate::storage::TabRecordStore;
use crate::suspended_url::{is_restorable, parse_suspended_url};
use crate::tab_data::{BackupSummary, ImportSummary, SessionInfo, TabRecord, now_millis};
use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::LazyLock;
use uuid::Uuid;

pub const EXPORT_VERSION: &str = "1.0";

/// `sessionId` written into documents that span every session
pub const ALL_SESSIONS: &str = "all";

/// Ids coming from imported files must look like ids we would generate
static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,127}$").expect("valid id pattern"));

/// `<prefix>_<epoch millis>_<random>`
pub fn generate_id(prefix: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, now_millis(), &random[..9])
}

pub fn new_session_id() -> String {
    generate_id("session")
}

fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// Portable JSON form of a set of records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub export_version: String,
    pub export_date: String,
    pub session_id: String,
    pub tab_count: usize,
    pub tabs: Vec<TabRecord>,
}

impl ExportDocument {
    pub fn new(session_id: &str, tabs: Vec<TabRecord>) -> Self {
        ExportDocument {
            export_version: EXPORT_VERSION.to_string(),
            export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            session_id: session_id.to_string(),
            tab_count: tabs.len(),
            tabs,
        }
    }
}

/// A tab entry as found in an import file. Everything is optional so one bad
/// entry does not sink the whole file, and older field names are accepted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportedTab {
    #[serde(default)]
    record_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    host_tab_id: Option<i32>,
    #[serde(default, alias = "url", alias = "uri")]
    original_url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "favIconUrl")]
    favicon_url: Option<String>,
    #[serde(default)]
    window_id: Option<i32>,
    #[serde(default)]
    index: Option<i32>,
    #[serde(default)]
    pinned: bool,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    restored: bool,
    #[serde(default)]
    all_tabs_backup: bool,
}

/// One row of `listSessions`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub current: bool,
    #[serde(flatten)]
    pub info: SessionInfo,
}

/// Groups records into sessions and moves them in and out of the store
pub struct SessionGrouping {
    store: Rc<TabRecordStore>,
    host: Rc<dyn TabHost>,
}

impl SessionGrouping {
    pub fn new(store: Rc<TabRecordStore>, host: Rc<dyn TabHost>) -> Self {
        SessionGrouping { store, host }
    }

    /// Start a fresh session and make it current
    pub async fn create_new_session(&self) -> Result<String> {
        let session_id = new_session_id();
        self.store.set_current_session(&session_id).await?;
        info!("Started session {}", session_id);
        Ok(session_id)
    }

    /// The current session id, creating one on first use
    pub async fn ensure_current_session(&self) -> Result<String> {
        match self.store.current_session_id() {
            Some(id) => Ok(id),
            None => self.create_new_session().await,
        }
    }

    pub fn export_session(&self, session_id: &str) -> Result<ExportDocument> {
        let tabs = self.store.list_by_session(session_id);
        if tabs.is_empty() && !self.store.has_session(session_id) {
            return Err(Error::not_found(format!("session {}", session_id)));
        }
        Ok(ExportDocument::new(session_id, tabs))
    }

    pub fn export_all(&self) -> ExportDocument {
        ExportDocument::new(ALL_SESSIONS, self.store.list_all())
    }

    /// Write the tabs of an export document into the store.
    ///
    /// The document must carry `exportVersion` "1.0" and a `tabs` array.
    /// Entries without a usable record id get a fresh one; entries without a
    /// session id join the document's session. Nothing is restored.
    pub async fn import_records(&self, document: &Value) -> Result<ImportSummary> {
        let object = document
            .as_object()
            .ok_or_else(|| Error::validation("Import data must be a JSON object"))?;

        match object.get("exportVersion").and_then(Value::as_str) {
            Some(EXPORT_VERSION) => {}
            Some(other) => {
                return Err(Error::validation(format!(
                    "Unsupported export version: {}",
                    other
                )));
            }
            None => return Err(Error::validation("Import data has no exportVersion")),
        }

        let entries = object
            .get("tabs")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::validation("Import data has no tabs array"))?;

        let fallback_session = object
            .get("sessionId")
            .and_then(Value::as_str)
            .filter(|id| *id != ALL_SESSIONS && is_valid_id(id))
            .map(str::to_string)
            .unwrap_or_else(new_session_id);

        let now = now_millis();
        let mut summary = ImportSummary::default();
        let mut records = Vec::with_capacity(entries.len());

        let mut seen = HashSet::new();

        for (position, entry) in entries.iter().enumerate() {
            match serde_json::from_value::<ImportedTab>(entry.clone()) {
                Ok(tab) => {
                    let record = into_record(tab, &fallback_session, now);
                    // Existing records keep their restored state
                    let exists = self.store.get(&record.record_id).is_ok()
                        || !seen.insert(record.record_id.clone());
                    if exists {
                        let msg = format!("record {} already exists", record.record_id);
                        warn!("Skipping import entry {}: {}", position, msg);
                        summary.failed += 1;
                        summary.errors.push(format!("entry {}: {}", position, msg));
                        continue;
                    }
                    records.push(record);
                }
                Err(e) => {
                    warn!("Skipping import entry {}: {}", position, e);
                    summary.failed += 1;
                    summary.errors.push(format!("entry {}: {}", position, e));
                }
            }
        }

        let submitted = records.len();
        let rejected = self.store.put_batch(records).await?;
        for (record, e) in &rejected {
            warn!("Skipping imported record {}: {}", record.record_id, e);
            summary.errors.push(format!("{}: {}", record.record_id, e));
        }
        summary.failed += rejected.len();
        summary.imported = submitted - rejected.len();

        info!(
            "Imported {} records ({} failed)",
            summary.imported, summary.failed
        );
        Ok(summary)
    }

    /// Snapshot every open tab into a new session flagged as a backup.
    ///
    /// Suspended tabs are stored under their original URL; tabs that could
    /// not be reopened later (browser pages and the like) are skipped.
    pub async fn backup(&self, name: Option<String>) -> Result<BackupSummary> {
        let mut tabs = self.host.query_tabs().await?;
        tabs.sort_by_key(|t| (t.window_id.unwrap_or_default(), t.index));

        let origin = self.host.extension_origin();
        let session_id = new_session_id();
        let base = now_millis();
        let mut skipped = 0;
        let mut records = Vec::with_capacity(tabs.len());

        for tab in tabs {
            let (url, title) = match parse_suspended_url(&tab.url, &origin) {
                Ok(Some(page)) if !page.title.is_empty() => (page.original_url, page.title),
                Ok(Some(page)) => (page.original_url, tab.title.clone()),
                _ => (tab.url.clone(), tab.title.clone()),
            };
            if !is_restorable(&url) {
                skipped += 1;
                continue;
            }

            records.push(TabRecord {
                record_id: generate_id("tab"),
                session_id: session_id.clone(),
                host_tab_id: Some(tab.id),
                original_url: url,
                title,
                favicon_url: tab.fav_icon_url.unwrap_or_default(),
                window_id: tab.window_id,
                index: Some(tab.index),
                pinned: tab.pinned,
                // offsets keep the tab order when sorting by creation time
                created_at: base + records.len() as i64,
                restored: false,
                all_tabs_backup: true,
            });
        }

        let tab_count = records.len();
        let rejected = self.store.put_batch(records).await?;
        skipped += rejected.len();
        self.store.register_session(&session_id, name).await?;

        info!("Backed up {} tabs into {}", tab_count - rejected.len(), session_id);
        Ok(BackupSummary {
            session_id,
            tab_count: tab_count - rejected.len(),
            skipped,
        })
    }

    /// Delete a session and its records; returns how many records went
    pub async fn clear_session(&self, session_id: &str) -> Result<usize> {
        if !self.store.has_session(session_id) && self.store.list_by_session(session_id).is_empty() {
            return Err(Error::not_found(format!("session {}", session_id)));
        }

        let removed = self.store.clear(Some(session_id)).await?;
        if self.store.current_session_id().as_deref() == Some(session_id) {
            self.store.register_session(session_id, None).await?;
        }
        info!("Cleared session {} ({} records)", session_id, removed);
        Ok(removed)
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let current = self.store.current_session_id();
        self.store
            .sessions()
            .into_iter()
            .map(|(session_id, info)| SessionSummary {
                current: current.as_deref() == Some(session_id.as_str()),
                session_id,
                info,
            })
            .collect()
    }
}

fn into_record(tab: ImportedTab, fallback_session: &str, now: i64) -> TabRecord {
    let record_id = tab
        .record_id
        .filter(|id| is_valid_id(id))
        .unwrap_or_else(|| generate_id("tab"));
    let session_id = tab
        .session_id
        .filter(|id| is_valid_id(id))
        .unwrap_or_else(|| fallback_session.to_string());

    TabRecord {
        record_id,
        session_id,
        host_tab_id: tab.host_tab_id,
        original_url: tab.original_url.unwrap_or_default(),
        title: tab.title.unwrap_or_default(),
        favicon_url: tab.favicon_url.unwrap_or_default(),
        window_id: tab.window_id,
        index: tab.index,
        pinned: tab.pinned,
        created_at: tab.created_at.unwrap_or(now),
        restored: tab.restored,
        all_tabs_backup: tab.all_tabs_backup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTabs, MemoryStorage, ORIGIN, tab};
    use futures::executor::block_on;
    use serde_json::json;
    use std::collections::HashMap;

    fn grouping_with(tabs: FakeTabs) -> (Rc<TabRecordStore>, SessionGrouping) {
        let area = Rc::new(MemoryStorage::new());
        let store = Rc::new(block_on(TabRecordStore::open(area)).unwrap());
        let grouping = SessionGrouping::new(store.clone(), Rc::new(tabs));
        (store, grouping)
    }

    fn record(id: &str, session: &str, url: &str, created_at: i64) -> TabRecord {
        TabRecord {
            record_id: id.to_string(),
            session_id: session.to_string(),
            host_tab_id: Some(3),
            original_url: url.to_string(),
            title: format!("Title {}", id),
            favicon_url: "https://example.com/favicon.ico".to_string(),
            window_id: Some(1),
            index: Some(2),
            pinned: true,
            created_at,
            restored: false,
            all_tabs_backup: false,
        }
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = new_session_id();
        let b = new_session_id();

        assert_ne!(a, b);
        assert!(a.starts_with("session_"));
        assert!(is_valid_id(&a));
        assert!(is_valid_id(&generate_id("tab")));
    }

    #[test]
    fn test_id_pattern_rejects_junk() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id("_leading"));
        assert!(!is_valid_id(&"x".repeat(200)));
        assert!(is_valid_id("tab_1698508200000_a1b2c3d4e"));
    }

    #[test]
    fn test_create_new_session_becomes_current() {
        let (store, grouping) = grouping_with(FakeTabs::new());

        let id = block_on(grouping.create_new_session()).unwrap();

        assert_eq!(store.current_session_id(), Some(id.clone()));
        assert_eq!(block_on(grouping.ensure_current_session()).unwrap(), id);
    }

    #[test]
    fn test_export_session_document() {
        let (store, grouping) = grouping_with(FakeTabs::new());
        block_on(store.put(record("b", "s1", "https://b.com", 2))).unwrap();
        block_on(store.put(record("a", "s1", "https://a.com", 1))).unwrap();
        block_on(store.put(record("x", "s2", "https://x.com", 1))).unwrap();

        let doc = grouping.export_session("s1").unwrap();

        assert_eq!(doc.export_version, "1.0");
        assert_eq!(doc.session_id, "s1");
        assert_eq!(doc.tab_count, 2);
        assert_eq!(doc.tabs[0].record_id, "a");
        assert!(chrono::DateTime::parse_from_rfc3339(&doc.export_date).is_ok());

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["exportVersion"], "1.0");
        assert_eq!(value["tabCount"], 2);
        assert_eq!(value["tabs"][1]["originalUrl"], "https://b.com");
    }

    #[test]
    fn test_export_unknown_session() {
        let (_, grouping) = grouping_with(FakeTabs::new());

        assert!(matches!(grouping.export_session("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_export_all() {
        let (store, grouping) = grouping_with(FakeTabs::new());
        block_on(store.put(record("a", "s1", "https://a.com", 1))).unwrap();
        block_on(store.put(record("b", "s2", "https://b.com", 2))).unwrap();

        let doc = grouping.export_all();

        assert_eq!(doc.session_id, ALL_SESSIONS);
        assert_eq!(doc.tab_count, 2);
    }

    #[test]
    fn test_export_then_import_round_trip() {
        let (source, exporter) = grouping_with(FakeTabs::new());
        block_on(source.put(record("tab_1", "s1", "https://a.com", 1))).unwrap();
        let mut restored = record("tab_2", "s1", "https://b.com", 2);
        restored.restored = true;
        block_on(source.put(restored)).unwrap();
        let doc = serde_json::to_value(exporter.export_session("s1").unwrap()).unwrap();

        let (target, importer) = grouping_with(FakeTabs::new());
        let summary = block_on(importer.import_records(&doc)).unwrap();

        assert_eq!(summary.imported, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(target.list_by_session("s1"), source.list_by_session("s1"));
    }

    #[test]
    fn test_import_never_overwrites_records() {
        let (store, grouping) = grouping_with(FakeTabs::new());
        block_on(store.put(record("a", "s1", "https://a.com", 1))).unwrap();
        let doc = serde_json::to_value(grouping.export_session("s1").unwrap()).unwrap();
        assert!(store.claim("a").unwrap());
        block_on(store.finish_claim("a", true)).unwrap();

        let mut doubled = doc.clone();
        let entry = doubled["tabs"][0].clone();
        let mut other = entry.clone();
        other["recordId"] = json!("b");
        doubled["tabs"] = json!([entry, other.clone(), other]);
        let summary = block_on(grouping.import_records(&doubled)).unwrap();

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.failed, 2);
        assert!(summary.errors[0].contains("record a already exists"));
        assert!(store.get("a").unwrap().restored);
        assert_eq!(store.list_all().len(), 2);
    }

    #[test]
    fn test_import_fills_missing_ids() {
        let (store, grouping) = grouping_with(FakeTabs::new());
        let doc = json!({
            "exportVersion": "1.0",
            "exportDate": "2024-10-28T10:30:00.000Z",
            "sessionId": "session_imported",
            "tabCount": 2,
            "tabs": [
                { "url": "https://legacy.example", "title": "Legacy" },
                { "originalUrl": "https://new.example", "recordId": "bad id!", "createdAt": 5 }
            ]
        });

        let summary = block_on(grouping.import_records(&doc)).unwrap();

        assert_eq!(summary.imported, 2);
        let records = store.list_by_session("session_imported");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.record_id.starts_with("tab_")));
        assert!(records.iter().all(|r| !r.restored));
        let urls: Vec<&str> = records.iter().map(|r| r.original_url.as_str()).collect();
        assert!(urls.contains(&"https://legacy.example"));
        assert!(urls.contains(&"https://new.example"));
    }

    #[test]
    fn test_import_tallies_bad_entries() {
        let (store, grouping) = grouping_with(FakeTabs::new());
        let doc = json!({
            "exportVersion": "1.0",
            "sessionId": "s1",
            "tabs": [
                { "originalUrl": "https://ok.example", "recordId": "ok" },
                { "originalUrl": "no scheme here", "recordId": "bad_url" },
                { "title": "missing url", "recordId": "no_url" },
                "not an object"
            ]
        });

        let summary = block_on(grouping.import_records(&doc)).unwrap();

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.errors.len(), 3);
        assert!(store.get("ok").is_ok());
        assert!(store.get("bad_url").is_err());
    }

    #[test]
    fn test_import_rejects_bad_documents() {
        let (_, grouping) = grouping_with(FakeTabs::new());

        let cases = vec![
            json!([1, 2, 3]),
            json!({ "tabs": [] }),
            json!({ "exportVersion": "2.0", "tabs": [] }),
            json!({ "exportVersion": "1.0", "tabs": "nope" }),
        ];

        for doc in cases {
            assert!(
                matches!(block_on(grouping.import_records(&doc)), Err(Error::Validation(_))),
                "accepted {}",
                doc
            );
        }
    }

    #[test]
    fn test_import_of_all_sessions_keeps_entry_sessions() {
        let (store, grouping) = grouping_with(FakeTabs::new());
        let doc = json!({
            "exportVersion": "1.0",
            "sessionId": "all",
            "tabs": [
                { "originalUrl": "https://a.example", "sessionId": "s1" },
                { "originalUrl": "https://b.example" }
            ]
        });

        block_on(grouping.import_records(&doc)).unwrap();

        let by_session: HashMap<String, usize> =
            store.sessions().into_iter().map(|(id, info)| (id, info.tab_count)).collect();
        assert_eq!(by_session.get("s1"), Some(&1));
        assert_eq!(by_session.len(), 2);
        assert!(!by_session.contains_key("all"));
    }

    #[test]
    fn test_backup_snapshots_restorable_tabs() {
        let suspended = format!("{}/suspended?uri=https%3A%2F%2Fdocs.rs&title=Docs", ORIGIN);
        let tabs = FakeTabs::with_tabs(vec![
            tab(3, "https://github.com", "GitHub"),
            tab(1, "chrome://extensions", "Extensions"),
            tab(2, &suspended, "Suspended"),
            tab(4, "", ""),
        ]);
        let (store, grouping) = grouping_with(tabs);

        let summary = block_on(grouping.backup(Some("Nightly".to_string()))).unwrap();

        assert_eq!(summary.tab_count, 2);
        assert_eq!(summary.skipped, 2);
        let records = store.list_by_session(&summary.session_id);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.all_tabs_backup));
        assert_eq!(records[0].original_url, "https://docs.rs");
        assert_eq!(records[0].title, "Docs");
        assert_eq!(records[1].original_url, "https://github.com");
        assert_eq!(store.suspended_count(), 0);

        let sessions = grouping.list_sessions();
        assert_eq!(sessions[0].info.name.as_deref(), Some("Nightly"));
    }

    #[test]
    fn test_clear_session() {
        let (store, grouping) = grouping_with(FakeTabs::new());
        block_on(store.put(record("a", "s1", "https://a.com", 1))).unwrap();
        block_on(store.put(record("b", "s2", "https://b.com", 2))).unwrap();

        assert_eq!(block_on(grouping.clear_session("s1")).unwrap(), 1);
        assert!(store.list_by_session("s1").is_empty());
        assert!(matches!(block_on(grouping.clear_session("s1")), Err(Error::NotFound(_))));
        assert_eq!(store.list_by_session("s2").len(), 1);
    }

    #[test]
    fn test_clearing_current_session_keeps_it_listed() {
        let (store, grouping) = grouping_with(FakeTabs::new());
        let current = block_on(grouping.create_new_session()).unwrap();
        block_on(store.put(record("a", &current, "https://a.com", 1))).unwrap();

        block_on(grouping.clear_session(&current)).unwrap();

        let sessions = grouping.list_sessions();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].current);
        assert_eq!(sessions[0].info.tab_count, 0);
    }
}
