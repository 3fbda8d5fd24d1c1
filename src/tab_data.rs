/// Data structures for tab suspension and restoration
use serde::{Deserialize, Serialize};

/// Information about a live browser tab, as reported by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    #[serde(default)]
    pub id: i32,
    /// Empty when the extension lacks host access to the tab
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub window_id: Option<i32>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
}

impl TabInfo {
    pub fn new(id: i32, url: String, title: String, pinned: bool, index: i32) -> TabInfo {
        TabInfo {
            id,
            url,
            title,
            pinned,
            index,
            window_id: None,
            fav_icon_url: None,
        }
    }
}

/// A tab-updated notification. Chrome leaves out fields that did not change,
/// so everything but the tab id is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabUpdate {
    pub tab_id: i32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub window_id: Option<i32>,
    #[serde(default)]
    pub index: Option<i32>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl From<TabInfo> for TabUpdate {
    fn from(tab: TabInfo) -> Self {
        TabUpdate {
            tab_id: tab.id,
            url: Some(tab.url),
            title: Some(tab.title),
            window_id: tab.window_id,
            index: Some(tab.index),
            pinned: Some(tab.pinned),
            fav_icon_url: tab.fav_icon_url,
            status: None,
        }
    }
}

/// One suspended (or backed up) tab, persisted under `tabRecords`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRecord {
    pub record_id: String,
    pub session_id: String,
    #[serde(default)]
    pub host_tab_id: Option<i32>,
    pub original_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub favicon_url: String,
    #[serde(default)]
    pub window_id: Option<i32>,
    #[serde(default)]
    pub index: Option<i32>,
    #[serde(default)]
    pub pinned: bool,
    pub created_at: i64,
    #[serde(default)]
    pub restored: bool,
    #[serde(default)]
    pub all_tabs_backup: bool,
}

/// Per-session bookkeeping, persisted under `sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub created: i64,
    pub last_updated: i64,
    pub tab_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SessionInfo {
    pub fn new(now: i64) -> Self {
        SessionInfo {
            created: now,
            last_updated: now,
            tab_count: 0,
            name: None,
        }
    }
}

/// Tab-creation request handed to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTab {
    pub url: String,
    pub pinned: bool,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i32>,
}

/// Tally returned by a restoration run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub attempted: usize,
    pub restored: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Tally returned by an import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported: usize,
    pub failed: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Result of an all-tabs backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub session_id: String,
    pub tab_count: usize,
    pub skipped: usize,
}

/// Epoch milliseconds, the unit every stored timestamp uses
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
