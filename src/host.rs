/// Interfaces to the browser host: tabs and key-value storage
///
/// Everything runs on the single-threaded extension event loop, so the
/// futures are not `Send`.
use crate::error::Result;
use crate::tab_data::{CreateTab, TabInfo};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Tab operations offered by the host (`chrome.tabs` in the extension)
#[async_trait(?Send)]
pub trait TabHost {
    /// Create a tab and return what the host reports for it
    async fn create_tab(&self, request: &CreateTab) -> Result<TabInfo>;

    /// Navigate an existing tab
    async fn update_tab_url(&self, tab_id: i32, url: &str) -> Result<()>;

    async fn get_tab(&self, tab_id: i32) -> Result<TabInfo>;

    /// All tabs in all windows
    async fn query_tabs(&self) -> Result<Vec<TabInfo>>;

    /// Origin of the extension's own pages, e.g. `chrome-extension://abc`
    fn extension_origin(&self) -> String;

    async fn sleep(&self, duration: Duration);
}

/// Key-value document storage (`chrome.storage.local` in the extension)
#[async_trait(?Send)]
pub trait StorageArea {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write several keys; resolves once the host acknowledges the write
    async fn set(&self, items: Vec<(String, Value)>) -> Result<()>;
}
