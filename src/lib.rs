/// Tab Suspender - persistence and restoration core for a tab-suspending
/// Chrome extension
/// Built with Rust + WASM

mod bridge;
mod config;
mod error;
mod host;
mod messages;
mod restore;
mod session;
mod storage;
mod suspended_url;
mod tab_data;
mod tracker;

#[cfg(test)]
mod testing;

pub use bridge::BackgroundHandle;
pub use config::Settings;
pub use error::{Error, Result};
pub use host::{StorageArea, TabHost};
pub use messages::{Background, Payload, Request, Response};
pub use restore::RestorationEngine;
pub use session::{ExportDocument, SessionGrouping, SessionSummary};
pub use storage::{StorageData, TabRecordStore};
pub use tab_data::{
    BackupSummary, CreateTab, ImportSummary, RestoreSummary, SessionInfo, TabInfo, TabRecord,
    TabUpdate,
};
pub use tracker::SuspensionTracker;

use std::rc::Rc;
use wasm_bindgen::prelude::*;

// Set up panic hook for better error messages in the browser console
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::new(log::Level::Trace));
}

// Re-export the suspended-page decoder for the suspended page script
#[wasm_bindgen]
pub fn original_url(suspended_url: &str, extension_origin: &str) -> Option<String> {
    suspended_url::parse_suspended_url(suspended_url, extension_origin)
        .ok()
        .flatten()
        .map(|page| page.original_url)
}

// Wire the background worker to chrome.tabs and chrome.storage
#[wasm_bindgen(js_name = startBackground)]
pub async fn start_background() -> std::result::Result<BackgroundHandle, JsValue> {
    let host: Rc<dyn TabHost> = Rc::new(bridge::ChromeTabs);
    let area: Rc<dyn StorageArea> = Rc::new(bridge::ChromeStorage);

    let settings = Settings::load(area.as_ref()).await;
    log::set_max_level(settings.log_level().to_level_filter());

    let background = Background::start(host, area, &settings)
        .await
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    log::info!("Background worker ready");
    Ok(BackgroundHandle::new(background))
}
