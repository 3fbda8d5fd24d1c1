/// Suspension tracking: turns tab notifications into stored records
use crate::error::{Error, Result};
use crate::session::{generate_id, new_session_id};
use crate::storage::TabRecordStore;
use crate::suspended_url::{SuspendedPage, build_suspended_url, check_restorable, parse_suspended_url};
use crate::tab_data::{TabInfo, TabRecord, TabUpdate, now_millis};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

struct Tracked {
    record: TabRecord,
    /// The store acknowledged the write
    persisted: bool,
    /// A write is in flight
    writing: bool,
}

impl Tracked {
    fn new(record: TabRecord, persisted: bool) -> Self {
        Tracked {
            record,
            persisted,
            writing: false,
        }
    }
}

/// Watches tab updates for the extension's suspended page and records each
/// suspended tab once per live tab id.
pub struct SuspensionTracker {
    store: Rc<TabRecordStore>,
    origin: String,
    tracked: RefCell<HashMap<i32, Tracked>>,
}

impl SuspensionTracker {
    pub fn new(store: Rc<TabRecordStore>, origin: impl Into<String>) -> Self {
        SuspensionTracker {
            store,
            origin: origin.into(),
            tracked: RefCell::new(HashMap::new()),
        }
    }

    /// Handle a tab-updated notification.
    ///
    /// Returns the id of the record written for this update, if any.
    /// Malformed suspended URLs are logged and skipped.
    pub async fn on_tab_updated(&self, update: &TabUpdate) -> Option<String> {
        let url = update.url.as_deref()?;

        let page = match parse_suspended_url(url, &self.origin) {
            Ok(Some(page)) => page,
            Ok(None) => {
                if self.tracked.borrow_mut().remove(&update.tab_id).is_some() {
                    debug!("Tab {} left its suspended page", update.tab_id);
                }
                return None;
            }
            Err(e) => {
                warn!("Skipping tab {}: {}", update.tab_id, e);
                return None;
            }
        };

        // Claimed before the first await so overlapping notifications for
        // the same tab see it.
        let record = {
            let mut tracked = self.tracked.borrow_mut();
            let same_page = tracked
                .get(&update.tab_id)
                .is_some_and(|t| t.record.original_url == page.original_url);

            if same_page {
                let t = tracked.get_mut(&update.tab_id)?;
                if t.persisted || t.writing {
                    return None;
                }
                t.writing = true;
                t.record.clone()
            } else if let Some(existing) = self.stored_record(update.tab_id, &page) {
                debug!(
                    "Tab {} already recorded as {}",
                    update.tab_id, existing.record_id
                );
                tracked.insert(update.tab_id, Tracked::new(existing, true));
                return None;
            } else {
                let record = self.new_record(update, page);
                let mut entry = Tracked::new(record.clone(), false);
                entry.writing = true;
                tracked.insert(update.tab_id, entry);
                record
            }
        };

        self.persist(update.tab_id, record).await
    }

    /// Handle a tab-removed notification. A record whose write never went
    /// through gets one more attempt before the tab is forgotten.
    pub async fn on_tab_removed(&self, tab_id: i32) -> bool {
        let Some(tracked) = self.tracked.borrow_mut().remove(&tab_id) else {
            return false;
        };
        if tracked.persisted {
            return false;
        }

        let record_id = tracked.record.record_id.clone();
        match self.store.put(tracked.record).await {
            Ok(()) => {
                info!("Preserved record {} for closed tab {}", record_id, tab_id);
                true
            }
            Err(e) => {
                warn!("Lost record {} for closed tab {}: {}", record_id, tab_id, e);
                false
            }
        }
    }

    /// Feed every open tab through the tracker, e.g. after a restart
    pub async fn scan(&self, tabs: Vec<TabInfo>) -> usize {
        let mut recorded = 0;
        for tab in tabs {
            if self.on_tab_updated(&TabUpdate::from(tab)).await.is_some() {
                recorded += 1;
            }
        }
        if recorded > 0 {
            info!("Recorded {} suspended tabs already open", recorded);
        }
        recorded
    }

    /// Suspended-page URL for a live tab, tagged with `session_id`
    pub fn suspend_url_for(&self, tab: &TabInfo, session_id: &str) -> Result<String> {
        if let Ok(Some(_)) = parse_suspended_url(&tab.url, &self.origin) {
            return Err(Error::validation(format!("Tab {} is already suspended", tab.id)));
        }
        check_restorable(&tab.url)?;

        build_suspended_url(&self.origin, &tab.url, &tab.title, session_id, tab.id)
    }

    pub fn is_tracked(&self, tab_id: i32) -> bool {
        self.tracked.borrow().contains_key(&tab_id)
    }

    fn new_record(&self, update: &TabUpdate, page: SuspendedPage) -> TabRecord {
        let session_id = page
            .session_id
            .or_else(|| self.store.current_session_id())
            .unwrap_or_else(new_session_id);
        let title = if page.title.is_empty() {
            update.title.clone().unwrap_or_default()
        } else {
            page.title
        };

        TabRecord {
            record_id: generate_id("tab"),
            session_id,
            host_tab_id: Some(update.tab_id),
            original_url: page.original_url,
            title,
            favicon_url: update.fav_icon_url.clone().unwrap_or_default(),
            window_id: update.window_id,
            index: update.index,
            pinned: update.pinned.unwrap_or(false),
            created_at: now_millis(),
            restored: false,
            all_tabs_backup: false,
        }
    }

    /// A record from an earlier worker lifetime for the same tab and page
    fn stored_record(&self, tab_id: i32, page: &SuspendedPage) -> Option<TabRecord> {
        self.store
            .find_by_host_tab(tab_id)
            .filter(|r| r.original_url == page.original_url)
    }

    async fn persist(&self, tab_id: i32, record: TabRecord) -> Option<String> {
        let record_id = record.record_id.clone();
        let outcome = self.store.put(record).await;

        let mut tracked = self.tracked.borrow_mut();
        let entry = tracked
            .get_mut(&tab_id)
            .filter(|t| t.record.record_id == record_id);
        match outcome {
            Ok(()) => {
                debug!("Recorded suspended tab {} as {}", tab_id, record_id);
                if let Some(t) = entry {
                    t.persisted = true;
                    t.writing = false;
                }
                Some(record_id)
            }
            Err(Error::Validation(msg)) => {
                warn!("Skipping tab {}: {}", tab_id, msg);
                if entry.is_some() {
                    tracked.remove(&tab_id);
                }
                None
            }
            Err(e) => {
                warn!("Record {} for tab {} not yet durable: {}", record_id, tab_id, e);
                if let Some(t) = entry {
                    t.writing = false;
                }
                Some(record_id)
            }
        }
    }
}
