/// Restoration: recreating live tabs from stored records
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::host::TabHost;
use crate::storage::TabRecordStore;
use crate::suspended_url::{check_restorable, parse_suspended_url};
use crate::tab_data::{CreateTab, RestoreSummary, TabRecord};
use log::{debug, info, warn};
use std::rc::Rc;
use std::time::Duration;

pub struct RestorationEngine {
    store: Rc<TabRecordStore>,
    host: Rc<dyn TabHost>,
    delay: Duration,
    activate: bool,
}

impl RestorationEngine {
    pub fn new(store: Rc<TabRecordStore>, host: Rc<dyn TabHost>, settings: &Settings) -> Self {
        RestorationEngine {
            store,
            host,
            delay: Duration::from_millis(u64::from(settings.restore_delay_ms)),
            activate: settings.activate_restored_tabs,
        }
    }

    /// Reopen every record that has not been restored yet, oldest first.
    ///
    /// Tab-creation requests go out one at a time with a fixed pause between
    /// them. A failure on one record is counted and the run moves on; the
    /// record keeps `restored = false` so it can be retried.
    pub async fn restore(&self, mut records: Vec<TabRecord>) -> RestoreSummary {
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });

        let mut summary = RestoreSummary::default();
        let mut issued_any = false;

        for record in records {
            match self.store.claim(&record.record_id) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Record {} already restored or in progress", record.record_id);
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    summary.attempted += 1;
                    fail(&mut summary, &record, &e);
                    continue;
                }
            }
            summary.attempted += 1;

            if let Err(e) = check_restorable(&record.original_url) {
                fail(&mut summary, &record, &e);
                self.release(&record.record_id, false).await;
                continue;
            }

            if issued_any {
                self.host.sleep(self.delay).await;
            }
            issued_any = true;

            match self.open_tab(&record).await {
                Ok(()) => {
                    summary.restored += 1;
                    self.release(&record.record_id, true).await;
                }
                Err(e) => {
                    fail(&mut summary, &record, &e);
                    self.release(&record.record_id, false).await;
                }
            }
        }

        info!(
            "Restore finished: {} attempted, {} restored, {} failed, {} skipped",
            summary.attempted, summary.restored, summary.failed, summary.skipped
        );
        summary
    }

    /// Navigate a suspended tab back to its original page.
    ///
    /// The URL comes from the tab itself. When a record captured from this tab
    /// matches it, that record is marked restored. Returns the URL the tab was
    /// sent to.
    pub async fn unsuspend(&self, tab_id: i32) -> Result<String> {
        let tab = self.host.get_tab(tab_id).await?;
        let page = parse_suspended_url(&tab.url, &self.host.extension_origin())?
            .ok_or_else(|| Error::not_found(format!("suspended tab {}", tab_id)))?;
        check_restorable(&page.original_url)?;

        let record = self
            .store
            .find_by_host_tab(tab_id)
            .filter(|r| r.original_url == page.original_url);
        let Some(record) = record else {
            self.host.update_tab_url(tab_id, &page.original_url).await?;
            return Ok(page.original_url);
        };

        if !self.store.claim(&record.record_id)? {
            return Err(Error::validation(format!(
                "Tab {} is already being restored",
                tab_id
            )));
        }

        let result = self.host.update_tab_url(tab_id, &record.original_url).await;
        self.release(&record.record_id, result.is_ok()).await;
        result?;

        debug!("Unsuspended tab {} ({})", tab_id, record.record_id);
        Ok(record.original_url)
    }

    /// Create the tab, retrying without placement hints when the host
    /// rejects the original window or index.
    async fn open_tab(&self, record: &TabRecord) -> Result<()> {
        let request = CreateTab {
            url: record.original_url.clone(),
            pinned: record.pinned,
            active: self.activate,
            window_id: record.window_id,
            index: record.index,
        };

        let first = self.host.create_tab(&request).await;
        match first {
            Ok(tab) => {
                debug!("Restored {} as tab {}", record.record_id, tab.id);
                Ok(())
            }
            Err(e) if request.window_id.is_some() || request.index.is_some() => {
                debug!("Placement rejected for {}: {}, retrying", record.record_id, e);
                let fallback = CreateTab {
                    window_id: None,
                    index: None,
                    ..request
                };
                self.host.create_tab(&fallback).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    async fn release(&self, record_id: &str, restored: bool) {
        if let Err(e) = self.store.finish_claim(record_id, restored).await {
            warn!("Could not persist restore state of {}: {}", record_id, e);
        }
    }
}

fn fail(summary: &mut RestoreSummary, record: &TabRecord, error: &Error) {
    warn!("Could not restore {}: {}", record.record_id, error);
    summary.failed += 1;
    summary
        .errors
        .push(format!("{} ({}): {}", record.record_id, record.original_url, error));
}
