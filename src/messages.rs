/// Message protocol between extension pages and the background worker
///
/// Requests are JSON objects tagged by `action`; every reply is either
/// `{ "success": true, ...payload }` or `{ "success": false, "error": "..." }`.
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::host::{StorageArea, TabHost};
use crate::restore::RestorationEngine;
use crate::session::{ExportDocument, SessionGrouping, SessionSummary};
use crate::storage::TabRecordStore;
use crate::tab_data::{BackupSummary, ImportSummary, RestoreSummary, TabUpdate};
use crate::tracker::SuspensionTracker;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    SuspendTab {
        tab_id: i32,
    },
    UnsuspendTab {
        tab_id: i32,
    },
    GetSuspendedCount,
    BackupAllTabs {
        #[serde(default)]
        name: Option<String>,
    },
    ExportAllTabs,
    ExportSession {
        session_id: String,
    },
    /// `data` is an export document, or its JSON text as read from a file
    ImportTabs {
        data: Value,
    },
    RestoreBySessionId {
        session_id: String,
    },
    CreateNewSession,
    ClearSession {
        session_id: String,
    },
    ListSessions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Payload {
    Suspended { tab_id: i32, suspended_url: String },
    Unsuspended { tab_id: i32, url: String },
    Count { count: usize },
    Backup(BackupSummary),
    Export { data: ExportDocument },
    Import(ImportSummary),
    Restore(RestoreSummary),
    Session { session_id: String },
    Cleared { removed: usize },
    Sessions { sessions: Vec<SessionSummary> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Option<Payload>,
}

impl Response {
    pub fn ok(payload: Payload) -> Self {
        Response {
            success: true,
            error: None,
            payload: Some(payload),
        }
    }

    pub fn failure(error: &Error) -> Self {
        Response {
            success: false,
            error: Some(error.to_string()),
            payload: None,
        }
    }
}

/// Owns the components and routes requests and tab events to them
pub struct Background {
    host: Rc<dyn TabHost>,
    store: Rc<TabRecordStore>,
    tracker: SuspensionTracker,
    engine: RestorationEngine,
    sessions: SessionGrouping,
}

impl Background {
    /// Open the store, make sure a session is current and pick up tabs that
    /// were already suspended before the worker started.
    pub async fn start(
        host: Rc<dyn TabHost>,
        area: Rc<dyn StorageArea>,
        settings: &Settings,
    ) -> Result<Self> {
        let store = Rc::new(TabRecordStore::open(area).await?);
        let tracker = SuspensionTracker::new(store.clone(), host.extension_origin());
        let engine = RestorationEngine::new(store.clone(), host.clone(), settings);
        let sessions = SessionGrouping::new(store.clone(), host.clone());

        let session_id = sessions.ensure_current_session().await?;
        debug!("Current session is {}", session_id);

        let background = Background {
            host,
            store,
            tracker,
            engine,
            sessions,
        };
        background.scan_open_tabs().await;
        Ok(background)
    }

    /// Browser start: every run gets its own session
    pub async fn on_browser_startup(&self) -> Result<String> {
        let session_id = self.sessions.create_new_session().await?;
        self.scan_open_tabs().await;
        Ok(session_id)
    }

    pub async fn on_tab_updated(&self, update: &TabUpdate) -> Option<String> {
        self.tracker.on_tab_updated(update).await
    }

    pub async fn on_tab_removed(&self, tab_id: i32) -> bool {
        self.tracker.on_tab_removed(tab_id).await
    }

    /// Decode and answer a raw message
    pub async fn handle_json(&self, message: Value) -> Response {
        match serde_json::from_value::<Request>(message) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!("Unrecognised message: {}", e);
                Response::failure(&Error::validation(format!("Unrecognised message: {}", e)))
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        debug!("Handling {:?}", request);
        match self.dispatch(request).await {
            Ok(payload) => Response::ok(payload),
            Err(e) => {
                warn!("Request failed: {}", e);
                Response::failure(&e)
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Payload> {
        match request {
            Request::SuspendTab { tab_id } => self.suspend_tab(tab_id).await,
            Request::UnsuspendTab { tab_id } => {
                let url = self.engine.unsuspend(tab_id).await?;
                Ok(Payload::Unsuspended { tab_id, url })
            }
            Request::GetSuspendedCount => Ok(Payload::Count {
                count: self.store.suspended_count(),
            }),
            Request::BackupAllTabs { name } => Ok(Payload::Backup(self.sessions.backup(name).await?)),
            Request::ExportAllTabs => Ok(Payload::Export {
                data: self.sessions.export_all(),
            }),
            Request::ExportSession { session_id } => Ok(Payload::Export {
                data: self.sessions.export_session(&session_id)?,
            }),
            Request::ImportTabs { data } => {
                let document = match data {
                    Value::String(text) => serde_json::from_str(&text)
                        .map_err(|e| Error::validation(format!("Import data is not JSON: {}", e)))?,
                    other => other,
                };
                Ok(Payload::Import(self.sessions.import_records(&document).await?))
            }
            Request::RestoreBySessionId { session_id } => {
                let records = self.store.list_by_session(&session_id);
                if records.is_empty() && !self.store.has_session(&session_id) {
                    return Err(Error::not_found(format!("session {}", session_id)));
                }
                Ok(Payload::Restore(self.engine.restore(records).await))
            }
            Request::CreateNewSession => Ok(Payload::Session {
                session_id: self.sessions.create_new_session().await?,
            }),
            Request::ClearSession { session_id } => Ok(Payload::Cleared {
                removed: self.sessions.clear_session(&session_id).await?,
            }),
            Request::ListSessions => Ok(Payload::Sessions {
                sessions: self.sessions.list_sessions(),
            }),
        }
    }

    /// Swap a live tab for the suspended page and record it straight away;
    /// the host's own update notification for the new URL is then a no-op.
    async fn suspend_tab(&self, tab_id: i32) -> Result<Payload> {
        let tab = self.host.get_tab(tab_id).await?;
        let session_id = self.sessions.ensure_current_session().await?;
        let suspended_url = self.tracker.suspend_url_for(&tab, &session_id)?;

        self.host.update_tab_url(tab_id, &suspended_url).await?;

        let mut update = TabUpdate::from(tab);
        update.url = Some(suspended_url.clone());
        self.tracker.on_tab_updated(&update).await;

        info!("Suspended tab {}", tab_id);
        Ok(Payload::Suspended {
            tab_id,
            suspended_url,
        })
    }

    async fn scan_open_tabs(&self) {
        match self.host.query_tabs().await {
            Ok(tabs) => {
                self.tracker.scan(tabs).await;
            }
            Err(e) => warn!("Could not list open tabs: {}", e),
        }
    }
}
