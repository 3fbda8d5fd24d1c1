/// In-memory host fakes for unit tests
use crate::error::{Error, Result};
use crate::host::{StorageArea, TabHost};
use crate::tab_data::{CreateTab, TabInfo};
use async_trait::async_trait;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::task::Poll;
use std::time::Duration;

pub const ORIGIN: &str = "chrome-extension://abcdefghijklmnop";

/// Give other futures in a `join` one turn, like a real host round trip
pub async fn yield_now() {
    let mut yielded = false;
    futures::future::poll_fn(|cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
    .await
}

#[derive(Default)]
pub struct MemoryStorage {
    items: RefCell<HashMap<String, Value>>,
    unavailable: Cell<bool>,
    slow: Cell<bool>,
    writes: Cell<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: Value) {
        self.items.borrow_mut().insert(key.to_string(), value);
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.items.borrow().get(key).cloned()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.set(!available);
    }

    /// Make every write yield once before it lands
    pub fn set_slow(&self, slow: bool) {
        self.slow.set(slow);
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

#[async_trait(?Send)]
impl StorageArea for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if self.unavailable.get() {
            return Err(Error::host("Extension context invalidated."));
        }
        Ok(self.items.borrow().get(key).cloned())
    }

    async fn set(&self, items: Vec<(String, Value)>) -> Result<()> {
        if self.slow.get() {
            yield_now().await;
        }
        if self.unavailable.get() {
            return Err(Error::host("Extension context invalidated."));
        }
        let mut stored = self.items.borrow_mut();
        for (key, value) in items {
            stored.insert(key, value);
        }
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

pub struct FakeTabs {
    tabs: RefCell<Vec<TabInfo>>,
    created: RefCell<Vec<CreateTab>>,
    navigations: RefCell<Vec<(i32, String)>>,
    sleeps: RefCell<Vec<Duration>>,
    failing_urls: RefCell<HashSet<String>>,
    reject_placement: Cell<bool>,
    slow: Cell<bool>,
    next_id: Cell<i32>,
}

impl FakeTabs {
    pub fn new() -> Self {
        FakeTabs {
            tabs: RefCell::new(Vec::new()),
            created: RefCell::new(Vec::new()),
            navigations: RefCell::new(Vec::new()),
            sleeps: RefCell::new(Vec::new()),
            failing_urls: RefCell::new(HashSet::new()),
            reject_placement: Cell::new(false),
            slow: Cell::new(false),
            next_id: Cell::new(1000),
        }
    }

    pub fn with_tabs(tabs: Vec<TabInfo>) -> Self {
        let fake = FakeTabs::new();
        *fake.tabs.borrow_mut() = tabs;
        fake
    }

    /// Make every create/update for this url fail like a host error would
    pub fn fail_url(&self, url: &str) {
        self.failing_urls.borrow_mut().insert(url.to_string());
    }

    /// Refuse requests that name a window or index, as for a closed window
    pub fn reject_placement(&self) {
        self.reject_placement.set(true);
    }

    /// Make tab creation and sleeps yield once, so concurrent callers interleave
    pub fn set_slow(&self, slow: bool) {
        self.slow.set(slow);
    }

    pub fn created(&self) -> Vec<CreateTab> {
        self.created.borrow().clone()
    }

    pub fn navigations(&self) -> Vec<(i32, String)> {
        self.navigations.borrow().clone()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

#[async_trait(?Send)]
impl TabHost for FakeTabs {
    async fn create_tab(&self, request: &CreateTab) -> Result<TabInfo> {
        if self.slow.get() {
            yield_now().await;
        }
        if self.failing_urls.borrow().contains(&request.url) {
            return Err(Error::host(format!("Cannot create tab for {}", request.url)));
        }
        if self.reject_placement.get() && (request.window_id.is_some() || request.index.is_some()) {
            return Err(Error::host("No window with id"));
        }
        self.created.borrow_mut().push(request.clone());

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let tab = TabInfo::new(id, request.url.clone(), String::new(), request.pinned, 0);
        self.tabs.borrow_mut().push(tab.clone());
        Ok(tab)
    }

    async fn update_tab_url(&self, tab_id: i32, url: &str) -> Result<()> {
        if self.failing_urls.borrow().contains(url) {
            return Err(Error::host(format!("Cannot navigate to {}", url)));
        }
        let mut tabs = self.tabs.borrow_mut();
        let tab = tabs
            .iter_mut()
            .find(|t| t.id == tab_id)
            .ok_or_else(|| Error::host(format!("No tab with id: {}", tab_id)))?;
        tab.url = url.to_string();
        self.navigations.borrow_mut().push((tab_id, url.to_string()));
        Ok(())
    }

    async fn get_tab(&self, tab_id: i32) -> Result<TabInfo> {
        self.tabs
            .borrow()
            .iter()
            .find(|t| t.id == tab_id)
            .cloned()
            .ok_or_else(|| Error::host(format!("No tab with id: {}", tab_id)))
    }

    async fn query_tabs(&self) -> Result<Vec<TabInfo>> {
        Ok(self.tabs.borrow().clone())
    }

    fn extension_origin(&self) -> String {
        ORIGIN.to_string()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        if self.slow.get() {
            yield_now().await;
        }
    }
}

pub fn tab(id: i32, url: &str, title: &str) -> TabInfo {
    TabInfo {
        id,
        url: url.to_string(),
        title: title.to_string(),
        pinned: false,
        index: id,
        window_id: Some(1),
        fav_icon_url: None,
    }
}
