/// chrome.* bindings for the background service worker
use crate::error::{self, Error};
use crate::host::{StorageArea, TabHost};
use crate::messages::{Background, Response};
use crate::tab_data::{CreateTab, TabInfo, TabUpdate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;
use std::time::Duration;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{JsFuture, future_to_promise};

// Import JS bridge functions
#[wasm_bindgen(module = "/background.js")]
extern "C" {
    #[wasm_bindgen(catch)]
    async fn createTab(props: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn updateTabUrl(tab_id: i32, url: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn getTab(tab_id: i32) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn queryTabs() -> Result<JsValue, JsValue>;

    fn extensionOrigin() -> String;

    #[wasm_bindgen(catch)]
    async fn getStorage(key: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn setStorage(items: JsValue) -> Result<(), JsValue>;
}

/// A rejected chrome.* promise means the extension context is gone or the
/// host refused the call; either way the host is not usable for this request.
fn host_error(context: &str, err: JsValue) -> Error {
    let detail = err
        .dyn_ref::<js_sys::Error>()
        .map(|e| String::from(e.message()))
        .or_else(|| err.as_string())
        .unwrap_or_else(|| format!("{:?}", err));
    Error::host(format!("{}: {}", context, detail))
}

/// chrome.storage expects plain objects, not JS `Map`s
fn to_js<T: Serialize>(value: &T) -> error::Result<JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| Error::Serialization(e.to_string()))
}

fn from_js<T: for<'de> Deserialize<'de>>(value: JsValue) -> error::Result<T> {
    serde_wasm_bindgen::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

pub struct ChromeTabs;

#[async_trait(?Send)]
impl TabHost for ChromeTabs {
    async fn create_tab(&self, request: &CreateTab) -> error::Result<TabInfo> {
        let tab = createTab(to_js(request)?)
            .await
            .map_err(|e| host_error("tabs.create", e))?;
        from_js(tab)
    }

    async fn update_tab_url(&self, tab_id: i32, url: &str) -> error::Result<()> {
        updateTabUrl(tab_id, url)
            .await
            .map_err(|e| host_error("tabs.update", e))
    }

    async fn get_tab(&self, tab_id: i32) -> error::Result<TabInfo> {
        let tab = getTab(tab_id)
            .await
            .map_err(|e| host_error("tabs.get", e))?;
        from_js(tab)
    }

    async fn query_tabs(&self) -> error::Result<Vec<TabInfo>> {
        let tabs = queryTabs()
            .await
            .map_err(|e| host_error("tabs.query", e))?;
        from_js(tabs)
    }

    fn extension_origin(&self) -> String {
        extensionOrigin()
    }

    async fn sleep(&self, duration: Duration) {
        let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            let scope = js_sys::global().unchecked_into::<web_sys::WorkerGlobalScope>();
            if scope
                .set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis)
                .is_err()
            {
                let _ = resolve.call0(&JsValue::NULL);
            }
        });
        let _ = JsFuture::from(promise).await;
    }
}

pub struct ChromeStorage;

#[async_trait(?Send)]
impl StorageArea for ChromeStorage {
    async fn get(&self, key: &str) -> error::Result<Option<Value>> {
        let value = getStorage(key)
            .await
            .map_err(|e| host_error("storage.local.get", e))?;
        if value.is_null() || value.is_undefined() {
            Ok(None)
        } else {
            from_js(value).map(Some)
        }
    }

    async fn set(&self, items: Vec<(String, Value)>) -> error::Result<()> {
        let object: serde_json::Map<String, Value> = items.into_iter().collect();
        setStorage(to_js(&object)?)
            .await
            .map_err(|e| host_error("storage.local.set", e))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChangeInfo {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Handle given to the service worker script; its listeners forward here
#[wasm_bindgen]
pub struct BackgroundHandle {
    inner: Rc<Background>,
}

impl BackgroundHandle {
    pub fn new(background: Background) -> Self {
        BackgroundHandle {
            inner: Rc::new(background),
        }
    }
}

#[wasm_bindgen]
impl BackgroundHandle {
    /// chrome.runtime.onMessage: resolves to the reply object
    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(&self, message: JsValue) -> js_sys::Promise {
        let inner = self.inner.clone();
        future_to_promise(async move {
            let response = match from_js::<Value>(message) {
                Ok(value) => inner.handle_json(value).await,
                Err(e) => Response::failure(&e),
            };
            to_js(&response).map_err(|e| JsValue::from_str(&e.to_string()))
        })
    }

    /// chrome.tabs.onUpdated
    #[wasm_bindgen(js_name = onTabUpdated)]
    pub fn on_tab_updated(&self, tab_id: i32, change_info: JsValue, tab: JsValue) -> js_sys::Promise {
        let inner = self.inner.clone();
        future_to_promise(async move {
            let change: ChangeInfo = from_js(change_info).unwrap_or_default();
            let mut update = match from_js::<TabInfo>(tab) {
                Ok(tab) => TabUpdate::from(tab),
                Err(_) => TabUpdate {
                    tab_id,
                    ..TabUpdate::default()
                },
            };
            if change.url.is_some() {
                update.url = change.url;
            }
            update.status = change.status;

            let recorded = inner.on_tab_updated(&update).await;
            Ok(recorded.map(JsValue::from).unwrap_or(JsValue::NULL))
        })
    }

    /// chrome.tabs.onRemoved
    #[wasm_bindgen(js_name = onTabRemoved)]
    pub fn on_tab_removed(&self, tab_id: i32) -> js_sys::Promise {
        let inner = self.inner.clone();
        future_to_promise(async move { Ok(JsValue::from_bool(inner.on_tab_removed(tab_id).await)) })
    }

    /// chrome.runtime.onStartup
    #[wasm_bindgen(js_name = onStartup)]
    pub fn on_startup(&self) -> js_sys::Promise {
        let inner = self.inner.clone();
        future_to_promise(async move {
            inner
                .on_browser_startup()
                .await
                .map(JsValue::from)
                .map_err(|e| JsValue::from_str(&e.to_string()))
        })
    }
}
