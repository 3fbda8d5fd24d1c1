/// Suspended-page URL encoding and decoding
///
/// A suspended tab shows an extension page whose URL carries everything needed
/// to bring the tab back:
///
/// `<origin>/suspended?uri=<encoded url>&title=<encoded title>&sessionId=<id>&tabId=<id>`
///
/// Older builds wrote `url` instead of `uri`, used `suspended.html`, and put
/// the parameters in the fragment. All of those are still read; only the
/// canonical form is written.
use crate::error::{Error, Result};
use url::{Url, form_urlencoded};

pub const SUSPENDED_PATH: &str = "/suspended";
const LEGACY_SUSPENDED_PATH: &str = "/suspended.html";

/// Parameter names for the original URL, canonical first
const ORIGINAL_URL_PARAMS: [&str; 2] = ["uri", "url"];

const RESTORABLE_SCHEMES: [&str; 3] = ["http", "https", "file"];

/// What a suspended-page URL encodes
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendedPage {
    pub original_url: String,
    pub title: String,
    pub session_id: Option<String>,
    pub tab_id: Option<i32>,
}

/// Decode a suspended-page URL.
///
/// Returns `Ok(None)` when `url` is not one of the extension's suspended
/// pages, and a validation error when it is one but carries no usable
/// original URL.
pub fn parse_suspended_url(url: &str, origin: &str) -> Result<Option<SuspendedPage>> {
    let Ok(parsed) = Url::parse(url) else {
        return Ok(None);
    };
    if !is_suspended_page(&parsed, origin) {
        return Ok(None);
    }

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !has_original_url(&params) {
        if let Some(fragment) = parsed.fragment() {
            params = form_urlencoded::parse(fragment.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
        }
    }

    let lookup = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let original_url = ORIGINAL_URL_PARAMS
        .iter()
        .find_map(|name| lookup(name))
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| Error::validation(format!("Suspended URL has no original URL: {}", url)))?;
    validate_url(&original_url)?;

    Ok(Some(SuspendedPage {
        original_url,
        title: lookup("title").unwrap_or_default(),
        session_id: lookup("sessionId").filter(|s| !s.is_empty()),
        tab_id: lookup("tabId").and_then(|s| s.parse().ok()),
    }))
}

/// Build the canonical suspended-page URL for a tab
pub fn build_suspended_url(
    origin: &str,
    original_url: &str,
    title: &str,
    session_id: &str,
    tab_id: i32,
) -> Result<String> {
    let mut url = Url::parse(origin)
        .and_then(|base| base.join(SUSPENDED_PATH))
        .map_err(|e| Error::validation(format!("Bad extension origin {}: {}", origin, e)))?;

    url.query_pairs_mut()
        .append_pair("uri", original_url)
        .append_pair("title", title)
        .append_pair("sessionId", session_id)
        .append_pair("tabId", &tab_id.to_string());

    Ok(url.into())
}

/// Check that `url` is an absolute URL; the string itself is left untouched
pub fn validate_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(Error::validation("URL is empty"));
    }
    Url::parse(url)
        .map(|_| ())
        .map_err(|e| Error::validation(format!("Malformed URL {}: {}", url, e)))
}

/// Only http(s) and file URLs may be reopened
pub fn check_restorable(url: &str) -> Result<()> {
    let parsed = Url::parse(url)
        .map_err(|e| Error::validation(format!("Malformed URL {}: {}", url, e)))?;

    if RESTORABLE_SCHEMES.contains(&parsed.scheme()) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "Refusing to restore {} URL: {}",
            parsed.scheme(),
            url
        )))
    }
}

pub fn is_restorable(url: &str) -> bool {
    check_restorable(url).is_ok()
}

fn is_suspended_page(url: &Url, origin: &str) -> bool {
    let Ok(origin) = Url::parse(origin) else {
        return false;
    };

    url.scheme() == origin.scheme()
        && url.host_str() == origin.host_str()
        && matches!(url.path(), SUSPENDED_PATH | LEGACY_SUSPENDED_PATH)
}

fn has_original_url(params: &[(String, String)]) -> bool {
    params
        .iter()
        .any(|(k, _)| ORIGINAL_URL_PARAMS.contains(&k.as_str()))
}
