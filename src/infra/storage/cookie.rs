//! Cookie-backed storage.
//!
//! The jar holds the cookies visible to the current session and records
//! the latest change per name so the caller can emit matching `Set-Cookie`
//! headers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::util::lock::mutex_lock;

use super::{StorageAdapter, StorageError};

const SOURCE: &str = "infra::storage::cookie";

/// Largest serialized `name=value; attributes` string a browser accepts.
pub const MAX_COOKIE_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub same_site: SameSite,
}

impl Cookie {
    /// A site-wide, lax cookie as written by the persistence layer.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            same_site: SameSite::Lax,
        }
    }

    pub fn encoded_value(&self) -> String {
        form_urlencoded::byte_serialize(self.value.as_bytes()).collect()
    }

    pub fn to_set_cookie(&self) -> String {
        format!(
            "{}={}; Path={}; SameSite={}",
            self.name,
            self.encoded_value(),
            self.path,
            self.same_site.as_str()
        )
    }

    fn to_removal(&self) -> String {
        let mut header = format!("{}=; Path={}; Max-Age=0", self.name, self.path);
        if let Some(expires) = epoch_http_date() {
            header.push_str("; Expires=");
            header.push_str(&expires);
        }
        header.push_str("; SameSite=");
        header.push_str(self.same_site.as_str());
        header
    }
}

fn epoch_http_date() -> Option<String> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    OffsetDateTime::UNIX_EPOCH.format(&format).ok()
}

/// Reject names a `Set-Cookie` header cannot carry unambiguously.
fn check_name(name: &str) -> Result<(), StorageError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.chars().any(|c| c.is_control()) {
        "name contains a control character"
    } else if name.chars().any(char::is_whitespace) {
        "name contains whitespace"
    } else if name.contains([';', '=', ',']) {
        "name contains `;`, `=` or `,`"
    } else {
        return Ok(());
    };
    warn!(name, reason, "rejecting cookie name");
    Err(StorageError::InvalidKey {
        area: "cookie",
        key: name.to_string(),
        reason,
    })
}

fn decode_value(raw: &str) -> String {
    let raw = raw.trim().trim_matches('"');
    form_urlencoded::parse(format!("v={raw}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Set(Cookie),
    Removed(Cookie),
}

#[derive(Debug, Default)]
struct JarState {
    cookies: BTreeMap<String, Cookie>,
    /// Pending change per cookie name; a later write replaces an earlier one.
    changes: BTreeMap<String, Change>,
}

#[derive(Debug, Default)]
pub struct CookieJar {
    state: Mutex<JarState>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a jar from a request `Cookie` header (`a=1; b=2`).
    ///
    /// Seeding is not a change; nothing is echoed back by [`CookieJar::take_changes`].
    pub fn from_request_header(header: &str) -> Self {
        let mut cookies = BTreeMap::new();
        for pair in header.split(';') {
            let Some((name, raw)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            cookies.insert(name.to_string(), Cookie::new(name, decode_value(raw)));
        }
        debug!(cookies = cookies.len(), "seeded cookie jar from request header");

        Self {
            state: Mutex::new(JarState {
                cookies,
                changes: BTreeMap::new(),
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        mutex_lock(&self.state, SOURCE, "get")
            .cookies
            .get(name)
            .map(|cookie| cookie.value.clone())
    }

    pub fn set(&self, cookie: Cookie) -> Result<(), StorageError> {
        check_name(&cookie.name)?;
        let needed = cookie.to_set_cookie().len();
        if needed > MAX_COOKIE_BYTES {
            warn!(name = %cookie.name, needed, "cookie exceeds size limit");
            return Err(StorageError::QuotaExceeded {
                area: "cookie",
                key: cookie.name,
                needed: needed as u64,
                limit: MAX_COOKIE_BYTES as u64,
            });
        }

        let mut state = mutex_lock(&self.state, SOURCE, "set");
        state.cookies.insert(cookie.name.clone(), cookie.clone());
        state
            .changes
            .insert(cookie.name.clone(), Change::Set(cookie));
        Ok(())
    }

    pub fn remove(&self, name: &str) {
        let mut state = mutex_lock(&self.state, SOURCE, "remove");
        if let Some(cookie) = state.cookies.remove(name) {
            state
                .changes
                .insert(name.to_string(), Change::Removed(cookie));
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain pending changes as `Set-Cookie` header values, one per name,
    /// ordered by name.
    pub fn take_changes(&self) -> Vec<String> {
        let changes = std::mem::take(&mut mutex_lock(&self.state, SOURCE, "take_changes").changes);
        changes
            .into_values()
            .map(|change| match change {
                Change::Set(cookie) => cookie.to_set_cookie(),
                Change::Removed(cookie) => cookie.to_removal(),
            })
            .collect()
    }
}

/// [`StorageAdapter`] over a shared [`CookieJar`].
#[derive(Debug, Clone)]
pub struct CookieStorage {
    jar: Arc<CookieJar>,
    writable: bool,
}

impl CookieStorage {
    pub fn writable(jar: Arc<CookieJar>) -> Self {
        Self {
            jar,
            writable: true,
        }
    }

    /// Reads are served from the jar; writes and removals are skipped.
    pub fn read_only(jar: Arc<CookieJar>) -> Self {
        Self {
            jar,
            writable: false,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

#[async_trait]
impl StorageAdapter for CookieStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.jar.get(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if !self.writable {
            debug!(key, "skipping cookie write outside an interactive session");
            return Ok(());
        }
        self.jar.set(Cookie::new(key, value))
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        if self.writable {
            self.jar.remove(key);
        }
        Ok(())
    }
}
