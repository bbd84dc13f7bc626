//! Remote document store
//!
//! Paths handed to a session are library-relative, e.g.
//! `Dokumenter/Plan/report.xlsx`; the session knows its site.

mod credentials;
mod local;
mod sharepoint;
mod token;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::Result;

pub use credentials::{CredentialStore, Credentials, EnvCredentialStore, StaticCredentialStore};
pub use local::LocalStore;
pub use sharepoint::SharePointStore;
pub use token::CertificateAuth;

/// A folder that exists on the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    /// Library-relative path
    pub path: String,

    /// Whether this call created it
    pub created: bool,
}

/// Entry point of a remote store implementation
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials, site: &str) -> Result<Arc<dyn RemoteSession>>;
}

/// An authenticated connection to one site
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Download `remote_path` to `local_path`
    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Upload `local_path` into `remote_folder` as `filename`; returns the remote path
    async fn upload(&self, remote_folder: &str, local_path: &Path, filename: &str) -> Result<String>;

    /// Create `path` and any missing parents
    async fn ensure_folder(&self, path: &str) -> Result<RemoteFolder>;
}

/// One authenticated session per site, shared across tasks
pub struct SessionCache {
    store: Arc<dyn RemoteStore>,
    credentials: Arc<dyn CredentialStore>,
    credential_name: String,
    sessions: Mutex<HashMap<String, Arc<dyn RemoteSession>>>,
}

impl SessionCache {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        credentials: Arc<dyn CredentialStore>,
        credential_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            credentials,
            credential_name: credential_name.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Cached session for `site`, authenticating on first use
    pub async fn session(&self, site: &str) -> Result<Arc<dyn RemoteSession>> {
        let key = site_key(site);
        let cached = self.sessions.lock().get(&key).cloned();
        if let Some(session) = cached {
            return Ok(session);
        }

        let credentials = self.credentials.get(&self.credential_name)?;
        let session = self.store.authenticate(&credentials, site).await?;
        info!(site, "Authenticated remote session");

        self.sessions.lock().insert(key, session.clone());
        Ok(session)
    }

    /// Drop the cached session for `site`; returns whether one existed
    pub fn release(&self, site: &str) -> bool {
        let released = self.sessions.lock().remove(&site_key(site)).is_some();
        if released {
            debug!(site, "Released remote session");
        }
        released
    }

    /// Drop every cached session; returns how many were dropped
    pub fn close_all(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let count = sessions.len();
        sessions.clear();
        count
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn site_key(site: &str) -> String {
    site.trim().trim_end_matches('/').to_lowercase()
}

/// Split a library-relative path into its non-empty segments
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split(['/', '\\']).map(str::trim).filter(|s| !s.is_empty()).collect()
}
