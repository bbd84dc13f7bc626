//! Remote store backed by a local directory tree
//!
//! Each site maps to `<root>/<last segment of the site URL path>`, so
//! `https://contoso.sharepoint.com/Teams/planning` lives in `<root>/planning`.
//! Useful for synced document libraries and end-to-end tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

use super::{segments, Credentials, RemoteFolder, RemoteSession, RemoteStore};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the given site
    pub fn site_dir(&self, site: &str) -> Result<PathBuf> {
        let url = Url::parse(site).map_err(|e| Error::AuthenticationFailed {
            site: site.to_string(),
            message: format!("invalid site URL: {}", e),
        })?;
        let name = url
            .path_segments()
            .and_then(|mut s| s.rfind(|seg| !seg.is_empty()).map(String::from))
            .or_else(|| url.host_str().map(String::from))
            .ok_or_else(|| Error::AuthenticationFailed {
                site: site.to_string(),
                message: "site URL has no path or host".to_string(),
            })?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    /// Credentials are not checked; the site directory must exist
    async fn authenticate(&self, _credentials: &Credentials, site: &str) -> Result<Arc<dyn RemoteSession>> {
        let dir = self.site_dir(site)?;
        if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(Error::AuthenticationFailed {
                site: site.to_string(),
                message: format!("site directory {} does not exist", dir.display()),
            });
        }
        Ok(Arc::new(LocalSession { dir }))
    }
}

struct LocalSession {
    dir: PathBuf,
}

impl LocalSession {
    fn resolve(&self, remote_path: &str) -> Result<PathBuf> {
        let parts = segments(remote_path);
        if parts.iter().any(|p| *p == "." || *p == "..") {
            return Err(Error::remote_request(remote_path, "relative path segments are not allowed"));
        }
        Ok(parts.iter().fold(self.dir.clone(), |acc, part| acc.join(part)))
    }
}

#[async_trait]
impl RemoteSession for LocalSession {
    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let source = self.resolve(remote_path)?;
        tokio::fs::copy(&source, local_path)
            .await
            .map_err(|e| Error::remote_request(source.display().to_string(), e))?;
        debug!(from = %source.display(), to = %local_path.display(), "Fetched file");
        Ok(())
    }

    async fn upload(&self, remote_folder: &str, local_path: &Path, filename: &str) -> Result<String> {
        let folder = self.resolve(remote_folder)?;
        if !folder.is_dir() {
            return Err(Error::RemoteStatus {
                url: folder.display().to_string(),
                status: 404,
                message: "folder does not exist".to_string(),
            });
        }
        let target = folder.join(filename);
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| Error::remote_request(target.display().to_string(), e))?;
        debug!(to = %target.display(), "Uploaded file");
        Ok(format!("{}/{}", segments(remote_folder).join("/"), filename))
    }

    async fn ensure_folder(&self, path: &str) -> Result<RemoteFolder> {
        let dir = self.resolve(path)?;
        let created = !dir.is_dir();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| Error::IoWrite {
            path: dir.clone(),
            source: e,
        })?;
        Ok(RemoteFolder {
            path: segments(path).join("/"),
            created,
        })
    }
}
