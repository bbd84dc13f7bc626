//! SharePoint REST client
//!
//! Authenticates with an app-only access token obtained through
//! [`CertificateAuth`] and talks to the `_api/web` endpoints using
//! server-relative paths.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

use super::{segments, CertificateAuth, Credentials, RemoteFolder, RemoteSession, RemoteStore};

const ODATA_JSON: &str = "application/json;odata=nometadata";

/// Longest response body excerpt carried in an error
const BODY_EXCERPT_CHARS: usize = 300;

pub struct SharePointStore {
    client: Client,
    auth: CertificateAuth,
}

impl SharePointStore {
    pub fn new(request_timeout: Duration, auth: CertificateAuth) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("refresh-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, auth })
    }
}

#[derive(Debug, Deserialize)]
struct WebInfo {
    #[serde(rename = "ServerRelativeUrl")]
    server_relative_url: String,
}

#[derive(Debug, Deserialize)]
struct FolderInfo {
    #[serde(rename = "Exists", default)]
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(rename = "ServerRelativeUrl")]
    server_relative_url: Option<String>,
}

#[async_trait]
impl RemoteStore for SharePointStore {
    async fn authenticate(&self, credentials: &Credentials, site: &str) -> Result<Arc<dyn RemoteSession>> {
        let site_url = Url::parse(site.trim_end_matches('/')).map_err(|e| Error::AuthenticationFailed {
            site: site.to_string(),
            message: format!("invalid site URL: {}", e),
        })?;
        let token = self.auth.access_token(&self.client, credentials, &site_url).await?;

        let session = SharePointSession {
            client: self.client.clone(),
            site: site.trim_end_matches('/').to_string(),
            token,
            server_relative: String::new(),
        };

        let url = format!("{}/_api/web?$select=ServerRelativeUrl", session.site);
        let response = session
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::AuthenticationFailed {
                site: site.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::AuthenticationFailed {
                site: site.to_string(),
                message: format!("server answered {}", status),
            });
        }
        let web: WebInfo = check(response, &url)
            .await?
            .json()
            .await
            .map_err(|e| Error::remote_request(&url, e))?;

        let server_relative = if web.server_relative_url.is_empty() {
            site_url.path().to_string()
        } else {
            web.server_relative_url
        };

        Ok(Arc::new(SharePointSession {
            server_relative: server_relative.trim_end_matches('/').to_string(),
            ..session
        }))
    }
}

struct SharePointSession {
    client: Client,
    site: String,
    token: String,
    /// Site path on the server, e.g. `/Teams/planning`
    server_relative: String,
}

impl SharePointSession {
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, ODATA_JSON)
    }

    /// Server-relative form of a library-relative path
    fn server_path(&self, path: &str) -> String {
        let mut full = self.server_relative.clone();
        for segment in segments(path) {
            full.push('/');
            full.push_str(segment);
        }
        full
    }

    fn file_url(&self, remote_path: &str) -> String {
        format!(
            "{}/_api/web/GetFileByServerRelativePath(decodedurl='{}')/$value",
            self.site,
            odata_literal(&self.server_path(remote_path))
        )
    }

    fn folder_url(&self, folder: &str) -> String {
        format!(
            "{}/_api/web/GetFolderByServerRelativePath(decodedurl='{}')",
            self.site,
            odata_literal(&self.server_path(folder))
        )
    }
}

#[async_trait]
impl RemoteSession for SharePointSession {
    async fn fetch(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let url = self.file_url(remote_path);
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::remote_request(&url, e))?;
        let response = check(response, &url).await?;

        // Stream into a sibling part file so the final name only appears complete
        let partial = local_path.with_extension("part");
        let written = match download(response, &url, &partial, local_path).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        debug!(remote_path, bytes = written, "Downloaded file");
        Ok(())
    }

    async fn upload(&self, remote_folder: &str, local_path: &Path, filename: &str) -> Result<String> {
        let body = tokio::fs::read(local_path).await.map_err(|e| Error::IoRead {
            path: local_path.to_path_buf(),
            source: e,
        })?;
        let url = format!(
            "{}/Files/AddUsingPath(decodedurl='{}',overwrite=true)",
            self.folder_url(remote_folder),
            odata_literal(filename)
        );

        let response = self
            .request(Method::POST, &url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::remote_request(&url, e))?;
        let info: FileInfo = check(response, &url)
            .await?
            .json()
            .await
            .unwrap_or(FileInfo {
                server_relative_url: None,
            });

        let remote = info
            .server_relative_url
            .unwrap_or_else(|| format!("{}/{}", self.server_path(remote_folder), filename));
        debug!(remote = %remote, "Uploaded file");
        Ok(remote)
    }

    async fn ensure_folder(&self, path: &str) -> Result<RemoteFolder> {
        let parts = segments(path);
        let mut created = false;

        // The library itself must already exist; walk and create below it
        for depth in 2..=parts.len() {
            let prefix = parts[..depth].join("/");
            if self.folder_exists(&prefix).await? {
                continue;
            }
            let url = format!(
                "{}/_api/web/folders/AddUsingPath(decodedurl='{}')",
                self.site,
                odata_literal(&self.server_path(&prefix))
            );
            let response = self
                .request(Method::POST, &url)
                .send()
                .await
                .map_err(|e| Error::remote_request(&url, e))?;
            check(response, &url).await?;
            debug!(folder = %prefix, "Created remote folder");
            created = true;
        }

        Ok(RemoteFolder {
            path: parts.join("/"),
            created,
        })
    }
}

impl SharePointSession {
    async fn folder_exists(&self, folder: &str) -> Result<bool> {
        let url = format!("{}?$select=Exists", self.folder_url(folder));
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::remote_request(&url, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let info: FolderInfo = check(response, &url)
            .await?
            .json()
            .await
            .map_err(|e| Error::remote_request(&url, e))?;
        Ok(info.exists)
    }
}

/// Write the response body to `partial`, then move it to `local_path`
async fn download(response: Response, url: &str, partial: &Path, local_path: &Path) -> Result<usize> {
    let write_error = |e: std::io::Error| Error::IoWrite {
        path: partial.to_path_buf(),
        source: e,
    };

    let mut file = tokio::fs::File::create(partial).await.map_err(write_error)?;
    let mut stream = response.bytes_stream();
    let mut written = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::remote_request(url, e))?;
        file.write_all(&chunk).await.map_err(write_error)?;
        written += chunk.len();
    }
    file.flush().await.map_err(write_error)?;
    drop(file);

    tokio::fs::rename(partial, local_path).await.map_err(|e| Error::IoWrite {
        path: local_path.to_path_buf(),
        source: e,
    })?;
    Ok(written)
}

/// Turn a non-success response into [`Error::RemoteStatus`]
async fn check(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::RemoteStatus {
        url: url.to_string(),
        status: status.as_u16(),
        message: body.chars().take(BODY_EXCERPT_CHARS).collect(),
    })
}

/// Quote a value for an OData string literal inside a URL path
///
/// Single quotes are doubled; characters that would end the path or start a
/// query or fragment are percent-encoded.
fn odata_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            '+' => out.push_str("%2B"),
            ' ' => out.push_str("%20"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::StaticCredentialStore;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    const THUMBPRINT: &str = "3A1F4C0E9B7D2A6F8C5E1B3D7A9F0C2E4B6D8A1C";
    const TENANT: &str = "contoso.onmicrosoft.com";

    /// One full request: head plus `Content-Length` bytes of body
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&data[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    /// Answer one request per canned response, in order; returns the server
    /// root URL and the requests received
    async fn serve(responses: Vec<(&'static str, &'static str)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
            }
            requests
        });
        (format!("http://{}", addr), handle)
    }

    fn session(server_relative: &str) -> SharePointSession {
        SharePointSession {
            client: Client::new(),
            site: "https://contoso.sharepoint.com/Teams/planning".into(),
            token: "token".into(),
            server_relative: server_relative.into(),
        }
    }

    fn live_session(root: &str) -> SharePointSession {
        SharePointSession {
            site: format!("{}/Teams/planning", root),
            ..session("/Teams/planning")
        }
    }

    fn store(authority: &str) -> SharePointStore {
        let key = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/client-cert.key");
        let auth = CertificateAuth::new(
            authority,
            Arc::new(StaticCredentialStore(Credentials::new(THUMBPRINT, key))),
            "SharePointCert",
        );
        SharePointStore::new(Duration::from_secs(5), auth).unwrap()
    }

    fn api() -> Credentials {
        Credentials::new(TENANT, "app-id")
    }

    #[test]
    fn test_odata_literal() {
        assert_eq!(odata_literal("/Teams/a/O'Brien #1.xlsx"), "/Teams/a/O''Brien%20%231.xlsx");
        assert_eq!(odata_literal("100%"), "100%25");
    }

    #[test]
    fn test_file_url() {
        let url = session("/Teams/planning").file_url("Dokumenter/Plan/report.xlsx");
        assert_eq!(
            url,
            "https://contoso.sharepoint.com/Teams/planning/_api/web/GetFileByServerRelativePath(decodedurl='/Teams/planning/Dokumenter/Plan/report.xlsx')/$value"
        );
    }

    #[test]
    fn test_server_path_normalizes_slashes() {
        assert_eq!(
            session("/Teams/planning").server_path("/Dokumenter//Historik/"),
            "/Teams/planning/Dokumenter/Historik"
        );
    }

    // ── authentication ───────────────────────────────────────────

    #[tokio::test]
    async fn test_authenticate_exchanges_client_assertion() {
        let (root, server) = serve(vec![
            ("200 OK", r#"{"token_type":"Bearer","expires_in":3599,"access_token":"app-token-1"}"#),
            ("200 OK", r#"{"ServerRelativeUrl":"/Teams/planning"}"#),
        ])
        .await;
        let site = format!("{}/Teams/planning", root);

        store(&root).authenticate(&api(), &site).await.unwrap();

        let requests = server.await.unwrap();
        let token_request = &requests[0];
        assert!(token_request.starts_with(&format!("POST /{}/oauth2/v2.0/token", TENANT)));
        assert!(token_request.contains("grant_type=client_credentials"));
        assert!(token_request.contains("client_id=app-id"));
        assert!(token_request
            .contains("client_assertion_type=urn%3Aietf%3Aparams%3Aoauth%3Aclient-assertion-type%3Ajwt-bearer"));
        assert!(token_request.contains("client_assertion=ey"));
        assert!(token_request.contains("%2F.default"));

        let web_request = &requests[1];
        assert!(web_request.starts_with("GET /Teams/planning/_api/web"));
        assert!(web_request.to_lowercase().contains("authorization: bearer app-token-1"));
    }

    #[tokio::test]
    async fn test_authenticate_token_refused() {
        let (root, _server) = serve(vec![(
            "401 Unauthorized",
            r#"{"error":"invalid_client","error_description":"AADSTS700027: assertion rejected"}"#,
        )])
        .await;
        let site = format!("{}/Teams/planning", root);

        let err = store(&root).authenticate(&api(), &site).await.err().unwrap();
        match err {
            Error::AuthenticationFailed { message, .. } => assert!(message.contains("invalid_client"), "{}", message),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_authenticate_site_rejected() {
        let (root, _server) = serve(vec![
            ("200 OK", r#"{"access_token":"app-token-1"}"#),
            ("403 Forbidden", "{}"),
        ])
        .await;
        let site = format!("{}/Teams/planning", root);

        let err = store(&root).authenticate(&api(), &site).await.err().unwrap();
        assert!(matches!(err, Error::AuthenticationFailed { .. }));
    }

    #[tokio::test]
    async fn test_authenticate_without_tenant() {
        let err = store("http://127.0.0.1:9")
            .authenticate(&Credentials::new("", "app-id"), "https://contoso.sharepoint.com/Teams/planning")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::AuthenticationFailed { .. }));
    }

    // ── session operations ───────────────────────────────────────

    #[tokio::test]
    async fn test_fetch_writes_complete_file() {
        let (root, server) = serve(vec![("200 OK", "workbook-bytes")]).await;
        let work = TempDir::new().unwrap();
        let local = work.path().join("DKPlan.xlsx");

        live_session(&root)
            .fetch("Dokumenter/Plan/DKPlan.xlsx", &local)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&local).unwrap(), "workbook-bytes");
        assert!(!work.path().join("DKPlan.part").exists());
        let request = &server.await.unwrap()[0];
        assert!(request.starts_with(
            "GET /Teams/planning/_api/web/GetFileByServerRelativePath(decodedurl='/Teams/planning/Dokumenter/Plan/DKPlan.xlsx')/$value"
        ));
    }

    #[tokio::test]
    async fn test_fetch_missing_file() {
        let (root, _server) = serve(vec![("404 Not Found", r#"{"error":"File Not Found."}"#)]).await;
        let work = TempDir::new().unwrap();
        let local = work.path().join("DKPlan.xlsx");

        let err = live_session(&root)
            .fetch("Dokumenter/Plan/DKPlan.xlsx", &local)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteStatus { status: 404, .. }));
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_no_part_file() {
        let (root, _server) = serve(vec![("200 OK", "workbook-bytes")]).await;
        let work = TempDir::new().unwrap();
        // A directory in the way makes the final rename fail
        let local = work.path().join("DKPlan.xlsx");
        std::fs::create_dir(&local).unwrap();

        let err = live_session(&root)
            .fetch("Dokumenter/Plan/DKPlan.xlsx", &local)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IoWrite { .. }));
        assert!(!work.path().join("DKPlan.part").exists());
    }

    #[tokio::test]
    async fn test_upload_overwrites_into_folder() {
        let (root, server) = serve(vec![(
            "200 OK",
            r#"{"ServerRelativeUrl":"/Teams/planning/Dokumenter/Plan/DKPlan.xlsx"}"#,
        )])
        .await;
        let work = TempDir::new().unwrap();
        let local = work.path().join("artifact.xlsx");
        std::fs::write(&local, "refreshed").unwrap();

        let remote = live_session(&root)
            .upload("Dokumenter/Plan", &local, "DKPlan.xlsx")
            .await
            .unwrap();
        assert_eq!(remote, "/Teams/planning/Dokumenter/Plan/DKPlan.xlsx");

        let request = &server.await.unwrap()[0];
        assert!(request.starts_with(
            "POST /Teams/planning/_api/web/GetFolderByServerRelativePath(decodedurl='/Teams/planning/Dokumenter/Plan')/Files/AddUsingPath(decodedurl='DKPlan.xlsx',overwrite=true)"
        ));
        assert!(request.ends_with("refreshed"));
    }

    #[tokio::test]
    async fn test_upload_rejected() {
        let (root, _server) = serve(vec![("500 Internal Server Error", r#"{"error":"locked"}"#)]).await;
        let work = TempDir::new().unwrap();
        let local = work.path().join("artifact.xlsx");
        std::fs::write(&local, "refreshed").unwrap();

        let err = live_session(&root)
            .upload("Dokumenter/Plan", &local, "DKPlan.xlsx")
            .await
            .unwrap_err();
        match err {
            Error::RemoteStatus { status, message, .. } => {
                assert_eq!(status, 500);
                assert!(message.contains("locked"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ensure_folder_creates_missing_levels() {
        let (root, server) = serve(vec![
            ("200 OK", r#"{"Exists":true}"#),
            ("404 Not Found", "{}"),
            ("201 Created", "{}"),
        ])
        .await;

        let folder = live_session(&root)
            .ensure_folder("Dokumenter/Historik/2024")
            .await
            .unwrap();
        assert!(folder.created);
        assert_eq!(folder.path, "Dokumenter/Historik/2024");

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with(
            "GET /Teams/planning/_api/web/GetFolderByServerRelativePath(decodedurl='/Teams/planning/Dokumenter/Historik')"
        ));
        assert!(requests[1].contains("decodedurl='/Teams/planning/Dokumenter/Historik/2024'"));
        assert!(requests[2].starts_with(
            "POST /Teams/planning/_api/web/folders/AddUsingPath(decodedurl='/Teams/planning/Dokumenter/Historik/2024')"
        ));
    }

    #[tokio::test]
    async fn test_ensure_folder_existing_path() {
        let (root, _server) = serve(vec![("200 OK", r#"{"Exists":true}"#)]).await;

        let folder = live_session(&root).ensure_folder("Dokumenter/Historik").await.unwrap();
        assert!(!folder.created);
    }
}
