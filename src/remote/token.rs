//! App-only access tokens for SharePoint
//!
//! The API credential names the app registration (username = tenant,
//! password = client id). The certificate credential names the signing
//! certificate (username = SHA-1 thumbprint in hex, password = path to the
//! PEM private key). A short-lived JWT signed with that key is exchanged for
//! an access token through the OAuth client-credentials grant.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

use super::{CredentialStore, Credentials};

const ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Lifetime of a client assertion, in seconds
const ASSERTION_LIFETIME_SECS: i64 = 600;

pub struct CertificateAuth {
    authority: String,
    credentials: Arc<dyn CredentialStore>,
    credential_name: String,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    sub: &'a str,
    jti: String,
    nbf: i64,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

impl CertificateAuth {
    pub fn new(
        authority: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        credential_name: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            credentials,
            credential_name: credential_name.into(),
        }
    }

    fn token_url(&self, tenant: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            tenant.trim()
        )
    }

    /// Access token for the host serving `site`
    pub async fn access_token(&self, client: &Client, api: &Credentials, site: &Url) -> Result<String> {
        let failed = |message: String| Error::AuthenticationFailed {
            site: site.to_string(),
            message,
        };

        let tenant = api.username.trim();
        if tenant.is_empty() {
            return Err(failed(
                "the API credential carries no tenant in its username".to_string(),
            ));
        }
        let client_id = api.password.trim();

        let certificate = self.credentials.get(&self.credential_name)?;
        let key_path = std::path::PathBuf::from(certificate.password.trim());
        let key_pem = tokio::fs::read(&key_path).await.map_err(|e| Error::IoRead {
            path: key_path.clone(),
            source: e,
        })?;

        let token_url = self.token_url(tenant);
        let assertion = client_assertion(
            client_id,
            &token_url,
            &certificate.username,
            &key_pem,
            chrono::Utc::now().timestamp(),
        )
        .map_err(failed)?;
        let scope = format!("{}/.default", site.origin().ascii_serialization());

        let response = client
            .post(&token_url)
            .form(&[
                ("client_id", client_id),
                ("scope", scope.as_str()),
                ("client_assertion_type", ASSERTION_TYPE),
                ("client_assertion", assertion.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| failed(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body: TokenError = response.json().await.unwrap_or_default();
            return Err(failed(format!(
                "token endpoint answered {}: {} {}",
                status, body.error, body.error_description
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("unreadable token response: {}", e)))?;
        debug!(scope = %scope, "Acquired access token");
        Ok(token.access_token)
    }
}

/// Signed JWT proving possession of the certificate's private key
fn client_assertion(
    client_id: &str,
    audience: &str,
    thumbprint: &str,
    key_pem: &[u8],
    now: i64,
) -> std::result::Result<String, String> {
    let key = EncodingKey::from_rsa_pem(key_pem).map_err(|e| format!("unusable certificate key: {}", e))?;

    let mut header = Header::new(Algorithm::RS256);
    header.x5t = Some(x5t(thumbprint)?);

    let claims = AssertionClaims {
        aud: audience,
        iss: client_id,
        sub: client_id,
        jti: uuid::Uuid::new_v4().to_string(),
        nbf: now,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    encode(&header, &claims, &key).map_err(|e| format!("failed to sign client assertion: {}", e))
}

/// `x5t` header value: base64url of the raw SHA-1 thumbprint
fn x5t(thumbprint: &str) -> std::result::Result<String, String> {
    let cleaned: String = thumbprint
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let digest = hex::decode(&cleaned).map_err(|e| format!("thumbprint is not hex: {}", e))?;
    if digest.len() != 20 {
        return Err(format!(
            "thumbprint must be a 40 character SHA-1 digest, got {} characters",
            cleaned.len()
        ));
    }
    Ok(URL_SAFE_NO_PAD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::StaticCredentialStore;

    const THUMBPRINT: &str = "3A1F4C0E9B7D2A6F8C5E1B3D7A9F0C2E4B6D8A1C";

    fn key_path() -> String {
        concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/client-cert.key").to_string()
    }

    fn segment(jwt: &str, index: usize) -> serde_json::Value {
        let part = jwt.split('.').nth(index).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(part).unwrap()).unwrap()
    }

    #[test]
    fn test_x5t_encodes_raw_digest() {
        let encoded = x5t(THUMBPRINT).unwrap();
        assert_eq!(URL_SAFE_NO_PAD.decode(&encoded).unwrap(), hex::decode(THUMBPRINT).unwrap());
        assert_eq!(x5t("3a:1f:4c:0e:9b:7d:2a:6f:8c:5e:1b:3d:7a:9f:0c:2e:4b:6d:8a:1c").unwrap(), encoded);
    }

    #[test]
    fn test_x5t_rejects_bad_thumbprints() {
        assert!(x5t("not-hex").is_err());
        assert!(x5t("3A1F4C").is_err());
    }

    #[test]
    fn test_client_assertion_claims() {
        let pem = std::fs::read(key_path()).unwrap();
        let audience = "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token";
        let jwt = client_assertion("app-id", audience, THUMBPRINT, &pem, 1_700_000_000).unwrap();

        let header = segment(&jwt, 0);
        assert_eq!(header["alg"], "RS256");
        assert_eq!(header["x5t"], x5t(THUMBPRINT).unwrap());

        let claims = segment(&jwt, 1);
        assert_eq!(claims["aud"], audience);
        assert_eq!(claims["iss"], "app-id");
        assert_eq!(claims["sub"], "app-id");
        assert_eq!(claims["nbf"], 1_700_000_000);
        assert_eq!(claims["exp"], 1_700_000_600);
        assert!(claims["jti"].as_str().is_some_and(|j| !j.is_empty()));
    }

    #[test]
    fn test_client_assertion_rejects_non_key() {
        let err = client_assertion("app-id", "aud", THUMBPRINT, b"not a key", 0).unwrap_err();
        assert!(err.contains("certificate key"));
    }

    #[test]
    fn test_token_url() {
        let auth = CertificateAuth::new(
            "https://login.microsoftonline.com/",
            Arc::new(StaticCredentialStore(Credentials::new("t", "k"))),
            "SharePointCert",
        );
        assert_eq!(
            auth.token_url("contoso.onmicrosoft.com"),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token"
        );
    }
}
