//! Named credentials

use std::fmt;

use crate::error::{Error, Result};

const CREDENTIAL_PREFIX: &str = "REFRESH_WORKER_CREDENTIAL_";

/// Username/password pair; the password is never printed
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Lookup of credentials by name
pub trait CredentialStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Credentials>;
}

/// Reads `REFRESH_WORKER_CREDENTIAL_<NAME>_USERNAME` and `..._PASSWORD`
///
/// `<NAME>` is the credential name upper-cased with every non-alphanumeric
/// character replaced by `_`, so `SharePointAPI` becomes `SHAREPOINTAPI`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    pub fn variable_names(name: &str) -> (String, String) {
        let key: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        (
            format!("{}{}_USERNAME", CREDENTIAL_PREFIX, key),
            format!("{}{}_PASSWORD", CREDENTIAL_PREFIX, key),
        )
    }
}

impl CredentialStore for EnvCredentialStore {
    fn get(&self, name: &str) -> Result<Credentials> {
        let (user_var, pass_var) = Self::variable_names(name);
        let password = std::env::var(&pass_var)
            .ok()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::CredentialMissing { name: name.to_string() })?;
        let username = std::env::var(&user_var).unwrap_or_default();
        Ok(Credentials { username, password })
    }
}

/// Fixed credentials, for tests and the local store
#[derive(Debug, Clone)]
pub struct StaticCredentialStore(pub Credentials);

impl CredentialStore for StaticCredentialStore {
    fn get(&self, _name: &str) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}
