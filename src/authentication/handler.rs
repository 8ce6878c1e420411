//! Authentication handlers and principal resolvers.
//!
//! Handlers verify credentials; resolvers turn the handler's principal into the
//! final identity (e.g. by enriching it from a person directory).

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use super::credential::{Attributes, Credential, Principal};
use super::error::ResolutionError;

/// Error returned by a handler for a single credential.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("credential rejected: {0}")]
    Rejected(String),
    #[error("handler unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable credential verifier.
///
/// Handlers run on the tokio runtime and must enforce their own timeouts.
#[async_trait]
pub trait AuthenticationHandler: Send + Sync {
    /// Unique handler name.
    fn name(&self) -> &str;

    /// Whether this handler can verify the credential.
    fn supports(&self, credential: &Credential) -> bool;

    /// Verify the credential and return the principal it vouches for.
    async fn authenticate(&self, credential: &Credential) -> Result<Principal, HandlerError>;
}

/// Builds the final principal after a handler accepted a credential.
pub trait PrincipalResolver: Send + Sync {
    fn name(&self) -> &str {
        "echo"
    }

    fn resolve(
        &self,
        credential: &Credential,
        principal: Principal,
    ) -> Result<Principal, ResolutionError>;
}

/// Returns the handler's principal unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoingPrincipalResolver;

impl PrincipalResolver for EchoingPrincipalResolver {
    fn resolve(
        &self,
        _credential: &Credential,
        principal: Principal,
    ) -> Result<Principal, ResolutionError> {
        Ok(principal)
    }
}

/// Enriches principals with attributes from an in-memory person directory.
#[derive(Debug, Clone, Default)]
pub struct PersonDirectoryPrincipalResolver {
    directory: HashMap<String, Attributes>,
    /// Fail when the principal has no directory entry.
    require_entry: bool,
}

impl PersonDirectoryPrincipalResolver {
    pub fn new(directory: HashMap<String, Attributes>, require_entry: bool) -> Self {
        Self {
            directory,
            require_entry,
        }
    }
}

impl PrincipalResolver for PersonDirectoryPrincipalResolver {
    fn name(&self) -> &str {
        "person-directory"
    }

    fn resolve(
        &self,
        _credential: &Credential,
        mut principal: Principal,
    ) -> Result<Principal, ResolutionError> {
        match self.directory.get(&principal.id) {
            Some(attributes) => {
                principal.merge_missing(attributes);
                Ok(principal)
            }
            None if self.require_entry => Err(ResolutionError(format!(
                "No directory entry for principal '{}'",
                principal.id
            ))),
            None => Ok(principal),
        }
    }
}

/// Static user
#[derive(Debug, Clone)]
pub struct StaticUser {
    pub username: String,
    pub password: String,
}

/// Accepts username/password credentials against a fixed user table.
pub struct StaticUserHandler {
    name: String,
    users: HashMap<String, StaticUser>,
}

impl StaticUserHandler {
    /// Build from `user:pass` pairs. Malformed entries are skipped.
    pub fn from_pairs<S: AsRef<str>>(name: impl Into<String>, pairs: &[S]) -> Self {
        let mut users = HashMap::new();
        for pair in pairs {
            if let Some((user, pass)) = pair.as_ref().trim().split_once(':') {
                users.insert(
                    user.trim().to_string(),
                    StaticUser {
                        username: user.trim().to_string(),
                        password: pass.trim().to_string(),
                    },
                );
            }
        }

        Self {
            name: name.into(),
            users,
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl AuthenticationHandler for StaticUserHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::UsernamePassword { .. })
    }

    async fn authenticate(&self, credential: &Credential) -> Result<Principal, HandlerError> {
        let Credential::UsernamePassword { username, password } = credential else {
            return Err(HandlerError::Rejected("Unsupported credential".to_string()));
        };

        let user = self
            .users
            .get(username)
            .ok_or_else(|| HandlerError::Rejected("User not found".to_string()))?;

        if password != &user.password {
            return Err(HandlerError::Rejected("Invalid password".to_string()));
        }

        debug!(handler = %self.name, user = %user.username, "Static user authenticated");
        Ok(Principal::new(user.username.clone()).with_attribute("username", user.username.clone()))
    }
}

/// Accepts API keys mapped to client names.
pub struct ApiKeyHandler {
    name: String,
    keys: HashMap<String, String>,
}

impl ApiKeyHandler {
    /// Build from `key:name` pairs. Malformed entries are skipped.
    pub fn from_pairs<S: AsRef<str>>(name: impl Into<String>, pairs: &[S]) -> Self {
        let keys = pairs
            .iter()
            .filter_map(|pair| {
                pair.as_ref()
                    .trim()
                    .split_once(':')
                    .map(|(key, name)| (key.trim().to_string(), name.trim().to_string()))
            })
            .collect();

        Self {
            name: name.into(),
            keys,
        }
    }
}

#[async_trait]
impl AuthenticationHandler for ApiKeyHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, credential: &Credential) -> bool {
        matches!(credential, Credential::ApiKey { .. })
    }

    async fn authenticate(&self, credential: &Credential) -> Result<Principal, HandlerError> {
        let Credential::ApiKey { key } = credential else {
            return Err(HandlerError::Rejected("Unsupported credential".to_string()));
        };

        let client = self
            .keys
            .get(key)
            .ok_or_else(|| HandlerError::Rejected("Invalid API key".to_string()))?;

        Ok(Principal::new(client.clone()).with_attribute("api_key_name", client.clone()))
    }
}
