//! Credential and principal value types.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute mapping: name → values. Most attributes are single-valued.
pub type Attributes = HashMap<String, Vec<String>>;

/// Identity claim submitted for verification.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Username and password.
    UsernamePassword { username: String, password: String },
    /// Opaque bearer token.
    Token { token: String },
    /// API key.
    ApiKey { key: String },
    /// Assertion issued by an external party.
    Assertion { issuer: String, assertion: String },
    /// Empty credential created before a delegated redirect.
    Placeholder,
}

impl Credential {
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::UsernamePassword {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse the value of an HTTP `Basic` authorization header (without the scheme).
    pub fn from_basic(encoded: &str) -> Result<Self> {
        let decoded = BASE64
            .decode(encoded.trim())
            .context("Invalid base64 in Basic auth")?;
        let auth_str = String::from_utf8(decoded).context("Invalid UTF-8 in Basic auth")?;

        let (username, password) = auth_str
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid Basic auth format"))?;

        Ok(Self::username_password(username, password))
    }

    /// Non-secret identifier, safe to log.
    pub fn id(&self) -> String {
        match self {
            Credential::UsernamePassword { username, .. } => username.clone(),
            Credential::Token { .. } => "token".to_string(),
            Credential::ApiKey { .. } => "api_key".to_string(),
            Credential::Assertion { issuer, .. } => issuer.clone(),
            Credential::Placeholder => "placeholder".to_string(),
        }
    }

    /// Credential type name.
    pub fn credential_type(&self) -> &'static str {
        match self {
            Credential::UsernamePassword { .. } => "UsernamePasswordCredential",
            Credential::Token { .. } => "TokenCredential",
            Credential::ApiKey { .. } => "ApiKeyCredential",
            Credential::Assertion { .. } => "AssertionCredential",
            Credential::Placeholder => "PlaceholderCredential",
        }
    }
}

// Secrets never reach logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"[redacted]")
                .finish(),
            Credential::Token { .. } => f.write_str("Token([redacted])"),
            Credential::ApiKey { .. } => f.write_str("ApiKey([redacted])"),
            Credential::Assertion { issuer, .. } => f
                .debug_struct("Assertion")
                .field("issuer", issuer)
                .finish_non_exhaustive(),
            Credential::Placeholder => f.write_str("Placeholder"),
        }
    }
}

/// Credential id and type recorded on an authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMetadata {
    pub id: String,
    pub credential_type: String,
}

impl From<&Credential> for CredentialMetadata {
    fn from(credential: &Credential) -> Self {
        Self {
            id: credential.id(),
            credential_type: credential.credential_type().to_string(),
        }
    }
}

/// Resolved identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), vec![value.into()]);
        self
    }

    /// Get a single-valued attribute.
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }

    /// Add attributes not already present. Existing keys keep their values.
    pub fn merge_missing(&mut self, other: &Attributes) {
        for (name, values) in other {
            self.attributes
                .entry(name.clone())
                .or_insert_with(|| values.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_credential_parsing() {
        let encoded = BASE64.encode("casuser:Mellon");
        let credential = Credential::from_basic(&encoded).unwrap();
        assert_eq!(credential, Credential::username_password("casuser", "Mellon"));
    }

    #[test]
    fn test_basic_credential_invalid() {
        assert!(Credential::from_basic("not base64!").is_err());
        assert!(Credential::from_basic(&BASE64.encode("no-colon")).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credential = Credential::username_password("casuser", "Mellon");
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("casuser"));
        assert!(!rendered.contains("Mellon"));

        let token = Credential::Token {
            token: "secret-token".to_string(),
        };
        assert!(!format!("{:?}", token).contains("secret-token"));
    }

    #[test]
    fn test_merge_missing_keeps_existing() {
        let mut principal = Principal::new("casuser").with_attribute("email", "first@example.com");
        let other = HashMap::from([
            ("email".to_string(), vec!["second@example.com".to_string()]),
            ("role".to_string(), vec!["admin".to_string()]),
        ]);

        principal.merge_missing(&other);
        assert_eq!(principal.get_attribute("email"), Some("first@example.com"));
        assert_eq!(principal.get_attribute("role"), Some("admin"));
    }
}
