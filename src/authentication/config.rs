//! Authentication configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::credential::Attributes;
use super::metadata::DEFAULT_AUTHN_CONTEXT_ATTRIBUTE;

/// How principals from several successful handlers are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalMergePolicy {
    /// Union of all attributes, first-seen value wins on collision.
    #[default]
    Union,
    /// Only the first successful principal.
    First,
}

/// Authentication engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AuthenticationConfig {
    /// Abort the transaction on any principal resolution failure.
    #[serde(default)]
    pub principal_resolution_failure_fatal: bool,

    #[serde(default)]
    pub merge_policy: PrincipalMergePolicy,

    /// Static users as `user:pass` pairs.
    #[serde(default)]
    pub static_users: Vec<String>,

    /// API keys as `key:name` pairs.
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Attributes merged into principals by id.
    #[serde(default)]
    pub person_directory: HashMap<String, Attributes>,

    /// Fail resolution for principals missing from the directory.
    #[serde(default)]
    pub require_directory_entry: bool,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            principal_resolution_failure_fatal: false,
            merge_policy: PrincipalMergePolicy::Union,
            static_users: vec![],
            api_keys: vec![],
            person_directory: HashMap::new(),
            require_directory_entry: false,
        }
    }
}

/// Authentication attribute release configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AttributeReleaseConfig {
    /// Release authentication attributes at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allow-list; empty means no restriction.
    #[serde(default)]
    pub only_release: Vec<String>,

    /// Deny-list.
    #[serde(default)]
    pub never_release: Vec<String>,

    /// Attribute naming the satisfied authentication context. Always released.
    #[serde(default = "default_context_attribute")]
    pub authentication_context_attribute: String,
}

fn default_true() -> bool {
    true
}

fn default_context_attribute() -> String {
    DEFAULT_AUTHN_CONTEXT_ATTRIBUTE.to_string()
}

impl Default for AttributeReleaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            only_release: vec![],
            never_release: vec![],
            authentication_context_attribute: default_context_attribute(),
        }
    }
}

/// Partial authentication settings applied on reload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationConfigJson {
    pub principal_resolution_failure_fatal: Option<bool>,
    pub merge_policy: Option<PrincipalMergePolicy>,
    pub static_users: Option<Vec<String>>,
    pub api_keys: Option<Vec<String>>,
    pub person_directory: Option<HashMap<String, Attributes>>,
    pub require_directory_entry: Option<bool>,
}

impl AuthenticationConfigJson {
    pub fn apply_to(&self, config: &mut AuthenticationConfig) {
        if let Some(fatal) = self.principal_resolution_failure_fatal {
            config.principal_resolution_failure_fatal = fatal;
        }
        if let Some(policy) = self.merge_policy {
            config.merge_policy = policy;
        }
        if let Some(ref users) = self.static_users {
            config.static_users = users.clone();
        }
        if let Some(ref keys) = self.api_keys {
            config.api_keys = keys.clone();
        }
        if let Some(ref directory) = self.person_directory {
            config.person_directory = directory.clone();
        }
        if let Some(required) = self.require_directory_entry {
            config.require_directory_entry = required;
        }
    }
}

/// Partial attribute release settings applied on reload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttributeReleaseConfigJson {
    pub enabled: Option<bool>,
    pub only_release: Option<Vec<String>>,
    pub never_release: Option<Vec<String>>,
    pub authentication_context_attribute: Option<String>,
}

impl AttributeReleaseConfigJson {
    pub fn apply_to(&self, config: &mut AttributeReleaseConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(ref only) = self.only_release {
            config.only_release = only.clone();
        }
        if let Some(ref never) = self.never_release {
            config.never_release = never.clone();
        }
        if let Some(ref attr) = self.authentication_context_attribute {
            config.authentication_context_attribute = attr.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthenticationConfig::default();
        assert!(!config.principal_resolution_failure_fatal);
        assert_eq!(config.merge_policy, PrincipalMergePolicy::Union);

        let release = AttributeReleaseConfig::default();
        assert!(release.enabled);
        assert_eq!(release.authentication_context_attribute, "authnContextClass");
    }

    #[test]
    fn test_parse_camel_case() {
        let config: AuthenticationConfig = serde_json::from_str(
            r#"{"principalResolutionFailureFatal": true, "mergePolicy": "first"}"#,
        )
        .unwrap();
        assert!(config.principal_resolution_failure_fatal);
        assert_eq!(config.merge_policy, PrincipalMergePolicy::First);

        let directory: AuthenticationConfig = serde_json::from_str(
            r#"{"personDirectory": {"casuser": {"email": ["casuser@example.org"]}}, "requireDirectoryEntry": true}"#,
        )
        .unwrap();
        assert_eq!(
            directory.person_directory["casuser"]["email"],
            vec!["casuser@example.org"]
        );
        assert!(directory.require_directory_entry);

        let unknown = serde_json::from_str::<AuthenticationConfig>(r#"{"bogus": 1}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_json_overlay() {
        let mut release = AttributeReleaseConfig::default();
        let overlay = AttributeReleaseConfigJson {
            only_release: Some(vec!["email".to_string()]),
            ..Default::default()
        };
        overlay.apply_to(&mut release);
        assert_eq!(release.only_release, vec!["email".to_string()]);
        assert!(release.enabled);
    }
}
