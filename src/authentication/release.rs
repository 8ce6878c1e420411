//! Authentication attribute release policy.

use std::collections::HashSet;
use tracing::debug;

use super::config::AttributeReleaseConfig;
use super::credential::Attributes;

/// Which authentication attributes are visible to service providers.
#[derive(Debug, Clone)]
pub enum AttributeReleaseMode {
    /// Release nothing.
    Disabled,
    /// Apply the allow-list (when non-empty), then the deny-list.
    Filtered {
        only_release: HashSet<String>,
        never_release: HashSet<String>,
    },
}

/// Filters authentication-level attributes. The authentication context attribute
/// is always kept.
#[derive(Debug, Clone)]
pub struct AuthenticationAttributeReleasePolicy {
    mode: AttributeReleaseMode,
    context_attribute: String,
}

impl AuthenticationAttributeReleasePolicy {
    pub fn new(mode: AttributeReleaseMode, context_attribute: impl Into<String>) -> Self {
        Self {
            mode,
            context_attribute: context_attribute.into(),
        }
    }

    pub fn from_config(config: &AttributeReleaseConfig) -> Self {
        if !config.enabled {
            debug!("Authentication attribute release is disabled");
            return Self::new(
                AttributeReleaseMode::Disabled,
                config.authentication_context_attribute.clone(),
            );
        }

        Self::new(
            AttributeReleaseMode::Filtered {
                only_release: config.only_release.iter().cloned().collect(),
                never_release: config.never_release.iter().cloned().collect(),
            },
            config.authentication_context_attribute.clone(),
        )
    }

    pub fn mode(&self) -> &AttributeReleaseMode {
        &self.mode
    }

    pub fn filter(&self, attributes: &Attributes) -> Attributes {
        attributes
            .iter()
            .filter(|(name, _)| self.is_released(name))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect()
    }

    fn is_released(&self, name: &str) -> bool {
        if name == self.context_attribute {
            return true;
        }
        match &self.mode {
            AttributeReleaseMode::Disabled => false,
            AttributeReleaseMode::Filtered {
                only_release,
                never_release,
            } => {
                (only_release.is_empty() || only_release.contains(name))
                    && !never_release.contains(name)
            }
        }
    }
}

impl Default for AuthenticationAttributeReleasePolicy {
    fn default() -> Self {
        Self::from_config(&AttributeReleaseConfig::default())
    }
}
