//! The JSON rate limit policy document.
//!
//! ```json
//! {
//!   "rateLimits": [
//!     { "tier": 0, "defaultLimitPerHour": 30, "actions": [{ "name": "export", "limitPerHour": 5 }] },
//!     { "tier": 1, "limitPerHour": 100, "actions": ["search", "download"] }
//!   ]
//! }
//! ```

use std::path::PathBuf;

use serde::Deserialize;

use crate::Capacity;

/// Errors raised while reading or parsing a policy document.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The policy file could not be read.
    #[error("failed to read rate limit policy from {}: {source}", path.display())]
    Read {
        /// Path of the policy file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// The document is not valid JSON or does not have the expected shape.
    #[error("unable to parse rate limit policy: {0}")]
    Parse(#[from] serde_json::Error),
    /// A bare action name was listed in a rule without a rule-wide `limitPerHour`.
    #[error("action '{action}' of tier {tier} has no limit: set limitPerHour on the rule or the action")]
    MissingActionLimit {
        /// Tier of the offending rule.
        tier: u32,
        /// Name of the action without a limit.
        action: String,
    },
}

/// A parsed policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    /// The rules, in document order.
    pub rate_limits: Vec<RateLimitRule>,
}

impl PolicyDocument {
    /// Parses and validates a policy document.
    pub fn parse(json: &str) -> Result<Self, PolicyError> {
        let document: PolicyDocument = serde_json::from_str(json)?;

        for rule in &document.rate_limits {
            for action in &rule.actions {
                if action.limit(rule).is_none() {
                    return Err(PolicyError::MissingActionLimit {
                        tier: rule.tier,
                        action: action.name().to_string(),
                    });
                }
            }
        }

        Ok(document)
    }
}

/// Policy for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    /// The tier this rule applies to.
    pub tier: u32,
    /// Explicit default for the tier. Inherited from the tier table when absent.
    #[serde(default)]
    pub default_limit_per_hour: Option<Capacity>,
    /// Limit applied to actions listed by name only.
    #[serde(default)]
    pub limit_per_hour: Option<Capacity>,
    /// Per-action overrides.
    #[serde(default)]
    pub actions: Vec<RateLimitAction>,
}

/// An action override inside a rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RateLimitAction {
    /// A bare action name, limited by the rule's `limitPerHour`.
    Name(String),
    /// An action with its own limit.
    Limited {
        /// Name of the action.
        name: String,
        /// Hourly capacity for the action.
        #[serde(rename = "limitPerHour")]
        limit_per_hour: Capacity,
    },
}

impl RateLimitAction {
    /// The action name.
    pub fn name(&self) -> &str {
        match self {
            RateLimitAction::Name(name) => name,
            RateLimitAction::Limited { name, .. } => name,
        }
    }

    /// The capacity for this action within the given rule.
    pub fn limit(&self, rule: &RateLimitRule) -> Option<Capacity> {
        match self {
            RateLimitAction::Name(_) => rule.limit_per_hour,
            RateLimitAction::Limited { limit_per_hour, .. } => Some(*limit_per_hour),
        }
    }
}
