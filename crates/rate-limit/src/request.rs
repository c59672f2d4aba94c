//! Request information for rate limiting.

/// A caller asking to perform an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRequest {
    /// Identity of the caller, already authenticated upstream.
    pub identity: String,
    /// Tier of the caller.
    pub tier: u32,
    /// The action being performed. `None` means the tier default applies.
    pub action: Option<String>,
}

impl RateLimitRequest {
    /// Create a new builder for a rate limit request.
    pub fn builder(identity: impl Into<String>) -> RateLimitRequestBuilder {
        RateLimitRequestBuilder {
            identity: identity.into(),
            tier: 0,
            action: None,
        }
    }

    /// Key of the bucket this request draws from: `{identity}:{action}`, with `%` and `:`
    /// in the identity percent-encoded so the first `:` always ends the identity.
    pub fn bucket_key(&self) -> String {
        bucket_key(&self.identity, self.action.as_deref())
    }
}

pub(crate) fn bucket_key(identity: &str, action: Option<&str>) -> String {
    let action = action.unwrap_or_default();
    let mut key = String::with_capacity(identity.len() + action.len() + 1);

    for c in identity.chars() {
        match c {
            '%' => key.push_str("%25"),
            ':' => key.push_str("%3A"),
            c => key.push(c),
        }
    }

    key.push(':');
    key.push_str(action);

    key
}

/// Builder for creating rate limit requests.
#[derive(Debug)]
pub struct RateLimitRequestBuilder {
    identity: String,
    tier: u32,
    action: Option<String>,
}

impl RateLimitRequestBuilder {
    /// Set the caller tier. Defaults to tier 0.
    pub fn tier(mut self, tier: u32) -> Self {
        self.tier = tier;
        self
    }

    /// Set the action name.
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Build the rate limit request.
    pub fn build(self) -> RateLimitRequest {
        RateLimitRequest {
            identity: self.identity,
            tier: self.tier,
            action: self.action,
        }
    }
}
