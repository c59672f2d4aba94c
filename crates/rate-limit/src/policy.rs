//! Resolution of hourly capacities from caller tier and action.

use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use config::{Capacity, PolicyDocument, PolicyError, RateLimitConfig};

/// Supplies tier defaults and the policy document.
pub trait PolicySource: Send + Sync {
    /// Default hourly capacity for a tier.
    fn default_capacity(&self, tier: u32) -> Capacity;

    /// The raw JSON policy document, if any.
    fn policy_document(&self) -> Result<Option<String>, PolicyError>;
}

/// [`PolicySource`] backed by the `[rate_limits]` configuration section.
#[derive(Debug, Clone)]
pub struct ConfigPolicySource {
    config: Arc<RateLimitConfig>,
}

impl ConfigPolicySource {
    /// Create a source over the given configuration.
    pub fn new(config: Arc<RateLimitConfig>) -> Self {
        Self { config }
    }
}

impl PolicySource for ConfigPolicySource {
    fn default_capacity(&self, tier: u32) -> Capacity {
        self.config.default_capacity(tier)
    }

    fn policy_document(&self) -> Result<Option<String>, PolicyError> {
        self.config.policy_document()
    }
}

#[derive(Debug, Clone)]
struct TierPolicy {
    default: Capacity,
    actions: HashMap<String, Capacity>,
}

/// Capacities by tier and action, built from a policy document.
#[derive(Debug, Default, Clone)]
pub struct PolicyTable {
    tiers: HashMap<u32, TierPolicy>,
}

impl PolicyTable {
    /// Build the table from a document. Rules without an explicit default take the tier
    /// default from `source`; later rules overwrite earlier ones for the same tier and action.
    pub fn build(document: &PolicyDocument, source: &dyn PolicySource) -> Self {
        let mut tiers: HashMap<u32, TierPolicy> = HashMap::new();

        for rule in &document.rate_limits {
            let default = rule
                .default_limit_per_hour
                .unwrap_or_else(|| source.default_capacity(rule.tier));

            let tier = tiers.entry(rule.tier).or_insert_with(|| TierPolicy {
                default,
                actions: HashMap::new(),
            });

            tier.default = default;

            for action in &rule.actions {
                if let Some(limit) = action.limit(rule) {
                    tier.actions.insert(action.name().to_string(), limit);
                }
            }
        }

        Self { tiers }
    }

    /// The most specific entry for a tier and action, if the tier has a rule at all.
    pub fn lookup(&self, tier: u32, action: Option<&str>) -> Option<Capacity> {
        let policy = self.tiers.get(&tier)?;

        action
            .and_then(|action| policy.actions.get(action))
            .copied()
            .or(Some(policy.default))
    }

    /// Number of entries: one per tier default plus one per action override.
    pub fn len(&self) -> usize {
        self.tiers.values().map(|tier| 1 + tier.actions.len()).sum()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

/// Resolves the hourly capacity for a tier and action.
///
/// The policy table is loaded on the first lookup and cached until [`PolicyResolver::reload`]
/// or [`PolicyResolver::reset`]. A document that fails to load leaves an empty table in place,
/// so lookups fall back to the tier defaults without retrying the load on every call.
pub struct PolicyResolver {
    source: Arc<dyn PolicySource>,
    table: RwLock<Option<Arc<PolicyTable>>>,
    loads: AtomicUsize,
}

impl PolicyResolver {
    /// Create a resolver. Nothing is loaded until the first lookup.
    pub fn new(source: Arc<dyn PolicySource>) -> Self {
        Self {
            source,
            table: RwLock::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Hourly capacity for `tier` and `action`.
    ///
    /// Lookup order: the action override, the tier default from the policy, then the tier
    /// default from configuration. A missing or empty action means the tier default.
    pub fn resolve_capacity(&self, tier: u32, action: Option<&str>) -> Capacity {
        let action = action.filter(|action| !action.is_empty());

        self.table()
            .lookup(tier, action)
            .unwrap_or_else(|| self.source.default_capacity(tier))
    }

    /// Load the policy again and swap it in.
    ///
    /// Returns the number of entries in the new table. On failure the current table stays.
    pub fn reload(&self) -> Result<usize, PolicyError> {
        let table = self.load().inspect_err(|e| {
            log::warn!("Rate limit policy reload failed, keeping the current policy: {e}");
        })?;

        let entries = table.len();
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(table));

        log::info!("Rate limit policy reloaded with {entries} entries");

        Ok(entries)
    }

    /// Drop the cached table; the next lookup loads it again.
    pub fn reset(&self) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// How many times the policy document has been fetched from the source.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    fn table(&self) -> Arc<PolicyTable> {
        if let Some(table) = self.table.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return table.clone();
        }

        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(table) = guard.as_ref() {
            return table.clone();
        }

        let table = self.load().unwrap_or_else(|e| {
            log::warn!("Unable to load rate limit policy, using tier defaults: {e}");
            PolicyTable::default()
        });

        let table = Arc::new(table);
        *guard = Some(table.clone());

        table
    }

    fn load(&self) -> Result<PolicyTable, PolicyError> {
        self.loads.fetch_add(1, Ordering::Relaxed);

        let Some(document) = self.source.policy_document()? else {
            log::debug!("No rate limit policy configured, using tier defaults");
            return Ok(PolicyTable::default());
        };

        let document = PolicyDocument::parse(&document)?;
        let table = PolicyTable::build(&document, self.source.as_ref());

        log::debug!(
            "Loaded rate limit policy with {} rules and {} entries",
            document.rate_limits.len(),
            table.len()
        );

        Ok(table)
    }
}
