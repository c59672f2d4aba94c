use std::{fmt::Write, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, bail};
use indoc::indoc;
use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use toml::Value;

use crate::{Config, PolicyDocument, RateLimitConfig, StorageConfig};

/// A bucket left alone for an hour is full again, so keys may expire after that.
const MIN_KEY_TTL: Duration = Duration::from_secs(60 * 60);

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref().to_path_buf();
    let content = std::fs::read_to_string(&path)?;
    let mut raw_config: Value = toml::from_str(&content)?;

    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate_rate_limits(&config.rate_limits)?;

    Ok(config)
}

pub(crate) fn validate_rate_limits(config: &RateLimitConfig) -> anyhow::Result<()> {
    if config.policy.is_some() && config.policy_path.is_some() {
        bail!(indoc! {r#"
            Both rate_limits.policy and rate_limits.policy_path are set. Configure the policy document in one place:

              [rate_limits]
              policy_path = "./rate-limits.json"
        "#});
    }

    if let StorageConfig::Redis(redis) = &config.storage
        && let Some(ttl) = redis.key_ttl
        && ttl < MIN_KEY_TTL
    {
        bail!("rate_limits.storage.key_ttl must be at least one hour, got {ttl:?}");
    }

    let Some(document) = config.policy_document()? else {
        if config.enabled && config.default_capacity_tiers.is_empty() {
            log::warn!("Rate limiting is enabled but neither a policy nor default capacity tiers are configured");
        }

        return Ok(());
    };

    let policy = PolicyDocument::parse(&document).context("Invalid rate limit policy document")?;

    for rule in &policy.rate_limits {
        if rule.default_limit_per_hour.is_none() && config.default_capacity(rule.tier).is_unlimited() {
            log::debug!(
                "Tier {} has no default capacity, actions without an override are unlimited",
                rule.tier
            );
        }
    }

    Ok(())
}

fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => *s = out.into_inner(),
            Err(err) => {
                let mut p = String::new();

                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]")?,
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}
