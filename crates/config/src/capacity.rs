//! Hourly capacity values shared by the tier table and the policy document.

use std::fmt;

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};

const UNLIMITED: &str = "unlimited";

/// An hourly capacity for a bucket.
///
/// Written as a non-negative integer or the string `"unlimited"` in both TOML and JSON.
/// Negative numbers are rejected while deserializing, so a misconfigured limit can never
/// silently turn into "no limit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capacity {
    /// No limit applies; checks never touch the storage backend.
    Unlimited,
    /// At most this many operations per hour.
    PerHour(u32),
}

impl Capacity {
    /// The hourly limit, or `None` when unlimited.
    pub fn per_hour(self) -> Option<u32> {
        match self {
            Capacity::Unlimited => None,
            Capacity::PerHour(limit) => Some(limit),
        }
    }

    /// Whether this capacity is the "no limit" sentinel.
    pub fn is_unlimited(self) -> bool {
        matches!(self, Capacity::Unlimited)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Unlimited => f.write_str(UNLIMITED),
            Capacity::PerHour(limit) => write!(f, "{limit}/hour"),
        }
    }
}

impl Serialize for Capacity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Capacity::Unlimited => serializer.serialize_str(UNLIMITED),
            Capacity::PerHour(limit) => serializer.serialize_u32(*limit),
        }
    }
}

impl<'de> Deserialize<'de> for Capacity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CapacityVisitor)
    }
}

struct CapacityVisitor;

impl Visitor<'_> for CapacityVisitor {
    type Value = Capacity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer or \"unlimited\"")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Capacity, E> {
        u32::try_from(value)
            .map(Capacity::PerHour)
            .map_err(|_| E::custom(format!("capacity {value} is too large")))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Capacity, E> {
        if value < 0 {
            return Err(E::custom(format!(
                "capacity must not be negative, got {value}; use \"unlimited\" to disable the limit"
            )));
        }

        self.visit_u64(value as u64)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Capacity, E> {
        if value.eq_ignore_ascii_case(UNLIMITED) {
            Ok(Capacity::Unlimited)
        } else {
            Err(E::invalid_value(de::Unexpected::Str(value), &self))
        }
    }
}
