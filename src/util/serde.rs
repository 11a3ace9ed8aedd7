//! Serializable identifiers and small value types shared across modules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Job identifier, unique across all queues.
pub type JobId = String;

/// Tenant (account) identifier.
pub type TenantId = String;

/// Plan-tier priority attached to every job a tenant submits.
///
/// The numeric level is the wire format: `1` is the highest priority. The
/// derived ordering follows the numeric level, so the smallest value is the
/// most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    /// Top-tier plan.
    Top = 1,
    /// Mid-tier plan.
    Mid = 2,
    /// Free or default plan.
    Free = 3,
}

impl Priority {
    /// All tiers, highest first.
    pub const ALL: [Self; 3] = [Self::Top, Self::Mid, Self::Free];

    /// The lowest tier; the fairness reservation protects it.
    pub const LOWEST: Self = Self::Free;

    /// Numeric level (1 = highest).
    #[must_use]
    pub const fn level(self) -> u8 {
        self as u8
    }

    /// Bucket index (0-based) used by per-tier collections.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize - 1
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Free
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Top),
            2 => Ok(Self::Mid),
            3 => Ok(Self::Free),
            other => Err(format!("priority level must be 1, 2 or 3 (got {other})")),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.level()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering_follows_level() {
        assert!(Priority::Top < Priority::Mid);
        assert!(Priority::Mid < Priority::Free);
        assert_eq!(Priority::ALL.iter().min(), Some(&Priority::Top));
    }

    #[test]
    fn test_priority_wire_format() {
        assert_eq!(serde_json::to_string(&Priority::Top).unwrap(), "1");
        let p: Priority = serde_json::from_str("3").unwrap();
        assert_eq!(p, Priority::Free);
        assert!(serde_json::from_str::<Priority>("4").is_err());
    }

    #[test]
    fn test_priority_index() {
        assert_eq!(Priority::Top.index(), 0);
        assert_eq!(Priority::Free.index(), 2);
    }
}
