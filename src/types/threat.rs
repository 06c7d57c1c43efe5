//! Threat levels assigned by the security classifier

use serde::{Deserialize, Serialize};

/// Classification of inbound content risk.
///
/// Ordered from least to most severe so `max` picks the escalated level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Fraction of the configured rate limit a request at this level gets.
    pub fn rate_multiplier(&self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 0.5,
            Self::High => 0.2,
            Self::Critical => 0.1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(ThreatLevel::Low < ThreatLevel::Medium);
        assert!(ThreatLevel::High < ThreatLevel::Critical);
        assert_eq!(
            ThreatLevel::Medium.max(ThreatLevel::High),
            ThreatLevel::High
        );
    }

    #[test]
    fn multipliers_shrink_with_severity() {
        assert_eq!(ThreatLevel::Low.rate_multiplier(), 1.0);
        assert_eq!(ThreatLevel::Medium.rate_multiplier(), 0.5);
        assert_eq!(ThreatLevel::High.rate_multiplier(), 0.2);
        assert_eq!(ThreatLevel::Critical.rate_multiplier(), 0.1);
    }
}
