//! Risk levels and the confirmation policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A risk level with a short human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub level: RiskLevel,
    pub reason: String,
}

impl Assessment {
    pub fn new(level: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            level,
            reason: reason.into(),
        }
    }
}

/// When to ask the operator before acting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskPolicy {
    /// Confirm every action.
    Strict,
    /// Confirm high-risk actions, plus everything when tool confirmation is on.
    #[default]
    Normal,
    /// Only the tool-confirmation switch decides.
    Off,
}

impl RiskPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Normal => "normal",
            Self::Off => "off",
        }
    }

    pub fn should_confirm(&self, confirm_tools: bool, risk: RiskLevel) -> bool {
        match self {
            Self::Off => confirm_tools,
            Self::Strict => true,
            Self::Normal => confirm_tools || risk == RiskLevel::High,
        }
    }
}

impl FromStr for RiskPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "" | "normal" => Ok(Self::Normal),
            "off" => Ok(Self::Off),
            other => Err(format!("invalid risk policy {other:?} (use strict|normal|off)")),
        }
    }
}

impl fmt::Display for RiskPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_truth_table() {
        use RiskLevel::*;
        for risk in [Low, Medium, High] {
            assert!(RiskPolicy::Strict.should_confirm(false, risk));
            assert!(RiskPolicy::Off.should_confirm(true, risk));
            assert!(!RiskPolicy::Off.should_confirm(false, risk));
            assert!(RiskPolicy::Normal.should_confirm(true, risk));
        }
        assert!(!RiskPolicy::Normal.should_confirm(false, Low));
        assert!(!RiskPolicy::Normal.should_confirm(false, Medium));
        assert!(RiskPolicy::Normal.should_confirm(false, High));
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("STRICT".parse::<RiskPolicy>().unwrap(), RiskPolicy::Strict);
        assert_eq!("".parse::<RiskPolicy>().unwrap(), RiskPolicy::Normal);
        assert!("paranoid".parse::<RiskPolicy>().is_err());
    }

    #[test]
    fn levels_order_by_severity() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }
}
