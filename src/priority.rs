use serde::{Deserialize, Serialize};
use std::fmt;

pub const PRIORITY_PREFIX: &str = "priority:";
pub const EFFORT_PREFIX: &str = "effort:";
pub const VALUE_PREFIX: &str = "value:";

/// Task priority, mirrored to `priority:<value>` labels.
/// Higher variants sort later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }

    /// Highest priority found among `priority:` labels
    pub fn from_labels(labels: &[impl AsRef<str>]) -> Option<Self> {
        labels
            .iter()
            .filter_map(|l| l.as_ref().strip_prefix(PRIORITY_PREFIX))
            .filter_map(Self::parse)
            .max()
    }

    pub fn label(self) -> String {
        format!("{PRIORITY_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Small,
    Medium,
    Large,
}

impl Effort {
    pub fn as_str(self) -> &'static str {
        match self {
            Effort::Small => "small",
            Effort::Medium => "medium",
            Effort::Large => "large",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "small" | "s" => Some(Effort::Small),
            "medium" | "m" => Some(Effort::Medium),
            "large" | "l" => Some(Effort::Large),
            _ => None,
        }
    }

    pub fn from_labels(labels: &[impl AsRef<str>]) -> Option<Self> {
        labels
            .iter()
            .find_map(|l| l.as_ref().strip_prefix(EFFORT_PREFIX).and_then(Self::parse))
    }

    pub fn label(self) -> String {
        format!("{EFFORT_PREFIX}{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Low,
    Medium,
    High,
}

impl Value {
    pub fn as_str(self) -> &'static str {
        match self {
            Value::Low => "low",
            Value::Medium => "medium",
            Value::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Value::Low),
            "medium" => Some(Value::Medium),
            "high" => Some(Value::High),
            _ => None,
        }
    }

    pub fn from_labels(labels: &[impl AsRef<str>]) -> Option<Self> {
        labels
            .iter()
            .find_map(|l| l.as_ref().strip_prefix(VALUE_PREFIX).and_then(Self::parse))
    }

    pub fn label(self) -> String {
        format!("{VALUE_PREFIX}{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_labels() {
        assert_eq!(Priority::from_labels(&["priority:high"]), Some(Priority::High));
        assert_eq!(Priority::from_labels(&["bug", "priority:low"]), Some(Priority::Low));
        assert_eq!(Priority::from_labels(&["bug"]), None);

        // Highest wins when several are present
        assert_eq!(
            Priority::from_labels(&["priority:low", "priority:urgent", "priority:medium"]),
            Some(Priority::Urgent)
        );
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_labels_round_trip_through_prefixes() {
        assert_eq!(Priority::High.label(), "priority:high");
        assert_eq!(Effort::from_labels(&[Effort::Large.label()]), Some(Effort::Large));
        assert_eq!(Value::from_labels(&["value:medium"]), Some(Value::Medium));
        assert_eq!(Effort::parse("S"), Some(Effort::Small));
    }

    #[test]
    fn test_priority_display() {
        assert_eq!(format!("{}", Priority::Urgent), "URGENT");
        assert_eq!(format!("{}", Priority::Low), "LOW");
    }
}
