//! Value types shared across the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned to every submitted task.
pub type TaskId = u64;

/// Task urgency. Higher values are dequeued first.
///
/// The valid range is `0..=127`; larger inputs are clamped by [`Priority::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    /// Lowest urgency, for work that may wait indefinitely.
    pub const BACKGROUND: Self = Self(0);
    /// Below-normal urgency.
    pub const LOW: Self = Self(32);
    /// Default urgency.
    pub const NORMAL: Self = Self(64);
    /// Above-normal urgency.
    pub const HIGH: Self = Self(96);
    /// Highest urgency.
    pub const CRITICAL: Self = Self(Self::MAX_VALUE);

    /// Largest accepted raw value.
    pub const MAX_VALUE: u8 = 127;

    /// Build a priority, clamping to [`Priority::MAX_VALUE`].
    #[must_use]
    pub const fn new(value: u8) -> Self {
        if value > Self::MAX_VALUE {
            Self(Self::MAX_VALUE)
        } else {
            Self(value)
        }
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_clamps() {
        assert_eq!(Priority::new(200), Priority::CRITICAL);
        assert_eq!(Priority::from(5).value(), 5);
    }

    #[test]
    fn test_priority_levels_ordered() {
        assert!(Priority::CRITICAL > Priority::HIGH);
        assert!(Priority::HIGH > Priority::NORMAL);
        assert!(Priority::NORMAL > Priority::LOW);
        assert!(Priority::LOW > Priority::BACKGROUND);
        assert_eq!(Priority::default(), Priority::NORMAL);
    }
}
