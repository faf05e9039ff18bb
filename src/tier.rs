//! Quality tiers and the one-shot device capability classifier which picks the starting tier.

/// A discrete rendering quality policy.
///
/// The ordering is `Low < Balanced < High` and exists only for comparison.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum QualityTier {
    Low,
    Balanced,
    High,
}

impl QualityTier {
    /// The next tier up, if any.
    pub fn step_up(self) -> Option<QualityTier> {
        match self {
            QualityTier::Low => Some(QualityTier::Balanced),
            QualityTier::Balanced => Some(QualityTier::High),
            QualityTier::High => None,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> QualityTier {
        match value {
            0 => QualityTier::Low,
            1 => QualityTier::Balanced,
            _ => QualityTier::High,
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QualityTier::Low => "low",
            QualityTier::Balanced => "balanced",
            QualityTier::High => "high",
        };
        f.write_str(name)
    }
}

/// Memory assumed when the platform doesn't report any.
pub const DEFAULT_MEMORY_GB: f32 = 4.0;
/// Core count assumed when the platform doesn't report any.
pub const DEFAULT_CORE_COUNT: u32 = 4;

/// Whatever the host could tell us about the device.
///
/// Missing values are not an error; they fall back to [DEFAULT_MEMORY_GB] and [DEFAULT_CORE_COUNT].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CapabilityHints {
    pub memory_gb: Option<f32>,
    pub core_count: Option<u32>,
    pub is_handheld: bool,
}

impl CapabilityHints {
    pub fn classify(&self) -> QualityTier {
        classify(
            self.memory_gb.unwrap_or(DEFAULT_MEMORY_GB),
            self.core_count.unwrap_or(DEFAULT_CORE_COUNT),
            self.is_handheld,
        )
    }
}

/// Map device capabilities to a starting tier.
///
/// Handhelds short on either memory or cores get [QualityTier::Low]; desktops with at least 8 GB and 6 cores get
/// [QualityTier::High]; everything else is [QualityTier::Balanced].
pub fn classify(memory_gb: f32, core_count: u32, is_handheld: bool) -> QualityTier {
    if is_handheld && (memory_gb < 4.0 || core_count < 4) {
        QualityTier::Low
    } else if !is_handheld && memory_gb >= 8.0 && core_count >= 6 {
        QualityTier::High
    } else {
        QualityTier::Balanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_rule_table() {
        assert_eq!(classify(2.0, 8, true), QualityTier::Low);
        assert_eq!(classify(8.0, 2, true), QualityTier::Low);
        assert_eq!(classify(8.0, 8, true), QualityTier::Balanced);
        assert_eq!(classify(8.0, 6, false), QualityTier::High);
        assert_eq!(classify(7.9, 16, false), QualityTier::Balanced);
        assert_eq!(classify(16.0, 5, false), QualityTier::Balanced);
        assert_eq!(classify(1.0, 1, false), QualityTier::Balanced);
    }

    #[test]
    fn test_missing_hints_default_to_balanced() {
        assert_eq!(CapabilityHints::default().classify(), QualityTier::Balanced);

        // A handheld with nothing reported still lands on the defaults, which aren't "low".
        let hints = CapabilityHints {
            is_handheld: true,
            ..Default::default()
        };
        assert_eq!(hints.classify(), QualityTier::Balanced);

        let hints = CapabilityHints {
            memory_gb: Some(2.0),
            core_count: None,
            is_handheld: true,
        };
        assert_eq!(hints.classify(), QualityTier::Low);
    }

    #[test]
    fn test_ordering() {
        assert!(QualityTier::Low < QualityTier::Balanced);
        assert!(QualityTier::Balanced < QualityTier::High);
        assert_eq!(QualityTier::High.step_up(), None);
        for t in [QualityTier::Low, QualityTier::Balanced, QualityTier::High] {
            assert_eq!(QualityTier::from_u8(t.to_u8()), t);
        }
    }

    proptest! {
        #[test]
        fn test_classify_is_total(memory in 0.0f32..64.0, cores in 0u32..128, handheld in any::<bool>()) {
            let tier = classify(memory, cores, handheld);
            if handheld {
                prop_assert_ne!(tier, QualityTier::High);
            } else {
                prop_assert_ne!(tier, QualityTier::Low);
            }
            if tier == QualityTier::High {
                prop_assert!(memory >= 8.0 && cores >= 6);
            }
            // Asking again gives the same answer.
            prop_assert_eq!(tier, classify(memory, cores, handheld));
        }
    }
}
