//! The [QualityController] owns the current [QualityTier].
//!
//! It starts from the capability classifier's answer and drops to [QualityTier::Low] when frame rate readings fall
//! below a threshold.  Going back up is off unless an [UpgradePolicy] is configured.  A manual [QualityController::set_tier]
//! pins the tier until the classifier runs again.
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::*;

/// Below this many frames per second the tier drops to [QualityTier::Low].
pub const DEFAULT_DOWNGRADE_FPS: u32 = 20;

/// When to climb back up after a downgrade.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UpgradePolicy {
    /// Readings at or above this count as good.
    pub min_fps: u32,
    /// How many good readings in a row it takes to go up one tier.
    pub sustained_windows: u32,
}

impl Default for UpgradePolicy {
    fn default() -> UpgradePolicy {
        UpgradePolicy {
            min_fps: 55,
            sustained_windows: 5,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TierChange {
    Downgraded { from: QualityTier, to: QualityTier },
    Upgraded { from: QualityTier, to: QualityTier },
}

#[derive(Debug)]
struct ControllerState {
    /// Automatic upgrades never go above what the classifier picked.
    ceiling: QualityTier,
    overridden: bool,
    good_windows: u32,
}

#[derive(Debug)]
pub struct QualityController {
    tier: AtomicU8,
    state: Mutex<ControllerState>,
    downgrade_fps: u32,
    upgrade: Option<UpgradePolicy>,
    sender: watch::Sender<QualityTier>,
}

impl QualityController {
    pub fn new(
        initial: QualityTier,
        downgrade_fps: u32,
        upgrade: Option<UpgradePolicy>,
    ) -> QualityController {
        let (sender, _) = watch::channel(initial);
        QualityController {
            tier: AtomicU8::new(initial.to_u8()),
            state: Mutex::new(ControllerState {
                ceiling: initial,
                overridden: false,
                good_windows: 0,
            }),
            downgrade_fps,
            upgrade,
            sender,
        }
    }

    pub fn from_hints(
        hints: &CapabilityHints,
        downgrade_fps: u32,
        upgrade: Option<UpgradePolicy>,
    ) -> QualityController {
        let tier = hints.classify();
        log::info!("Device classified as {} quality", tier);
        QualityController::new(tier, downgrade_fps, upgrade)
    }

    pub fn tier(&self) -> QualityTier {
        QualityTier::from_u8(self.tier.load(Ordering::Acquire))
    }

    /// Watch tier changes.
    pub fn subscribe(&self) -> watch::Receiver<QualityTier> {
        self.sender.subscribe()
    }

    pub fn is_overridden(&self) -> bool {
        self.state.lock().overridden
    }

    fn publish(&self, tier: QualityTier) {
        self.tier.store(tier.to_u8(), Ordering::Release);
        self.sender.send_replace(tier);
    }

    /// Force a tier.  Frame rate readings are ignored until [QualityController::reclassify].
    pub fn set_tier(&self, tier: QualityTier) {
        let mut state = self.state.lock();
        state.overridden = true;
        state.good_windows = 0;
        self.publish(tier);
        log::info!("Quality tier manually set to {}", tier);
    }

    /// Run the classifier again, dropping any manual override.
    pub fn reclassify(&self, hints: &CapabilityHints) -> QualityTier {
        let tier = hints.classify();
        let mut state = self.state.lock();
        state.ceiling = tier;
        state.overridden = false;
        state.good_windows = 0;
        self.publish(tier);
        log::info!("Device reclassified as {} quality", tier);
        tier
    }

    /// React to a new frame rate reading.
    pub fn on_fps(&self, fps: u32) -> Option<TierChange> {
        let mut state = self.state.lock();
        if state.overridden {
            return None;
        }

        let current = self.tier();
        if fps < self.downgrade_fps {
            state.good_windows = 0;
            if current == QualityTier::Low {
                return None;
            }
            self.publish(QualityTier::Low);
            log::info!("Frame rate fell to {}, dropping quality from {} to low", fps, current);
            return Some(TierChange::Downgraded {
                from: current,
                to: QualityTier::Low,
            });
        }

        let policy = self.upgrade?;
        if fps < policy.min_fps {
            state.good_windows = 0;
            return None;
        }

        state.good_windows += 1;
        if state.good_windows < policy.sustained_windows || current >= state.ceiling {
            return None;
        }

        state.good_windows = 0;
        let next = current.step_up()?;
        self.publish(next);
        log::info!("Frame rate steady at {}, raising quality from {} to {}", fps, current, next);
        Some(TierChange::Upgraded {
            from: current,
            to: next,
        })
    }
}
