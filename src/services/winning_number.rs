//! Winning-number selection.

use std::{ops::RangeInclusive, sync::Arc};

use rand::Rng;

use crate::config::{AppConfig, WinningNumberConfig};

/// Picks the winning number of a closing round.
///
/// Called only after the session has been cleared, so no guess can be accepted afterwards.
pub trait WinningNumberPolicy: Send + Sync {
    /// Choose the winning number for the round that just closed.
    fn pick(&self) -> u8;
}

/// Uniformly random over the configured range. No fairness guarantees beyond the thread RNG.
#[derive(Debug, Clone)]
pub struct UniformPolicy {
    range: RangeInclusive<u8>,
}

impl UniformPolicy {
    /// Draw from `range`.
    pub fn new(range: RangeInclusive<u8>) -> Self {
        Self { range }
    }
}

impl WinningNumberPolicy for UniformPolicy {
    fn pick(&self) -> u8 {
        rand::rng().random_range(self.range.clone())
    }
}

/// Always the same number.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub u8);

impl WinningNumberPolicy for FixedPolicy {
    fn pick(&self) -> u8 {
        self.0
    }
}

/// Build the policy selected by `config`.
pub fn policy_for(config: &AppConfig) -> Arc<dyn WinningNumberPolicy> {
    match config.winning_number() {
        WinningNumberConfig::Uniform => Arc::new(UniformPolicy::new(config.number_range())),
        WinningNumberConfig::Fixed { value } => Arc::new(FixedPolicy(value)),
    }
}
