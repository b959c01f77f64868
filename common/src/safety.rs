use tracing::{error, info, warn};

use crate::types::FreshnessState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyAction {
    Warn { silent_ms: u64 },
    ForceShutoff { silent_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct SafetySupervisor {
    warning_ms: u64,
    safety_ms: u64,
    state: FreshnessState,
    last_reading_ms: u64,
}

impl SafetySupervisor {
    /// The staleness clock starts at `started_ms`, so a sensor that never
    /// reports still trips the shutoff.
    pub fn new(warning_ms: u64, safety_ms: u64, started_ms: u64) -> Self {
        Self {
            warning_ms,
            safety_ms: safety_ms.max(warning_ms),
            state: FreshnessState::Fresh,
            last_reading_ms: started_ms,
        }
    }

    pub fn state(&self) -> FreshnessState {
        self.state
    }

    pub fn silent_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_reading_ms)
    }

    pub fn record_reading(&mut self, now_ms: u64) {
        if self.state != FreshnessState::Fresh {
            info!(
                "temperature readings resumed after {}s ({} -> FRESH)",
                self.silent_ms(now_ms) / 1_000,
                self.state.as_str()
            );
        }
        self.state = FreshnessState::Fresh;
        self.last_reading_ms = now_ms;
    }

    /// Advances the state machine. Each action is produced once per
    /// staleness episode no matter how often this is called.
    pub fn evaluate(&mut self, now_ms: u64) -> Option<SafetyAction> {
        let silent_ms = self.silent_ms(now_ms);

        match self.state {
            FreshnessState::Unsafe => None,
            FreshnessState::Fresh | FreshnessState::Stale if silent_ms >= self.safety_ms => {
                error!(
                    "no temperature for {}s, forcing AC off",
                    silent_ms / 1_000
                );
                self.state = FreshnessState::Unsafe;
                Some(SafetyAction::ForceShutoff { silent_ms })
            }
            FreshnessState::Fresh if silent_ms >= self.warning_ms => {
                warn!("no temperature received in {}s", silent_ms / 1_000);
                self.state = FreshnessState::Stale;
                Some(SafetyAction::Warn { silent_ms })
            }
            FreshnessState::Fresh | FreshnessState::Stale => None,
        }
    }
}
