//! Debounced "what just changed" display.
//!
//! A change is shown immediately. The fade countdown starts only after a quiet
//! period with no further changes; any change during either window starts the
//! whole sequence over from that event.

use crate::clock::Millis;
use crate::config::{as_millis, clamp_fade_delay};
use crate::registry::ParameterChange;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayState {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Quiet { until: Millis },
    Fading { until: Millis },
}

pub struct DisplayArbiter {
    enabled: bool,
    quiet_period: Millis,
    fade_delay: Millis,
    phase: Phase,
    current: Option<DisplayState>,
    last_change: Option<ParameterChange>,
    idle_transitions: u64,
}

impl DisplayArbiter {
    pub fn new(quiet_period: Duration, fade_delay: Duration, enabled: bool) -> Self {
        Self {
            enabled,
            quiet_period: as_millis(quiet_period),
            fade_delay: as_millis(clamp_fade_delay(fade_delay)),
            phase: Phase::Idle,
            current: None,
            last_change: None,
            idle_transitions: 0,
        }
    }

    pub fn on_change(&mut self, change: ParameterChange, now: Millis) {
        if self.enabled {
            self.current = Some(DisplayState {
                name: change.name.clone(),
                text: change.text.clone(),
            });
            self.phase = Phase::Quiet {
                until: now.saturating_add(self.quiet_period),
            };
        }
        self.last_change = Some(change);
    }

    /// Advances through every phase whose deadline has passed.
    pub fn poll(&mut self, now: Millis) {
        loop {
            match self.phase {
                Phase::Quiet { until } if now >= until => {
                    self.phase = Phase::Fading {
                        until: until.saturating_add(self.fade_delay),
                    };
                }
                Phase::Fading { until } if now >= until => {
                    self.phase = Phase::Idle;
                    self.current = None;
                    self.idle_transitions += 1;
                    debug!("display returned to idle");
                }
                _ => break,
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Millis> {
        match self.phase {
            Phase::Idle => None,
            Phase::Quiet { until } | Phase::Fading { until } => Some(until),
        }
    }

    /// `None` means the idle/default display.
    pub fn current(&self) -> Option<&DisplayState> {
        self.current.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last_change(&self) -> Option<&ParameterChange> {
        self.last_change.as_ref()
    }

    pub fn idle_transitions(&self) -> u64 {
        self.idle_transitions
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turning the display off drops any pending timers and clears the screen.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.cancel();
        }
    }

    pub fn fade_delay(&self) -> Duration {
        Duration::from_millis(self.fade_delay)
    }

    /// Takes effect from the next quiet period on.
    pub fn set_fade_delay(&mut self, delay: Duration) {
        self.fade_delay = as_millis(clamp_fade_delay(delay));
    }

    pub fn cancel(&mut self) {
        self.phase = Phase::Idle;
        self.current = None;
    }
}
