use crate::clock::Millis;

/// A single cancelable wake time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    due: Option<Millis>,
}

impl Deadline {
    pub fn arm(&mut self, now: Millis, delay: Millis) {
        self.due = Some(now.saturating_add(delay));
    }

    pub fn cancel(&mut self) {
        self.due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.due.is_some()
    }

    pub fn due(&self) -> Option<Millis> {
        self.due
    }

    /// Disarms and returns the due time once `now` has reached it.
    pub fn fire(&mut self, now: Millis) -> Option<Millis> {
        match self.due {
            Some(due) if now >= due => {
                self.due = None;
                Some(due)
            }
            _ => None,
        }
    }
}

/// Earliest of a set of optional wake times.
pub fn earliest(deadlines: impl IntoIterator<Item = Option<Millis>>) -> Option<Millis> {
    deadlines.into_iter().flatten().min()
}

/// Flag that lights on activity and clears itself `hold` ms after the last hit.
#[derive(Debug, Clone, Copy)]
pub struct ActivityIndicator {
    hold: Millis,
    timer: Deadline,
}

impl ActivityIndicator {
    pub fn new(hold: Millis) -> Self {
        Self {
            hold,
            timer: Deadline::default(),
        }
    }

    pub fn flash(&mut self, now: Millis) {
        self.timer.arm(now, self.hold);
    }

    pub fn is_lit(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn poll(&mut self, now: Millis) {
        let _ = self.timer.fire(now);
    }

    pub fn next_deadline(&self) -> Option<Millis> {
        self.timer.due()
    }

    pub fn clear(&mut self) {
        self.timer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_fires_once() {
        let mut d = Deadline::default();
        d.arm(100, 50);
        assert_eq!(d.fire(149), None);
        assert_eq!(d.fire(150), Some(150));
        assert_eq!(d.fire(200), None);
    }

    #[test]
    fn activity_light_rearms_on_every_flash() {
        let mut light = ActivityIndicator::new(500);
        light.flash(0);
        light.flash(400);
        light.poll(600);
        assert!(light.is_lit(), "second flash pushes the clear out to 900");
        light.poll(900);
        assert!(!light.is_lit());
    }

    #[test]
    fn earliest_skips_unarmed() {
        assert_eq!(earliest([None, Some(30), Some(10), None]), Some(10));
        assert_eq!(earliest([None, None]), None);
    }
}
