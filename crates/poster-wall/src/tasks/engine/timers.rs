use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Rotation,
    Probe,
    Refresh,
}

/// A periodic deadline that can only ever hold one pending firing.
///
/// `schedule` always cancels before re-arming, so two live instances of the
/// same timer cannot exist.
#[derive(Debug, Clone)]
pub struct Timer {
    period: Duration,
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) {
        self.cancel();
        self.deadline = Some(now + self.period);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// The three independent timers of the wall.
#[derive(Debug, Clone)]
pub struct Timers {
    pub rotation: Timer,
    pub probe: Timer,
    pub refresh: Timer,
}

impl Timers {
    pub fn new(rotation: Duration, probe: Duration, refresh: Duration) -> Self {
        Self {
            rotation: Timer::new(rotation),
            probe: Timer::new(probe),
            refresh: Timer::new(refresh),
        }
    }

    /// Earliest armed deadline; ties resolve probe before rotation before refresh.
    pub fn next_due(&self) -> Option<(TimerKind, Instant)> {
        [
            (TimerKind::Probe, self.probe.deadline()),
            (TimerKind::Rotation, self.rotation.deadline()),
            (TimerKind::Refresh, self.refresh.deadline()),
        ]
        .into_iter()
        .filter_map(|(kind, at)| at.map(|at| (kind, at)))
        .min_by_key(|(_, at)| *at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reschedule_replaces_pending_deadline() {
        let t0 = Instant::now();
        let mut timer = Timer::new(Duration::from_secs(8));
        timer.schedule(t0);
        timer.schedule(t0 + Duration::from_secs(3));
        assert_eq!(timer.deadline(), Some(t0 + Duration::from_secs(11)));
        timer.cancel();
        assert!(!timer.is_armed());
    }

    #[test]
    fn next_due_picks_earliest_armed() {
        let t0 = Instant::now();
        let mut timers = Timers::new(
            Duration::from_secs(8),
            Duration::from_secs(10),
            Duration::from_secs(600),
        );
        assert!(timers.next_due().is_none());
        timers.probe.schedule(t0);
        timers.rotation.schedule(t0);
        assert_eq!(
            timers.next_due(),
            Some((TimerKind::Rotation, t0 + Duration::from_secs(8)))
        );
        timers.rotation.cancel();
        assert_eq!(timers.next_due().map(|(k, _)| k), Some(TimerKind::Probe));
    }
}
