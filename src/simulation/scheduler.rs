/// Tolerance for matching an event time against the current stopping time.
pub(crate) const TOL: f64 = 1e-12;

/// Tolerance below which start and end time count as equal (single-shot mode).
pub(crate) const ENDTIME_TOL: f64 = 1e-5;

/// The independent event streams reconciled by the stepping loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Release = 0,
    InputChunk = 1,
    Output = 2,
    Animation = 3,
    Callback = 4,
}

impl EventKind {
    /// Per-step firing order: release before output before animation before
    /// callback, so freshly released particles make it into the same step's
    /// output and callbacks observe the fully updated set. Input-chunk advance
    /// is handled separately (it only fires when the stop is not the end).
    pub(crate) const FIRING_ORDER: [EventKind; 4] = [
        EventKind::Release,
        EventKind::Output,
        EventKind::Animation,
        EventKind::Callback,
    ];
}

/// Next pending time per event stream, plus the run direction.
///
/// A disabled stream sits at `+inf` (forward) or `-inf` (backward) so it never
/// wins the nearest-event comparison and never tests as due.
#[derive(Debug, Clone)]
pub(crate) struct EventTable {
    next: [f64; 5],
    forward: bool,
}

impl EventTable {
    pub(crate) fn new(forward: bool) -> EventTable {
        let disabled = if forward { f64::INFINITY } else { f64::NEG_INFINITY };
        EventTable {
            next: [disabled; 5],
            forward,
        }
    }

    pub(crate) fn sign(&self) -> f64 {
        if self.forward {
            1.
        } else {
            -1.
        }
    }

    pub(crate) fn set(&mut self, kind: EventKind, time: f64) {
        self.next[kind as usize] = time;
    }

    pub(crate) fn get(&self, kind: EventKind) -> f64 {
        self.next[kind as usize]
    }

    /// The nearest upcoming event time or the run end, whichever is closer in
    /// the run direction.
    pub(crate) fn next_target(&self, endtime: f64) -> f64 {
        let mut target = endtime;
        for &t in &self.next {
            target = if self.forward { target.min(t) } else { target.max(t) };
        }
        target
    }

    pub(crate) fn due(&self, kind: EventKind, time: f64) -> bool {
        (time - self.next[kind as usize]).abs() < TOL
    }

    pub(crate) fn advance(&mut self, kind: EventKind, interval: f64) {
        self.next[kind as usize] += interval * self.sign();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_streams_never_win_or_fire() {
        let table = EventTable::new(true);
        assert_eq!(table.next_target(100.), 100.);
        assert!(!table.due(EventKind::Output, 100.));

        let table = EventTable::new(false);
        assert_eq!(table.next_target(-100.), -100.);
    }

    #[test]
    fn nearest_event_forward() {
        let mut table = EventTable::new(true);
        table.set(EventKind::Output, 5.);
        table.set(EventKind::Release, 3.);
        table.set(EventKind::Callback, 8.);
        assert_eq!(table.next_target(100.), 3.);
        assert!(table.due(EventKind::Release, 3.));
        assert!(!table.due(EventKind::Output, 3.));

        table.advance(EventKind::Release, 10.);
        assert_eq!(table.get(EventKind::Release), 13.);
        assert_eq!(table.next_target(100.), 5.);
    }

    #[test]
    fn nearest_event_backward() {
        let mut table = EventTable::new(false);
        table.set(EventKind::Output, -5.);
        table.set(EventKind::Release, -3.);
        assert_eq!(table.next_target(-100.), -3.);

        table.advance(EventKind::Release, 10.);
        assert_eq!(table.get(EventKind::Release), -13.);
    }

    #[test]
    fn end_of_run_wins_when_nearer() {
        let mut table = EventTable::new(true);
        table.set(EventKind::Output, 50.);
        assert_eq!(table.next_target(20.), 20.);
    }

    #[test]
    fn coincident_events_all_test_due() {
        let mut table = EventTable::new(true);
        table.set(EventKind::Release, 10.);
        table.set(EventKind::Output, 10.);
        table.set(EventKind::Callback, 10.);
        let target = table.next_target(100.);
        assert_eq!(target, 10.);
        for kind in EventKind::FIRING_ORDER {
            if kind == EventKind::Animation {
                assert!(!table.due(kind, target));
            } else {
                assert!(table.due(kind, target));
            }
        }
    }
}
