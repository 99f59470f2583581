use log::warn;

/// Whether the controller is answering poll requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Online,
    Offline,
}

impl Liveness {
    pub fn is_online(&self) -> bool {
        *self == Liveness::Online
    }
}

/// Counts poll cycles without a valid response.
///
/// The counter saturates one past `max`, so [`Liveness::Offline`] is reported exactly
/// once per outage. Any decoded response resets it.
#[derive(Debug)]
pub struct LivenessTracker {
    no_response_count: u8,
    max: u8,
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new(Self::MAX_NO_RESPONSE_COUNT)
    }
}

impl LivenessTracker {
    pub const MAX_NO_RESPONSE_COUNT: u8 = 10;

    pub fn new(max: u8) -> Self {
        Self { no_response_count: 0, max: max.min(u8::MAX - 1) }
    }

    /// Advance by one poll cycle, returning `Some(Offline)` on the transition.
    pub fn tick(&mut self) -> Option<Liveness> {
        if self.no_response_count < self.max {
            self.no_response_count += 1;
        }
        if self.no_response_count == self.max {
            // Advance the count exactly one more time
            self.no_response_count += 1;
            warn!("device does not appear to be responding");
            return Some(Liveness::Offline);
        }
        None
    }

    /// A response arrived. Always reports `Online`, even if it already was.
    pub fn reset(&mut self) -> Liveness {
        self.no_response_count = 0;
        Liveness::Online
    }

    pub fn no_response_count(&self) -> u8 {
        self.no_response_count
    }

    pub fn is_online(&self) -> bool {
        self.no_response_count <= self.max
    }
}

#[test]
fn test_offline_published_once_on_tenth_tick() {
    let mut tracker = LivenessTracker::default();
    for i in 1..=9 {
        assert_eq!(tracker.tick(), None, "tick {i}");
        assert!(tracker.is_online());
    }
    assert_eq!(tracker.tick(), Some(Liveness::Offline));
    assert!(!tracker.is_online());
    for _ in 0..20 {
        assert_eq!(tracker.tick(), None);
    }
    assert_eq!(tracker.no_response_count(), 11);
}

#[test]
fn test_reset_is_unconditional() {
    let mut tracker = LivenessTracker::default();
    assert_eq!(tracker.reset(), Liveness::Online);
    assert_eq!(tracker.reset(), Liveness::Online);

    for _ in 0..15 {
        tracker.tick();
    }
    assert_eq!(tracker.reset(), Liveness::Online);
    assert_eq!(tracker.no_response_count(), 0);
    assert!(tracker.is_online());
}

#[test]
fn test_offline_fires_again_after_reset() {
    let mut tracker = LivenessTracker::new(3);
    let fired: Vec<_> = (0..5).filter_map(|_| tracker.tick()).collect();
    assert_eq!(fired, vec![Liveness::Offline]);

    tracker.reset();
    tracker.tick();
    tracker.tick();
    assert_eq!(tracker.tick(), Some(Liveness::Offline));
}

#[test]
fn test_reset_mid_run_restarts_count() {
    let mut tracker = LivenessTracker::default();
    for _ in 0..9 {
        tracker.tick();
    }
    tracker.reset();
    for _ in 0..9 {
        assert_eq!(tracker.tick(), None);
    }
    assert_eq!(tracker.tick(), Some(Liveness::Offline));
}
