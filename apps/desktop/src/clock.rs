use std::time::Instant;

/// The authoritative logical time cursor for the session.
///
/// Anchored against a monotonic instant so `now()` is jitter-free between
/// per-frame callbacks; every transition is synchronous. Nobody else writes
/// time; the video scheduler and audio pool only read it.
pub struct PlaybackClock {
    base_time: f64,
    anchor: Option<Instant>,
    rate: f64,
    seek_generation: u64,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self { base_time: 0.0, anchor: None, rate: 1.0, seek_generation: 0 }
    }
}

impl PlaybackClock {
    pub fn now(&self) -> f64 {
        match self.anchor {
            Some(anchor) => self.base_time + anchor.elapsed().as_secs_f64() * self.rate,
            None => self.base_time,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Bumped by every user-initiated seek. Consumers that run seek-settling
    /// side effects watch this; frame-driven (`driven`) updates leave it
    /// alone so they never re-trigger settling.
    pub fn seek_generation(&self) -> u64 {
        self.seek_generation
    }

    pub fn set_time(&mut self, t: f64, driven: bool) {
        self.base_time = t.max(0.0);
        if self.anchor.is_some() {
            self.anchor = Some(Instant::now());
        }
        if !driven {
            self.seek_generation += 1;
        }
    }

    pub fn play(&mut self) {
        if self.anchor.is_none() {
            self.anchor = Some(Instant::now());
        }
    }

    pub fn pause(&mut self) {
        self.base_time = self.now();
        self.anchor = None;
    }

    /// Re-anchors so elapsed time before the change keeps its old rate.
    pub fn set_rate(&mut self, rate: f64) {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        self.base_time = self.now();
        if self.anchor.is_some() {
            self.anchor = Some(Instant::now());
        }
        self.rate = rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeks_clamp_to_zero() {
        let mut clock = PlaybackClock::default();
        clock.set_time(-5.0, false);
        assert_eq!(clock.now(), 0.0);
    }

    #[test]
    fn driven_updates_do_not_bump_the_seek_generation() {
        let mut clock = PlaybackClock::default();
        let g0 = clock.seek_generation();
        clock.set_time(3.0, true);
        assert_eq!(clock.seek_generation(), g0);
        clock.set_time(4.0, false);
        assert_eq!(clock.seek_generation(), g0 + 1);
    }

    #[test]
    fn paused_clock_holds_its_time() {
        let mut clock = PlaybackClock::default();
        clock.set_time(2.5, false);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.now(), 2.5);
    }

    #[test]
    fn playing_clock_advances_with_rate() {
        let mut clock = PlaybackClock::default();
        clock.set_rate(2.0);
        clock.play();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let t = clock.now();
        assert!(t > 0.02, "expected roughly 2x progress, got {t}");
        clock.pause();
        let held = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.now(), held);
    }
}
