//! Dual-buffer video scheduler.
//!
//! Two buffer slots front a pair of decode workers: the active slot drives
//! the visible frame and is kept time-synced to the playback clock, the
//! standby slot preloads whatever comes next so clip boundaries don't
//! stall. Slot state is ephemeral: every tick re-derives it from the
//! model and the clock.

use std::time::{Duration, Instant};

use media_io::SourceCache;
use timeline::TimelineModel;

use crate::clock::PlaybackClock;
use crate::decode::{spawn_worker, DecodeCmd, DecodeWorker, VideoFrameOut};
use crate::preview::plan::{plan_tick, GapKind, TickPlan};

/// Position error on the active slot before a hard seek. Below this the
/// decoder free-runs.
const DRIFT_TOLERANCE: f64 = 0.05;

/// Settle and buffer-readiness windows for the seek-then-resume sequence.
/// Forward seeks land outside the decoder's buffered window more often, so
/// they get proportionally longer to recover.
pub(crate) fn settle_windows(forward: bool) -> (Duration, Duration) {
    if forward {
        (Duration::from_millis(90), Duration::from_millis(500))
    } else {
        (Duration::from_millis(60), Duration::from_millis(250))
    }
}

#[derive(Default)]
struct BufferSlot {
    worker: Option<DecodeWorker>,
    /// Logical playable id this slot has loaded.
    loaded: Option<String>,
    visible: bool,
    desired_playing: bool,
    last_rate: f32,
}

impl BufferSlot {
    /// Make sure this slot is decoding `playable`, spawning a worker
    /// pre-seeked to `seek_to` on a fresh load. Returns false while the
    /// source cannot be resolved (slot renders black; a warm is kicked off).
    fn ensure_loaded(&mut self, cache: &SourceCache, playable: &str, seek_to: f64) -> bool {
        if self.loaded.as_deref() == Some(playable) {
            return self.worker.is_some();
        }
        let Some(resolved) = cache.resolve(playable) else {
            cache.warm(playable);
            self.unload();
            return false;
        };
        let worker = spawn_worker(&resolved.as_str());
        worker.send(DecodeCmd::Seek { target_pts: seek_to });
        self.worker = Some(worker);
        self.loaded = Some(playable.to_string());
        self.visible = false;
        self.desired_playing = false;
        self.last_rate = 1.0;
        true
    }

    fn unload(&mut self) {
        self.worker = None; // drop stops the thread
        self.loaded = None;
        self.visible = false;
        self.desired_playing = false;
    }

    fn pause(&mut self) {
        if self.desired_playing {
            if let Some(w) = &self.worker {
                w.send(DecodeCmd::Pause);
            }
            self.desired_playing = false;
        }
    }

    fn play(&mut self, from: f64, rate: f32) {
        let rate_changed = (rate - self.last_rate).abs() > f32::EPSILON;
        if !self.desired_playing || rate_changed {
            if let Some(w) = &self.worker {
                w.send(DecodeCmd::Play { start_pts: from, rate });
            }
            self.desired_playing = true;
            self.last_rate = rate;
        }
    }

    fn seek(&mut self, target: f64) {
        if let Some(w) = &self.worker {
            w.send(DecodeCmd::Seek { target_pts: target });
        }
        // A pipe reopen leaves the worker paused; re-arm play on demand.
        self.desired_playing = false;
    }

    fn position(&self) -> f64 {
        self.worker.as_ref().map(|w| w.position()).unwrap_or(0.0)
    }

    fn is_ready(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.is_ready())
    }

    fn has_failed(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.has_failed())
    }
}

/// In-flight seek-then-resume job. A newer seek replaces the whole struct;
/// the token exists so a stale job observed mid-sequence can never resume
/// playback.
struct SeekSettle {
    token: u64,
    apply_at: Instant,
    deadline: Instant,
    applied: bool,
}

pub(crate) struct VideoScheduler {
    slots: [BufferSlot; 2],
    active: usize,
    frozen: bool,
    settle: Option<SeekSettle>,
    settle_token: u64,
    last_seek_generation: u64,
    last_time: f64,
}

impl VideoScheduler {
    pub(crate) fn new() -> Self {
        Self {
            slots: [BufferSlot::default(), BufferSlot::default()],
            active: 0,
            frozen: false,
            settle: None,
            settle_token: 0,
            last_seek_generation: 0,
            last_time: 0.0,
        }
    }

    /// Runs once per frame while the preview is bound, also when paused
    /// and during gaps, since decoder callbacks stop firing then and the
    /// clock still has to be polled.
    pub(crate) fn tick(&mut self, model: &TimelineModel, clock: &PlaybackClock, cache: &SourceCache) {
        let t = clock.now();
        let plan = plan_tick(model, t);
        let now = Instant::now();

        // A user seek starts (or replaces) a settle job: pause, wait out
        // decoder churn, apply the seek, resume only when this job is still
        // the latest.
        let generation = clock.seek_generation();
        if generation != self.last_seek_generation {
            self.last_seek_generation = generation;
            let forward = t > self.last_time;
            let (settle, buffer) = settle_windows(forward);
            self.settle_token += 1;
            self.settle = Some(SeekSettle {
                token: self.settle_token,
                apply_at: now + settle,
                deadline: now + settle + buffer,
                applied: false,
            });
            for slot in &mut self.slots {
                slot.pause();
            }
        }
        self.last_time = t;

        self.drive_current(&plan, clock, cache, now);
        self.preload_standby(&plan, cache);
    }

    fn drive_current(
        &mut self,
        plan: &TickPlan,
        clock: &PlaybackClock,
        cache: &SourceCache,
        now: Instant,
    ) {
        let Some(clip) = &plan.current else {
            match plan.gap {
                // Freeze-frame: the previous frame stays up, paused, so a
                // sub-frame hole doesn't flash black.
                GapKind::Micro if self.slots[self.active].loaded.is_some() => {
                    self.frozen = true;
                    self.slots[self.active].pause();
                    self.slots[self.active].visible = true;
                    self.slots[1 - self.active].visible = false;
                }
                _ => {
                    self.frozen = false;
                    for slot in &mut self.slots {
                        slot.pause();
                        slot.visible = false;
                    }
                }
            }
            return;
        };
        self.frozen = false;

        // Whichever slot already holds the clip becomes active; otherwise
        // force-load into the current primary.
        let idx = self
            .slots
            .iter()
            .position(|s| s.loaded.as_deref() == Some(clip.playable.as_str()))
            .unwrap_or(self.active);
        if !self.slots[idx].ensure_loaded(cache, &clip.playable, clip.media_now) {
            for slot in &mut self.slots {
                slot.visible = false;
                slot.pause();
            }
            return;
        }
        self.active = idx;
        self.slots[idx].visible = true;
        self.slots[1 - idx].visible = false;
        if self.slots[idx].has_failed() {
            // Load failure renders black for this interval; the loop keeps
            // running and will pick the next clip up normally.
            self.slots[idx].visible = false;
            return;
        }

        // Seek settling gates normal sync while in flight. A stale token
        // (a newer seek replaced the job) falls straight through and never
        // resumes anything.
        if let Some(mut settle) = self.settle.take() {
            if settle.token == self.settle_token {
                if now < settle.apply_at {
                    self.slots[idx].pause();
                    self.settle = Some(settle);
                    return;
                }
                if !settle.applied {
                    settle.applied = true;
                    self.slots[idx].seek(clip.media_now);
                    self.settle = Some(settle);
                    return;
                }
                if !self.slots[idx].is_ready() && now < settle.deadline {
                    self.settle = Some(settle);
                    return;
                }
            }
        }

        if clock.is_playing() {
            let drift = self.slots[idx].position() - clip.media_now;
            if drift.abs() > DRIFT_TOLERANCE && self.slots[idx].is_ready() {
                self.slots[idx].seek(clip.media_now);
            }
            self.slots[idx].play(clip.media_now, clock.rate() as f32);
        } else {
            self.slots[idx].pause();
            let drift = self.slots[idx].position() - clip.media_now;
            if drift.abs() > DRIFT_TOLERANCE && self.slots[idx].is_ready() {
                self.slots[idx].seek(clip.media_now);
            }
        }
    }

    /// Pure readahead: park the upcoming clip in the non-active slot,
    /// pre-seeked to its own in-point, neither visible nor audible.
    fn preload_standby(&mut self, plan: &TickPlan, cache: &SourceCache) {
        let Some(next) = &plan.next else { return };
        if self.slots[self.active].loaded.as_deref() == Some(next.playable.as_str()) {
            return;
        }
        let standby = 1 - self.active;
        if self.slots[standby].loaded.as_deref() != Some(next.playable.as_str()) {
            self.slots[standby].ensure_loaded(cache, &next.playable, next.offset);
        }
        self.slots[standby].visible = false;
        self.slots[standby].pause();
    }

    /// The frame the preview should show, or `None` for black.
    pub(crate) fn visible_frame(&self) -> Option<VideoFrameOut> {
        let slot = &self.slots[self.active];
        (slot.visible && !slot.has_failed())
            .then(|| slot.worker.as_ref().and_then(|w| w.latest_frame()))
            .flatten()
    }

    /// True while a micro-gap freeze-frame is being held.
    #[cfg(test)]
    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Drop both workers and all slot state (snapshot restore, dispose).
    pub(crate) fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.unload();
        }
        self.active = 0;
        self.frozen = false;
        self.settle = None;
    }
}

impl Drop for VideoScheduler {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeline::{auto_place_video, SourceRef};

    #[test]
    fn forward_seeks_get_longer_windows() {
        let (fwd_settle, fwd_buffer) = settle_windows(true);
        let (back_settle, back_buffer) = settle_windows(false);
        assert!(fwd_settle > back_settle);
        assert!(fwd_buffer > back_buffer);
    }

    #[test]
    fn unresolvable_media_renders_black_without_panicking() {
        let mut model = TimelineModel::four_lane();
        auto_place_video(&mut model, SourceRef::new("/missing/clip.mp4"), 5.0).unwrap();
        let clock = PlaybackClock::default();
        let cache = SourceCache::new();

        let mut sched = VideoScheduler::new();
        for _ in 0..3 {
            sched.tick(&model, &clock, &cache);
        }
        assert!(sched.visible_frame().is_none());
    }

    #[test]
    fn empty_timeline_is_a_macro_gap() {
        let model = TimelineModel::four_lane();
        let clock = PlaybackClock::default();
        let cache = SourceCache::new();
        let mut sched = VideoScheduler::new();
        sched.tick(&model, &clock, &cache);
        assert!(sched.visible_frame().is_none());
        assert!(!sched.is_frozen());
    }

    #[test]
    fn reset_clears_slots() {
        let mut sched = VideoScheduler::new();
        sched.reset();
        assert!(sched.visible_frame().is_none());
    }
}
